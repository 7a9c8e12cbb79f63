//! The application loop and windows
//!
//! An Application owns every window and is the only place window state
//! is changed or callbacks are run. Each pass waits on the global
//! notifier, drains every window's EventSlot in order, draws the windows
//! whose frame pacer said yes, and finally tears down windows that were
//! closed during the pass.
use crate::config::{CreateInfo, WindowConfig};
use crate::dispatch::{Dispatcher, WindowRouter};
use crate::event::{
    ButtonState, Event, KeyState, MouseButton, RepeatTiming, ScrollAxis, UserData, WindowId,
};
use crate::gpu::{GpuContext, GpuLease, GpuSurface};
use crate::pacer::{FramePacer, Pacing};
use crate::protocol::{NativeWindow, ProtocolConnection, ProtocolSource};
use crate::repeat::KeyRepeater;
use crate::slot::{EventSlot, Notifier};
use crate::window::{Lifecycle, WindowRecord};
use crate::SquallError;
use utils::log;
use utils::region::Rect;
use utils::timing::StopWatch;
use utils::{Context, Result};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Callbacks a window's owner can implement.
///
/// All of these run on the application loop's thread, one at a time.
/// Sizes and positions are in logical units unless noted otherwise.
pub trait WindowHandler {
    /// Draw the window's contents. The frame is presented on return.
    fn on_refresh(&mut self, _win: &mut Window) {}
    fn on_resize(&mut self, _win: &mut Window, _width: u32, _height: u32) {}
    fn on_key(&mut self, _win: &mut Window, _code: u32, _state: KeyState) {}
    fn on_key_enter(&mut self, _win: &mut Window) {}
    fn on_key_leave(&mut self, _win: &mut Window) {}
    /// Position is in surface coordinates
    fn on_pointer_move(&mut self, _win: &mut Window, _x: f64, _y: f64) {}
    /// Reports where the pointer was when the button changed
    fn on_click(
        &mut self,
        _win: &mut Window,
        _button: MouseButton,
        _state: ButtonState,
        _x: f64,
        _y: f64,
    ) {
    }
    fn on_scroll(&mut self, _win: &mut Window, _axis: ScrollAxis, _delta: f64) {}
    fn on_touch_down(&mut self, _win: &mut Window, _id: i32, _x: f64, _y: f64) {}
    fn on_touch_move(&mut self, _win: &mut Window, _id: i32, _x: f64, _y: f64) {}
    fn on_touch_up(&mut self, _win: &mut Window, _id: i32) {}
    /// The user asked to close the window. Closes it unless overridden.
    fn on_close_request(&mut self, win: &mut Window) {
        win.close();
    }
    /// A payload posted through a WindowProxy
    fn on_user_data(&mut self, _win: &mut Window, _data: UserData) {}
}

/// Posts events to a window from any thread.
///
/// Posts to a window that has been closed are dropped.
#[derive(Clone)]
pub struct WindowProxy {
    wp_id: WindowId,
    wp_slot: Arc<EventSlot>,
}

impl WindowProxy {
    pub fn id(&self) -> WindowId {
        self.wp_id
    }

    /// Deliver `data` to the window's `on_user_data`
    pub fn post_user_data(&self, data: UserData) {
        self.wp_slot.push(Event::UserData(data));
    }

    /// Ask the window to redraw, subject to frame pacing
    pub fn request_refresh(&self) {
        self.wp_slot.push(Event::Refresh);
    }

    pub fn is_closed(&self) -> bool {
        self.wp_slot.is_closed()
    }
}

/// Stops the application loop from any thread
#[derive(Clone)]
pub struct QuitHandle {
    qh_quit: Arc<AtomicBool>,
    qh_notify: Arc<Notifier>,
}

impl QuitHandle {
    pub fn quit(&self) {
        self.qh_quit.store(true, Ordering::SeqCst);
        self.qh_notify.signal();
    }
}

pub struct Window {
    w_id: WindowId,
    w_record: WindowRecord,
    w_pacer: FramePacer,
    w_slot: Arc<EventSlot>,
    w_title: String,
    w_handler: Option<Box<dyn WindowHandler>>,
    w_repeater: Option<KeyRepeater>,
    /// The pacer granted a frame that has not been drawn yet
    w_draw_due: bool,
    /// The logical size changed outside of a configure
    w_resize_due: bool,
    // Teardown order matters: the drawable goes before the protocol
    // surface it targets, and the GPU reference goes last.
    w_surface: Box<dyn GpuSurface>,
    w_native: Box<dyn NativeWindow>,
    w_lease: GpuLease,
}

impl Window {
    pub fn id(&self) -> WindowId {
        self.w_id
    }

    pub fn state(&self) -> Lifecycle {
        self.w_record.state()
    }

    pub fn title(&self) -> &str {
        &self.w_title
    }

    pub fn set_title(&mut self, title: &str) {
        self.w_title = title.to_string();
        self.w_native.set_title(title);
    }

    /// Ask for a redraw.
    ///
    /// Requests made while a frame is in flight are folded into one
    /// redraw that happens when the compositor is ready. Before the first
    /// configure the request is held until the window can be drawn.
    pub fn refresh(&mut self) {
        match self.w_record.state() {
            Lifecycle::Destructing => {}
            Lifecycle::Constructing => self.w_pacer.defer_refresh(),
            Lifecycle::Running => {
                if self.w_pacer.request_refresh() == Pacing::Draw {
                    self.w_draw_due = true;
                }
            }
        }
    }

    /// Close the window.
    ///
    /// The window is Destructing as soon as this returns: queued events
    /// are dropped and no further callbacks run for it. Its resources are
    /// released at the end of the current loop pass.
    pub fn close(&mut self) {
        if self.w_record.set_state(Lifecycle::Destructing) {
            self.w_slot.close();
            self.w_repeater = None;
            self.w_draw_due = false;
            log::info!("Window {:?} closed", self.w_id);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.w_record.state() == Lifecycle::Destructing
    }

    fn after_scale_change(&mut self, old_size: (u32, u32)) {
        if self.w_record.is_configured() && self.w_record.window_size() != old_size {
            self.w_resize_due = true;
            self.refresh();
        }
    }

    /// Force a draw scale. `None`, or anything below the minimum scale,
    /// returns to automatic scaling.
    pub fn set_scale(&mut self, scale: Option<f64>) {
        let old_size = self.w_record.window_size();
        self.w_record.set_override_scale(scale);
        self.after_scale_change(old_size);
    }

    /// Follow the output's scale when no override is set
    pub fn set_follow_buffer_scale(&mut self, follow: bool) {
        let old_size = self.w_record.window_size();
        self.w_record.set_follow_buffer_scale(follow);
        self.after_scale_change(old_size);
    }

    pub fn set_event_driven(&mut self, event_driven: bool) {
        self.w_record.set_event_driven(event_driven);
    }

    pub fn is_event_driven(&self) -> bool {
        self.w_record.is_event_driven()
    }

    /// Logical size of the window
    pub fn get_window_size(&self) -> (u32, u32) {
        self.w_record.window_size()
    }

    /// Size of the drawable in pixels
    pub fn get_buffer_size(&self) -> (u32, u32) {
        self.w_record.buffer_size()
    }

    /// Scale of the output the window is on
    pub fn get_device_scale(&self) -> f64 {
        self.w_record.device_scale()
    }

    pub fn get_draw_scale(&self) -> f64 {
        self.w_record.draw_scale()
    }

    /// Aim drawing at a sub-region of the buffer.
    ///
    /// The region is clamped to the buffer, now and on every resize.
    pub fn set_viewport(&mut self, viewport: Rect<i32>) {
        self.w_record.set_viewport(viewport);
    }

    pub fn unset_viewport(&mut self) {
        self.w_record.unset_viewport();
    }

    pub fn get_viewport(&self) -> Rect<i32> {
        self.w_record.viewport()
    }

    pub fn frames_submitted(&self) -> u64 {
        self.w_pacer.frames_submitted()
    }

    /// A handle other threads can post events through
    pub fn proxy(&self) -> WindowProxy {
        WindowProxy {
            wp_id: self.w_id,
            wp_slot: self.w_slot.clone(),
        }
    }

    /// The GPU context this window draws with, for forking on workers
    pub fn gpu_context(&self) -> GpuContext {
        self.w_lease.context().clone()
    }

    pub fn surface_mut(&mut self) -> &mut dyn GpuSurface {
        self.w_surface.as_mut()
    }

    /// Run `func` with the handler taken out of the window so it can be
    /// handed the window mutably.
    fn with_handler<F>(&mut self, func: F)
    where
        F: FnOnce(&mut dyn WindowHandler, &mut Window),
    {
        if let Some(mut handler) = self.w_handler.take() {
            func(handler.as_mut(), self);
            self.w_handler = Some(handler);
        }
    }

    fn cancel_repeat(&mut self) {
        if let Some(repeater) = self.w_repeater.take() {
            repeater.cancel();
        }
    }

    fn start_repeat(&mut self, code: u32) {
        // the old stream must be gone before a new one starts
        self.cancel_repeat();

        if let Some(timing) = self.w_record.repeat_timing() {
            let slot = self.w_slot.clone();
            self.w_repeater = Some(KeyRepeater::start(code, timing, move |key| {
                slot.push(Event::KeyInput {
                    code: key,
                    state: KeyState::Repeat,
                })
            }));
        }
    }

    fn repeating_key(&self) -> Option<u32> {
        self.w_repeater.as_ref().map(|r| r.key())
    }

    fn handle_key(&mut self, code: u32, state: KeyState) {
        match state {
            KeyState::Pressed => self.start_repeat(code),
            KeyState::Released => {
                if self.repeating_key() == Some(code) {
                    self.cancel_repeat();
                }
            }
            KeyState::Repeat => {
                if self.repeating_key() != Some(code) {
                    log::debug!("Dropping stale repeat of key {}", code);
                    return;
                }
            }
        }

        self.with_handler(|h, win| h.on_key(win, code, state));
    }

    /// Apply a configure from the compositor
    fn handle_resize(&mut self, width: u32, height: u32) -> Result<()> {
        let first = !self.w_record.is_configured();
        let changed = self.w_record.set_buffer_size(width, height);

        if changed || first {
            let (bw, bh) = self.w_record.buffer_size();
            self.w_surface.resize(bw, bh);
        }

        if first || changed {
            let (lw, lh) = self.w_record.window_size();
            self.with_handler(|h, win| h.on_resize(win, lw, lh));
        }

        if first && self.w_record.state() == Lifecycle::Constructing {
            // The first frame completes the handshake
            self.w_pacer.request_refresh();
            self.draw_frame()?;
            if self.w_record.set_state(Lifecycle::Running) {
                log::info!("Window {:?} is running", self.w_id);
            }
        } else if changed {
            self.refresh();
        }

        Ok(())
    }

    /// Events the loop consumes itself, callbacks never see these
    fn handle_internal(&mut self, event: Event, seat_repeat: &mut Option<RepeatTiming>) {
        match event {
            Event::FrameDone => {
                if self.w_pacer.frame_done(self.w_record.is_event_driven()) == Pacing::Draw {
                    self.w_draw_due = true;
                }
            }
            Event::Rescale { scale } => {
                let old_size = self.w_record.window_size();
                if self.w_record.set_device_scale(scale) {
                    log::debug!(
                        "Window {:?} draw scale is now {}",
                        self.w_id,
                        self.w_record.draw_scale()
                    );
                    self.after_scale_change(old_size);
                }
            }
            Event::RepeatInfo { timing } => {
                self.w_record.set_repeat_timing(timing);
                *seat_repeat = timing;
                if timing.is_none() {
                    self.cancel_repeat();
                }
            }
            _ => {}
        }
    }

    fn handle_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Refresh => self.refresh(),
            Event::Resize { width, height } => self.handle_resize(width, height)?,
            Event::KeyInput { code, state } => self.handle_key(code, state),
            Event::KeyEnter => self.with_handler(|h, win| h.on_key_enter(win)),
            Event::KeyLeave => {
                self.cancel_repeat();
                self.with_handler(|h, win| h.on_key_leave(win));
            }
            Event::PointerMove { x, y } => {
                self.w_record.set_pointer_pos(x, y);
                self.with_handler(|h, win| h.on_pointer_move(win, x, y));
            }
            Event::PointerButton { button, state } => {
                let (x, y) = self.w_record.pointer_pos();
                self.with_handler(|h, win| h.on_click(win, button, state, x, y));
            }
            Event::Scroll { axis, delta } => {
                self.with_handler(|h, win| h.on_scroll(win, axis, delta))
            }
            Event::TouchDown { id, x, y } => {
                self.with_handler(|h, win| h.on_touch_down(win, id, x, y))
            }
            Event::TouchMove { id, x, y } => {
                self.with_handler(|h, win| h.on_touch_move(win, id, x, y))
            }
            Event::TouchUp { id } => self.with_handler(|h, win| h.on_touch_up(win, id)),
            Event::CloseRequest => self.with_handler(|h, win| h.on_close_request(win)),
            Event::UserData(data) => self.with_handler(|h, win| h.on_user_data(win, data)),
            Event::FrameDone | Event::Rescale { .. } | Event::RepeatInfo { .. } => {}
        }

        Ok(())
    }

    /// Draw and present one frame.
    ///
    /// A present failure means the GPU context is gone and is returned
    /// as fatal.
    fn draw_frame(&mut self) -> Result<()> {
        self.w_draw_due = false;
        if self.is_closed() {
            return Ok(());
        }

        let mut stop = StopWatch::new();
        stop.start();

        let viewport = self.w_record.viewport();
        self.w_surface.prepare_viewport(&viewport);
        self.with_handler(|h, win| h.on_refresh(win));

        // closed from inside on_refresh
        if self.is_closed() {
            return Ok(());
        }

        self.w_native.request_frame();
        if let Err(e) = self.w_surface.present() {
            log::critical!("Presenting window {:?} failed: {:?}", self.w_id, e);
            return Err(SquallError::PresentFailed(format!("{:#}", e)).into());
        }
        self.w_native.commit();
        self.w_pacer.frame_submitted();

        stop.end();
        log::profiling!(
            "Window {:?} frame {} took {} ms",
            self.w_id,
            self.w_pacer.frames_submitted(),
            stop.get_duration().as_secs_f64() * 1000.0
        );
        Ok(())
    }

    /// Run everything queued for this window, then draw if a frame is due
    fn process(&mut self, seat_repeat: &mut Option<RepeatTiming>) -> Result<()> {
        let mut events = self.w_slot.drain();

        for event in events.drain(..) {
            // Nothing reaches a window once it is destructing
            if self.is_closed() {
                break;
            }
            if event.is_internal() {
                self.handle_internal(event, seat_repeat);
            } else {
                self.handle_event(event)?;
            }
        }
        self.w_slot.recycle(events);

        if self.w_resize_due && !self.is_closed() {
            self.w_resize_due = false;
            let (lw, lh) = self.w_record.window_size();
            self.with_handler(|h, win| h.on_resize(win, lw, lh));
        }

        if self.w_draw_due {
            self.draw_frame()?;
        }

        Ok(())
    }
}

pub struct Application {
    a_info: CreateInfo,
    a_windows: Vec<Window>,
    a_conn: Box<dyn ProtocolConnection>,
    a_gpu: GpuContext,
    a_router: Arc<WindowRouter>,
    a_notify: Arc<Notifier>,
    a_quit: Arc<AtomicBool>,
    /// Latest repeat timing announced for the seat
    a_repeat: Option<RepeatTiming>,
    a_next_id: u32,
    a_dispatcher: Dispatcher,
}

impl Application {
    /// Start the dispatcher on `source` and get ready to create windows.
    ///
    /// The GPU is not touched until the first window is created.
    pub fn new(
        info: CreateInfo,
        conn: Box<dyn ProtocolConnection>,
        source: Box<dyn ProtocolSource>,
        gpu: GpuContext,
    ) -> Result<Self> {
        let router = Arc::new(WindowRouter::new());
        let notify = Arc::new(Notifier::new());
        let dispatcher = Dispatcher::spawn(
            &info.dispatcher_name,
            source,
            router.clone(),
            notify.clone(),
        )
        .context("Could not start the protocol dispatcher")?;

        Ok(Self {
            a_repeat: info.default_repeat,
            a_info: info,
            a_windows: Vec::new(),
            a_conn: conn,
            a_gpu: gpu,
            a_router: router,
            a_notify: notify,
            a_quit: Arc::new(AtomicBool::new(false)),
            a_next_id: 1,
            a_dispatcher: dispatcher,
        })
    }

    /// Create a window. It starts out Constructing and becomes Running
    /// once the compositor has configured it and its first frame is up.
    pub fn create_window(
        &mut self,
        config: WindowConfig,
        handler: Box<dyn WindowHandler>,
    ) -> Result<WindowId> {
        let id = WindowId(self.a_next_id);
        self.a_next_id += 1;

        // Registered before anything is committed so the configure reply
        // has somewhere to go
        let slot = Arc::new(EventSlot::new(Some(self.a_notify.clone())));
        self.a_router.register(id, slot.clone());

        match self.build_window(id, &config, slot, handler) {
            Ok(win) => {
                log::info!("Created window {:?} \"{}\"", id, config.title());
                self.a_windows.push(win);
                Ok(id)
            }
            Err(e) => {
                self.a_router.unregister(id);
                Err(e)
            }
        }
    }

    fn build_window(
        &mut self,
        id: WindowId,
        config: &WindowConfig,
        slot: Arc<EventSlot>,
        handler: Box<dyn WindowHandler>,
    ) -> Result<Window> {
        let lease = self.a_gpu.acquire()?;
        let native = self
            .a_conn
            .create_window(id, config)
            .context("Could not create the protocol surface")?;

        let (width, height) = config.size();
        let surface = lease
            .device()
            .create_surface(native.surface_handle(), width, height)
            .map_err(|e| {
                log::critical!("Could not create a GPU surface: {:?}", e);
                utils::Error::new(SquallError::SurfaceCreation(format!("{:#}", e)))
            })?;

        let mut win = Window {
            w_id: id,
            w_record: WindowRecord::new(
                width,
                height,
                config.is_event_driven(),
                native.surface_handle(),
                self.a_repeat,
            ),
            w_pacer: FramePacer::new(),
            w_slot: slot,
            w_title: config.title().to_string(),
            w_handler: Some(handler),
            w_repeater: None,
            w_draw_due: false,
            w_resize_due: false,
            w_surface: surface,
            w_native: native,
            w_lease: lease,
        };

        // The empty commit asks the compositor for our first configure
        win.w_native.commit();
        self.a_conn.flush()?;

        Ok(win)
    }

    pub fn window(&mut self, id: WindowId) -> Option<&mut Window> {
        self.a_windows.iter_mut().find(|w| w.w_id == id)
    }

    /// A proxy for posting to `id` from other threads
    pub fn proxy(&self, id: WindowId) -> Result<WindowProxy> {
        self.a_windows
            .iter()
            .find(|w| w.w_id == id && !w.is_closed())
            .map(|w| w.proxy())
            .ok_or_else(|| SquallError::WindowClosed.into())
    }

    pub fn window_count(&self) -> usize {
        self.a_windows.len()
    }

    pub fn gpu_context(&self) -> &GpuContext {
        &self.a_gpu
    }

    /// Close every window. They are torn down on the next pass.
    pub fn close_all_windows(&mut self) {
        for win in self.a_windows.iter_mut() {
            win.close();
        }
        self.a_notify.signal();
    }

    /// Make `run` return after the current pass
    pub fn quit(&mut self) {
        self.a_quit.store(true, Ordering::SeqCst);
        self.a_notify.signal();
    }

    pub fn quit_handle(&self) -> QuitHandle {
        QuitHandle {
            qh_quit: self.a_quit.clone(),
            qh_notify: self.a_notify.clone(),
        }
    }

    pub fn is_quit_requested(&self) -> bool {
        self.a_quit.load(Ordering::SeqCst)
    }

    fn check_connection(&self) -> Result<()> {
        if self.a_dispatcher.is_connection_lost() {
            return Err(SquallError::ConnectionLost.into());
        }
        Ok(())
    }

    /// Tear down windows that closed this pass
    fn reap_windows(&mut self) {
        let router = &self.a_router;
        self.a_windows.retain(|win| {
            if !win.is_closed() {
                return true;
            }
            router.unregister(win.w_id);
            // anything that raced in before the close is discarded
            let dropped = win.w_slot.drain().len();
            log::info!(
                "Destroying window {:?} ({} undelivered events)",
                win.w_id,
                dropped
            );
            false
        });
    }

    /// Run one pass of the loop.
    ///
    /// Waits up to `timeout` (forever for `None`) for any window to have
    /// events, then processes every window. Returns immediately if a
    /// window already has a frame due or is waiting to be torn down.
    pub fn dispatch(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.check_connection()?;

        // frames due or windows waiting to be reaped need no wakeup
        if self.a_windows.iter().any(|w| w.w_draw_due || w.is_closed()) {
            self.a_notify.try_consume();
        } else {
            match timeout {
                Some(t) => {
                    self.a_notify.wait_timeout(t);
                }
                None => self.a_notify.wait(),
            }
        }
        self.check_connection()?;

        let mut seat_repeat = self.a_repeat;
        let mut res = Ok(());
        for win in self.a_windows.iter_mut() {
            if let Err(e) = win.process(&mut seat_repeat) {
                res = Err(e);
                break;
            }
        }
        self.a_repeat = seat_repeat;
        res?;

        self.reap_windows();
        self.a_conn.flush()
    }

    /// Process events until `quit` is called, or until the last window
    /// is gone if the app was created with `exit_on_last_window`.
    pub fn run(&mut self) -> Result<()> {
        log::debug!("Entering the application loop");
        loop {
            if self.is_quit_requested() {
                break;
            }
            if self.a_info.exit_on_last_window && self.a_windows.is_empty() {
                log::debug!("Last window closed, leaving the application loop");
                break;
            }
            self.dispatch(None)?;
        }
        Ok(())
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.a_dispatcher.stop();
        for win in self.a_windows.iter_mut() {
            win.close();
        }
        self.reap_windows();
    }
}
