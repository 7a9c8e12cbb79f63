//! Window state
//!
//! The WindowRecord holds everything the application loop tracks for one
//! window: its lifecycle, the buffer size handed to us by the compositor,
//! the scale we draw at, and the viewport drawing is aimed at. Only the
//! application loop mutates it.
use crate::event::RepeatTiming;
use crate::gpu::SurfaceHandle;
use utils::log;
use utils::region::Rect;

/// Override scales below this are treated as unset
pub const MIN_SCALE: f64 = 0.01;

/// Lifecycle of a window. Transitions only move forward.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    /// Protocol objects exist but the first frame has not been committed
    Constructing,
    Running,
    /// Closed by the app or the user, waiting to be torn down
    Destructing,
}

#[derive(Debug)]
pub struct WindowRecord {
    w_state: Lifecycle,
    /// Has the compositor told us our size yet
    w_configured: bool,
    /// Size of the drawable in pixels
    w_buffer_size: (u32, u32),
    /// Scale of the output we are on
    w_device_scale: f64,
    /// Scale forced by the application
    w_override_scale: Option<f64>,
    w_follow_buffer_scale: bool,
    /// The scale actually used for drawing
    w_draw_scale: f64,
    /// Buffer size in logical units
    w_window_size: (u32, u32),
    /// Full buffer unless a sub-region was requested
    w_viewport: Rect<i32>,
    /// The sub-region requested by the application, if any
    w_custom_viewport: Option<Rect<i32>>,
    w_event_driven: bool,
    w_surface_handle: SurfaceHandle,
    /// Last pointer position seen, in surface coordinates
    w_pointer_pos: (f64, f64),
    w_repeat_timing: Option<RepeatTiming>,
}

impl WindowRecord {
    pub fn new(
        width: u32,
        height: u32,
        event_driven: bool,
        handle: SurfaceHandle,
        repeat_timing: Option<RepeatTiming>,
    ) -> Self {
        let mut ret = Self {
            w_state: Lifecycle::Constructing,
            w_configured: false,
            w_buffer_size: (width, height),
            w_device_scale: 1.0,
            w_override_scale: None,
            w_follow_buffer_scale: true,
            w_draw_scale: 1.0,
            w_window_size: (width, height),
            w_viewport: Rect::new(0, 0, width as i32, height as i32),
            w_custom_viewport: None,
            w_event_driven: event_driven,
            w_surface_handle: handle,
            w_pointer_pos: (0.0, 0.0),
            w_repeat_timing: repeat_timing,
        };
        ret.reconcile();
        ret
    }

    /// Recompute the draw scale, logical size and viewport.
    ///
    /// An override scale wins over following the output, and the
    /// viewport is clamped only once the size is final.
    pub fn reconcile(&mut self) {
        self.w_draw_scale = match self.w_override_scale {
            Some(scale) if scale >= MIN_SCALE => scale,
            _ if self.w_follow_buffer_scale => self.w_device_scale,
            _ => 1.0,
        };

        let (bw, bh) = self.w_buffer_size;
        self.w_window_size = (
            (bw as f64 / self.w_draw_scale) as u32,
            (bh as f64 / self.w_draw_scale) as u32,
        );

        self.w_viewport = match self.w_custom_viewport {
            Some(vp) => vp.clamp_to(bw as i32, bh as i32),
            None => Rect::new(0, 0, bw as i32, bh as i32),
        };
    }

    pub fn state(&self) -> Lifecycle {
        self.w_state
    }

    /// Move the window forward in its lifecycle.
    ///
    /// Returns false, and changes nothing, for a backwards transition.
    pub fn set_state(&mut self, state: Lifecycle) -> bool {
        if state <= self.w_state {
            return false;
        }
        log::debug!("Window moving from {:?} to {:?}", self.w_state, state);
        self.w_state = state;
        true
    }

    pub fn is_configured(&self) -> bool {
        self.w_configured
    }

    /// Apply a new buffer size from the compositor.
    ///
    /// Zero dimensions mean the compositor left the choice to us, so the
    /// current dimension is kept. Returns true if the size changed.
    pub fn set_buffer_size(&mut self, width: u32, height: u32) -> bool {
        self.w_configured = true;
        let new_size = (
            if width == 0 { self.w_buffer_size.0 } else { width },
            if height == 0 { self.w_buffer_size.1 } else { height },
        );
        let changed = new_size != self.w_buffer_size;
        self.w_buffer_size = new_size;
        self.reconcile();
        changed
    }

    pub fn buffer_size(&self) -> (u32, u32) {
        self.w_buffer_size
    }

    /// Returns true if the draw scale changed as a result
    pub fn set_device_scale(&mut self, scale: f64) -> bool {
        let old = self.w_draw_scale;
        if scale >= MIN_SCALE {
            self.w_device_scale = scale;
        } else {
            log::error!("Ignoring invalid device scale {}", scale);
        }
        self.reconcile();
        old != self.w_draw_scale
    }

    pub fn device_scale(&self) -> f64 {
        self.w_device_scale
    }

    /// Force a draw scale, `None` goes back to automatic scaling
    pub fn set_override_scale(&mut self, scale: Option<f64>) {
        self.w_override_scale = scale;
        self.reconcile();
    }

    pub fn set_follow_buffer_scale(&mut self, follow: bool) {
        self.w_follow_buffer_scale = follow;
        self.reconcile();
    }

    pub fn draw_scale(&self) -> f64 {
        self.w_draw_scale
    }

    /// Logical size of the window
    pub fn window_size(&self) -> (u32, u32) {
        self.w_window_size
    }

    pub fn set_viewport(&mut self, viewport: Rect<i32>) {
        self.w_custom_viewport = Some(viewport);
        self.reconcile();
    }

    pub fn unset_viewport(&mut self) {
        self.w_custom_viewport = None;
        self.reconcile();
    }

    pub fn viewport(&self) -> Rect<i32> {
        self.w_viewport
    }

    pub fn set_event_driven(&mut self, event_driven: bool) {
        self.w_event_driven = event_driven;
    }

    pub fn is_event_driven(&self) -> bool {
        self.w_event_driven
    }

    pub fn surface_handle(&self) -> SurfaceHandle {
        self.w_surface_handle
    }

    pub fn set_pointer_pos(&mut self, x: f64, y: f64) {
        self.w_pointer_pos = (x, y);
    }

    pub fn pointer_pos(&self) -> (f64, f64) {
        self.w_pointer_pos
    }

    pub fn set_repeat_timing(&mut self, timing: Option<RepeatTiming>) {
        self.w_repeat_timing = timing;
    }

    pub fn repeat_timing(&self) -> Option<RepeatTiming> {
        self.w_repeat_timing
    }
}
