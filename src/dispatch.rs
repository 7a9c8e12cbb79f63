//! The dispatcher thread
//!
//! Blocks on the protocol descriptor and a stop pipe. When the protocol
//! has traffic it dispatches the binding, translates each native event
//! into our Event vocabulary, and pushes it into the destination window's
//! EventSlot. It never touches window state directly.
use crate::event::{convert_linux_button, ButtonState, Event, KeyState, RepeatTiming, ScrollAxis, WindowId};
use crate::protocol::{EventSink, EventTarget, NativeEvent, ProtocolSource};
use crate::slot::{EventSlot, Notifier};
use utils::fdwatch::{FdWatch, WakePipe};
use utils::log;
use utils::{Context, Result};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

/// Maps live windows to their EventSlots.
///
/// Shared between the dispatcher, which looks slots up, and the
/// application loop, which registers and removes them.
pub struct WindowRouter {
    wr_slots: RwLock<HashMap<WindowId, Arc<EventSlot>>>,
}

impl WindowRouter {
    pub fn new() -> Self {
        Self {
            wr_slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, id: WindowId, slot: Arc<EventSlot>) {
        self.wr_slots.write().unwrap_or_else(|e| e.into_inner()).insert(id, slot);
    }

    pub fn unregister(&self, id: WindowId) {
        self.wr_slots.write().unwrap_or_else(|e| e.into_inner()).remove(&id);
    }

    pub fn slot(&self, id: WindowId) -> Option<Arc<EventSlot>> {
        self.wr_slots.read().unwrap_or_else(|e| e.into_inner()).get(&id).cloned()
    }

    pub fn window_ids(&self) -> Vec<WindowId> {
        self.wr_slots.read().unwrap_or_else(|e| e.into_inner()).keys().copied().collect()
    }
}

/// Turn a native event into the tagged event a window receives.
///
/// Returns None for events that carry nothing for the window.
pub fn translate(event: NativeEvent) -> Option<Event> {
    let ev = match event {
        NativeEvent::Configure { width, height } => Event::Resize {
            width: width.max(0) as u32,
            height: height.max(0) as u32,
        },
        NativeEvent::Close => Event::CloseRequest,
        NativeEvent::FrameDone => Event::FrameDone,
        NativeEvent::OutputScale(scale) if scale > 0 => Event::Rescale {
            scale: scale as f64,
        },
        NativeEvent::PreferredScale(v) if v > 0 => Event::Rescale {
            scale: v as f64 / 120.0,
        },
        NativeEvent::OutputScale(_) | NativeEvent::PreferredScale(_) => {
            log::error!("Ignoring non-positive scale from the compositor");
            return None;
        }
        NativeEvent::KeyboardEnter => Event::KeyEnter,
        NativeEvent::KeyboardLeave => Event::KeyLeave,
        NativeEvent::Key { key, pressed } => Event::KeyInput {
            code: key,
            state: match pressed {
                true => KeyState::Pressed,
                false => KeyState::Released,
            },
        },
        NativeEvent::RepeatInfo { rate, delay } => Event::RepeatInfo {
            timing: RepeatTiming::from_rate(rate, delay),
        },
        NativeEvent::PointerEnter { x, y } | NativeEvent::PointerMotion { x, y } => {
            Event::PointerMove { x: x, y: y }
        }
        NativeEvent::PointerLeave => return None,
        NativeEvent::PointerButton { button, pressed } => Event::PointerButton {
            button: convert_linux_button(button),
            state: match pressed {
                true => ButtonState::Pressed,
                false => ButtonState::Released,
            },
        },
        NativeEvent::Axis { horizontal, value } => Event::Scroll {
            axis: match horizontal {
                true => ScrollAxis::Horizontal,
                false => ScrollAxis::Vertical,
            },
            delta: value,
        },
        NativeEvent::TouchDown { id, x, y } => Event::TouchDown { id: id, x: x, y: y },
        NativeEvent::TouchMotion { id, x, y } => Event::TouchMove { id: id, x: x, y: y },
        NativeEvent::TouchUp { id } => Event::TouchUp { id: id },
    };

    Some(ev)
}

/// Collects one dispatch worth of events so each window is woken once
struct RouterSink<'a> {
    rs_router: &'a WindowRouter,
    rs_batches: HashMap<WindowId, Vec<Event>>,
}

impl<'a> RouterSink<'a> {
    fn new(router: &'a WindowRouter) -> Self {
        Self {
            rs_router: router,
            rs_batches: HashMap::new(),
        }
    }

    fn queue(&mut self, id: WindowId, event: NativeEvent) {
        if let Some(ev) = translate(event) {
            self.rs_batches.entry(id).or_insert_with(Vec::new).push(ev);
        }
    }

    /// Push every collected batch into its window's slot
    fn flush(&mut self) {
        for (id, events) in self.rs_batches.drain() {
            match self.rs_router.slot(id) {
                Some(slot) => slot.push_batch(events),
                None => log::debug!(
                    "Dropping {} events for unknown window {:?}",
                    events.len(),
                    id
                ),
            }
        }
    }
}

impl<'a> EventSink for RouterSink<'a> {
    fn post(&mut self, target: EventTarget, event: NativeEvent) {
        match target {
            EventTarget::Window(id) => self.queue(id, event),
            EventTarget::Seat => {
                for id in self.rs_router.window_ids() {
                    self.queue(id, event.clone());
                }
            }
        }
    }
}

pub struct Dispatcher {
    d_thread: Option<JoinHandle<()>>,
    d_stop: Arc<WakePipe>,
    d_lost: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Start the dispatcher thread. It owns `source` from now on.
    ///
    /// `global` is signaled if the connection dies so the application
    /// loop notices.
    pub fn spawn(
        name: &str,
        mut source: Box<dyn ProtocolSource>,
        router: Arc<WindowRouter>,
        global: Arc<Notifier>,
    ) -> Result<Self> {
        let stop = Arc::new(WakePipe::new().context("Could not create dispatcher stop pipe")?);
        let lost = Arc::new(AtomicBool::new(false));

        let thread_stop = stop.clone();
        let thread_lost = lost.clone();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let proto_fd = source.as_raw_fd();
                let stop_fd = thread_stop.read_fd();
                let mut watch = FdWatch::new();
                watch.add_fd(proto_fd);
                watch.add_fd(stop_fd);
                log::debug!("Dispatcher started on fd {}", proto_fd);

                loop {
                    let ready = match watch.wait_for_events(None) {
                        Ok(ready) => ready,
                        Err(e) => {
                            log::critical!("Dispatcher wait failed: {:?}", e);
                            thread_lost.store(true, Ordering::SeqCst);
                            global.signal();
                            break;
                        }
                    };

                    if ready.contains(&stop_fd) {
                        thread_stop.drain();
                        break;
                    }

                    if ready.contains(&proto_fd) {
                        let mut sink = RouterSink::new(&router);
                        let res = source.dispatch_pending(&mut sink);
                        // deliver whatever was read before any failure
                        sink.flush();

                        if let Err(e) = res {
                            log::critical!("Lost the compositor connection: {:?}", e);
                            thread_lost.store(true, Ordering::SeqCst);
                            global.signal();
                            break;
                        }
                    }
                }

                log::debug!("Dispatcher exiting");
            })
            .context("Could not spawn the dispatcher thread")?;

        Ok(Self {
            d_thread: Some(thread),
            d_stop: stop,
            d_lost: lost,
        })
    }

    /// Has the protocol connection failed
    pub fn is_connection_lost(&self) -> bool {
        self.d_lost.load(Ordering::SeqCst)
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(&mut self) {
        if let Some(thread) = self.d_thread.take() {
            self.d_stop.wake();
            if thread.join().is_err() {
                log::error!("Dispatcher thread panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MouseButton;
    use crate::protocol::headless;
    use std::time::Duration;

    #[test]
    fn translation() {
        match translate(NativeEvent::Configure {
            width: -1,
            height: 300,
        }) {
            Some(Event::Resize { width, height }) => assert_eq!((width, height), (0, 300)),
            other => panic!("unexpected {:?}", other),
        }
        match translate(NativeEvent::PreferredScale(180)) {
            Some(Event::Rescale { scale }) => assert_eq!(scale, 1.5),
            other => panic!("unexpected {:?}", other),
        }
        match translate(NativeEvent::PointerButton {
            button: 0x110,
            pressed: true,
        }) {
            Some(Event::PointerButton { button, state }) => {
                assert_eq!(button, MouseButton::Left);
                assert_eq!(state, ButtonState::Pressed);
            }
            other => panic!("unexpected {:?}", other),
        }
        match translate(NativeEvent::RepeatInfo { rate: 0, delay: 500 }) {
            Some(Event::RepeatInfo { timing }) => assert_eq!(timing, None),
            other => panic!("unexpected {:?}", other),
        }
        assert!(translate(NativeEvent::PointerLeave).is_none());
        assert!(translate(NativeEvent::OutputScale(0)).is_none());
    }

    #[test]
    fn routes_to_the_right_slot_in_order() {
        let (server, _conn, source) = headless::connect().unwrap();
        let router = Arc::new(WindowRouter::new());
        let global = Arc::new(Notifier::new());

        let a = Arc::new(EventSlot::new(Some(global.clone())));
        let b = Arc::new(EventSlot::new(Some(global.clone())));
        router.register(WindowId(1), a.clone());
        router.register(WindowId(2), b.clone());

        let mut disp = Dispatcher::spawn("test-dispatch", source, router.clone(), global.clone())
            .unwrap();

        for key in 0..10 {
            server.send_to(WindowId(1), NativeEvent::Key { key: key, pressed: true });
        }
        server.send(EventTarget::Seat, NativeEvent::RepeatInfo { rate: 10, delay: 100 });
        server.send_to(WindowId(3), NativeEvent::Close);

        let mut seen_a = Vec::new();
        let mut seen_b = Vec::new();
        for _ in 0..50 {
            global.wait_timeout(Duration::from_millis(100));
            seen_a.extend(a.drain());
            seen_b.extend(b.drain());
            if seen_a.len() == 11 && seen_b.len() == 1 {
                break;
            }
        }
        disp.stop();

        let keys: Vec<u32> = seen_a
            .iter()
            .filter_map(|e| match e {
                Event::KeyInput { code, .. } => Some(*code),
                _ => None,
            })
            .collect();
        assert_eq!(keys, (0..10).collect::<Vec<u32>>());
        assert!(matches!(seen_a.last(), Some(Event::RepeatInfo { .. })));
        assert!(matches!(seen_b[0], Event::RepeatInfo { timing: Some(_) }));
        assert!(!disp.is_connection_lost());
    }

    #[test]
    fn lost_connection_is_reported() {
        let (server, _conn, source) = headless::connect().unwrap();
        let router = Arc::new(WindowRouter::new());
        let global = Arc::new(Notifier::new());
        let disp = Dispatcher::spawn("test-dispatch", source, router, global.clone()).unwrap();

        server.break_connection();
        assert!(global.wait_timeout(Duration::from_secs(5)));
        assert!(disp.is_connection_lost());
    }
}
