//! Per-window event queues
//!
//! An EventSlot is a double buffered queue with a single producer (the
//! dispatcher, or any thread holding a WindowProxy) and a single consumer
//! (the application loop). Pushes land in the active buffer, and a drain
//! swaps the buffers under the lock so the consumer walks the events
//! without holding it.
use crate::event::Event;
use utils::log;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A counting wake primitive
///
/// Signals accumulate until a waiter consumes them, so a signal sent
/// before anyone waits is never lost.
pub struct Notifier {
    n_count: Mutex<u64>,
    n_cond: Condvar,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            n_count: Mutex::new(0),
            n_cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        // A poisoned counter is still a valid counter
        self.n_count.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn signal(&self) {
        *self.lock() += 1;
        self.n_cond.notify_all();
    }

    /// Block until at least one signal arrives, consuming all of them
    pub fn wait(&self) {
        let mut count = self.lock();
        while *count == 0 {
            count = self.n_cond.wait(count).unwrap_or_else(|e| e.into_inner());
        }
        *count = 0;
    }

    /// Like `wait`, but gives up after `timeout`.
    ///
    /// Returns true if a signal was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.lock();
        while *count == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = self
                .n_cond
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        *count = 0;
        true
    }

    /// Consume any pending signals without blocking
    pub fn try_consume(&self) -> bool {
        let mut count = self.lock();
        let had = *count > 0;
        *count = 0;
        had
    }
}

struct SlotBuffers {
    /// Pushes always go here
    sb_active: Vec<Event>,
    /// The buffer handed out by the previous drain. It comes back
    /// through `recycle` so steady state needs no allocation.
    sb_draining: Vec<Event>,
}

pub struct EventSlot {
    es_bufs: Mutex<SlotBuffers>,
    /// Our own wake signal, used by `drain_wait`
    es_wake: Notifier,
    /// The application-wide signal shared by every slot
    es_global: Option<Arc<Notifier>>,
    /// Set once the owning window starts destructing
    es_closed: AtomicBool,
}

impl EventSlot {
    pub fn new(global: Option<Arc<Notifier>>) -> Self {
        Self {
            es_bufs: Mutex::new(SlotBuffers {
                sb_active: Vec::new(),
                sb_draining: Vec::new(),
            }),
            es_wake: Notifier::new(),
            es_global: global,
            es_closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotBuffers> {
        self.es_bufs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wake(&self) {
        self.es_wake.signal();
        if let Some(global) = self.es_global.as_ref() {
            global.signal();
        }
    }

    /// Append one event. Never blocks on the consumer.
    ///
    /// Silently dropped once the window is destructing.
    pub fn push(&self, event: Event) {
        {
            let mut bufs = self.lock();
            if self.is_closed() {
                log::info!("Dropping {:?} pushed to a closed window", event);
                return;
            }
            bufs.sb_active.push(event);
        }
        self.wake();
    }

    /// Append a batch of events, waking the consumer only once
    pub fn push_batch<I: IntoIterator<Item = Event>>(&self, events: I) {
        let pushed = {
            let mut bufs = self.lock();
            if self.is_closed() {
                return;
            }
            let before = bufs.sb_active.len();
            bufs.sb_active.extend(events);
            bufs.sb_active.len() > before
        };

        if pushed {
            self.wake();
        }
    }

    /// Swap the buffers and return everything pushed so far, in order.
    pub fn drain(&self) -> Vec<Event> {
        let mut bufs = self.lock();
        let SlotBuffers {
            sb_active,
            sb_draining,
        } = &mut *bufs;

        std::mem::swap(sb_active, sb_draining);
        sb_active.clear();
        // whatever woke us is being handed out now
        self.es_wake.try_consume();
        std::mem::take(sb_draining)
    }

    /// Block until at least one event is queued, then drain
    pub fn drain_wait(&self) -> Vec<Event> {
        loop {
            let events = self.drain();
            if !events.is_empty() {
                return events;
            }
            self.es_wake.wait();
        }
    }

    /// Like `drain_wait`, but returns whatever is queued (possibly
    /// nothing) once `timeout` has passed.
    pub fn drain_wait_timeout(&self, timeout: Duration) -> Vec<Event> {
        let deadline = Instant::now() + timeout;
        loop {
            let events = self.drain();
            let now = Instant::now();
            if !events.is_empty() || now >= deadline {
                return events;
            }
            self.es_wake.wait_timeout(deadline - now);
        }
    }

    /// Hand a drained buffer back for reuse
    pub fn recycle(&self, mut buf: Vec<Event>) {
        buf.clear();
        let mut bufs = self.lock();
        if bufs.sb_draining.capacity() < buf.capacity() {
            bufs.sb_draining = buf;
        }
    }

    /// Mark the owning window as destructing. Later pushes are dropped,
    /// anything already queued stays until drained.
    pub fn close(&self) {
        let _bufs = self.lock();
        self.es_closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.es_closed.load(Ordering::SeqCst)
    }

    /// Number of events waiting to be drained
    pub fn pending(&self) -> usize {
        self.lock().sb_active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::KeyState;

    fn key(code: u32) -> Event {
        Event::KeyInput {
            code: code,
            state: KeyState::Pressed,
        }
    }

    fn codes(events: &[Event]) -> Vec<u32> {
        events
            .iter()
            .map(|e| match e {
                Event::KeyInput { code, .. } => *code,
                other => panic!("unexpected event {:?}", other),
            })
            .collect()
    }

    #[test]
    fn drain_returns_pushes_in_order() {
        let slot = EventSlot::new(None);
        for i in 0..5 {
            slot.push(key(i));
        }

        let first = slot.drain();
        assert_eq!(codes(&first), vec![0, 1, 2, 3, 4]);
        // nothing was pushed in between
        assert!(slot.drain().is_empty());
    }

    #[test]
    fn recycled_buffers_do_not_leak_events() {
        let slot = EventSlot::new(None);
        slot.push(key(1));
        let buf = slot.drain();
        slot.recycle(buf);

        slot.push(key(2));
        slot.push(key(3));
        assert_eq!(codes(&slot.drain()), vec![2, 3]);
        assert!(slot.drain().is_empty());
    }

    #[test]
    fn closed_slot_drops_pushes_but_keeps_queued() {
        let slot = EventSlot::new(None);
        slot.push(key(7));
        slot.close();
        slot.push(key(8));
        slot.push_batch(vec![key(9)]);

        assert!(slot.is_closed());
        assert_eq!(codes(&slot.drain()), vec![7]);
    }

    #[test]
    fn batch_wakes_global_once() {
        let global = Arc::new(Notifier::new());
        let slot = EventSlot::new(Some(global.clone()));

        slot.push_batch(vec![key(1), key(2), key(3)]);
        assert_eq!(*global.lock(), 1);
        assert_eq!(slot.pending(), 3);

        slot.push_batch(Vec::new());
        assert_eq!(*global.lock(), 1);
    }

    #[test]
    fn drain_wait_sees_cross_thread_pushes() {
        let slot = Arc::new(EventSlot::new(None));
        let producer = slot.clone();

        let handle = std::thread::spawn(move || {
            for i in 0..100 {
                producer.push(key(i));
            }
        });

        let mut seen = Vec::new();
        while seen.len() < 100 {
            let events = slot.drain_wait_timeout(Duration::from_millis(500));
            seen.extend(codes(&events));
        }
        handle.join().unwrap();

        assert_eq!(seen, (0..100).collect::<Vec<u32>>());
    }

    #[test]
    fn notifier_counts_early_signals() {
        let n = Notifier::new();
        n.signal();
        n.signal();
        assert!(n.wait_timeout(Duration::from_millis(1)));
        assert!(!n.wait_timeout(Duration::from_millis(1)));
        n.signal();
        assert!(n.try_consume());
        assert!(!n.try_consume());
    }

    #[test]
    fn plain_drain_leaves_no_stale_wakeup() {
        let slot = EventSlot::new(None);
        slot.push(key(1));
        assert_eq!(codes(&slot.drain()), vec![1]);

        let start = Instant::now();
        let events = slot.drain_wait_timeout(Duration::from_millis(100));
        assert!(events.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn drain_wait_blocks_until_a_push() {
        let slot = Arc::new(EventSlot::new(None));
        slot.push(key(1));
        slot.drain();

        let producer = slot.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            producer.push(key(2));
        });

        assert_eq!(codes(&slot.drain_wait()), vec![2]);
        handle.join().unwrap();
    }
}
