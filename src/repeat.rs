//! Key repeat
//!
//! A KeyRepeater owns one background thread that emits synthetic repeat
//! events for a held key. Stopping it is synchronous: `cancel` and drop
//! wait until the thread has seen the cancellation and exited, so two
//! repeat streams can never overlap.
use crate::event::RepeatTiming;
use utils::log;
use utils::timing::Deadline;

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Instant;

struct RepeatCancel {
    rc_canceled: Mutex<bool>,
    rc_cond: Condvar,
}

impl RepeatCancel {
    fn lock(&self) -> MutexGuard<'_, bool> {
        // the flag only ever goes from false to true, poisoning can't tear it
        self.rc_canceled.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct KeyRepeater {
    kr_key: u32,
    kr_cancel: Arc<RepeatCancel>,
    kr_thread: Option<JoinHandle<()>>,
}

impl KeyRepeater {
    /// Start repeating `key`.
    ///
    /// `emit` is called from the repeat thread: first after `timing.delay`,
    /// then every `timing.interval` until canceled.
    pub fn start<F>(key: u32, timing: RepeatTiming, mut emit: F) -> Self
    where
        F: FnMut(u32) + Send + 'static,
    {
        let cancel = Arc::new(RepeatCancel {
            rc_canceled: Mutex::new(false),
            rc_cond: Condvar::new(),
        });
        let thread_cancel = cancel.clone();
        let start = Instant::now();

        let thread = std::thread::Builder::new()
            .name(format!("squall-repeat-{}", key))
            .spawn(move || {
                let mut deadline = Deadline::new(start, timing.delay, timing.interval);
                let mut canceled = thread_cancel.lock();

                loop {
                    // sleep until the deadline, waking early only to cancel
                    while !*canceled && Instant::now() < deadline.next() {
                        canceled = thread_cancel
                            .rc_cond
                            .wait_timeout(canceled, deadline.remaining())
                            .unwrap_or_else(|e| e.into_inner())
                            .0;
                    }
                    if *canceled {
                        break;
                    }

                    emit(key);
                    deadline.advance();
                }
            });

        let thread = match thread {
            Ok(t) => Some(t),
            Err(e) => {
                log::error!("Could not spawn key repeat thread: {:?}", e);
                None
            }
        };

        Self {
            kr_key: key,
            kr_cancel: cancel,
            kr_thread: thread,
        }
    }

    /// The key being repeated
    pub fn key(&self) -> u32 {
        self.kr_key
    }

    fn stop(&mut self) {
        *self.kr_cancel.lock() = true;
        self.kr_cancel.rc_cond.notify_all();

        if let Some(thread) = self.kr_thread.take() {
            if thread.join().is_err() {
                log::error!("Key repeat thread for {} panicked", self.kr_key);
            }
        }
    }

    /// Stop repeating, returning once the thread has exited
    pub fn cancel(mut self) {
        self.stop();
    }
}

impl Drop for KeyRepeater {
    fn drop(&mut self) {
        self.stop();
    }
}
