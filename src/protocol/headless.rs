/// Headless protocol binding
///
/// An in-process stand-in for a compositor. Events are injected through a
/// `HeadlessServer` handle and delivered to the dispatcher through a real
/// pollable pipe, so the dispatcher's wait loop runs exactly as it would
/// against a socket. The server records what each window asked of it.
///
/// Like a real compositor, the first commit of a window is answered with a
/// configure, and frame-done is only sent for frames that requested it.
use super::{EventSink, EventTarget, NativeEvent, NativeWindow, ProtocolConnection, ProtocolSource};
use crate::event::WindowId;
use crate::gpu::SurfaceHandle;
use crate::{SquallError, WindowConfig};
use utils::fdwatch::WakePipe;
use utils::log;
use utils::{Context, Result};

use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// What the server knows about one client window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeadlessWindowInfo {
    pub title: String,
    pub requested_size: (u32, u32),
    pub handle: Option<SurfaceHandle>,
    pub commits: u64,
    pub frame_requests: u64,
    /// A frame callback is attached to the committed state
    pub frame_armed: bool,
    /// A frame callback was requested but not yet committed
    frame_requested: bool,
    pub destroyed: bool,
}

struct ServerState {
    ss_queue: VecDeque<(EventTarget, NativeEvent)>,
    ss_windows: HashMap<WindowId, HeadlessWindowInfo>,
    ss_auto_configure: bool,
    ss_auto_frame: bool,
    ss_broken: bool,
}

struct ServerShared {
    ss_state: Mutex<ServerState>,
    ss_pipe: WakePipe,
    ss_next_handle: AtomicU64,
}

impl ServerShared {
    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.ss_state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn queue(&self, target: EventTarget, event: NativeEvent) {
        self.lock().ss_queue.push_back((target, event));
        self.ss_pipe.wake();
    }
}

/// Test and demo handle playing the compositor's part
#[derive(Clone)]
pub struct HeadlessServer {
    hs_shared: Arc<ServerShared>,
}

/// Create a connected server, connection, and source triple
pub fn connect() -> Result<(HeadlessServer, Box<dyn ProtocolConnection>, Box<dyn ProtocolSource>)> {
    let pipe = WakePipe::new().context("Could not create the headless protocol pipe")?;
    let shared = Arc::new(ServerShared {
        ss_state: Mutex::new(ServerState {
            ss_queue: VecDeque::new(),
            ss_windows: HashMap::new(),
            ss_auto_configure: true,
            ss_auto_frame: false,
            ss_broken: false,
        }),
        ss_pipe: pipe,
        ss_next_handle: AtomicU64::new(1),
    });

    Ok((
        HeadlessServer {
            hs_shared: shared.clone(),
        },
        Box::new(HeadlessConnection {
            hc_shared: shared.clone(),
        }),
        Box::new(HeadlessSource { hs_shared: shared }),
    ))
}

impl HeadlessServer {
    /// Queue an arbitrary native event
    pub fn send(&self, target: EventTarget, event: NativeEvent) {
        self.hs_shared.queue(target, event);
    }

    pub fn send_to(&self, id: WindowId, event: NativeEvent) {
        self.send(EventTarget::Window(id), event);
    }

    /// Answer first commits with a configure of the requested size
    pub fn set_auto_configure(&self, enabled: bool) {
        self.hs_shared.lock().ss_auto_configure = enabled;
    }

    /// Release every committed frame immediately
    pub fn set_auto_frame(&self, enabled: bool) {
        self.hs_shared.lock().ss_auto_frame = enabled;
    }

    pub fn configure(&self, id: WindowId, width: i32, height: i32) {
        self.send_to(
            id,
            NativeEvent::Configure {
                width: width,
                height: height,
            },
        );
    }

    /// Fire the window's pending frame callback.
    ///
    /// Returns false if the window has no frame callback committed.
    pub fn frame_done(&self, id: WindowId) -> bool {
        let armed = {
            let mut state = self.hs_shared.lock();
            match state.ss_windows.get_mut(&id) {
                Some(info) if info.frame_armed => {
                    info.frame_armed = false;
                    true
                }
                _ => false,
            }
        };

        if armed {
            self.send_to(id, NativeEvent::FrameDone);
        }
        armed
    }

    pub fn close(&self, id: WindowId) {
        self.send_to(id, NativeEvent::Close);
    }

    /// Make the next dispatch fail as if the socket died
    pub fn break_connection(&self) {
        self.hs_shared.lock().ss_broken = true;
        self.hs_shared.ss_pipe.wake();
    }

    pub fn window_info(&self, id: WindowId) -> Option<HeadlessWindowInfo> {
        self.hs_shared.lock().ss_windows.get(&id).cloned()
    }
}

struct HeadlessSource {
    hs_shared: Arc<ServerShared>,
}

impl ProtocolSource for HeadlessSource {
    fn as_raw_fd(&self) -> RawFd {
        self.hs_shared.ss_pipe.read_fd()
    }

    fn dispatch_pending(&mut self, sink: &mut dyn EventSink) -> Result<()> {
        self.hs_shared.ss_pipe.drain();

        let events: Vec<(EventTarget, NativeEvent)> = {
            let mut state = self.hs_shared.lock();
            if state.ss_broken {
                return Err(SquallError::ConnectionLost.into());
            }
            state.ss_queue.drain(..).collect()
        };

        for (target, event) in events {
            sink.post(target, event);
        }
        Ok(())
    }
}

struct HeadlessConnection {
    hc_shared: Arc<ServerShared>,
}

impl ProtocolConnection for HeadlessConnection {
    fn create_window(
        &mut self,
        id: WindowId,
        config: &WindowConfig,
    ) -> Result<Box<dyn NativeWindow>> {
        let handle = SurfaceHandle(self.hc_shared.ss_next_handle.fetch_add(1, Ordering::SeqCst));

        self.hc_shared.lock().ss_windows.insert(
            id,
            HeadlessWindowInfo {
                title: config.title().to_string(),
                requested_size: config.size(),
                handle: Some(handle),
                ..Default::default()
            },
        );
        log::debug!("Headless server created surface {:?} for {:?}", handle, id);

        Ok(Box::new(HeadlessWindow {
            hw_id: id,
            hw_handle: handle,
            hw_shared: self.hc_shared.clone(),
        }))
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

struct HeadlessWindow {
    hw_id: WindowId,
    hw_handle: SurfaceHandle,
    hw_shared: Arc<ServerShared>,
}

impl NativeWindow for HeadlessWindow {
    fn surface_handle(&self) -> SurfaceHandle {
        self.hw_handle
    }

    fn set_title(&mut self, title: &str) {
        if let Some(info) = self.hw_shared.lock().ss_windows.get_mut(&self.hw_id) {
            info.title = title.to_string();
        }
    }

    fn request_frame(&mut self) {
        if let Some(info) = self.hw_shared.lock().ss_windows.get_mut(&self.hw_id) {
            info.frame_requested = true;
            info.frame_requests += 1;
        }
    }

    fn commit(&mut self) {
        let mut replies = Vec::new();
        {
            let mut state = self.hw_shared.lock();
            let auto_configure = state.ss_auto_configure;
            let auto_frame = state.ss_auto_frame;

            if let Some(info) = state.ss_windows.get_mut(&self.hw_id) {
                info.commits += 1;
                if info.commits == 1 && auto_configure {
                    replies.push(NativeEvent::Configure {
                        width: info.requested_size.0 as i32,
                        height: info.requested_size.1 as i32,
                    });
                }

                if info.frame_requested {
                    info.frame_requested = false;
                    if auto_frame {
                        replies.push(NativeEvent::FrameDone);
                    } else {
                        info.frame_armed = true;
                    }
                }
            }
        }

        for event in replies {
            self.hw_shared.queue(EventTarget::Window(self.hw_id), event);
        }
    }
}

impl Drop for HeadlessWindow {
    fn drop(&mut self) {
        if let Some(info) = self.hw_shared.lock().ss_windows.get_mut(&self.hw_id) {
            info.destroyed = true;
            info.frame_armed = false;
        }
    }
}
