//! GPU context ownership
//!
//! The process-wide GPU device is created when the first window acquires
//! it and torn down when the last lease is released. Every window holds a
//! `GpuLease`, which is how the reference count is kept.
//!
//! Worker threads may create GPU objects through a `ContextFork`, a
//! secondary context that shares the object namespace of the primary one.
//! A fork is confined to the thread that made it, and its objects can only
//! leave that thread through `ContextFork::flush`, which performs the GPU
//! side barrier that makes them visible to other contexts.
pub mod soft;

use crate::SquallError;
use utils::log;
use utils::region::Rect;
use utils::{Context, Result};

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;

/// Opaque handle for the platform surface a window draws into
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct SurfaceHandle(pub u64);

/// A GPU texture living in the shared object namespace.
///
/// Only textures that have been flushed can be obtained, so holding one
/// on any thread means its contents are complete.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Texture {
    pub(crate) t_id: u64,
    pub(crate) t_width: u32,
    pub(crate) t_height: u32,
}

impl Texture {
    pub fn id(&self) -> u64 {
        self.t_id
    }

    pub fn size(&self) -> (u32, u32) {
        (self.t_width, self.t_height)
    }
}

/// The GPU drawing collaborator: one device per process
pub trait GpuDevice: Send + Sync {
    /// Create the drawable for a window's platform surface
    fn create_surface(
        &self,
        handle: SurfaceHandle,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn GpuSurface>>;

    /// Create a secondary context sharing this device's object namespace
    fn create_shared_context(&self) -> Result<Box<dyn SharedContext>>;

    /// Sample a texture from the primary context
    fn read_texture(&self, texture: &Texture) -> Option<Vec<u8>>;
}

/// A window's drawable
pub trait GpuSurface: Send {
    /// Match the swapchain to a new buffer size
    fn resize(&mut self, width: u32, height: u32);

    /// Point drawing at the given region of the buffer
    fn prepare_viewport(&mut self, viewport: &Rect<i32>);

    /// Swap the finished frame to the screen
    fn present(&mut self) -> Result<()>;
}

/// A secondary context usable on one foreign thread
pub trait SharedContext {
    fn make_current(&mut self) -> Result<()>;

    fn create_texture(&mut self, width: u32, height: u32, pixels: &[u8]) -> Result<Texture>;

    /// Block until all work submitted on this context has completed on
    /// the GPU and is visible to every other context in the namespace.
    fn finish(&mut self);
}

type DeviceLoader = dyn Fn() -> Result<Arc<dyn GpuDevice>> + Send + Sync;

struct GpuState {
    gs_refcount: usize,
    gs_device: Option<Arc<dyn GpuDevice>>,
    /// How many times a device has been brought up
    gs_generation: u64,
}

struct GpuShared {
    gs_loader: Box<DeviceLoader>,
    gs_state: Mutex<GpuState>,
}

/// Handle to the process-wide GPU state.
///
/// Cloning the handle does not take a reference, only `acquire` does.
#[derive(Clone)]
pub struct GpuContext {
    gc_shared: Arc<GpuShared>,
}

impl GpuContext {
    /// `loader` brings up the platform display and primary context.
    /// It runs on the first acquire after the count was zero.
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn GpuDevice>> + Send + Sync + 'static,
    {
        Self {
            gc_shared: Arc::new(GpuShared {
                gs_loader: Box::new(loader),
                gs_state: Mutex::new(GpuState {
                    gs_refcount: 0,
                    gs_device: None,
                    gs_generation: 0,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GpuState> {
        self.gc_shared
            .gs_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Take a reference on the device, creating it if this is the first
    pub fn acquire(&self) -> Result<GpuLease> {
        let mut state = self.lock();

        let device = match state.gs_device.as_ref() {
            Some(dev) => dev.clone(),
            None => {
                let dev = (self.gc_shared.gs_loader)().map_err(|e| {
                    log::critical!("GPU initialization failed: {:?}", e);
                    utils::Error::new(SquallError::GpuInit(format!("{:#}", e)))
                })?;
                state.gs_generation += 1;
                log::debug!(
                    "Initialized GPU context (generation {})",
                    state.gs_generation
                );
                state.gs_device = Some(dev.clone());
                dev
            }
        };
        state.gs_refcount += 1;

        Ok(GpuLease {
            gl_ctx: self.clone(),
            gl_device: device,
        })
    }

    fn release(&self) {
        let mut state = self.lock();
        assert!(state.gs_refcount > 0);
        state.gs_refcount -= 1;

        if state.gs_refcount == 0 {
            // Dropping our reference tears the device down once the
            // remaining lease clones are gone
            state.gs_device = None;
            log::debug!("Last GPU reference released, tearing down the context");
        }
    }

    pub fn ref_count(&self) -> usize {
        self.lock().gs_refcount
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().gs_device.is_some()
    }

    /// Number of times the device has been created over the process lifetime
    pub fn generation(&self) -> u64 {
        self.lock().gs_generation
    }

    /// Create a secondary context bound to the calling thread.
    ///
    /// The GPU must already be initialized by a live window, forking does
    /// not bring it up. The fork holds its own reference, so the device
    /// stays alive for as long as the fork does.
    pub fn fork(&self) -> Result<ContextFork> {
        let lease = {
            let mut state = self.lock();
            let device = match state.gs_device.as_ref() {
                Some(dev) => dev.clone(),
                None => return Err(SquallError::NoGpuContext.into()),
            };
            state.gs_refcount += 1;
            GpuLease {
                gl_ctx: self.clone(),
                gl_device: device,
            }
        };

        let ctx = lease
            .device()
            .create_shared_context()
            .context("Could not create a shared GPU context")?;

        Ok(ContextFork {
            cf_id: NEXT_FORK_ID.fetch_add(1, Ordering::Relaxed),
            cf_ctx: ctx,
            cf_thread: std::thread::current().id(),
            cf_current: false,
            cf_lease: lease,
            _cf_confined: PhantomData,
        })
    }
}

/// One reference on the process-wide device, released on drop
pub struct GpuLease {
    gl_ctx: GpuContext,
    gl_device: Arc<dyn GpuDevice>,
}

impl GpuLease {
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.gl_device
    }

    pub fn context(&self) -> &GpuContext {
        &self.gl_ctx
    }
}

impl Drop for GpuLease {
    fn drop(&mut self) {
        self.gl_ctx.release();
    }
}

/// A texture created on a fork that has not been flushed yet.
///
/// This is deliberately not `Send`: the only way to get something that
/// can cross threads is `ContextFork::flush` on the fork that made it.
#[derive(Debug)]
pub struct PendingTexture {
    pt_tex: Texture,
    /// The fork whose work must finish before this is visible
    pt_fork: u64,
    _pt_confined: PhantomData<*const ()>,
}

static NEXT_FORK_ID: AtomicU64 = AtomicU64::new(1);

/// A secondary GPU context confined to the thread that created it
pub struct ContextFork {
    cf_id: u64,
    cf_ctx: Box<dyn SharedContext>,
    cf_thread: ThreadId,
    cf_current: bool,
    cf_lease: GpuLease,
    _cf_confined: PhantomData<*const ()>,
}

impl ContextFork {
    fn check_thread(&self) -> Result<()> {
        if std::thread::current().id() != self.cf_thread {
            return Err(SquallError::WrongThread.into());
        }
        Ok(())
    }

    pub fn make_current(&mut self) -> Result<()> {
        self.check_thread()?;
        self.cf_ctx.make_current()?;
        self.cf_current = true;
        Ok(())
    }

    pub fn is_current(&self) -> bool {
        self.cf_current
    }

    pub fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<PendingTexture> {
        self.check_thread()?;
        if !self.cf_current {
            return Err(SquallError::ContextNotCurrent.into());
        }

        let tex = self.cf_ctx.create_texture(width, height, pixels)?;
        Ok(PendingTexture {
            pt_tex: tex,
            pt_fork: self.cf_id,
            _pt_confined: PhantomData,
        })
    }

    /// Wait for the GPU to finish this context's work and release the
    /// given textures for use on any thread or context.
    ///
    /// Every texture must have been created on this fork. If any was not,
    /// nothing is released and `ForeignTexture` is returned.
    pub fn flush(&mut self, pending: Vec<PendingTexture>) -> Result<Vec<Texture>> {
        if pending.iter().any(|p| p.pt_fork != self.cf_id) {
            return Err(SquallError::ForeignTexture.into());
        }

        self.cf_ctx.finish();
        Ok(pending.into_iter().map(|p| p.pt_tex).collect())
    }

    /// `flush` for a single texture
    pub fn flush_one(&mut self, pending: PendingTexture) -> Result<Texture> {
        if pending.pt_fork != self.cf_id {
            return Err(SquallError::ForeignTexture.into());
        }

        self.cf_ctx.finish();
        Ok(pending.pt_tex)
    }

    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        self.cf_lease.device()
    }
}
