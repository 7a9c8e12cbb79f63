/// Software GPU device
///
/// A headless stand-in for the GPU drawing collaborator. Objects live in a
/// namespace shared by every context of the device. Textures created on a
/// shared context are staged locally and only published by `finish`, so
/// reading an unflushed texture from another context finds nothing, which
/// is how a real driver behaves without the barrier.
///
/// Surfaces keep simple statistics so the frame pacing can be observed.
use super::{GpuDevice, GpuSurface, SharedContext, SurfaceHandle, Texture};
use utils::log;
use utils::region::Rect;
use utils::{anyhow, Result};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// What a software surface has been asked to do so far
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SurfaceStats {
    pub presents: u64,
    pub size: (u32, u32),
    pub viewports_prepared: u64,
    pub last_viewport: Option<Rect<i32>>,
    pub destroyed: bool,
    fail_next_present: bool,
}

struct SoftInner {
    si_objects: RwLock<HashMap<u64, Arc<Vec<u8>>>>,
    si_next_id: AtomicU64,
    si_surfaces: Mutex<HashMap<SurfaceHandle, Arc<Mutex<SurfaceStats>>>>,
}

impl Drop for SoftInner {
    fn drop(&mut self) {
        log::debug!("Tearing down the software GPU device");
    }
}

#[derive(Clone)]
pub struct SoftDevice {
    sd_inner: Arc<SoftInner>,
}

impl SoftDevice {
    pub fn new() -> Self {
        Self {
            sd_inner: Arc::new(SoftInner {
                si_objects: RwLock::new(HashMap::new()),
                si_next_id: AtomicU64::new(1),
                si_surfaces: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn stats_for(&self, handle: SurfaceHandle) -> Option<Arc<Mutex<SurfaceStats>>> {
        self.sd_inner
            .si_surfaces
            .lock()
            .unwrap()
            .get(&handle)
            .cloned()
    }

    /// Snapshot the statistics of the surface created for `handle`
    pub fn surface_stats(&self, handle: SurfaceHandle) -> Option<SurfaceStats> {
        self.stats_for(handle).map(|s| s.lock().unwrap().clone())
    }

    /// Make the next present on this surface fail, as a lost device would
    pub fn fail_next_present(&self, handle: SurfaceHandle) {
        if let Some(stats) = self.stats_for(handle) {
            stats.lock().unwrap().fail_next_present = true;
        }
    }

    /// Number of textures published in the shared namespace
    pub fn texture_count(&self) -> usize {
        self.sd_inner.si_objects.read().unwrap().len()
    }
}

impl GpuDevice for SoftDevice {
    fn create_surface(
        &self,
        handle: SurfaceHandle,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn GpuSurface>> {
        let stats = Arc::new(Mutex::new(SurfaceStats {
            size: (width, height),
            ..Default::default()
        }));
        self.sd_inner
            .si_surfaces
            .lock()
            .unwrap()
            .insert(handle, stats.clone());

        Ok(Box::new(SoftSurface {
            ss_stats: stats,
            ss_framebuffer: vec![0; width as usize * height as usize * 4],
        }))
    }

    fn create_shared_context(&self) -> Result<Box<dyn SharedContext>> {
        Ok(Box::new(SoftSharedContext {
            sc_inner: self.sd_inner.clone(),
            sc_staged: Vec::new(),
            sc_current: false,
        }))
    }

    fn read_texture(&self, texture: &Texture) -> Option<Vec<u8>> {
        self.sd_inner
            .si_objects
            .read()
            .unwrap()
            .get(&texture.t_id)
            .map(|bits| bits.as_ref().clone())
    }
}

struct SoftSurface {
    ss_stats: Arc<Mutex<SurfaceStats>>,
    ss_framebuffer: Vec<u8>,
}

impl GpuSurface for SoftSurface {
    fn resize(&mut self, width: u32, height: u32) {
        self.ss_framebuffer
            .resize(width as usize * height as usize * 4, 0);
        self.ss_stats.lock().unwrap().size = (width, height);
    }

    fn prepare_viewport(&mut self, viewport: &Rect<i32>) {
        let mut stats = self.ss_stats.lock().unwrap();
        stats.viewports_prepared += 1;
        stats.last_viewport = Some(*viewport);
    }

    fn present(&mut self) -> Result<()> {
        let mut stats = self.ss_stats.lock().unwrap();
        if stats.fail_next_present {
            stats.fail_next_present = false;
            return Err(anyhow!("software device lost"));
        }
        stats.presents += 1;
        Ok(())
    }
}

impl Drop for SoftSurface {
    fn drop(&mut self) {
        self.ss_stats.lock().unwrap().destroyed = true;
    }
}

struct SoftSharedContext {
    sc_inner: Arc<SoftInner>,
    /// Textures created since the last finish
    sc_staged: Vec<(u64, Vec<u8>)>,
    sc_current: bool,
}

impl SharedContext for SoftSharedContext {
    fn make_current(&mut self) -> Result<()> {
        self.sc_current = true;
        Ok(())
    }

    fn create_texture(&mut self, width: u32, height: u32, pixels: &[u8]) -> Result<Texture> {
        if !self.sc_current {
            return Err(anyhow!("shared context is not current"));
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(anyhow!(
                "texture data is {} bytes, expected {} for {}x{}",
                pixels.len(),
                expected,
                width,
                height
            ));
        }

        let id = self.sc_inner.si_next_id.fetch_add(1, Ordering::SeqCst);
        self.sc_staged.push((id, pixels.to_vec()));

        Ok(Texture {
            t_id: id,
            t_width: width,
            t_height: height,
        })
    }

    fn finish(&mut self) {
        if self.sc_staged.is_empty() {
            return;
        }

        let mut objects = self.sc_inner.si_objects.write().unwrap();
        for (id, bits) in self.sc_staged.drain(..) {
            objects.insert(id, Arc::new(bits));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unflushed_textures_are_invisible() {
        let dev = SoftDevice::new();
        let mut ctx = dev.create_shared_context().unwrap();
        ctx.make_current().unwrap();

        let tex = ctx.create_texture(2, 1, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(dev.read_texture(&tex), None);
        assert_eq!(dev.texture_count(), 0);

        ctx.finish();
        assert_eq!(dev.read_texture(&tex), Some(vec![1, 2, 3, 4, 5, 6, 7, 8]));
    }

    #[test]
    fn texture_size_is_checked() {
        let dev = SoftDevice::new();
        let mut ctx = dev.create_shared_context().unwrap();
        ctx.make_current().unwrap();
        assert!(ctx.create_texture(4, 4, &[0; 3]).is_err());
    }

    #[test]
    fn surface_tracks_presents_and_failures() {
        let dev = SoftDevice::new();
        let handle = SurfaceHandle(9);
        let mut surf = dev.create_surface(handle, 64, 32).unwrap();

        surf.prepare_viewport(&Rect::new(0, 0, 64, 32));
        surf.present().unwrap();
        dev.fail_next_present(handle);
        assert!(surf.present().is_err());
        surf.resize(128, 64);

        let stats = dev.surface_stats(handle).unwrap();
        assert_eq!(stats.presents, 1);
        assert_eq!(stats.size, (128, 64));
        assert_eq!(stats.last_viewport, Some(Rect::new(0, 0, 64, 32)));

        drop(surf);
        assert!(dev.surface_stats(handle).unwrap().destroyed);
    }
}
