//! # Squall demo
//!
//! Runs one window against the headless compositor and software GPU.
//! A worker thread uploads a texture through a forked context and hands
//! it to the window, which then draws a fixed number of paced frames and
//! closes itself.
extern crate squall;
extern crate utils;

use squall::gpu::soft::SoftDevice;
use squall::gpu::GpuDevice;
use squall::protocol::headless;
use squall::{Application, CreateInfo, GpuContext, Texture, UserData, Window, WindowConfig};
use squall::{WindowHandler, WindowProxy};
use utils::log;
use utils::Result;

use std::sync::Arc;
use std::time::SystemTime;

const DEMO_FRAMES: u64 = 120;

struct Demo {
    d_texture: Option<Texture>,
}

impl WindowHandler for Demo {
    fn on_refresh(&mut self, win: &mut Window) {
        if win.frames_submitted() + 1 >= DEMO_FRAMES {
            win.close();
            return;
        }
        // keep the animation going
        win.refresh();
    }

    fn on_resize(&mut self, _win: &mut Window, width: u32, height: u32) {
        log::info!("Demo window is now {}x{}", width, height);
    }

    fn on_user_data(&mut self, _win: &mut Window, data: UserData) {
        if let Ok(tex) = data.downcast::<Texture>() {
            log::info!("Got texture {} from the worker", tex.id());
            self.d_texture = Some(*tex);
        }
    }
}

fn upload_worker(gpu: GpuContext, proxy: WindowProxy) -> Result<()> {
    let mut fork = gpu.fork()?;
    fork.make_current()?;
    let pixels = vec![0xff; 64 * 64 * 4];
    let pending = fork.create_texture(64, 64, &pixels)?;
    proxy.post_user_data(Box::new(fork.flush_one(pending)?));
    Ok(())
}

fn run_demo() -> Result<()> {
    let (server, conn, source) = headless::connect()?;
    server.set_auto_frame(true);

    let gpu = GpuContext::new(|| Ok(Arc::new(SoftDevice::new()) as Arc<dyn GpuDevice>));
    let mut app = Application::new(CreateInfo::default(), conn, source, gpu)?;

    let id = app.create_window(
        WindowConfig::builder(640, 480).title("squall demo").build(),
        Box::new(Demo { d_texture: None }),
    )?;

    let (gpu, proxy) = match app.window(id) {
        Some(win) => (win.gpu_context(), win.proxy()),
        None => return Ok(()),
    };
    let worker = std::thread::spawn(move || {
        if let Err(e) = upload_worker(gpu, proxy) {
            log::error!("Texture upload failed: {:?}", e);
        }
    });

    app.run()?;
    if worker.join().is_err() {
        log::error!("Upload worker panicked");
    }
    Ok(())
}

fn main() {
    let start = SystemTime::now();
    if let Err(e) = run_demo() {
        log::critical!("Demo failed: {:?}", e);
        std::process::exit(1);
    }

    let uptime = SystemTime::now()
        .duration_since(start)
        .map(|d| d.as_secs_f32())
        .unwrap_or(0.0);
    println!("uptime: {}", uptime);
}
