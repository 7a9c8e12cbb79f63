// Whole application tests
//
// These drive an Application against the headless protocol server and the
// software GPU device, playing the compositor's side by hand.
use crate::gpu::soft::SoftDevice;
use crate::gpu::{GpuDevice, SurfaceHandle};
use crate::protocol::{headless, headless::HeadlessServer, NativeEvent};
use crate::*;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Refresh,
    Resize(u32, u32),
    Key(u32, KeyState),
    Click(MouseButton, ButtonState, f64, f64),
    CloseRequest,
    User(u32),
    Texture(Texture),
}

#[derive(Clone, Default)]
struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }
}

struct Recorder {
    r_log: CallLog,
    r_close_on_user: bool,
}

impl WindowHandler for Recorder {
    fn on_refresh(&mut self, _win: &mut Window) {
        self.r_log.push(Call::Refresh);
    }

    fn on_resize(&mut self, _win: &mut Window, width: u32, height: u32) {
        self.r_log.push(Call::Resize(width, height));
    }

    fn on_key(&mut self, _win: &mut Window, code: u32, state: KeyState) {
        self.r_log.push(Call::Key(code, state));
    }

    fn on_click(
        &mut self,
        _win: &mut Window,
        button: MouseButton,
        state: ButtonState,
        x: f64,
        y: f64,
    ) {
        self.r_log.push(Call::Click(button, state, x, y));
    }

    fn on_close_request(&mut self, win: &mut Window) {
        self.r_log.push(Call::CloseRequest);
        win.close();
    }

    fn on_user_data(&mut self, win: &mut Window, data: UserData) {
        let data = match data.downcast::<u32>() {
            Ok(n) => {
                self.r_log.push(Call::User(*n));
                if self.r_close_on_user {
                    win.close();
                }
                return;
            }
            Err(data) => data,
        };

        if let Ok(tex) = data.downcast::<Texture>() {
            self.r_log.push(Call::Texture(*tex));
        }
    }
}

struct Harness {
    h_server: HeadlessServer,
    h_device: SoftDevice,
    h_app: Application,
}

fn harness(info: CreateInfo) -> Harness {
    let (server, conn, source) = headless::connect().unwrap();
    let device = SoftDevice::new();
    let loader_device = device.clone();
    let gpu = GpuContext::new(move || Ok(Arc::new(loader_device.clone()) as Arc<dyn GpuDevice>));

    Harness {
        h_server: server,
        h_device: device,
        h_app: Application::new(info, conn, source, gpu).unwrap(),
    }
}

fn open_window(h: &mut Harness, config: WindowConfig, close_on_user: bool) -> (WindowId, CallLog) {
    let log = CallLog::default();
    let id = h
        .h_app
        .create_window(
            config,
            Box::new(Recorder {
                r_log: log.clone(),
                r_close_on_user: close_on_user,
            }),
        )
        .unwrap();
    (id, log)
}

/// Run loop passes until `cond` holds
fn pump_until<F: FnMut(&mut Application) -> bool>(app: &mut Application, mut cond: F) {
    for _ in 0..300 {
        if cond(app) {
            return;
        }
        app.dispatch(Some(Duration::from_millis(10))).unwrap();
    }
    panic!("condition was never met");
}

/// Run loop passes for a while, for checking that nothing happens
fn pump_for(app: &mut Application, time: Duration) {
    let start = Instant::now();
    while start.elapsed() < time {
        app.dispatch(Some(Duration::from_millis(10))).unwrap();
    }
}

fn running(app: &mut Application, id: WindowId) -> bool {
    app.window(id).map(|w| w.state()) == Some(Lifecycle::Running)
}

fn surface(h: &Harness, id: WindowId) -> SurfaceHandle {
    h.h_server.window_info(id).unwrap().handle.unwrap()
}

fn presents(h: &Harness, id: WindowId) -> u64 {
    h.h_device.surface_stats(surface(h, id)).unwrap().presents
}

fn open_running(h: &mut Harness, config: WindowConfig) -> (WindowId, CallLog) {
    let (id, log) = open_window(h, config, false);
    pump_until(&mut h.h_app, |app| running(app, id));
    (id, log)
}

#[test]
fn window_runs_after_first_configure() {
    let mut h = harness(CreateInfo::default());
    let (id, log) = open_window(&mut h, WindowConfig::builder(320, 200).title("first").build(), false);

    assert_eq!(h.h_app.window(id).unwrap().state(), Lifecycle::Constructing);
    assert_eq!(h.h_server.window_info(id).unwrap().commits, 1);

    pump_until(&mut h.h_app, |app| running(app, id));

    assert_eq!(log.calls(), vec![Call::Resize(320, 200), Call::Refresh]);
    let info = h.h_server.window_info(id).unwrap();
    assert_eq!(info.title, "first");
    assert_eq!(info.commits, 2);
    assert!(info.frame_armed);
    assert_eq!(presents(&h, id), 1);
    assert_eq!(h.h_app.window(id).unwrap().frames_submitted(), 1);
}

#[test]
fn refreshes_coalesce_until_frame_done() {
    let mut h = harness(CreateInfo::default());
    let (id, log) = open_running(&mut h, WindowConfig::builder(100, 100).build());

    // the first frame is still in flight
    h.h_app.window(id).unwrap().refresh();
    h.h_app.window(id).unwrap().refresh();
    pump_for(&mut h.h_app, Duration::from_millis(50));
    assert_eq!(presents(&h, id), 1);

    assert!(h.h_server.frame_done(id));
    pump_until(&mut h.h_app, |_| log.count(&Call::Refresh) == 2);
    assert_eq!(presents(&h, id), 2);

    // nothing was requested during the second frame
    assert!(h.h_server.frame_done(id));
    pump_for(&mut h.h_app, Duration::from_millis(50));
    assert_eq!(presents(&h, id), 2);
    assert_eq!(log.count(&Call::Refresh), 2);
}

#[test]
fn event_driven_window_waits_for_explicit_refresh() {
    let mut h = harness(CreateInfo::default());
    let (id, log) = open_running(
        &mut h,
        WindowConfig::builder(100, 100).event_driven(true).build(),
    );

    h.h_app.window(id).unwrap().refresh();
    assert!(h.h_server.frame_done(id));
    pump_for(&mut h.h_app, Duration::from_millis(50));
    assert_eq!(presents(&h, id), 1);

    // asking again once the compositor is ready draws right away
    h.h_app.window(id).unwrap().refresh();
    h.h_app.dispatch(Some(Duration::from_millis(10))).unwrap();
    assert_eq!(presents(&h, id), 2);
    assert_eq!(log.count(&Call::Refresh), 2);
}

#[test]
fn closed_window_gets_no_more_callbacks() {
    let mut h = harness(CreateInfo::default());
    let (id, log) = open_window(&mut h, WindowConfig::builder(64, 64).build(), true);
    pump_until(&mut h.h_app, |app| running(app, id));
    let handle = surface(&h, id);

    let proxy = h.h_app.proxy(id).unwrap();
    for n in 0..5u32 {
        proxy.post_user_data(Box::new(n));
    }
    h.h_app.dispatch(Some(Duration::from_millis(10))).unwrap();

    // the first payload closed the window, the rest were never delivered
    let users: Vec<Call> = log
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::User(_)))
        .collect();
    assert_eq!(users, vec![Call::User(0)]);

    assert!(h.h_app.window(id).is_none());
    assert!(proxy.is_closed());
    assert!(h.h_server.window_info(id).unwrap().destroyed);
    assert!(h.h_device.surface_stats(handle).unwrap().destroyed);

    // posting to a dead window is silently ignored
    proxy.post_user_data(Box::new(9u32));
    let err = h.h_app.proxy(id).err().unwrap();
    assert_eq!(err.downcast_ref::<SquallError>(), Some(&SquallError::WindowClosed));
}

#[test]
fn close_is_synchronous() {
    let mut h = harness(CreateInfo::default());
    let (id, log) = open_running(&mut h, WindowConfig::builder(64, 64).build());

    let proxy = h.h_app.proxy(id).unwrap();
    proxy.post_user_data(Box::new(1u32));
    h.h_app.window(id).unwrap().close();
    assert_eq!(h.h_app.window(id).unwrap().state(), Lifecycle::Destructing);

    h.h_app.dispatch(Some(Duration::from_millis(10))).unwrap();
    assert_eq!(log.count(&Call::User(1)), 0);
    assert_eq!(h.h_app.window_count(), 0);
}

#[test]
fn close_request_closes_by_default() {
    let mut h = harness(CreateInfo::default());
    let (id, log) = open_running(&mut h, WindowConfig::builder(64, 64).build());

    h.h_server.close(id);
    pump_until(&mut h.h_app, |app| app.window_count() == 0);
    assert_eq!(log.count(&Call::CloseRequest), 1);
}

#[test]
fn gpu_is_torn_down_with_the_last_window() {
    let mut h = harness(CreateInfo::default());
    let (a, _) = open_running(&mut h, WindowConfig::builder(64, 64).build());
    let (b, _) = open_running(&mut h, WindowConfig::builder(64, 64).build());

    let gpu = h.h_app.gpu_context().clone();
    assert_eq!(gpu.ref_count(), 2);

    h.h_app.window(a).unwrap().close();
    pump_until(&mut h.h_app, |app| app.window_count() == 1);
    assert_eq!(gpu.ref_count(), 1);
    assert!(gpu.is_initialized());

    h.h_app.window(b).unwrap().close();
    h.h_app.run().unwrap();
    assert_eq!(h.h_app.window_count(), 0);
    assert!(!gpu.is_initialized());
    assert_eq!(gpu.generation(), 1);
}

#[test]
fn rescale_updates_logical_size() {
    let mut h = harness(CreateInfo::default());
    let (id, log) = open_running(&mut h, WindowConfig::builder(1920, 1080).build());

    h.h_server.send_to(id, NativeEvent::OutputScale(2));
    pump_until(&mut h.h_app, |app| {
        app.window(id).unwrap().get_window_size() == (960, 540)
    });
    pump_until(&mut h.h_app, |_| log.count(&Call::Resize(960, 540)) == 1);

    let win = h.h_app.window(id).unwrap();
    assert_eq!(win.get_draw_scale(), 2.0);
    assert_eq!(win.get_buffer_size(), (1920, 1080));

    win.set_scale(Some(1.0));
    assert_eq!(win.get_window_size(), (1920, 1080));

    // the override keeps winning over new output scales
    h.h_server.send_to(id, NativeEvent::PreferredScale(180));
    pump_until(&mut h.h_app, |app| {
        app.window(id).unwrap().get_device_scale() == 1.5
    });
    assert_eq!(h.h_app.window(id).unwrap().get_window_size(), (1920, 1080));

    let win = h.h_app.window(id).unwrap();
    win.set_scale(None);
    assert_eq!(win.get_window_size(), (1280, 720));
}

#[test]
fn viewport_is_clamped_on_resize() {
    let mut h = harness(CreateInfo::default());
    let (id, _) = open_running(&mut h, WindowConfig::builder(400, 300).build());

    h.h_app
        .window(id)
        .unwrap()
        .set_viewport(Rect::new(100, 100, 250, 150));
    h.h_server.configure(id, 200, 200);
    pump_until(&mut h.h_app, |app| {
        app.window(id).unwrap().get_buffer_size() == (200, 200)
    });
    assert_eq!(
        h.h_app.window(id).unwrap().get_viewport(),
        Rect::new(100, 100, 100, 100)
    );

    // a configure with a zero dimension keeps the current one
    h.h_server.configure(id, 0, 150);
    pump_until(&mut h.h_app, |app| {
        app.window(id).unwrap().get_buffer_size() == (200, 150)
    });

    h.h_app.window(id).unwrap().unset_viewport();
    assert_eq!(
        h.h_app.window(id).unwrap().get_viewport(),
        Rect::new(0, 0, 200, 150)
    );
}

#[test]
fn held_key_repeats_until_release() {
    let mut h = harness(CreateInfo::default());
    let (id, log) = open_running(&mut h, WindowConfig::builder(64, 64).build());

    // 50 repeats a second after 50ms
    h.h_server.send_to(id, NativeEvent::RepeatInfo { rate: 50, delay: 50 });
    h.h_server.send_to(id, NativeEvent::Key { key: 30, pressed: true });
    pump_until(&mut h.h_app, |_| log.count(&Call::Key(30, KeyState::Repeat)) >= 2);

    h.h_server.send_to(id, NativeEvent::Key { key: 30, pressed: false });
    pump_until(&mut h.h_app, |_| log.count(&Call::Key(30, KeyState::Released)) == 1);
    pump_for(&mut h.h_app, Duration::from_millis(100));

    let calls = log.calls();
    let released = calls
        .iter()
        .position(|c| *c == Call::Key(30, KeyState::Released))
        .unwrap();
    assert!(calls[released..]
        .iter()
        .all(|c| *c != Call::Key(30, KeyState::Repeat)));
}

#[test]
fn second_key_takes_over_repeat() {
    let mut h = harness(CreateInfo::default());
    let (id, log) = open_running(&mut h, WindowConfig::builder(64, 64).build());

    h.h_server.send_to(id, NativeEvent::RepeatInfo { rate: 100, delay: 20 });
    h.h_server.send_to(id, NativeEvent::Key { key: 30, pressed: true });
    pump_until(&mut h.h_app, |_| log.count(&Call::Key(30, KeyState::Repeat)) >= 2);

    // 30 is still held when 31 goes down
    h.h_server.send_to(id, NativeEvent::Key { key: 31, pressed: true });
    pump_until(&mut h.h_app, |_| log.count(&Call::Key(31, KeyState::Repeat)) >= 3);
    h.h_server.send_to(id, NativeEvent::Key { key: 31, pressed: false });
    pump_until(&mut h.h_app, |_| log.count(&Call::Key(31, KeyState::Released)) == 1);

    let calls = log.calls();
    let second = calls
        .iter()
        .position(|c| *c == Call::Key(31, KeyState::Pressed))
        .unwrap();
    assert!(calls[second..]
        .iter()
        .all(|c| *c != Call::Key(30, KeyState::Repeat)));
}

#[test]
fn zero_repeat_rate_disables_repeat() {
    let mut h = harness(CreateInfo::default());
    let (id, log) = open_running(&mut h, WindowConfig::builder(64, 64).build());

    h.h_server.send_to(id, NativeEvent::RepeatInfo { rate: 0, delay: 10 });
    h.h_server.send_to(id, NativeEvent::Key { key: 31, pressed: true });
    pump_until(&mut h.h_app, |_| log.count(&Call::Key(31, KeyState::Pressed)) == 1);
    pump_for(&mut h.h_app, Duration::from_millis(100));
    assert_eq!(log.count(&Call::Key(31, KeyState::Repeat)), 0);
}

#[test]
fn click_reports_pointer_position() {
    let mut h = harness(CreateInfo::default());
    let (id, log) = open_running(&mut h, WindowConfig::builder(64, 64).build());

    h.h_server
        .send_to(id, NativeEvent::PointerMotion { x: 10.0, y: 20.0 });
    h.h_server.send_to(
        id,
        NativeEvent::PointerButton {
            button: 0x110,
            pressed: true,
        },
    );
    let expected = Call::Click(MouseButton::Left, ButtonState::Pressed, 10.0, 20.0);
    pump_until(&mut h.h_app, |_| log.count(&expected) == 1);
}

#[test]
fn worker_texture_reaches_the_main_thread() {
    let mut h = harness(CreateInfo::default());
    let (id, log) = open_running(&mut h, WindowConfig::builder(64, 64).build());

    let gpu = h.h_app.window(id).unwrap().gpu_context();
    let proxy = h.h_app.proxy(id).unwrap();
    let pixels: Vec<u8> = (0..16).collect();
    let worker_pixels = pixels.clone();

    let worker = std::thread::spawn(move || {
        let mut fork = gpu.fork().unwrap();
        fork.make_current().unwrap();
        let pending = fork.create_texture(2, 2, &worker_pixels).unwrap();
        let tex = fork.flush_one(pending).unwrap();
        proxy.post_user_data(Box::new(tex));
    });
    worker.join().unwrap();

    pump_until(&mut h.h_app, |_| {
        log.calls().iter().any(|c| matches!(c, Call::Texture(_)))
    });
    let tex = log
        .calls()
        .into_iter()
        .find_map(|c| match c {
            Call::Texture(t) => Some(t),
            _ => None,
        })
        .unwrap();
    assert_eq!(tex.size(), (2, 2));
    assert_eq!(h.h_device.read_texture(&tex), Some(pixels));
}

#[test]
fn present_failure_is_fatal() {
    let mut h = harness(CreateInfo::default());
    h.h_server.set_auto_frame(true);
    let (id, log) = open_running(&mut h, WindowConfig::builder(64, 64).build());

    h.h_device.fail_next_present(surface(&h, id));
    h.h_app.window(id).unwrap().refresh();

    let mut failure = None;
    for _ in 0..100 {
        if let Err(e) = h.h_app.dispatch(Some(Duration::from_millis(10))) {
            failure = Some(e);
            break;
        }
    }
    let err = failure.unwrap();
    assert!(matches!(
        err.downcast_ref::<SquallError>(),
        Some(SquallError::PresentFailed(_))
    ));
    // the failed frame was never reported as submitted
    assert_eq!(h.h_app.window(id).unwrap().frames_submitted(), 1);
    assert_eq!(log.count(&Call::Refresh), 2);
}

#[test]
fn lost_connection_stops_the_loop() {
    let mut h = harness(CreateInfo::default());
    let _ = open_running(&mut h, WindowConfig::builder(64, 64).build());

    h.h_server.break_connection();
    let err = h.h_app.run().err().unwrap();
    assert_eq!(
        err.downcast_ref::<SquallError>(),
        Some(&SquallError::ConnectionLost)
    );
}

#[test]
fn quit_handle_stops_run() {
    let mut h = harness(CreateInfo::builder().exit_on_last_window(false).build());
    let _ = open_running(&mut h, WindowConfig::builder(64, 64).build());

    let quit = h.h_app.quit_handle();
    let quitter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        quit.quit();
    });

    h.h_app.run().unwrap();
    quitter.join().unwrap();
    assert!(h.h_app.is_quit_requested());
    assert_eq!(h.h_app.window_count(), 1);
}

struct ViewportPainter {
    vp_region: Rect<i32>,
}

impl WindowHandler for ViewportPainter {
    fn on_refresh(&mut self, win: &mut Window) {
        win.surface_mut().prepare_viewport(&self.vp_region);
    }
}

#[test]
fn refresh_can_draw_through_the_surface() {
    let mut h = harness(CreateInfo::default());
    let region = Rect::new(4, 4, 8, 8);
    let id = h
        .h_app
        .create_window(
            WindowConfig::builder(32, 32).build(),
            Box::new(ViewportPainter { vp_region: region }),
        )
        .unwrap();
    pump_until(&mut h.h_app, |app| running(app, id));

    let stats = h.h_device.surface_stats(surface(&h, id)).unwrap();
    // once by the loop for the full buffer, once from on_refresh
    assert_eq!(stats.viewports_prepared, 2);
    assert_eq!(stats.last_viewport, Some(region));
    assert_eq!(stats.presents, 1);
}
