//! Protocol binding seam
//!
//! The display server protocol is consumed through these traits. A binding
//! is split in two halves: the `ProtocolSource` lives on the dispatcher
//! thread and turns wire traffic into `NativeEvent`s, while the
//! `ProtocolConnection` stays with the application loop and creates the
//! per-window protocol objects.
pub mod headless;

use crate::event::WindowId;
use crate::gpu::SurfaceHandle;
use crate::WindowConfig;
use utils::Result;

use std::os::unix::io::RawFd;

/// Raw events as the protocol binding reports them
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    /// Toplevel configure. Zero dimensions leave the size to the client.
    Configure { width: i32, height: i32 },
    Close,
    /// The frame callback requested with the last commit fired
    FrameDone,
    /// Integer scale of the output the surface is on
    OutputScale(i32),
    /// Fractional scale, in 120ths
    PreferredScale(u32),
    KeyboardEnter,
    KeyboardLeave,
    Key { key: u32, pressed: bool },
    /// Repeats per second and initial delay in milliseconds
    RepeatInfo { rate: i32, delay: i32 },
    PointerEnter { x: f64, y: f64 },
    PointerLeave,
    PointerMotion { x: f64, y: f64 },
    /// Linux input button code
    PointerButton { button: u32, pressed: bool },
    Axis { horizontal: bool, value: f64 },
    TouchDown { id: i32, x: f64, y: f64 },
    TouchMotion { id: i32, x: f64, y: f64 },
    TouchUp { id: i32 },
}

/// Who a native event is for
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventTarget {
    Window(WindowId),
    /// Seat-wide state, delivered to every window
    Seat,
}

/// Receives events while a source dispatches
pub trait EventSink {
    fn post(&mut self, target: EventTarget, event: NativeEvent);
}

/// The dispatcher's half of a protocol binding
pub trait ProtocolSource: Send {
    /// A descriptor that becomes readable when there is protocol traffic
    fn as_raw_fd(&self) -> RawFd;

    /// Read whatever is pending and report it to `sink`.
    ///
    /// An error means the connection is unusable.
    fn dispatch_pending(&mut self, sink: &mut dyn EventSink) -> Result<()>;
}

/// The application loop's half of a protocol binding
pub trait ProtocolConnection {
    /// Create the surface and toplevel for a new window.
    ///
    /// Nothing is visible until the window's first commit.
    fn create_window(&mut self, id: WindowId, config: &WindowConfig)
        -> Result<Box<dyn NativeWindow>>;

    /// Send any buffered requests to the compositor
    fn flush(&mut self) -> Result<()>;
}

/// Protocol objects for one window. Dropping it destroys them.
pub trait NativeWindow {
    fn surface_handle(&self) -> SurfaceHandle;

    fn set_title(&mut self, title: &str);

    /// Ask to be told when the compositor wants the next frame.
    /// Takes effect with the next commit.
    fn request_frame(&mut self);

    fn commit(&mut self);
}
