//! Window Events
//!
//! Everything delivered to a window flows through its EventSlot as
//! one of these tagged variants. Events are immutable once built and
//! are owned by the slot until the application loop drains them.

use std::any::Any;
use std::time::Duration;

/// Identifies one window for the lifetime of the application.
///
/// Ids are never reused, so a stale id simply stops matching
/// anything once its window has been torn down.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct WindowId(pub(crate) u32);

impl WindowId {
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Payload for cross-thread user wakeups
pub type UserData = Box<dyn Any + Send>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyState {
    Pressed,
    Released,
    /// Synthetic event emitted while a key is held
    Repeat,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ButtonState {
    Pressed,
    Released,
}

/// Keycodes for mouse buttons.
///
/// Names are self explanitory, `Left` for left click and etc.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MouseButton {
    Unknown(u32),
    Left,
    Middle,
    Right,
    Side,
    Extra,
    Forward,
    Back,
}

/// Converts a Linux kernel mouse button code into our enum.
///
/// The conversion values are based on Linux's input.h
pub fn convert_linux_button(button: u32) -> MouseButton {
    match button {
        0x110 => MouseButton::Left,
        0x111 => MouseButton::Right,
        0x112 => MouseButton::Middle,
        0x113 => MouseButton::Side,
        0x114 => MouseButton::Extra,
        0x115 => MouseButton::Forward,
        0x116 => MouseButton::Back,
        other => MouseButton::Unknown(other),
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScrollAxis {
    Vertical,
    Horizontal,
}

/// Key repeat timing as announced by the compositor
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RepeatTiming {
    /// How long a key must be held before the first repeat
    pub delay: Duration,
    /// Time between repeats after the first
    pub interval: Duration,
}

impl RepeatTiming {
    /// Build timing from a rate in repeats per second and a delay in ms.
    ///
    /// A rate of zero means the compositor disabled repeating.
    pub fn from_rate(rate: i32, delay_ms: i32) -> Option<Self> {
        if rate <= 0 {
            return None;
        }

        Some(Self {
            delay: Duration::from_millis(delay_ms.max(0) as u64),
            interval: Duration::from_micros(1_000_000 / rate as u64),
        })
    }
}

#[derive(Debug)]
pub enum Event {
    /// Redraw the window, subject to frame pacing
    Refresh,
    /// The buffer size changed. Zero dimensions keep the current one.
    Resize { width: u32, height: u32 },
    KeyInput { code: u32, state: KeyState },
    KeyEnter,
    KeyLeave,
    PointerMove { x: f64, y: f64 },
    PointerButton {
        button: MouseButton,
        state: ButtonState,
    },
    Scroll { axis: ScrollAxis, delta: f64 },
    TouchDown { id: i32, x: f64, y: f64 },
    TouchMove { id: i32, x: f64, y: f64 },
    TouchUp { id: i32 },
    CloseRequest,
    UserData(UserData),

    // The following are consumed by the application loop itself
    // and are never handed to window callbacks.
    /// The compositor is ready for the next frame
    FrameDone,
    /// The device scale of the output changed
    Rescale { scale: f64 },
    /// Seat-wide key repeat settings, `None` disables repeating
    RepeatInfo { timing: Option<RepeatTiming> },
}

impl Event {
    /// Is this an event the loop handles without involving callbacks
    pub fn is_internal(&self) -> bool {
        match self {
            Event::FrameDone | Event::Rescale { .. } | Event::RepeatInfo { .. } => true,
            _ => false,
        }
    }
}
