/// Squall windowing core
///
/// Squall runs GPU-drawn windows on a compositor. A dispatcher thread
/// reads the display protocol and files each event into the owning
/// window's queue, and the application loop drains those queues on the
/// main thread, runs the window callbacks, and paces redraws against the
/// compositor's frame callbacks.
///
/// The protocol binding and the GPU drawing layer are reached through the
/// traits in `protocol` and `gpu`. Headless implementations of both are
/// included for tests and demos.
extern crate thiserror;
extern crate utils;
pub use utils::{anyhow, region::Rect, Context, Error, Result};

pub mod app;
pub mod config;
pub mod dispatch;
mod error;
pub mod event;
pub mod gpu;
pub mod pacer;
pub mod protocol;
pub mod repeat;
pub mod slot;
pub mod window;
#[cfg(test)]
mod tests;

pub use app::{Application, QuitHandle, Window, WindowHandler, WindowProxy};
pub use config::{CreateInfo, CreateInfoBuilder, WindowConfig, WindowConfigBuilder};
pub use error::SquallError;
pub use event::{
    ButtonState, Event, KeyState, MouseButton, RepeatTiming, ScrollAxis, UserData, WindowId,
};
pub use gpu::{ContextFork, GpuContext, GpuLease, PendingTexture, Texture};
pub use window::Lifecycle;
