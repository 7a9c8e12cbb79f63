// Categorized failures
//
// These are wrapped in anyhow errors like the rest of the crate, callers
// can `downcast_ref::<SquallError>()` to find out which case they hit.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SquallError {
    #[error("Could not initialize the GPU context: {0}")]
    GpuInit(String),
    #[error("Could not create a GPU surface for the window: {0}")]
    SurfaceCreation(String),
    #[error("Presenting the frame failed: {0}")]
    PresentFailed(String),
    #[error("The connection to the compositor was lost")]
    ConnectionLost,
    #[error("The forked GPU context must be made current before use")]
    ContextNotCurrent,
    #[error("The forked GPU context was used from a thread that did not create it")]
    WrongThread,
    #[error("No GPU context is initialized, a window must be alive to fork one")]
    NoGpuContext,
    #[error("The texture was created on a different forked GPU context")]
    ForeignTexture,
    #[error("The window is closed")]
    WindowClosed,
}
