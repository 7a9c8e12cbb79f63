//! Frame pacing
//!
//! Keeps a window from submitting more than one frame ahead of the
//! compositor. A refresh while a frame is in flight is remembered and
//! coalesced with any others, then drawn once the compositor says it is
//! ready for the next frame.

/// What the caller should do after a refresh request
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Pacing {
    /// Draw and submit a frame now
    Draw,
    /// A frame is in flight, the request was folded into the pending one
    Coalesced,
}

#[derive(Debug)]
pub struct FramePacer {
    /// The compositor is ready to accept a new frame
    fp_frame_done: bool,
    /// A refresh was requested since the last submitted frame
    fp_pending_refresh: bool,
    fp_frames_submitted: u64,
}

impl FramePacer {
    /// Nothing is in flight for a new window, so the first request draws
    pub fn new() -> Self {
        Self {
            fp_frame_done: true,
            fp_pending_refresh: false,
            fp_frames_submitted: 0,
        }
    }

    pub fn request_refresh(&mut self) -> Pacing {
        self.fp_pending_refresh = true;
        if !self.fp_frame_done {
            return Pacing::Coalesced;
        }

        self.fp_frame_done = false;
        self.fp_pending_refresh = false;
        Pacing::Draw
    }

    /// Remember a refresh without trying to draw.
    ///
    /// Used before the window's first configure, when there is nothing
    /// to draw into yet.
    pub fn defer_refresh(&mut self) {
        self.fp_pending_refresh = true;
    }

    /// Record that the frame from the last `Draw` went out
    pub fn frame_submitted(&mut self) {
        self.fp_frames_submitted += 1;
    }

    /// The compositor signaled it is ready for a new frame.
    ///
    /// If a refresh came in while the last frame was in flight it is
    /// issued now, unless the window is event driven. Event driven windows
    /// keep the request pending until the application asks again.
    pub fn frame_done(&mut self, event_driven: bool) -> Pacing {
        self.fp_frame_done = true;

        if self.fp_pending_refresh && !event_driven {
            return self.request_refresh();
        }
        Pacing::Coalesced
    }

    pub fn is_frame_done(&self) -> bool {
        self.fp_frame_done
    }

    pub fn has_pending_refresh(&self) -> bool {
        self.fp_pending_refresh
    }

    pub fn frames_submitted(&self) -> u64 {
        self.fp_frames_submitted
    }
}
