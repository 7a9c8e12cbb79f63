// Application and window configuration
//
// Both follow the builder pattern, mirroring how the rendering
// layer is configured.
use crate::event::RepeatTiming;

use std::time::Duration;

/// Parameters for creating an Application
#[derive(Debug, Clone)]
pub struct CreateInfo {
    /// Key repeat timing to use until the compositor announces its own
    pub default_repeat: Option<RepeatTiming>,
    /// Return from `run` once the last window has been torn down
    pub exit_on_last_window: bool,
    /// Name given to the dispatcher thread
    pub dispatcher_name: String,
}

impl CreateInfo {
    pub fn builder() -> CreateInfoBuilder {
        CreateInfoBuilder {
            ci: CreateInfo {
                default_repeat: Some(RepeatTiming {
                    delay: Duration::from_millis(600),
                    interval: Duration::from_millis(40),
                }),
                exit_on_last_window: true,
                dispatcher_name: "squall-dispatch".to_string(),
            },
        }
    }
}

impl Default for CreateInfo {
    fn default() -> Self {
        CreateInfo::builder().build()
    }
}

/// Implements the builder pattern for easier application creation
pub struct CreateInfoBuilder {
    ci: CreateInfo,
}

impl CreateInfoBuilder {
    pub fn default_repeat(mut self, timing: Option<RepeatTiming>) -> Self {
        self.ci.default_repeat = timing;
        self
    }

    pub fn exit_on_last_window(mut self, exit: bool) -> Self {
        self.ci.exit_on_last_window = exit;
        self
    }

    pub fn dispatcher_name(mut self, name: &str) -> Self {
        self.ci.dispatcher_name = name.to_string();
        self
    }

    pub fn build(self) -> CreateInfo {
        self.ci
    }
}

/// Parameters for constructing a window
#[derive(Debug, Clone)]
pub struct WindowConfig {
    wc_width: u32,
    wc_height: u32,
    wc_title: String,
    wc_event_driven: bool,
}

impl WindowConfig {
    pub fn builder(width: u32, height: u32) -> WindowConfigBuilder {
        WindowConfigBuilder {
            wc: WindowConfig {
                wc_width: width,
                wc_height: height,
                wc_title: String::new(),
                wc_event_driven: false,
            },
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.wc_width, self.wc_height)
    }

    pub fn title(&self) -> &str {
        &self.wc_title
    }

    pub fn is_event_driven(&self) -> bool {
        self.wc_event_driven
    }
}

pub struct WindowConfigBuilder {
    wc: WindowConfig,
}

impl WindowConfigBuilder {
    pub fn title(mut self, title: &str) -> Self {
        self.wc.wc_title = title.to_string();
        self
    }

    /// Event driven windows only redraw when explicitly asked to
    pub fn event_driven(mut self, event_driven: bool) -> Self {
        self.wc.wc_event_driven = event_driven;
        self
    }

    pub fn build(self) -> WindowConfig {
        self.wc
    }
}
