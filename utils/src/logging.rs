// Category-based logging infrastructure
//
// This will be used from multiple threads, so it needs
// to be stateless. The only shared value is the maximum
// level, which is read once from the environment.
use lazy_static::lazy_static;

/// Environment variable controlling the maximum level printed.
///
/// Accepts either a level name (`debug`) or its number (`2`).
pub const LOG_LEVEL_ENV: &str = "SQUALL_LOG_LEVEL";

#[allow(dead_code, non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum LogLevel {
    // in order of highest priority
    critical, // Urgent and must always be displayed
    error,
    debug,     // debugging related, not verbose
    info,      // more verbose
    profiling, // profiling related timing
}

impl LogLevel {
    pub fn get_name(&self) -> &'static str {
        match self {
            LogLevel::critical => "critical",
            LogLevel::error => "error",
            LogLevel::debug => "debug",
            LogLevel::info => "info",
            LogLevel::profiling => "profiling",
        }
    }

    pub fn get_level(&self) -> u32 {
        match self {
            LogLevel::critical => 0,
            LogLevel::error => 1,
            LogLevel::debug => 2,
            LogLevel::info => 3,
            LogLevel::profiling => 4,
        }
    }

    /// Parse a level from its name or its number
    pub fn from_str(name: &str) -> Option<LogLevel> {
        match name.trim().to_lowercase().as_str() {
            "critical" | "0" => Some(LogLevel::critical),
            "error" | "1" => Some(LogLevel::error),
            "debug" | "2" => Some(LogLevel::debug),
            "info" | "3" => Some(LogLevel::info),
            "profiling" | "4" => Some(LogLevel::profiling),
            _ => None,
        }
    }
}

lazy_static! {
    static ref MAX_LOG_LEVEL: u32 = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|v| LogLevel::from_str(&v))
        .unwrap_or(LogLevel::error)
        .get_level();
}

/// The highest level that will be printed
pub fn get_max_level() -> u32 {
    *MAX_LOG_LEVEL
}

#[macro_export]
macro_rules! log_internal {
    ($loglevel:expr, $($format_args:tt)+) => ({
        let level: $crate::logging::LogLevel = $loglevel;
        if level.get_level() <= $crate::logging::get_max_level() {
            println!("[{:?}]<{}> {}:{} - {}",
                     $crate::timing::get_current_millis(),
                     level.get_name(),
                     file!(),
                     line!(),
                     format!($($format_args)+)
            );
        }
    })
}

#[macro_export]
macro_rules! critical {
    ($($format_args:tt)+) => ({
        $crate::log_internal!($crate::logging::LogLevel::critical, $($format_args)+)
    })
}

#[macro_export]
macro_rules! error {
    ($($format_args:tt)+) => ({
        $crate::log_internal!($crate::logging::LogLevel::error, $($format_args)+)
    })
}

#[macro_export]
macro_rules! debug {
    ($($format_args:tt)+) => ({
        $crate::log_internal!($crate::logging::LogLevel::debug, $($format_args)+)
    })
}

#[macro_export]
macro_rules! info {
    ($($format_args:tt)+) => ({
        $crate::log_internal!($crate::logging::LogLevel::info, $($format_args)+)
    })
}

#[macro_export]
macro_rules! profiling {
    ($($format_args:tt)+) => ({
        $crate::log_internal!($crate::logging::LogLevel::profiling, $($format_args)+)
    })
}

#[cfg(test)]
mod tests {
    use super::LogLevel;

    #[test]
    fn parse_names_and_numbers() {
        assert_eq!(LogLevel::from_str("debug"), Some(LogLevel::debug));
        assert_eq!(LogLevel::from_str(" INFO "), Some(LogLevel::info));
        assert_eq!(LogLevel::from_str("4"), Some(LogLevel::profiling));
        assert_eq!(LogLevel::from_str("loud"), None);
    }

    #[test]
    fn levels_are_ordered_by_priority() {
        assert!(LogLevel::critical.get_level() < LogLevel::error.get_level());
        assert!(LogLevel::debug.get_level() < LogLevel::profiling.get_level());
    }
}
