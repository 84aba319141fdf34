//! Logging for the folio search facade.
//!
//! Every facade operation reports what it sends to the engine through these
//! macros. Output goes to stderr, one line per record, and is controlled by
//! environment variables read once on first use.
//!
//! # Usage
//!
//! ```rust
//! use folio_log::{debug, info, warn};
//!
//! debug!("building request");
//! info!("indexed book {}", "b-1");
//!
//! // Structured fields follow a `;`
//! let index = "books";
//! debug!("search sent"; "index" => index, "aggs" => 2);
//! warn!(target: "folio::transport", "slow round trip"; "took_ms" => 950);
//! ```
//!
//! # Environment Variables
//!
//! - `FOLIO_DEBUG=1` - Enable debug logging
//! - `FOLIO_LOG_LEVEL=trace|debug|info|warn|error|off` - Minimum level
//! - `FOLIO_LOG_FORMAT=pretty|compact|json` - Output format (default `json`)
//! - `FOLIO_LOG_TIMESTAMPS=1|0` - Include timestamps

use once_cell::sync::Lazy;
use std::env;
use std::fmt::Display;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

// ============================================================================
// Levels and formats
// ============================================================================

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Wire-level detail (request bodies)
    Trace = 0,
    /// Per-operation detail
    Debug = 1,
    /// Lifecycle events
    Info = 2,
    /// Recoverable problems
    Warn = 3,
    /// Failed round trips
    Error = 4,
    /// Nothing is logged
    Off = 5,
}

impl Level {
    /// Parse a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Upper-case level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Off => "OFF",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            4 => Level::Error,
            _ => Level::Off,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format for log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// `2026-01-01 10:00:00.000 DEBUG [target] message k=v`
    Pretty,
    /// `10:00:00 D target: message k=v`
    Compact,
    /// One JSON object per line
    Json,
}

impl Format {
    /// Parse a format name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Global configuration
// ============================================================================

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static CONFIG: Lazy<LogConfig> = Lazy::new(LogConfig::from_env);

/// Logging configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `FOLIO_DEBUG` was set
    pub debug: bool,
    /// Minimum level at startup
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether records carry a timestamp
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            timestamps: true,
        }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl LogConfig {
    /// Read `FOLIO_*` variables and publish the level to the global atomics.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let debug = env_flag("FOLIO_DEBUG").unwrap_or(defaults.debug);

        let level = env::var("FOLIO_LOG_LEVEL")
            .ok()
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { defaults.level });

        let format = env::var("FOLIO_LOG_FORMAT")
            .ok()
            .and_then(|s| Format::parse(&s))
            .unwrap_or(defaults.format);

        let timestamps = env_flag("FOLIO_LOG_TIMESTAMPS").unwrap_or(defaults.timestamps);

        DEBUG_ENABLED.store(debug, Ordering::SeqCst);
        LOG_LEVEL.store(level as u8, Ordering::SeqCst);

        Self {
            debug,
            level,
            format,
            timestamps,
        }
    }
}

/// Force configuration loading. Macros do this lazily otherwise.
pub fn init() {
    Lazy::force(&CONFIG);
}

/// The configuration read at startup.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

/// Whether `FOLIO_DEBUG` (or [`set_debug`]) turned debug output on.
#[inline]
pub fn is_debug_enabled() -> bool {
    init();
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Whether records at `level` are emitted.
#[inline]
pub fn is_level_enabled(level: Level) -> bool {
    init();
    level != Level::Off && level as u8 >= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Current minimum level.
pub fn current_level() -> Level {
    init();
    Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Change the minimum level at runtime.
pub fn set_level(level: Level) {
    init();
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Toggle debug mode at runtime. Enabling it lowers the level to `Debug`.
pub fn set_debug(enabled: bool) {
    init();
    DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
    if enabled && current_level() > Level::Debug {
        set_level(Level::Debug);
    }
}

// ============================================================================
// Output
// ============================================================================

/// Key/value pair attached to a record.
pub type Field<'a> = (&'a str, &'a dyn Display);

/// Emit a record. Called by the macros.
#[doc(hidden)]
pub fn log(level: Level, target: &str, message: &str, fields: &[Field<'_>]) {
    if !is_level_enabled(level) {
        return;
    }

    let line = render(config(), level, target, message, fields);
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{}", line);
}

fn render(
    config: &LogConfig,
    level: Level,
    target: &str,
    message: &str,
    fields: &[Field<'_>],
) -> String {
    match config.format {
        Format::Pretty => {
            let mut out = String::new();
            if config.timestamps {
                out.push_str(&chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f ").to_string());
            }
            out.push_str(&format!("{:5} ", level.as_str()));
            if !target.is_empty() {
                out.push_str(&format!("[{}] ", target));
            }
            out.push_str(message);
            push_text_fields(&mut out, fields);
            out
        }
        Format::Compact => {
            let mut out = String::new();
            if config.timestamps {
                out.push_str(&chrono::Local::now().format("%H:%M:%S ").to_string());
            }
            out.push(level.as_str().chars().next().unwrap_or('?'));
            out.push(' ');
            if !target.is_empty() {
                out.push_str(target);
                out.push_str(": ");
            }
            out.push_str(message);
            push_text_fields(&mut out, fields);
            out
        }
        Format::Json => render_json(config, level, target, message, fields),
    }
}

fn push_text_fields(out: &mut String, fields: &[Field<'_>]) {
    for (key, value) in fields {
        out.push_str(&format!(" {}={}", key, value));
    }
}

#[cfg(feature = "json")]
fn render_json(
    config: &LogConfig,
    level: Level,
    target: &str,
    message: &str,
    fields: &[Field<'_>],
) -> String {
    use serde::Serialize;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct Record<'a> {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        level: &'a str,
        target: &'a str,
        message: &'a str,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        fields: BTreeMap<&'a str, String>,
    }

    let record = Record {
        timestamp: config.timestamps.then(|| chrono::Utc::now().to_rfc3339()),
        level: level.as_str(),
        target,
        message,
        fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
    };

    serde_json::to_string(&record).unwrap_or_else(|_| message.to_string())
}

#[cfg(not(feature = "json"))]
fn render_json(
    config: &LogConfig,
    level: Level,
    target: &str,
    message: &str,
    fields: &[Field<'_>],
) -> String {
    let mut out = String::from("{");
    if config.timestamps {
        out.push_str(&format!("\"timestamp\":\"{}\",", chrono::Utc::now().to_rfc3339()));
    }
    out.push_str(&format!(
        "\"level\":\"{}\",\"target\":\"{}\",\"message\":\"{}\"",
        level.as_str(),
        escape_json(target),
        escape_json(message)
    ));
    if !fields.is_empty() {
        let rendered: Vec<String> = fields
            .iter()
            .map(|(k, v)| format!("\"{}\":\"{}\"", escape_json(k), escape_json(&v.to_string())))
            .collect();
        out.push_str(&format!(",\"fields\":{{{}}}", rendered.join(",")));
    }
    out.push('}');
    out
}

#[cfg(not(feature = "json"))]
fn escape_json(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if c.is_control() => result.push_str(&format!("\\u{:04x}", c as u32)),
            c => result.push(c),
        }
    }
    result
}

// ============================================================================
// Macros
// ============================================================================

/// Shared expansion for the level macros.
#[doc(hidden)]
#[macro_export]
macro_rules! __folio_log {
    ($level:expr, $target:expr, $fmt:literal $(, $arg:expr)* ; $($key:literal => $value:expr),+ $(,)?) => {
        if $crate::is_level_enabled($level) {
            $crate::log(
                $level,
                $target,
                &format!($fmt $(, $arg)*),
                &[$(($key, &$value as &dyn ::std::fmt::Display)),+],
            );
        }
    };
    ($level:expr, $target:expr, $($arg:tt)+) => {
        if $crate::is_level_enabled($level) {
            $crate::log($level, $target, &format!($($arg)+), &[]);
        }
    };
}

/// Log at trace level.
#[macro_export]
macro_rules! trace {
    (target: $target:expr, $($rest:tt)+) => {
        $crate::__folio_log!($crate::Level::Trace, $target, $($rest)+)
    };
    ($($rest:tt)+) => {
        $crate::__folio_log!($crate::Level::Trace, module_path!(), $($rest)+)
    };
}

/// Log at debug level.
///
/// Emitted when `FOLIO_DEBUG=1` or `FOLIO_LOG_LEVEL` is `debug`/`trace`.
///
/// ```rust
/// use folio_log::debug;
///
/// let id = "b-7";
/// debug!("updating {}", id);
/// debug!("updating"; "id" => id, "fields" => 3);
/// ```
#[macro_export]
macro_rules! debug {
    (target: $target:expr, $($rest:tt)+) => {
        $crate::__folio_log!($crate::Level::Debug, $target, $($rest)+)
    };
    ($($rest:tt)+) => {
        $crate::__folio_log!($crate::Level::Debug, module_path!(), $($rest)+)
    };
}

/// Log at info level.
#[macro_export]
macro_rules! info {
    (target: $target:expr, $($rest:tt)+) => {
        $crate::__folio_log!($crate::Level::Info, $target, $($rest)+)
    };
    ($($rest:tt)+) => {
        $crate::__folio_log!($crate::Level::Info, module_path!(), $($rest)+)
    };
}

/// Log at warn level.
#[macro_export]
macro_rules! warn {
    (target: $target:expr, $($rest:tt)+) => {
        $crate::__folio_log!($crate::Level::Warn, $target, $($rest)+)
    };
    ($($rest:tt)+) => {
        $crate::__folio_log!($crate::Level::Warn, module_path!(), $($rest)+)
    };
}

/// Log at error level.
#[macro_export]
macro_rules! error {
    (target: $target:expr, $($rest:tt)+) => {
        $crate::__folio_log!($crate::Level::Error, $target, $($rest)+)
    };
    ($($rest:tt)+) => {
        $crate::__folio_log!($crate::Level::Error, module_path!(), $($rest)+)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_config(format: Format) -> LogConfig {
        LogConfig {
            format,
            timestamps: false,
            ..LogConfig::default()
        }
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Off);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("debug"), Some(Level::Debug));
        assert_eq!(Level::parse(" WARNING "), Some(Level::Warn));
        assert_eq!(Level::parse("none"), Some(Level::Off));
        assert_eq!(Level::parse("loud"), None);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(Format::parse("json"), Some(Format::Json));
        assert_eq!(Format::parse("Compact"), Some(Format::Compact));
        assert_eq!(Format::parse("xml"), None);
    }

    #[test]
    fn test_pretty_render_with_fields() {
        let id = "b-1";
        let line = render(
            &text_config(Format::Pretty),
            Level::Debug,
            "folio::catalog",
            "indexed",
            &[("index", &"books"), ("id", &id)],
        );
        assert_eq!(line, "DEBUG [folio::catalog] indexed index=books id=b-1");
    }

    #[test]
    fn test_compact_render() {
        let line = render(&text_config(Format::Compact), Level::Warn, "t", "slow", &[]);
        assert_eq!(line, "W t: slow");
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json_render() {
        let line = render(
            &text_config(Format::Json),
            Level::Error,
            "folio",
            "round trip failed",
            &[("status", &503)],
        );
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["level"], "ERROR");
        assert_eq!(value["message"], "round trip failed");
        assert_eq!(value["fields"]["status"], "503");
        assert!(value.get("timestamp").is_none());
    }

    #[test]
    fn test_runtime_level_changes() {
        let original = current_level();

        set_level(Level::Error);
        assert!(!is_level_enabled(Level::Warn));
        assert!(is_level_enabled(Level::Error));

        set_level(original);
    }

    #[test]
    fn test_macros_expand() {
        trace!("trace message");
        debug!("debug {}", 1);
        info!(target: "folio::test", "with target");
        warn!("with fields"; "index" => "logs");
        error!(target: "folio::test", "both {}", 2; "id" => "x", "n" => 3);
    }
}
