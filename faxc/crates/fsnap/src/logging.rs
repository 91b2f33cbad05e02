//! Snapshot Logging and Tracing
//!
//! Structured pass events, kept in a bounded history and optionally echoed
//! to the console as text or JSON. Free-form diagnostics go through the
//! `log` facade instead.
//!
//! Log Levels:
//! - WARN: Aborted passes
//! - INFO: Pass start/end
//! - DEBUG: Externalized and transferred buffers, postprocessing
//! - TRACE: Canonical table hits

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::object::ObjectKind;
use crate::snapshot::SnapshotKind;

/// Log level for snapshot events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

/// Direction of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassDirection {
    Read,
    Write,
}

impl PassDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            PassDirection::Read => "read",
            PassDirection::Write => "write",
        }
    }
}

/// Snapshot event types
#[derive(Debug, Clone)]
pub enum SnapshotEvent {
    PassStart {
        direction: PassDirection,
        kind: SnapshotKind,
    },

    PassEnd {
        direction: PassDirection,
        kind: SnapshotKind,
        objects: u64,
        bytes: u64,
    },

    /// Pass failed; nothing it produced survives
    PassAborted {
        direction: PassDirection,
        kind: SnapshotKind,
        reason: String,
    },

    /// Buffer copied out of line into a message
    Externalized { bytes: usize },

    /// Buffer moved with a transferable
    Transferred { bytes: usize },

    Canonicalized { kind: ObjectKind, hit: bool },

    PostprocessDrained { types: usize, maps: usize },
}

/// Snapshot logger configuration
#[derive(Debug, Clone)]
pub struct SnapshotLoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Echo events on the console
    pub console: bool,

    /// JSON console format
    pub json: bool,

    /// Prefix console lines with a timestamp
    pub timestamps: bool,

    /// Events kept in history; the oldest go first
    pub max_events: usize,
}

impl Default for SnapshotLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: false,
            json: false,
            timestamps: true,
            max_events: 4096,
        }
    }
}

/// Snapshot logger
pub struct SnapshotLogger {
    config: SnapshotLoggerConfig,
    events: Mutex<VecDeque<(Instant, SnapshotEvent)>>,
    enabled: AtomicBool,
}

impl SnapshotLogger {
    pub fn new(config: SnapshotLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log a snapshot event
    pub fn log(&self, event: SnapshotEvent) {
        if !self.is_enabled() || event_level(&event) > self.config.level {
            return;
        }

        {
            let mut events = self.events.lock();
            if events.len() == self.config.max_events {
                events.pop_front();
            }
            if self.config.max_events > 0 {
                events.push_back((Instant::now(), event.clone()));
            }
        }

        if self.config.console {
            self.output_console(&event);
        }
    }

    fn output_console(&self, event: &SnapshotEvent) {
        let line = if self.config.json {
            match serde_json::to_string(&event_json(event)) {
                Ok(line) => line,
                Err(_) => return,
            }
        } else {
            event_text(event)
        };

        if self.config.timestamps {
            let now = chrono::Local::now();
            println!("[{}] {}", now.format("%Y-%m-%d %H:%M:%S%.3f"), line);
        } else {
            println!("{}", line);
        }
    }

    pub fn get_events(&self) -> Vec<(Instant, SnapshotEvent)> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for SnapshotLogger {
    fn default() -> Self {
        Self::new(SnapshotLoggerConfig::default())
    }
}

fn event_level(event: &SnapshotEvent) -> LogLevel {
    match event {
        SnapshotEvent::PassAborted { .. } => LogLevel::Warn,
        SnapshotEvent::PassStart { .. } | SnapshotEvent::PassEnd { .. } => LogLevel::Info,
        SnapshotEvent::Externalized { .. }
        | SnapshotEvent::Transferred { .. }
        | SnapshotEvent::PostprocessDrained { .. } => LogLevel::Debug,
        SnapshotEvent::Canonicalized { .. } => LogLevel::Trace,
    }
}

fn event_text(event: &SnapshotEvent) -> String {
    match event {
        SnapshotEvent::PassStart { direction, kind } => {
            format!("[SNAP] {} {} pass started", kind, direction.as_str())
        },
        SnapshotEvent::PassEnd {
            direction,
            kind,
            objects,
            bytes,
        } => format!(
            "[SNAP] {} {} pass completed ({} objects, {} bytes)",
            kind,
            direction.as_str(),
            objects,
            bytes
        ),
        SnapshotEvent::PassAborted {
            direction,
            kind,
            reason,
        } => format!(
            "[SNAP] {} {} pass aborted: {}",
            kind,
            direction.as_str(),
            reason
        ),
        SnapshotEvent::Externalized { bytes } => format!("[SNAP] Externalized {} bytes", bytes),
        SnapshotEvent::Transferred { bytes } => format!("[SNAP] Transferred {} bytes", bytes),
        SnapshotEvent::Canonicalized { kind, hit } => format!(
            "[SNAP] Canonical {} for {}",
            if *hit { "hit" } else { "miss" },
            kind
        ),
        SnapshotEvent::PostprocessDrained { types, maps } => format!(
            "[SNAP] Postprocessed {} types, {} maps",
            types, maps
        ),
    }
}

fn event_json(event: &SnapshotEvent) -> serde_json::Value {
    match event {
        SnapshotEvent::PassStart { direction, kind } => serde_json::json!({
            "type": "pass_start",
            "direction": direction.as_str(),
            "snapshot": kind.to_string()
        }),
        SnapshotEvent::PassEnd {
            direction,
            kind,
            objects,
            bytes,
        } => serde_json::json!({
            "type": "pass_end",
            "direction": direction.as_str(),
            "snapshot": kind.to_string(),
            "objects": objects,
            "bytes": bytes
        }),
        SnapshotEvent::PassAborted {
            direction,
            kind,
            reason,
        } => serde_json::json!({
            "type": "pass_aborted",
            "direction": direction.as_str(),
            "snapshot": kind.to_string(),
            "reason": reason
        }),
        SnapshotEvent::Externalized { bytes } => serde_json::json!({
            "type": "externalized",
            "bytes": bytes
        }),
        SnapshotEvent::Transferred { bytes } => serde_json::json!({
            "type": "transferred",
            "bytes": bytes
        }),
        SnapshotEvent::Canonicalized { kind, hit } => serde_json::json!({
            "type": "canonicalized",
            "kind": kind.to_string(),
            "hit": hit
        }),
        SnapshotEvent::PostprocessDrained { types, maps } => serde_json::json!({
            "type": "postprocess_drained",
            "types": types,
            "maps": maps
        }),
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_LOGGER: Mutex<SnapshotLogger> = Mutex::new(SnapshotLogger::default());
}

/// Log an event to the global logger
pub fn log_event(event: SnapshotEvent) {
    GLOBAL_LOGGER.lock().log(event);
}

/// Replace the global logger
pub fn configure_logger(config: SnapshotLoggerConfig) {
    *GLOBAL_LOGGER.lock() = SnapshotLogger::new(config);
}

/// Number of events in the global history
pub fn get_event_count() -> usize {
    GLOBAL_LOGGER.lock().event_count()
}
