//! Structured JSONL logger.
//!
//! Adapted from the teacher's `core/network/debug_logger.rs`: a rotating,
//! size-bounded append-only log file, one JSON object per line, with the
//! same temp-file-based exclusive-lock rotation dance. The record shape is
//! simplified to what `spec.md` §7 actually requires — pool name, node
//! name, probe type, and a short human string, plus the error grade as the
//! level — and drops the credential-redaction/correlation-id machinery the
//! teacher needed for its HTTP monitor but this driver has no use for.
//!
//! `spec.md` §1 lists "logging sink setup" as out of scope for the
//! decision engine; that excludes external shipping/rotation *configuration
//! input*, not the presence of structured logging itself (see
//! `SPEC_FULL.md` §2).

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Local;
use flate2::write::GzEncoder;
use flate2::Compression;
use fs2::FileExt;
use serde::Serialize;

const LOG_ROTATION_SIZE_MB: u64 = 8;
const ROTATION_CHECK_INTERVAL: u32 = 200;

/// The three error grades of `spec.md` §7, doubling as the logger's level
/// field. `Info` covers ordinary state-change narration (pool/node
/// up/down), which the spec's error-grade taxonomy doesn't name but the
/// original's `msg.h` severities do (see `SPEC_FULL.md` §6 supplement).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    /// Probe-local failure: recovered by the retry counter or Drain policy.
    Debug,
    /// Subsystem stall: worker channel full, filter command failed, table absent.
    Warn,
    /// Fatal invariant violation: the process is about to exit.
    Critical,
}

impl Level {
    fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Warn => "warn",
            Level::Critical => "critical",
        }
    }

    /// Ascending severity, used to compare against a logger's minimum level.
    fn rank(&self) -> u8 {
        match self {
            Level::Debug => 0,
            Level::Info => 1,
            Level::Warn => 2,
            Level::Critical => 3,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
struct LogEntry {
    timestamp: String,
    level: String,
    component: String,
    event: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    probe: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    fields: HashMap<String, serde_json::Value>,
}

/// Context identifying which pool/node/probe an error message concerns,
/// per the machine-parseable ordering `spec.md` §7 requires:
/// `(pool, node?, probe_type?, message)`.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    pub pool: Option<String>,
    pub node: Option<String>,
    pub probe: Option<&'static str>,
}

impl LogContext {
    pub fn pool(pool: impl Into<String>) -> Self {
        Self {
            pool: Some(pool.into()),
            node: None,
            probe: None,
        }
    }

    pub fn node(pool: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            pool: Some(pool.into()),
            node: Some(node.into()),
            probe: None,
        }
    }

    pub fn probe(pool: impl Into<String>, node: impl Into<String>, probe: &'static str) -> Self {
        Self {
            pool: Some(pool.into()),
            node: Some(node.into()),
            probe: Some(probe),
        }
    }
}

pub struct Logger {
    log_path: PathBuf,
    write_count: AtomicU32,
    mirror_critical_to_stderr: bool,
    min_level: Level,
}

impl Logger {
    pub fn new(log_path: PathBuf) -> Self {
        Self::with_verbosity(log_path, 0)
    }

    /// `verbosity` is the CLI's repeated `-v` count: 0 logs `Info` and
    /// above (the quiet default), 1 or more also logs `Debug`-grade
    /// subsystem-stall/retry narration.
    pub fn with_verbosity(log_path: PathBuf, verbosity: u8) -> Self {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let min_level = if verbosity == 0 { Level::Info } else { Level::Debug };
        Self {
            log_path,
            write_count: AtomicU32::new(0),
            mirror_critical_to_stderr: true,
            min_level,
        }
    }

    pub fn log(&self, level: Level, component: &str, event: &str, message: &str, ctx: &LogContext) {
        if level.rank() < self.min_level.rank() {
            return;
        }

        let entry = LogEntry {
            timestamp: Local::now().to_rfc3339(),
            level: level.as_str().to_string(),
            component: component.to_string(),
            event: event.to_string(),
            message: message.to_string(),
            pool: ctx.pool.clone(),
            node: ctx.node.clone(),
            probe: ctx.probe.map(|p| p.to_string()),
            fields: HashMap::new(),
        };

        if level == Level::Critical && self.mirror_critical_to_stderr {
            eprintln!("CRITICAL [{component}] {event}: {message}");
        }

        if let Ok(line) = serde_json::to_string(&entry) {
            let _ = self.write_with_rotation(&line);
        }
    }

    fn write_with_rotation(&self, json_line: &str) -> std::io::Result<()> {
        if self.write_count.fetch_add(1, Ordering::Relaxed) % ROTATION_CHECK_INTERVAL == 0 {
            let _ = self.rotate_if_needed();
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{json_line}")?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        if !self.needs_rotation()? {
            return Ok(());
        }

        let lock_path = self.log_path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {
                if self.needs_rotation()? {
                    self.perform_rotation()?;
                }
                let _ = std::fs::remove_file(&lock_path);
                Ok(())
            }
            Err(_) => Ok(()),
        }
    }

    fn needs_rotation(&self) -> std::io::Result<bool> {
        if !self.log_path.exists() {
            return Ok(false);
        }
        let metadata = std::fs::metadata(&self.log_path)?;
        Ok(metadata.len() >= LOG_ROTATION_SIZE_MB * 1024 * 1024)
    }

    fn perform_rotation(&self) -> std::io::Result<()> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let filename = self
            .log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("lbhealthd.log");
        let archive_name = format!("{filename}.{timestamp}.gz");
        let archive_path = self
            .log_path
            .parent()
            .map(|p| p.join(&archive_name))
            .unwrap_or_else(|| PathBuf::from(&archive_name));

        let temp_path = self.log_path.with_extension("rotating");
        std::fs::rename(&self.log_path, &temp_path)?;

        let source_file = File::open(&temp_path)?;
        let target_file = File::create(&archive_path)?;
        let mut encoder = GzEncoder::new(target_file, Compression::default());
        std::io::copy(&mut BufReader::new(source_file), &mut encoder)?;
        encoder.finish()?;

        std::fs::remove_file(&temp_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_json_line_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lbhealthd.jsonl");
        let logger = Logger::new(path.clone());
        logger.log(
            Level::Warn,
            "worker",
            "channel_full",
            "worker channel full",
            &LogContext::pool("web"),
        );
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("\"pool\":\"web\""));
        assert!(contents.contains("\"level\":\"warn\""));
    }
}
