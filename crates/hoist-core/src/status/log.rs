//! Per-deployment log written as JSON lines.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Appends entries to `<deployments>/<id>/log.json`.
///
/// Only the deployment lock holder writes a given log, so appends are not
/// otherwise synchronized.
#[derive(Debug, Clone)]
pub struct DeploymentLogger {
    path: PathBuf,
}

impl DeploymentLogger {
    pub const FILE_NAME: &'static str = "log.json";

    pub fn new(deployment_dir: impl AsRef<Path>) -> Self {
        Self {
            path: deployment_dir.as_ref().join(Self::FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, level: LogLevel, message: &str) -> anyhow::Result<()> {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
        };
        let mut line = serde_json::to_string(&entry).context("Failed to serialize log entry")?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open log: {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to write log: {}", self.path.display()))?;
        Ok(())
    }

    /// Log, downgrading a write failure to a tracing warning.
    pub fn record(&self, level: LogLevel, message: &str) {
        if let Err(err) = self.log(level, message) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to write deployment log");
        }
    }

    /// Read every entry; a missing log is empty.
    pub fn entries(&self) -> anyhow::Result<Vec<LogEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read log: {}", self.path.display()));
            }
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .with_context(|| format!("Invalid log line in {}", self.path.display()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_appended_in_order() {
        let temp = tempfile::TempDir::new().unwrap();
        let logger = DeploymentLogger::new(temp.path().join("abc"));

        assert!(logger.entries().unwrap().is_empty());
        logger.log(LogLevel::Info, "Fetching changes.").unwrap();
        logger.log(LogLevel::Error, "Build failed").unwrap();

        let entries = logger.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "Fetching changes.");
        assert_eq!(entries[1].level, LogLevel::Error);
    }
}
