//! Bounded, append-only build log
//!
//! The stored log is capped at 1 MiB. When the cap is reached the oldest
//! lines are dropped and a truncation marker is prepended, so the tail is
//! always intact. Lines keep flowing to the event bus regardless of the
//! bound.

use std::collections::VecDeque;

use sqlx::SqlitePool;

use crate::bus::EventBus;
use crate::errors::Result;
use crate::models::Event;
use crate::store::DeploymentRepository;

pub const BUILD_LOG_CAP: usize = 1 << 20;
pub const TRUNCATION_MARKER: &str = "[... earlier output truncated ...]";

/// Pure bounded-buffer core, separated from persistence.
#[derive(Debug)]
pub struct BoundedLog {
    lines: VecDeque<String>,
    size: usize,
    cap: usize,
    truncated: bool,
}

/// What persisting a line requires.
#[derive(Debug, PartialEq, Eq)]
pub enum LogWrite {
    /// Append the line as-is.
    Append,
    /// The bound was hit; replace the stored log with this full text.
    Rewrite(String),
}

impl BoundedLog {
    pub fn new(cap: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            size: 0,
            cap,
            truncated: false,
        }
    }

    pub fn push(&mut self, line: &str) -> LogWrite {
        self.lines.push_back(line.to_string());
        self.size += line.len() + 1;

        if self.size <= self.cap {
            return LogWrite::Append;
        }

        while self.size > self.cap {
            if let Some(dropped) = self.lines.pop_front() {
                self.size -= dropped.len() + 1;
            } else {
                break;
            }
        }
        self.truncated = true;

        LogWrite::Rewrite(self.render())
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn render(&self) -> String {
        let mut text = String::with_capacity(self.size + TRUNCATION_MARKER.len() + 1);
        if self.truncated {
            text.push_str(TRUNCATION_MARKER);
            text.push('\n');
        }
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        text
    }
}

/// Build log writer for one deployment: persists through the store and
/// mirrors every line onto `deployment:{id}`.
pub struct BuildLog {
    deployment_id: String,
    repo: DeploymentRepository,
    bus: std::sync::Arc<EventBus>,
    buffer: BoundedLog,
}

impl BuildLog {
    pub fn new(pool: SqlitePool, bus: std::sync::Arc<EventBus>, deployment_id: &str) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            repo: DeploymentRepository::new(pool),
            bus,
            buffer: BoundedLog::new(BUILD_LOG_CAP),
        }
    }

    pub async fn append(&mut self, line: &str) -> Result<()> {
        self.bus.publish(Event::DeploymentLog {
            deployment_id: self.deployment_id.clone(),
            line: line.to_string(),
        });

        match self.buffer.push(line) {
            LogWrite::Append => self.repo.append_log(&self.deployment_id, line).await,
            LogWrite::Rewrite(full) => self.repo.set_log(&self.deployment_id, &full).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_under_cap() {
        let mut log = BoundedLog::new(64);
        assert_eq!(log.push("hello"), LogWrite::Append);
        assert!(!log.is_truncated());
    }

    #[test]
    fn test_overflow_drops_oldest_with_marker() {
        let mut log = BoundedLog::new(24);
        log.push("aaaaaaaaaa");
        log.push("bbbbbbbbbb");
        let write = log.push("cccccccccc");

        match write {
            LogWrite::Rewrite(text) => {
                assert!(text.starts_with(TRUNCATION_MARKER));
                assert!(!text.contains("aaaa"));
                assert!(text.contains("cccccccccc"));
            }
            LogWrite::Append => panic!("expected rewrite after overflow"),
        }
        assert!(log.is_truncated());
    }

    #[test]
    fn test_tail_is_preserved() {
        let mut log = BoundedLog::new(32);
        for i in 0..100 {
            log.push(&format!("line-{:03}", i));
        }
        let text = log.render();
        assert!(text.contains("line-099"));
    }
}
