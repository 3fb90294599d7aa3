use std::collections::VecDeque;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Error,
}

#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub at: OffsetDateTime,
    pub level: StatusLevel,
    pub message: String,
}

impl StatusEntry {
    pub fn clock_label(&self) -> String {
        format!(
            "{:02}:{:02}:{:02}",
            self.at.hour(),
            self.at.minute(),
            self.at.second()
        )
    }
}

/// Single user-facing status channel, newest entry first.
#[derive(Debug)]
pub struct StatusLog {
    entries: VecDeque<StatusEntry>,
    capacity: usize,
}

impl StatusLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(status = %message);
        self.push(StatusLevel::Info, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(status = %message);
        self.push(StatusLevel::Error, message);
    }

    fn push(&mut self, level: StatusLevel, message: String) {
        let at = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        self.entries.push_front(StatusEntry { at, level, message });
        self.entries.truncate(self.capacity);
    }

    pub fn latest(&self) -> Option<&StatusEntry> {
        self.entries.front()
    }

    pub fn entries(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries.iter().any(|entry| entry.message.contains(needle))
    }
}
