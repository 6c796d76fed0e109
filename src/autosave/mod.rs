use std::time::{Duration, Instant};

use time::OffsetDateTime;

use crate::config::AutoSaveConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoSaveStatus {
    Disabled,
    Idle {
        last_saved_at: Option<OffsetDateTime>,
    },
    Pending {
        title: String,
        since: OffsetDateTime,
    },
}

/// Editor content waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEdit {
    pub title: String,
    pub content: String,
}

#[derive(Debug)]
struct Window {
    edit: PendingEdit,
    deadline: Instant,
    since: OffsetDateTime,
}

/// Trailing-edge throttle over editor changes. The first edit opens a window; later
/// edits only replace the content, so at most one write leaves per window and it
/// always carries the newest text.
#[derive(Debug)]
pub struct AutoSaveThrottle {
    enabled: bool,
    throttle: Duration,
    window: Option<Window>,
    last_saved_at: Option<OffsetDateTime>,
}

impl AutoSaveThrottle {
    pub fn new(config: &AutoSaveConfig) -> Self {
        Self {
            enabled: config.enabled,
            throttle: config.throttle(),
            window: None,
            last_saved_at: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_pending(&self) -> bool {
        self.window.is_some()
    }

    pub fn record(&mut self, title: &str, content: &str) {
        self.record_at(title, content, Instant::now());
    }

    pub fn record_at(&mut self, title: &str, content: &str, now: Instant) {
        if !self.enabled {
            return;
        }
        match self.window.as_mut() {
            Some(window) if window.edit.title == title => {
                window.edit.content.clear();
                window.edit.content.push_str(content);
            }
            Some(window) => {
                // The editor flushes before switching notes; anything left here is stale.
                tracing::debug!(stale = %window.edit.title, %title, "replacing pending autosave");
                self.window = Some(self.open_window(title, content, now));
            }
            None => self.window = Some(self.open_window(title, content, now)),
        }
    }

    /// The pending edit once its window has elapsed.
    pub fn poll(&mut self) -> Option<PendingEdit> {
        self.poll_at(Instant::now())
    }

    pub fn poll_at(&mut self, now: Instant) -> Option<PendingEdit> {
        let due = self
            .window
            .as_ref()
            .is_some_and(|window| window.deadline <= now);
        if !due {
            return None;
        }
        self.window.take().map(|window| window.edit)
    }

    /// Drops whatever is pending. Call this before an immediate save so the trailing
    /// write cannot land after it.
    pub fn cancel(&mut self) -> Option<PendingEdit> {
        self.window.take().map(|window| window.edit)
    }

    pub fn mark_saved(&mut self) {
        self.last_saved_at = Some(OffsetDateTime::now_utc());
    }

    pub fn status(&self) -> AutoSaveStatus {
        if !self.enabled {
            return AutoSaveStatus::Disabled;
        }
        match &self.window {
            Some(window) => AutoSaveStatus::Pending {
                title: window.edit.title.clone(),
                since: window.since,
            },
            None => AutoSaveStatus::Idle {
                last_saved_at: self.last_saved_at,
            },
        }
    }

    fn open_window(&self, title: &str, content: &str, now: Instant) -> Window {
        Window {
            edit: PendingEdit {
                title: title.to_string(),
                content: content.to_string(),
            },
            deadline: now + self.throttle,
            since: OffsetDateTime::now_utc(),
        }
    }
}
