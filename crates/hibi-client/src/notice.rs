//! User-visible notices (toasts).

use tokio::sync::broadcast;

use crate::constants::NOTICE_CHANNEL_CAPACITY;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, message: message.into() }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, message: message.into() }
    }
}

/// Broadcast of notices to whatever UI is listening. Publishing with no
/// listeners is not an error.
#[derive(Clone)]
pub struct Notices {
    tx: broadcast::Sender<Notice>,
}

impl Notices {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => tracing::warn!(message = %notice.message, "error notice"),
            NoticeLevel::Info => tracing::debug!(message = %notice.message, "notice"),
        }
        let _ = self.tx.send(notice);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }
}

impl Default for Notices {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_subscribers() {
        let notices = Notices::new();
        notices.publish(Notice::info("nobody listening"));

        let mut rx = notices.subscribe();
        notices.publish(Notice::error("Couldn't archive task"));
        assert_eq!(rx.try_recv().unwrap(), Notice::error("Couldn't archive task"));
        assert!(rx.try_recv().is_err());
    }
}
