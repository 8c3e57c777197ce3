use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::UiConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticePhase {
    Shown,
    Fading,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub message: String,
    pub kind: NoticeKind,
    posted_at: Instant,
}

/// Transient toasts. Each one is shown for `display`, fades for `fade`, then
/// disappears on its own; none of this touches session or turn state.
#[derive(Debug)]
pub struct Notifications {
    items: VecDeque<Notice>,
    next_id: u64,
    display: Duration,
    fade: Duration,
}

impl Notifications {
    pub fn new(config: &UiConfig) -> Self {
        Self {
            items: VecDeque::new(),
            next_id: 1,
            display: config.notice_display,
            fade: config.notice_fade,
        }
    }

    pub fn notify(&mut self, message: impl Into<String>, kind: NoticeKind, now: Instant) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.items.push_back(Notice {
            id,
            message: message.into(),
            kind,
            posted_at: now,
        });
        id
    }

    /// Drop everything whose display and fade time have both elapsed.
    pub fn prune(&mut self, now: Instant) {
        let lifetime = self.display + self.fade;
        self.items
            .retain(|notice| now.saturating_duration_since(notice.posted_at) < lifetime);
    }

    pub fn visible(&self, now: Instant) -> impl Iterator<Item = (&Notice, NoticePhase)> + '_ {
        let lifetime = self.display + self.fade;
        self.items.iter().filter_map(move |notice| {
            let age = now.saturating_duration_since(notice.posted_at);
            if age >= lifetime {
                None
            } else if age >= self.display {
                Some((notice, NoticePhase::Fading))
            } else {
                Some((notice, NoticePhase::Shown))
            }
        })
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn notices_fade_then_disappear() {
        let mut notices = Notifications::new(&UiConfig::default());
        let t0 = Instant::now();
        notices.notify("Session cleared", NoticeKind::Info, t0);

        let phases: Vec<_> = notices.visible(t0 + ms(2999)).map(|(_, p)| p).collect();
        assert_eq!(phases, vec![NoticePhase::Shown]);

        let phases: Vec<_> = notices.visible(t0 + ms(3200)).map(|(_, p)| p).collect();
        assert_eq!(phases, vec![NoticePhase::Fading]);

        notices.prune(t0 + ms(3499));
        assert_eq!(notices.len(), 1);
        notices.prune(t0 + ms(3500));
        assert!(notices.is_empty());
    }

    #[test]
    fn notices_dismiss_independently() {
        let mut notices = Notifications::new(&UiConfig::default());
        let t0 = Instant::now();
        let first = notices.notify("first", NoticeKind::Info, t0);
        let second = notices.notify("second", NoticeKind::Error, t0 + ms(2000));
        assert_ne!(first, second);

        notices.prune(t0 + ms(4000));
        let left: Vec<_> = notices
            .visible(t0 + ms(4000))
            .map(|(notice, _)| (notice.message.as_str(), notice.kind))
            .collect();
        assert_eq!(left, vec![("second", NoticeKind::Error)]);

        notices.prune(t0 + ms(5500));
        assert!(notices.is_empty());
    }
}
