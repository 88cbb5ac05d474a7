//! Title and icon indicators that summarise the whole board.

use mixboard_shared::timing::format_duration;

/// Icon shown while any timer on the board is overdue.
pub const ALERT_ICON: &str = "⚠ mixboard";

/// Title for the aggregate board state. Overdue wins over a countdown.
pub fn compose_title(any_overdue: bool, min_remaining_ms: Option<u64>, original: &str) -> String {
    if any_overdue {
        return format!("⚠ DONE — {original}");
    }
    match min_remaining_ms {
        Some(ms) if ms > 0 => format!("⏱ {} — {original}", format_duration(ms)),
        _ => original.to_string(),
    }
}

/// Where the badge icon ends up (terminal icon name, window icon, ...).
pub trait IconSink {
    fn current_icon(&self) -> String;
    fn set_icon(&mut self, icon: &str);
}

/// Swaps the icon to [`ALERT_ICON`] while anything is overdue and puts the
/// original back afterwards. Writes only on transitions.
#[derive(Debug)]
pub struct FaviconBadge<S> {
    sink: S,
    original: Option<String>,
    alerting: bool,
}

impl<S: IconSink> FaviconBadge<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            original: None,
            alerting: false,
        }
    }

    /// Returns true if the icon was changed.
    pub fn update(&mut self, any_overdue: bool) -> bool {
        if any_overdue == self.alerting {
            return false;
        }
        if any_overdue {
            if self.original.is_none() {
                self.original = Some(self.sink.current_icon());
            }
            self.sink.set_icon(ALERT_ICON);
        } else if let Some(original) = &self.original {
            self.sink.set_icon(original);
        }
        self.alerting = any_overdue;
        true
    }

    pub fn is_alerting(&self) -> bool {
        self.alerting
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_variants() {
        assert_eq!(compose_title(true, Some(30_000), "Board"), "⚠ DONE — Board");
        assert_eq!(compose_title(true, None, "Board"), "⚠ DONE — Board");
        assert_eq!(compose_title(false, Some(90_000), "Board"), "⏱ 1m 30s — Board");
        assert_eq!(compose_title(false, Some(0), "Board"), "Board");
        assert_eq!(compose_title(false, None, "Board"), "Board");
    }

    #[derive(Default)]
    struct FakeIcon {
        icon: String,
        writes: Vec<String>,
    }

    impl IconSink for FakeIcon {
        fn current_icon(&self) -> String {
            self.icon.clone()
        }
        fn set_icon(&mut self, icon: &str) {
            self.icon = icon.to_string();
            self.writes.push(icon.to_string());
        }
    }

    #[test]
    fn badge_swaps_only_on_transitions() {
        let mut badge = FaviconBadge::new(FakeIcon {
            icon: "mixboard".into(),
            ..Default::default()
        });
        assert!(!badge.update(false));
        assert!(badge.sink().writes.is_empty());

        assert!(badge.update(true));
        assert!(!badge.update(true));
        assert!(badge.is_alerting());
        assert_eq!(badge.sink().icon, ALERT_ICON);

        assert!(badge.update(false));
        assert!(!badge.update(false));
        assert_eq!(badge.sink().icon, "mixboard");
        assert_eq!(badge.sink().writes, vec![ALERT_ICON.to_string(), "mixboard".into()]);
    }

    #[test]
    fn original_icon_is_cached_once() {
        let mut badge = FaviconBadge::new(FakeIcon {
            icon: "first".into(),
            ..Default::default()
        });
        badge.update(true);
        badge.update(false);
        // someone else changes the icon in between
        badge.sink_mut().icon = "second".into();
        badge.update(true);
        badge.update(false);
        assert_eq!(badge.sink().icon, "first");
    }
}
