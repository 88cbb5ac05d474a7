//! Live timer ticker.
//!
//! Each tick derives every widget's state from `(end_at_ms, now)` alone and
//! consults the dedup store before raising an alert, so the only state that
//! survives between ticks is the set of dedup markers.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use mixboard_shared::domain::{EntityKey, MixId};
use mixboard_shared::timing::{self, format_duration};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alert::{Alert, AlertSink};
use crate::dedup::{DedupStore, Namespace};

pub const WARNING_THRESHOLD_MS: u64 = 2 * timing::MINUTE_MS;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// One on-screen countdown bound to a stage instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerWidget {
    /// `None` when the stage cannot be identified; such widgets still count
    /// down but never alert.
    pub key: Option<EntityKey>,
    pub end_at_ms: i64,
    pub display_name: String,
    pub stage_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Normal,
    Warning,
    Overdue,
}

impl TimerState {
    pub fn classify(remaining_ms: u64, warning_threshold_ms: u64) -> Self {
        if remaining_ms == 0 {
            TimerState::Overdue
        } else if remaining_ms <= warning_threshold_ms {
            TimerState::Warning
        } else {
            TimerState::Normal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetView {
    pub key: Option<EntityKey>,
    pub state: TimerState,
    pub remaining_ms: u64,
    pub overdue_ms: u64,
    pub label: String,
}

pub fn countdown_label(state: TimerState, remaining_ms: u64, overdue_ms: u64) -> String {
    match state {
        TimerState::Overdue => format!("⚠️ DONE (+ {})", format_duration(overdue_ms)),
        _ => format_duration(remaining_ms),
    }
}

/// Result of one tick, in widget order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub widgets: Vec<WidgetView>,
    pub overdue_cards: BTreeSet<MixId>,
    pub any_overdue: bool,
    /// Smallest remaining time among widgets that are not overdue.
    pub min_remaining_ms: Option<u64>,
}

/// Dedup-guarded alerting. Each stage instance gets at most one warning and
/// one completion alert.
#[derive(Clone)]
pub struct NotificationService {
    dedup: Arc<dyn DedupStore>,
    sink: Arc<dyn AlertSink>,
}

impl NotificationService {
    pub fn new(dedup: Arc<dyn DedupStore>, sink: Arc<dyn AlertSink>) -> Self {
        Self { dedup, sink }
    }

    /// Returns true if the alert was dispatched on this call.
    pub fn warn_once(
        &self,
        key: &EntityKey,
        display_name: &str,
        stage_name: &str,
        remaining_ms: u64,
    ) -> bool {
        self.fire_once(
            Namespace::Warned,
            key,
            Alert::Warning {
                display_name: display_name.to_string(),
                stage_name: stage_name.to_string(),
                remaining_ms,
            },
        )
    }

    pub fn complete_once(&self, key: &EntityKey, display_name: &str, stage_name: &str) -> bool {
        self.fire_once(
            Namespace::Notified,
            key,
            Alert::Completion {
                display_name: display_name.to_string(),
                stage_name: stage_name.to_string(),
            },
        )
    }

    fn fire_once(&self, ns: Namespace, key: &EntityKey, alert: Alert) -> bool {
        if self.dedup.has_fired(ns, key) {
            return false;
        }
        info!(key = %key, ?ns, "firing alert");
        self.sink.dispatch(alert);
        if let Err(e) = self.dedup.mark_fired(ns, key) {
            warn!(key = %key, error=%e, "failed to persist alert marker");
        }
        true
    }
}

/// Wall clock in Unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        mixboard_shared::domain::now_ms()
    }
}

impl<F> Clock for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn now_ms(&self) -> i64 {
        self()
    }
}

/// Anything that carries the widgets currently on screen.
pub trait WidgetSource {
    fn widgets(&self) -> &[TimerWidget];
}

impl WidgetSource for Vec<TimerWidget> {
    fn widgets(&self) -> &[TimerWidget] {
        self
    }
}

/// Receives each frame together with its tick report.
pub trait BoardView<F>: Send {
    fn render(&mut self, frame: &F, report: &TickReport);
}

pub struct LiveTicker {
    service: NotificationService,
    warning_threshold_ms: u64,
}

impl LiveTicker {
    pub fn new(service: NotificationService) -> Self {
        Self {
            service,
            warning_threshold_ms: WARNING_THRESHOLD_MS,
        }
    }

    pub fn with_warning_threshold(mut self, threshold: Duration) -> Self {
        self.warning_threshold_ms = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn warning_threshold_ms(&self) -> u64 {
        self.warning_threshold_ms
    }

    /// Recomputes every widget against `now_ms` and fires due alerts.
    pub fn tick(&self, widgets: &[TimerWidget], now_ms: i64) -> TickReport {
        let mut report = TickReport {
            widgets: Vec::with_capacity(widgets.len()),
            ..Default::default()
        };
        for w in widgets {
            let remaining_ms = timing::remaining(w.end_at_ms, now_ms);
            let overdue_ms = timing::overdue_by(w.end_at_ms, now_ms);
            let state = TimerState::classify(remaining_ms, self.warning_threshold_ms);
            match state {
                TimerState::Normal => {}
                TimerState::Warning => {
                    if let Some(key) = &w.key {
                        self.service
                            .warn_once(key, &w.display_name, &w.stage_name, remaining_ms);
                    }
                }
                TimerState::Overdue => {
                    report.any_overdue = true;
                    if let Some(key) = &w.key {
                        report.overdue_cards.insert(key.mix_id.clone());
                        self.service
                            .complete_once(key, &w.display_name, &w.stage_name);
                    }
                }
            }
            if state != TimerState::Overdue {
                report.min_remaining_ms = Some(match report.min_remaining_ms {
                    Some(m) => m.min(remaining_ms),
                    None => remaining_ms,
                });
            }
            report.widgets.push(WidgetView {
                key: w.key.clone(),
                state,
                remaining_ms,
                overdue_ms,
                label: countdown_label(state, remaining_ms, overdue_ms),
            });
        }
        report
    }

    /// Ticks every `period` until `cancel` fires, rendering the latest frame
    /// each time. No tick runs after cancellation is observed.
    ///
    /// The frame is copied out of the channel before ticking, so alert
    /// bookkeeping and terminal output never hold up the sender.
    pub async fn run<F, V, C>(
        &self,
        mut frames: watch::Receiver<F>,
        clock: C,
        view: &mut V,
        period: Duration,
        cancel: CancellationToken,
    ) where
        F: WidgetSource + Clone,
        V: BoardView<F>,
        C: Clock,
    {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(period_ms = period.as_millis() as u64, "ticker started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let frame = frames.borrow_and_update().clone();
            let report = self.tick(frame.widgets(), clock.now_ms());
            view.render(&frame, &report);
        }
        debug!("ticker stopped");
    }
}
