use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mixboard_shared::timing::minutes_ceil;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A sine tone played as one or more identical pulses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: f32,
    pub volume: f32,
    pub pulse: Duration,
    /// Start offset of each pulse from the start of the alert.
    pub offsets: &'static [Duration],
}

/// A5, loud, single.
pub const COMPLETION_TONE: Tone = Tone {
    frequency_hz: 880.0,
    volume: 0.4,
    pulse: Duration::from_millis(1200),
    offsets: &[Duration::ZERO],
};

/// E5, soft, double.
pub const WARNING_TONE: Tone = Tone {
    frequency_hz: 660.0,
    volume: 0.2,
    pulse: Duration::from_millis(400),
    offsets: &[Duration::ZERO, Duration::from_millis(450)],
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    Completion {
        display_name: String,
        stage_name: String,
    },
    Warning {
        display_name: String,
        stage_name: String,
        remaining_ms: u64,
    },
}

impl Alert {
    pub fn title(&self) -> String {
        match self {
            Alert::Completion { display_name, .. } => format!("⏱ Stage complete: {display_name}"),
            Alert::Warning {
                display_name,
                remaining_ms,
                ..
            } => format!("⚠️ {} min left: {display_name}", minutes_ceil(*remaining_ms)),
        }
    }

    pub fn body(&self) -> String {
        match self {
            Alert::Completion { stage_name, .. } => format!("\"{stage_name}\" has finished!"),
            Alert::Warning { stage_name, .. } => format!("Stage \"{stage_name}\" is almost done!"),
        }
    }

    pub fn tone(&self) -> Tone {
        match self {
            Alert::Completion { .. } => COMPLETION_TONE,
            Alert::Warning { .. } => WARNING_TONE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("audio error: {0}")]
    Audio(String),
    #[error("notification error: {0}")]
    Notification(String),
}

/// Blocking tone output. Called off the async runtime.
pub trait TonePlayer: Send + Sync {
    fn play(&self, tone: &Tone) -> Result<(), AlertError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show(&self, title: &str, body: &str) -> Result<(), AlertError>;
}

/// Audio stays muted until the user has interacted with the board once.
#[derive(Debug, Clone, Default)]
pub struct AudioGate {
    unlocked: Arc<AtomicBool>,
}

impl AudioGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time the gate opens.
    pub fn unlock(&self) -> bool {
        !self.unlocked.swap(true, Ordering::SeqCst)
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }
}

/// Receives alerts from the ticker. Must return promptly.
pub trait AlertSink: Send + Sync {
    fn dispatch(&self, alert: Alert);
}

/// Background work started for one alert.
#[derive(Debug, Default)]
pub struct Dispatched {
    pub sound: Option<JoinHandle<()>>,
    pub notification: Option<JoinHandle<()>>,
}

/// Plays the tone and shows the desktop notification for each alert, each on
/// its own task so neither channel can hold up the other or the caller.
#[derive(Clone)]
pub struct AlertDispatcher {
    gate: AudioGate,
    player: Option<Arc<dyn TonePlayer>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl AlertDispatcher {
    pub fn new(
        gate: AudioGate,
        player: Option<Arc<dyn TonePlayer>>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            gate,
            player,
            notifier,
        }
    }

    pub fn fire_completion_alert(&self, display_name: &str, stage_name: &str) -> Dispatched {
        self.spawn(Alert::Completion {
            display_name: display_name.to_string(),
            stage_name: stage_name.to_string(),
        })
    }

    pub fn fire_warning_alert(
        &self,
        display_name: &str,
        stage_name: &str,
        remaining_ms: u64,
    ) -> Dispatched {
        self.spawn(Alert::Warning {
            display_name: display_name.to_string(),
            stage_name: stage_name.to_string(),
            remaining_ms,
        })
    }

    fn spawn(&self, alert: Alert) -> Dispatched {
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            warn!("alert: no async runtime; dropping alert");
            return Dispatched::default();
        };
        let mut out = Dispatched::default();

        if let Some(player) = &self.player {
            if self.gate.is_unlocked() {
                let player = player.clone();
                let tone = alert.tone();
                out.sound = Some(rt.spawn(async move {
                    match tokio::task::spawn_blocking(move || player.play(&tone)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => debug!(error=%e, "alert: tone playback failed"),
                        Err(e) => debug!(error=%e, "alert: tone task failed"),
                    }
                }));
            } else {
                debug!("alert: audio locked until first input; skipping tone");
            }
        }

        if let Some(notifier) = &self.notifier {
            let notifier = notifier.clone();
            let title = alert.title();
            let body = alert.body();
            out.notification = Some(rt.spawn(async move {
                if let Err(e) = notifier.show(&title, &body).await {
                    debug!(error=%e, "alert: desktop notification failed");
                }
            }));
        }
        out
    }
}

impl AlertSink for AlertDispatcher {
    fn dispatch(&self, alert: Alert) {
        let _ = match &alert {
            Alert::Completion {
                display_name,
                stage_name,
            } => self.fire_completion_alert(display_name, stage_name),
            Alert::Warning {
                display_name,
                stage_name,
                remaining_ms,
            } => self.fire_warning_alert(display_name, stage_name, *remaining_ms),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPlayer {
        played: Mutex<Vec<Tone>>,
        fail: bool,
    }

    impl TonePlayer for RecordingPlayer {
        fn play(&self, tone: &Tone) -> Result<(), AlertError> {
            self.played.lock().unwrap().push(*tone);
            if self.fail {
                return Err(AlertError::Audio("no device".into()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        shown: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn show(&self, title: &str, body: &str) -> Result<(), AlertError> {
            self.shown
                .lock()
                .unwrap()
                .push((title.to_string(), body.to_string()));
            if self.fail {
                return Err(AlertError::Notification("denied".into()));
            }
            Ok(())
        }
    }

    async fn settle(d: Dispatched) {
        if let Some(h) = d.sound {
            h.await.unwrap();
        }
        if let Some(h) = d.notification {
            h.await.unwrap();
        }
    }

    #[test]
    fn alert_texts() {
        let c = Alert::Completion {
            display_name: "Batch A".into(),
            stage_name: "Powder 2".into(),
        };
        assert_eq!(c.title(), "⏱ Stage complete: Batch A");
        assert_eq!(c.body(), "\"Powder 2\" has finished!");
        let w = Alert::Warning {
            display_name: "Batch A".into(),
            stage_name: "Powder 2".into(),
            remaining_ms: 60_001,
        };
        assert_eq!(w.title(), "⚠️ 2 min left: Batch A");
        assert_eq!(w.body(), "Stage \"Powder 2\" is almost done!");
    }

    #[test]
    fn tones_are_distinguishable() {
        assert_ne!(COMPLETION_TONE.frequency_hz, WARNING_TONE.frequency_hz);
        assert_eq!(COMPLETION_TONE.offsets.len(), 1);
        assert_eq!(WARNING_TONE.offsets.len(), 2);
        assert!(WARNING_TONE.offsets[1] >= WARNING_TONE.pulse);
    }

    #[test]
    fn gate_opens_once() {
        let gate = AudioGate::new();
        assert!(!gate.is_unlocked());
        assert!(gate.unlock());
        assert!(!gate.unlock());
        assert!(gate.clone().is_unlocked());
    }

    #[tokio::test]
    async fn locked_audio_still_notifies() {
        let player = Arc::new(RecordingPlayer::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let d = AlertDispatcher::new(
            AudioGate::new(),
            Some(player.clone()),
            Some(notifier.clone()),
        );
        let out = d.fire_completion_alert("Batch A", "Powder 2");
        assert!(out.sound.is_none());
        settle(out).await;
        assert!(player.played.lock().unwrap().is_empty());
        assert_eq!(notifier.shown.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn channel_failures_are_independent() {
        let player = Arc::new(RecordingPlayer {
            fail: true,
            ..Default::default()
        });
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let gate = AudioGate::new();
        gate.unlock();
        let d = AlertDispatcher::new(gate, Some(player.clone()), Some(notifier.clone()));
        settle(d.fire_warning_alert("Batch A", "Powder 2", 90_000)).await;
        assert_eq!(player.played.lock().unwrap().as_slice(), &[WARNING_TONE]);
        assert_eq!(
            notifier.shown.lock().unwrap()[0].0,
            "⚠️ 2 min left: Batch A".to_string()
        );
    }

    #[test]
    fn dispatch_without_runtime_is_silent() {
        let notifier = Arc::new(RecordingNotifier::default());
        let d = AlertDispatcher::new(AudioGate::new(), None, Some(notifier.clone()));
        d.dispatch(Alert::Completion {
            display_name: "x".into(),
            stage_name: "y".into(),
        });
        assert!(notifier.shown.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sink_dispatch_uses_matching_alert() {
        let notifier = Arc::new(RecordingNotifier::default());
        let d = AlertDispatcher::new(AudioGate::new(), None, Some(notifier.clone()));
        d.dispatch(Alert::Warning {
            display_name: "Batch A".into(),
            stage_name: "Powder 2".into(),
            remaining_ms: 30_000,
        });
        d.dispatch(Alert::Completion {
            display_name: "Batch A".into(),
            stage_name: "Powder 2".into(),
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            while notifier.shown.lock().unwrap().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        let mut titles: Vec<String> = notifier
            .shown
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect();
        titles.sort();
        assert_eq!(
            titles,
            vec![
                "⏱ Stage complete: Batch A".to_string(),
                "⚠️ 1 min left: Batch A".to_string()
            ]
        );
    }
}
