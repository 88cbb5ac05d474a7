use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use mixboard_shared::api::MixStreamEvent;
use mixboard_shared::api::rest::{self, RestError};
use mixboard_shared::domain::Mix;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// What the board agent learns from the mix stream.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Connected,
    Snapshot(Vec<Mix>),
    /// The server reported a problem; the stream is still open.
    ServerError(String),
    /// The connection dropped; a reconnect is scheduled.
    Disconnected(String),
}

/// Exponential reconnect delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    initial: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial,
            initial,
            max,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = std::cmp::min(self.next.saturating_mul(2), self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

fn frame_to_event(event: &str, data: &str) -> Option<FeedEvent> {
    match MixStreamEvent::decode(event, data) {
        Ok(Some(MixStreamEvent::Snapshot(mixes))) => Some(FeedEvent::Snapshot(mixes)),
        Ok(Some(MixStreamEvent::Error(e))) => Some(FeedEvent::ServerError(e.message)),
        Ok(Some(MixStreamEvent::Mix(_))) => {
            debug!("SSE: ignoring single-mix event on board stream");
            None
        }
        Ok(None) => None,
        Err(e) => {
            warn!(event, error=%e, "SSE: undecodable frame");
            None
        }
    }
}

/// Keeps a subscription to the mix stream open until `cancel` fires or the
/// receiver goes away, reconnecting with backoff.
pub fn spawn_mix_feed(
    server_url: String,
    token: String,
    tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = Backoff::default();
        loop {
            let reason = tokio::select! {
                _ = cancel.cancelled() => return,
                r = stream_once(&server_url, &token, &tx, &mut backoff) => r,
            };
            let Some(reason) = reason else {
                debug!("SSE: receiver gone; stopping feed");
                return;
            };
            let delay = backoff.next_delay();
            warn!(reason = %reason, retry_in_secs = delay.as_secs(), "SSE: disconnected");
            if tx.send(FeedEvent::Disconnected(reason)).await.is_err() {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    })
}

/// Runs one connection. Returns the disconnect reason, or `None` when the
/// receiver was dropped.
async fn stream_once(
    server_url: &str,
    token: &str,
    tx: &mpsc::Sender<FeedEvent>,
    backoff: &mut Backoff,
) -> Option<String> {
    let res = match rest::open_mix_stream(server_url, token, None).await {
        Ok(r) => r,
        Err(RestError::Status { status: 401, .. }) => {
            return Some("unauthorized; run `mixboard-client login` again".into());
        }
        Err(e) => return Some(e.to_string()),
    };
    info!("SSE: connected");
    backoff.reset();
    tx.send(FeedEvent::Connected).await.ok()?;

    let mut events = res.bytes_stream().eventsource();
    while let Some(ev) = events.next().await {
        match ev {
            Ok(ev) => {
                if let Some(out) = frame_to_event(&ev.event, &ev.data) {
                    tx.send(out).await.ok()?;
                }
            }
            Err(e) => return Some(e.to_string()),
        }
    }
    Some("stream closed by server".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap_and_resets() {
        let mut b = Backoff::default();
        let secs: Vec<u64> = (0..7).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30]);
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn frames_map_to_feed_events() {
        assert!(matches!(
            frame_to_event("snapshot", "[]"),
            Some(FeedEvent::Snapshot(v)) if v.is_empty()
        ));
        assert!(matches!(
            frame_to_event("error", r#"{"message":"db down"}"#),
            Some(FeedEvent::ServerError(m)) if m == "db down"
        ));
        assert!(frame_to_event("mix", "null").is_none());
        assert!(frame_to_event("snapshot", "not json").is_none());
        assert!(frame_to_event("", "").is_none());
    }

    #[tokio::test]
    async fn feed_stops_on_cancel_while_backing_off() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        // nothing listens on port 9 of localhost
        let handle = spawn_mix_feed("http://127.0.0.1:9".into(), "t".into(), tx, cancel.clone());
        let first = tokio::time::timeout(Duration::from_secs(20), rx.recv())
            .await
            .unwrap();
        assert!(matches!(first, Some(FeedEvent::Disconnected(_))));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
