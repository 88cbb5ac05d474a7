use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use mixboard_shared::api::{EVENT_ERROR, EVENT_MIX, EVENT_SNAPSHOT, StreamError, StreamQuery};
use mixboard_shared::domain::MixId;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::AppState;

/// A committed change to one mix.
#[derive(Debug, Clone)]
pub struct MixChanged {
    pub mix_id: MixId,
}

/// Fan-out of mix changes to open subscription streams.
#[derive(Clone)]
pub struct ChangeHub {
    tx: broadcast::Sender<MixChanged>,
}

impl ChangeHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, mix_id: MixId) {
        // No receivers is fine
        let _ = self.tx.send(MixChanged { mix_id });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MixChanged> {
        self.tx.subscribe()
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new(256)
    }
}

pub async fn api_mix_stream(
    State(state): State<AppState>,
    Query(q): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mix_id = q.mix_id;
    tracing::debug!(mix_id = ?mix_id, "stream: subscriber connected");

    let filter_id = mix_id.clone();
    let changes = BroadcastStream::new(state.events.subscribe()).filter_map(move |res| {
        let relevant = match (&res, filter_id.as_deref()) {
            (Ok(change), Some(id)) => change.mix_id.0 == id,
            // Lagged: we may have missed the relevant change, resend
            (Err(_), _) => true,
            (Ok(_), None) => true,
        };
        futures::future::ready(relevant.then_some(()))
    });

    let shutdown = state.shutdown.clone();
    let events = stream::once(futures::future::ready(()))
        .chain(changes)
        .then(move |()| {
            let state = state.clone();
            let mix_id = mix_id.clone();
            async move { Ok::<_, Infallible>(build_event(&state, mix_id.as_deref()).await) }
        })
        .take_until(shutdown.cancelled_owned());

    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn build_event(state: &AppState, mix_id: Option<&str>) -> Event {
    match mix_id {
        None => match state.store.list_active_mixes(None).await {
            Ok(mixes) => json_event(EVENT_SNAPSHOT, &mixes),
            Err(e) => {
                tracing::error!(error=%e, "stream: snapshot query failed");
                error_event(format!("failed to load mixes: {e}"))
            }
        },
        Some(id) => match state.store.get_mix(id).await {
            Ok(mix) => json_event(EVENT_MIX, &mix),
            Err(e) => {
                tracing::error!(mix_id = %id, error=%e, "stream: mix query failed");
                error_event(format!("failed to load mix: {e}"))
            }
        },
    }
}

fn json_event<T: Serialize>(name: &'static str, value: &T) -> Event {
    match serde_json::to_string(value) {
        Ok(data) => Event::default().event(name).data(data),
        Err(e) => error_event(format!("encode failed: {e}")),
    }
}

fn error_event(message: String) -> Event {
    let data = serde_json::to_string(&StreamError { message })
        .unwrap_or_else(|_| r#"{"message":"stream error"}"#.to_string());
    Event::default().event(EVENT_ERROR).data(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hub_delivers_to_every_subscriber() {
        let hub = ChangeHub::new(4);
        hub.publish(MixId::from("ignored"));
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        hub.publish(MixId::from("m1"));
        assert_eq!(a.recv().await.unwrap().mix_id, MixId::from("m1"));
        assert_eq!(b.recv().await.unwrap().mix_id, MixId::from("m1"));
    }
}
