use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mixboard_shared::api::rest::{self, RestError};
use mixboard_shared::domain::{Mix, UserProfile};
use mixboard_shared::jwt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::alert::{AlertDispatcher, AudioGate};
use crate::board::{BOARD_TITLE, Board, ConsoleRenderer, ViewMode};
use crate::config::ClientConfig;
use crate::dedup::{DedupStore, FileDedupStore, MemoryDedupStore};
use crate::login::token_for;
use crate::sse::{self, FeedEvent};
use crate::ticker::{LiveTicker, NotificationService, SystemClock};
use crate::{AppError, audio, notify};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Entry point for the live board in the current terminal.
pub async fn run(config_path: Option<PathBuf>, view: Option<ViewMode>) -> Result<(), AppError> {
    let (cfg_path, cfg) = ClientConfig::find_and_load(config_path)?;
    let data_dir = cfg.data_dir()?;
    let _log_guard = init_file_tracing(&data_dir.join("logs"))?;
    info!(path=?cfg_path, "loaded config");

    let token = token_for(&cfg)?;
    let me = current_user(&cfg.server_url, &token).await?;
    let view = view.unwrap_or(cfg.view);
    info!(user = %me.email, ?view, "starting board");

    let dedup: Arc<dyn DedupStore> = match FileDedupStore::open(data_dir.join("alerts")) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            warn!(error=%e, "alert markers unavailable; alerts may repeat after restart");
            Arc::new(MemoryDedupStore::default())
        }
    };
    let gate = AudioGate::new();
    let player = if cfg.sound {
        audio::default_player()
    } else {
        None
    };
    let audible = player.is_some();
    let dispatcher = AlertDispatcher::new(
        gate.clone(),
        player,
        Some(notify::default_notifier(cfg.desktop_notifications)),
    );
    let ticker = LiveTicker::new(NotificationService::new(dedup, Arc::new(dispatcher)))
        .with_warning_threshold(cfg.warning_threshold());

    let cancel = CancellationToken::new();
    let (frame_tx, frame_rx) =
        watch::channel(Board::default().with_status(Some("Connecting…".into())));
    let (feed_tx, feed_rx) = mpsc::channel(16);
    let feed = sse::spawn_mix_feed(
        cfg.server_url.clone(),
        token.clone(),
        feed_tx,
        cancel.child_token(),
    );
    let projector = tokio::spawn(project_feed(feed_rx, frame_tx, me, view));
    if audible {
        spawn_gesture_listener(gate.clone());
    }

    let mut renderer = ConsoleRenderer::new(std::io::stdout(), BOARD_TITLE);
    if audible {
        renderer = renderer.with_audio_gate(gate);
    }

    tokio::select! {
        _ = ticker.run(frame_rx, SystemClock, &mut renderer, cfg.tick_interval(), cancel.child_token()) => {
            info!("ticker finished");
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received; stopping board");
        }
    }
    cancel.cancel();
    renderer.restore();

    if tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = feed.await;
        let _ = projector.await;
    })
    .await
    .is_err()
    {
        warn!("background tasks did not stop in time");
    }
    Ok(())
}

async fn current_user(server_url: &str, token: &str) -> Result<UserProfile, AppError> {
    match rest::me(server_url, token).await {
        Ok(p) => Ok(p),
        Err(RestError::Status { status: 401, .. }) => Err(AppError::NotLoggedIn),
        Err(e) => {
            // Offline start: fall back to the identity in the token.
            warn!(error=%e, "profile lookup failed; using token claims");
            jwt::decode_unverified(token)
                .map(|c| c.profile())
                .map_err(|e| AppError::Http(format!("invalid token: {e}")))
        }
    }
}

/// Turns feed events into board frames. The last snapshot stays on screen
/// while the connection is down.
async fn project_feed(
    mut feed: mpsc::Receiver<FeedEvent>,
    frames: watch::Sender<Board>,
    me: UserProfile,
    view: ViewMode,
) {
    let mut mixes: Vec<Mix> = Vec::new();
    let mut status: Option<String> = Some("Connecting…".into());
    while let Some(ev) = feed.recv().await {
        match ev {
            FeedEvent::Connected => status = Some("Connected; waiting for data…".into()),
            FeedEvent::Snapshot(m) => {
                debug!(count = m.len(), "snapshot received");
                mixes = m;
                status = None;
            }
            FeedEvent::ServerError(msg) => status = Some(format!("Server error: {msg}")),
            FeedEvent::Disconnected(reason) => {
                status = Some(format!("Connection lost ({reason}); reconnecting…"))
            }
        }
        frames.send_replace(Board::project(&mixes, &me, view).with_status(status.clone()));
    }
}

/// Any line on stdin counts as a user gesture and unlocks audio.
///
/// Uses a plain thread because a blocked stdin read cannot be cancelled.
fn spawn_gesture_listener(gate: AudioGate) {
    let spawned = std::thread::Builder::new()
        .name("stdin-gesture".into())
        .spawn(move || {
            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(0) => debug!("stdin closed; audio stays locked"),
                Ok(_) => {
                    if gate.unlock() {
                        info!("audio unlocked by user input");
                    }
                }
                Err(e) => debug!(error=%e, "stdin read failed; audio stays locked"),
            }
        });
    if let Err(e) = spawned {
        warn!(error=%e, "failed to start input listener; audio stays locked");
    }
}

/// Daily-rolling log file so log lines do not land on the redrawn board.
fn init_file_tracing(dir: &Path) -> Result<WorkerGuard, AppError> {
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, "board.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).expect("listen SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("listen SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {
                info!("shutdown: received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("shutdown: received SIGTERM");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("listen for ctrl_c");
        info!("shutdown: received ctrl_c");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixboard_shared::domain::{MixId, MixMetadata, Owner, Stage};

    fn me() -> UserProfile {
        UserProfile {
            id: "u1".into(),
            email: "ann@example.com".into(),
            display_name: None,
        }
    }

    fn mix(id: &str, owner: &str) -> Mix {
        Mix {
            id: MixId::from(id),
            name: "Batch".into(),
            stages: vec![Stage::new("Powder 1", 60_000)],
            current_stage_index: 0,
            current_stage_started_at_ms: 0,
            owner: Owner {
                id: owner.into(),
                email: format!("{owner}@example.com"),
                display_name: None,
            },
            created_at_ms: 0,
            is_deleted: false,
            metadata: MixMetadata::default(),
        }
    }

    #[tokio::test]
    async fn feed_keeps_last_snapshot_while_disconnected() {
        let (tx, rx) = mpsc::channel(8);
        let (frame_tx, mut frames) = watch::channel(Board::default());
        let task = tokio::spawn(project_feed(rx, frame_tx, me(), ViewMode::Team));

        tx.send(FeedEvent::Connected).await.unwrap();
        tx.send(FeedEvent::Snapshot(vec![mix("m1", "u1"), mix("m2", "u2")]))
            .await
            .unwrap();
        tx.send(FeedEvent::Disconnected("reset".into())).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let board = frames.borrow_and_update().clone();
        assert_eq!(board.cards.len(), 1);
        assert_eq!(board.cards[0].mix_id, MixId::from("m2"));
        assert_eq!(
            board.status.as_deref(),
            Some("Connection lost (reset); reconnecting…")
        );
    }

    #[tokio::test]
    async fn snapshot_clears_status() {
        let (tx, rx) = mpsc::channel(8);
        let (frame_tx, frames) = watch::channel(Board::default());
        let task = tokio::spawn(project_feed(rx, frame_tx, me(), ViewMode::All));
        tx.send(FeedEvent::ServerError("db".into())).await.unwrap();
        tx.send(FeedEvent::Snapshot(vec![mix("m1", "u1")])).await.unwrap();
        drop(tx);
        task.await.unwrap();
        let board = frames.borrow().clone();
        assert_eq!(board.status, None);
        assert_eq!(board.widgets.len(), 1);
    }
}
