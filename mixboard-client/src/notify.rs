use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::alert::{AlertError, Notifier};

const APP_NAME: &str = "Mixboard";

/// Desktop notifications over the freedesktop notification service.
#[cfg(not(target_os = "windows"))]
#[derive(Debug, Default)]
pub struct DesktopNotifier;

#[cfg(not(target_os = "windows"))]
#[async_trait]
impl Notifier for DesktopNotifier {
    async fn show(&self, title: &str, body: &str) -> Result<(), AlertError> {
        debug!(title, "show: building notification");
        let mut n = notify_rust::Notification::new();
        n.appname(APP_NAME)
            .summary(title)
            .body(body)
            .urgency(notify_rust::Urgency::Critical);
        // The D-Bus call blocks; keep it off the runtime threads.
        tokio::task::spawn_blocking(move || n.show().map(|_| ()))
            .await
            .map_err(|e| AlertError::Notification(e.to_string()))?
            .map_err(|e| AlertError::Notification(e.to_string()))
    }
}

/// Writes notifications to the log instead of the desktop.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn show(&self, title: &str, body: &str) -> Result<(), AlertError> {
        info!("[ALERT] {title}: {body}");
        Ok(())
    }
}

pub fn default_notifier(desktop: bool) -> Arc<dyn Notifier> {
    #[cfg(not(target_os = "windows"))]
    if desktop {
        return Arc::new(DesktopNotifier);
    }
    if desktop {
        debug!("desktop notifications unsupported on this platform; logging instead");
    }
    Arc::new(LogNotifier)
}
