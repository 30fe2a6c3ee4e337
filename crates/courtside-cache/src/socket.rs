//! WebSocket push transport for notifications.
//!
//! Frames are JSON text messages of the form `{"event": ..., "data": ...}`.
//! After connecting, the client joins its per-user channel with a `join`
//! frame; the server then emits `newNotification` frames.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

use crate::notifications::NotificationList;
use crate::{ApiClient, CacheError, Notification};

/// Event name of a pushed notification.
pub const NEW_NOTIFICATION_EVENT: &str = "newNotification";

/// Event name of the channel join frame.
pub const JOIN_EVENT: &str = "join";

/// Maximum reconnect delay.
const MAX_BACKOFF_SECS: u64 = 60;

/// Silence after which the connection is considered dead.
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// A frame on the notification socket.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SocketFrame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl SocketFrame {
    fn join(user_id: &str) -> Self {
        Self {
            event: JOIN_EVENT.to_string(),
            data: serde_json::json!({ "userId": user_id }),
        }
    }
}

/// Push transport feeding a notification list.
pub(crate) struct NotificationSocket {
    url: String,
    user_id: String,
    list: Arc<NotificationList>,
    /// Used to refetch after a reconnect, closing the gap left by the outage.
    client: Arc<ApiClient>,
}

impl NotificationSocket {
    pub(crate) fn new(
        url: String,
        user_id: String,
        list: Arc<NotificationList>,
        client: Arc<ApiClient>,
    ) -> Self {
        Self {
            url,
            user_id,
            list,
            client,
        }
    }

    /// Connect and merge events until shutdown.
    ///
    /// Runs in a reconnection loop with exponential backoff. Transport
    /// errors are logged and never touch the cached list.
    pub(crate) async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), CacheError> {
        let mut backoff_secs = 1u64;
        let mut connected_before = false;

        loop {
            if *shutdown_rx.borrow() {
                info!("notification socket shutting down");
                return Ok(());
            }

            info!(url = %self.url, user_id = %self.user_id, "connecting to notification socket");

            match self
                .connect_and_process(&mut shutdown_rx, &mut connected_before, &mut backoff_secs)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!(error = %e, "notification socket error, reconnecting");

                    let wait = Duration::from_secs(backoff_secs);
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                return Ok(());
                            }
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }

                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                }
            }
        }
    }

    /// Connect, join, and process frames until error or shutdown.
    async fn connect_and_process(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
        connected_before: &mut bool,
        backoff_secs: &mut u64,
    ) -> Result<(), CacheError> {
        let join = serde_json::to_string(&SocketFrame::join(&self.user_id))?;
        let connect = async {
            let (ws_stream, _) = connect_async(self.url.as_str())
                .await
                .map_err(|e| CacheError::WebSocket(format!("connection failed: {}", e)))?;

            let (mut write, read) = ws_stream.split();
            write
                .send(Message::Text(join.into()))
                .await
                .map_err(|e| CacheError::WebSocket(format!("join failed: {}", e)))?;
            Ok::<_, CacheError>((write, read))
        };

        // Shutdown may arrive while the handshake is still pending; dropping
        // the connect future closes the half-open transport.
        let (mut write, mut read) = tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                info!("notification socket shut down while connecting");
                return Ok(());
            }

            connected = connect => connected?,
        };

        info!(user_id = %self.user_id, "notification socket joined");
        *backoff_secs = 1;

        if *connected_before {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }

                _ = self.resync() => {}
            }
        }
        *connected_before = true;

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("notification socket received shutdown signal");
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }

                result = tokio::time::timeout(READ_TIMEOUT, read.next()) => {
                    match result {
                        Ok(Some(Ok(Message::Text(text)))) => {
                            if let Err(e) = self.handle_message(&text).await {
                                warn!(error = %e, "failed to handle socket message");
                            }
                        }
                        Ok(Some(Ok(Message::Ping(_)))) => {
                            // tungstenite auto-responds to pings
                            trace!("received ping");
                        }
                        Ok(Some(Ok(Message::Close(_)))) => {
                            info!("notification socket closed by server");
                            return Err(CacheError::WebSocket("connection closed".to_string()));
                        }
                        Ok(Some(Ok(_))) => {}
                        Ok(Some(Err(e))) => {
                            return Err(CacheError::WebSocket(format!("read error: {}", e)));
                        }
                        Ok(None) => {
                            return Err(CacheError::WebSocket("stream ended".to_string()));
                        }
                        Err(_) => {
                            warn!("notification socket read timeout after {}s", READ_TIMEOUT.as_secs());
                            return Err(CacheError::WebSocket("read timeout".to_string()));
                        }
                    }
                }
            }
        }
    }

    /// Handle a single text frame.
    async fn handle_message(&self, text: &str) -> Result<(), CacheError> {
        let frame: SocketFrame = serde_json::from_str(text)?;

        match frame.event.as_str() {
            NEW_NOTIFICATION_EVENT => {
                let notification: Notification = serde_json::from_value(frame.data)?;
                self.list.push(notification).await;
            }
            other => {
                trace!(event = %other, "ignoring socket event");
            }
        }

        Ok(())
    }

    /// Refetch after a reconnect and merge what was missed.
    async fn resync(&self) {
        match self.client.fetch_notifications().await {
            Ok(fetched) => {
                let added = self.list.merge_fetched(fetched).await;
                debug!(added, "notifications resynced after reconnect");
            }
            Err(e) => {
                warn!(error = %e, "failed to resync notifications after reconnect");
            }
        }
    }
}
