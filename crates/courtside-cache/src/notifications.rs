//! Live notification cache.
//!
//! The list is loaded by one fetch when the first consumer subscribes and
//! then kept current by the push transport (see [`crate::socket`]). Pushed
//! notifications are delivered at least once, so every insert goes through
//! [`insert_if_new`]. Dropping the last [`NotificationSubscription`] shuts
//! the transport down and freezes the list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::socket::NotificationSocket;
use crate::{ApiClient, CacheError, Notification};

/// Broadcast channel capacity for newly merged notifications.
const BROADCAST_CHANNEL_CAPACITY: usize = 256;

/// Insert `notification` at the head of `list` unless an entry with the same
/// `_id` or `notificationId` is already present.
///
/// Returns true if it was inserted.
pub fn insert_if_new(list: &mut Vec<Notification>, notification: Notification) -> bool {
    if list.iter().any(|n| n.same_identity(&notification)) {
        return false;
    }
    list.insert(0, notification);
    true
}

/// Position keeping a newest-first list ordered: before the first entry
/// strictly older than `notification`.
fn insertion_index(entries: &[Notification], notification: &Notification) -> usize {
    match notification.created_at {
        Some(created_at) => entries
            .iter()
            .position(|n| n.created_at.is_some_and(|c| c < created_at))
            .unwrap_or(entries.len()),
        None => 0,
    }
}

/// Notification list shared between the cache and its push transport.
pub(crate) struct NotificationList {
    entries: RwLock<Vec<Notification>>,
    /// Cleared on teardown; no mutation is applied while false.
    open: AtomicBool,
    updates_tx: broadcast::Sender<Notification>,
}

impl NotificationList {
    fn new() -> Self {
        let (updates_tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(Vec::new()),
            open: AtomicBool::new(false),
            updates_tx,
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Merge one pushed notification. Returns true if it was new.
    pub(crate) async fn push(&self, notification: Notification) -> bool {
        let mut entries = self.entries.write().await;
        if !self.is_open() {
            trace!("notification cache closed, dropping push");
            return false;
        }

        let inserted = insert_if_new(&mut entries, notification.clone());
        if inserted {
            trace!(id = ?notification.id, notification_id = ?notification.notification_id, "notification merged");
            if self.updates_tx.send(notification).is_err() {
                trace!("no subscribers for notification update");
            }
        } else {
            trace!(id = ?notification.id, notification_id = ?notification.notification_id, "duplicate notification ignored");
        }
        inserted
    }

    /// Merge a fetched list (newest first), keeping entries already cached.
    ///
    /// Unlike a push, a fetched entry may be older than what is cached, so
    /// it is placed by `createdAt`; undated entries go to the head.
    /// Returns the number of notifications added.
    pub(crate) async fn merge_fetched(&self, fetched: Vec<Notification>) -> usize {
        let mut entries = self.entries.write().await;
        if !self.is_open() {
            return 0;
        }

        let mut added = 0;
        for notification in fetched.into_iter().rev() {
            if entries.iter().any(|n| n.same_identity(&notification)) {
                continue;
            }
            let index = insertion_index(&entries, &notification);
            entries.insert(index, notification.clone());
            added += 1;
            let _ = self.updates_tx.send(notification);
        }
        added
    }
}

struct Lifecycle {
    consumers: usize,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

/// Notification cache with a subscription-bound push transport.
pub struct NotificationCache {
    client: Arc<ApiClient>,
    user_id: String,
    socket_url: Option<String>,
    list: Arc<NotificationList>,
    lifecycle: Mutex<Lifecycle>,
    /// Serializes the first-subscriber startup.
    startup: tokio::sync::Mutex<()>,
}

impl NotificationCache {
    /// Create a cache for `user_id`'s notifications.
    ///
    /// The push transport URL is taken from the client's configuration;
    /// without one the cache is fetch-only.
    pub fn new(client: Arc<ApiClient>, user_id: impl Into<String>) -> Arc<Self> {
        let socket_url = client.config().socket_url.clone();
        Arc::new(Self {
            client,
            user_id: user_id.into(),
            socket_url,
            list: Arc::new(NotificationList::new()),
            lifecycle: Mutex::new(Lifecycle {
                consumers: 0,
                shutdown_tx: None,
                task: None,
            }),
            startup: tokio::sync::Mutex::new(()),
        })
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a subscription.
    ///
    /// The first subscriber fetches the initial list and starts the push
    /// transport; later subscribers share both. If the initial fetch fails
    /// no subscription is opened.
    pub async fn subscribe(self: &Arc<Self>) -> Result<NotificationSubscription, CacheError> {
        let _startup = self.startup.lock().await;

        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.consumers > 0 {
                lifecycle.consumers += 1;
                debug!(consumers = lifecycle.consumers, "notification subscription shared");
                return Ok(NotificationSubscription {
                    cache: Arc::clone(self),
                });
            }
        }

        let initial = self.client.fetch_notifications().await?;
        let count = initial.len();
        {
            let mut entries = self.list.entries.write().await;
            *entries = initial;
            self.list.open.store(true, Ordering::SeqCst);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = self.socket_url.as_ref().map(|url| {
            let socket = NotificationSocket::new(
                url.clone(),
                self.user_id.clone(),
                Arc::clone(&self.list),
                Arc::clone(&self.client),
            );
            tokio::spawn(async move {
                if let Err(e) = socket.run(shutdown_rx).await {
                    error!(error = %e, "notification socket task failed");
                }
            })
        });

        let mut lifecycle = self.lifecycle();
        lifecycle.consumers = 1;
        lifecycle.shutdown_tx = Some(shutdown_tx);
        lifecycle.task = task;

        info!(user_id = %self.user_id, count, live = lifecycle.task.is_some(), "notification cache opened");
        Ok(NotificationSubscription {
            cache: Arc::clone(self),
        })
    }

    fn release(&self) {
        let mut lifecycle = self.lifecycle();
        lifecycle.consumers = lifecycle.consumers.saturating_sub(1);
        if lifecycle.consumers > 0 {
            debug!(consumers = lifecycle.consumers, "notification subscription released");
            return;
        }

        self.list.open.store(false, Ordering::SeqCst);
        if let Some(tx) = lifecycle.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        lifecycle.task = None;
        info!(user_id = %self.user_id, "notification cache closed");
    }

    /// Merge a pushed notification. Returns true if it was new.
    ///
    /// Ignored once the last subscription has been dropped.
    pub async fn push(&self, notification: Notification) -> bool {
        self.list.push(notification).await
    }

    /// Cached notifications, newest first.
    pub async fn entries(&self) -> Vec<Notification> {
        self.list.entries.read().await.clone()
    }

    /// Number of unread notifications.
    pub async fn unread_count(&self) -> usize {
        self.list
            .entries
            .read()
            .await
            .iter()
            .filter(|n| !n.is_read)
            .count()
    }

    /// Mark every cached notification as read.
    pub async fn mark_all_read(&self) {
        let mut entries = self.list.entries.write().await;
        if !self.list.is_open() {
            return;
        }
        for n in entries.iter_mut() {
            n.is_read = true;
        }
    }

    /// Subscribe to newly merged notifications.
    pub fn updates(&self) -> broadcast::Receiver<Notification> {
        self.list.updates_tx.subscribe()
    }

    /// Number of open subscriptions.
    pub fn consumer_count(&self) -> usize {
        self.lifecycle().consumers
    }

    /// Whether the cache is accepting updates.
    pub fn is_open(&self) -> bool {
        self.list.is_open()
    }
}

/// Keeps the notification cache open while held.
pub struct NotificationSubscription {
    cache: Arc<NotificationCache>,
}

impl NotificationSubscription {
    pub fn cache(&self) -> &Arc<NotificationCache> {
        &self.cache
    }
}

impl Drop for NotificationSubscription {
    fn drop(&mut self) {
        self.cache.release();
    }
}
