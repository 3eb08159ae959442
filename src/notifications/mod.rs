//! Timed, dismissible user-facing notifications.
//!
//! Every notification owns one scheduled task at a time: first the
//! auto-dismiss timer, then the exit timer that removes it
//! [`EXIT_DELAY`](crate::config::EXIT_DELAY) after it starts dismissing.
//! Timers run on the tokio runtime, so [`NotificationQueue::show`] must be
//! called from within one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Sender};
use tokio::task::AbortHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;
use uuid::Uuid;

use crate::config::EXIT_DELAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotificationState {
    Visible,
    Dismissing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DismissReason {
    Expired,
    Manual,
    /// Pushed out by a newer notification when the visible cap is reached.
    Evicted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Getters)]
pub struct Notification {
    id: Uuid,
    message: String,
    severity: Severity,
    duration: Duration,
    state: NotificationState,
    created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum NotificationEvent {
    Shown(Notification),
    Dismissing { id: Uuid, reason: DismissReason },
    Closed(Uuid),
}

/// Cancellation handle for a scheduled notification transition.
#[derive(Debug)]
pub struct DismissHandle {
    handle: AbortHandle,
}

impl DismissHandle {
    /// Stops the scheduled transition. Safe to call any number of times,
    /// including after the task has already run.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

struct Slot {
    notification: Notification,
    seq: u64,
    timer: Option<DismissHandle>,
}

struct Inner {
    entries: DashMap<Uuid, Slot>,
    next_seq: AtomicU64,
    sender: Sender<NotificationEvent>,
    default_duration: Duration,
    max_visible: Option<usize>,
}

/// Shared handle to the notification set. Clones refer to the same set.
#[derive(Clone)]
pub struct NotificationQueue {
    inner: Arc<Inner>,
}

impl NotificationQueue {
    pub fn new(default_duration: Duration, max_visible: Option<usize>) -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                next_seq: AtomicU64::new(0),
                sender,
                default_duration,
                max_visible: max_visible.map(|cap| cap.max(1)),
            }),
        }
    }

    pub fn subscribe(&self) -> BroadcastStream<NotificationEvent> {
        BroadcastStream::new(self.inner.sender.subscribe())
    }

    /// Shows a notification for the default duration.
    pub fn show(&self, message: impl Into<String>, severity: Severity) -> Uuid {
        self.show_for(message, severity, self.inner.default_duration)
    }

    pub fn show_for(
        &self,
        message: impl Into<String>,
        severity: Severity,
        duration: Duration,
    ) -> Uuid {
        if let Some(cap) = self.inner.max_visible {
            while self.visible_count() >= cap {
                match self.oldest_visible() {
                    Some(oldest) => {
                        self.begin_exit(oldest, DismissReason::Evicted);
                    }
                    None => break,
                }
            }
        }

        let notification = Notification {
            id: Uuid::new_v4(),
            message: message.into(),
            severity,
            duration,
            state: NotificationState::Visible,
            created_at: Utc::now(),
        };
        let id = notification.id;

        self.inner.entries.insert(
            id,
            Slot {
                notification: notification.clone(),
                seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
                timer: None,
            },
        );

        let timer = self.schedule(id, duration, Transition::Expire);
        if let Some(mut slot) = self.inner.entries.get_mut(&id) {
            // A zero duration can race the expiry past us; keep its exit timer.
            if slot.notification.state == NotificationState::Visible {
                slot.timer = Some(timer);
            }
        }

        debug!(%id, ?severity, ?duration, "notification shown");
        let _ = self.inner.sender.send(NotificationEvent::Shown(notification));
        id
    }

    /// Starts the exit sequence right away. Returns `false` if the
    /// notification is unknown or already leaving.
    pub fn dismiss(&self, id: Uuid) -> bool {
        self.begin_exit(id, DismissReason::Manual)
    }

    pub fn get(&self, id: Uuid) -> Option<Notification> {
        self.inner
            .entries
            .get(&id)
            .map(|slot| slot.notification.clone())
    }

    /// Current state; anything no longer in the set is `Closed`.
    pub fn state(&self, id: Uuid) -> NotificationState {
        self.inner
            .entries
            .get(&id)
            .map(|slot| slot.notification.state)
            .unwrap_or(NotificationState::Closed)
    }

    /// Live notifications, oldest first.
    pub fn list(&self) -> Vec<Notification> {
        let mut slots: Vec<(u64, Notification)> = self
            .inner
            .entries
            .iter()
            .map(|slot| (slot.seq, slot.notification.clone()))
            .collect();
        slots.sort_by_key(|(seq, _)| *seq);
        slots.into_iter().map(|(_, n)| n).collect()
    }

    pub fn visible_count(&self) -> usize {
        self.inner
            .entries
            .iter()
            .filter(|slot| slot.notification.state == NotificationState::Visible)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    fn oldest_visible(&self) -> Option<Uuid> {
        self.inner
            .entries
            .iter()
            .filter(|slot| slot.notification.state == NotificationState::Visible)
            .min_by_key(|slot| slot.seq)
            .map(|slot| slot.notification.id)
    }

    fn begin_exit(&self, id: Uuid, reason: DismissReason) -> bool {
        {
            let Some(mut slot) = self.inner.entries.get_mut(&id) else {
                return false;
            };
            if slot.notification.state != NotificationState::Visible {
                return false;
            }
            slot.notification.state = NotificationState::Dismissing;
            if let Some(timer) = slot.timer.take() {
                timer.cancel();
            }
            slot.timer = Some(self.schedule(id, EXIT_DELAY, Transition::Close));
        }

        debug!(%id, ?reason, "notification dismissing");
        let _ = self
            .inner
            .sender
            .send(NotificationEvent::Dismissing { id, reason });
        true
    }

    fn close(&self, id: Uuid) {
        if self.inner.entries.remove(&id).is_some() {
            debug!(%id, "notification closed");
            let _ = self.inner.sender.send(NotificationEvent::Closed(id));
        }
    }

    fn schedule(&self, id: Uuid, delay: Duration, transition: Transition) -> DismissHandle {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let queue = NotificationQueue { inner };
            match transition {
                Transition::Expire => {
                    queue.begin_exit(id, DismissReason::Expired);
                }
                Transition::Close => queue.close(id),
            }
        });
        DismissHandle {
            handle: task.abort_handle(),
        }
    }
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new(Duration::from_millis(5_000), None)
    }
}

#[derive(Clone, Copy)]
enum Transition {
    Expire,
    Close,
}
