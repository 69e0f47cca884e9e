//
// queue.rs
// Dicom-Courier-rs
//
// Durable, priority-ordered delivery queue with a single-flight processing loop.
// Every mutation is written to the JSON snapshot before it becomes visible, and the
// snapshot is held under an exclusive lock for as long as the queue is open.
//
// Dicom-Courier-rs contributors - October 2026

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::client::{DeliveryClient, Outcome};
use crate::error::{ErrorKind, QueueError};
use crate::models::{
    DestinationConfig, PatientSummary, Priority, QueueItem, QueueSummary, Status, StatusEvent,
};
use crate::storage;

const EVENT_CAPACITY: usize = 256;

/// Tunables of the queue, embedded in the application config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub snapshot_path: PathBuf,
    pub tick_interval_ms: u64,
    /// Hard cap on stored items, finished ones included.
    pub capacity: usize,
    /// Successful items kept when the cap forces an eviction.
    pub success_retention: usize,
    pub attempt_timeout_cap_seconds: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("queue.json"),
            tick_interval_ms: 5000,
            capacity: 1000,
            success_retention: 100,
            attempt_timeout_cap_seconds: 300,
        }
    }
}

impl QueueSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn attempt_timeout_cap(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_cap_seconds.max(1))
    }
}

/// In-memory state, persisted verbatim as the snapshot.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct QueueState {
    #[serde(default)]
    items: BTreeMap<String, QueueItem>,
    /// Processing order over every known item id.
    #[serde(default, rename = "queue")]
    order: Vec<String>,
}

impl QueueState {
    /// Highest-priority pending item, earliest in order among equals.
    fn head(&self) -> Option<&QueueItem> {
        let mut best: Option<&QueueItem> = None;
        for item in self.order.iter().filter_map(|id| self.items.get(id)) {
            if item.status != Status::Pending {
                continue;
            }
            if best.map_or(true, |b| item.priority > b.priority) {
                best = Some(item);
            }
        }
        best
    }

    /// Place `id` ahead of the first pending item with strictly lower priority.
    fn insert_ordered(&mut self, id: String, priority: Priority) {
        let position = self.order.iter().position(|other| {
            self.items
                .get(other)
                .is_some_and(|o| o.status == Status::Pending && o.priority < priority)
        });
        match position {
            Some(index) => self.order.insert(index, id),
            None => self.order.push(id),
        }
    }

    /// Drop the oldest successful items beyond `retain`; returns how many went.
    fn evict_successes(&mut self, retain: usize) -> usize {
        let mut finished: Vec<(chrono::DateTime<Utc>, String)> = self
            .items
            .values()
            .filter(|item| item.status == Status::Success)
            .map(|item| (item.last_attempt.unwrap_or(item.added_at), item.id.clone()))
            .collect();
        if finished.len() <= retain {
            return 0;
        }
        finished.sort();
        let excess = finished.len() - retain;
        for (_, id) in finished.into_iter().take(excess) {
            self.items.remove(&id);
        }
        let items = &self.items;
        self.order.retain(|id| items.contains_key(id));
        excess
    }

    /// Drop dangling order entries and append items missing from the order.
    fn repair_order(&mut self) -> bool {
        let before = self.order.len();
        let items = &self.items;
        self.order.retain(|id| items.contains_key(id));
        let mut changed = before != self.order.len();

        let mut missing: Vec<&QueueItem> = self
            .items
            .values()
            .filter(|item| !self.order.contains(&item.id))
            .collect();
        missing.sort_by_key(|item| item.added_at);
        let missing: Vec<String> = missing.into_iter().map(|item| item.id.clone()).collect();
        changed |= !missing.is_empty();
        self.order.extend(missing);
        changed
    }
}

/// Resets the in-flight latch when an attempt ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct DeliveryQueue {
    state: RwLock<QueueState>,
    // released when the queue is dropped
    _lock: File,
    settings: QueueSettings,
    destination: watch::Receiver<DestinationConfig>,
    client: Arc<dyn DeliveryClient>,
    processing: AtomicBool,
    events: broadcast::Sender<StatusEvent>,
}

impl DeliveryQueue {
    /// Load the snapshot at `settings.snapshot_path` (or start empty) and
    /// return any interrupted upload to pending.
    ///
    /// Fails with [`QueueError::Locked`] while another queue holds the snapshot.
    pub fn open(
        settings: QueueSettings,
        destination: watch::Receiver<DestinationConfig>,
        client: Arc<dyn DeliveryClient>,
    ) -> Result<Self, QueueError> {
        let lock = lock_snapshot(&settings.snapshot_path)?;
        let mut state = load_snapshot(&settings.snapshot_path)?;

        let mut changed = state.repair_order();
        for item in state.items.values_mut() {
            if item.status == Status::Uploading {
                warn!(item_id = %item.id, "upload was interrupted, returning item to pending");
                item.status = Status::Pending;
                changed = true;
            }
        }

        if changed {
            write_snapshot(&settings.snapshot_path, &state)?;
        }
        info!(
            snapshot = %settings.snapshot_path.display(),
            items = state.items.len(),
            "delivery queue loaded"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            state: RwLock::new(state),
            _lock: lock,
            settings,
            destination,
            client,
            processing: AtomicBool::new(false),
            events,
        })
    }

    /// Receive one event per status transition.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Register a file for delivery and return its id.
    pub async fn enqueue(
        &self,
        file_path: impl AsRef<Path>,
        summary: PatientSummary,
        priority: Priority,
    ) -> Result<String, QueueError> {
        let file_path = file_path.as_ref();
        let exists = tokio::fs::metadata(file_path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !exists {
            return Err(QueueError::SourceNotFound(file_path.to_path_buf()));
        }

        let capacity = self.settings.capacity;
        let retention = self.settings.success_retention;
        let mut state = self.state.write().await;
        let id = self.commit(&mut state, |next| {
            if next.items.len() >= capacity {
                let evicted = next.evict_successes(retention);
                if next.items.len() >= capacity {
                    return Err(QueueError::QueueFull {
                        count: next.items.len(),
                    });
                }
                info!(evicted, "evicted delivered items to make room");
            }

            let id = next_id(next);
            let item = QueueItem {
                id: id.clone(),
                file_path: file_path.to_path_buf(),
                patient_name: summary.patient_name,
                patient_id: summary.patient_id,
                study_date: summary.study_date,
                status: Status::Pending,
                priority,
                added_at: Utc::now(),
                last_attempt: None,
                attempt_count: 0,
                error_message: None,
                error_kind: None,
            };
            next.items.insert(id.clone(), item);
            next.insert_ordered(id.clone(), priority);
            Ok(id)
        })?;
        drop(state);

        info!(item_id = %id, ?priority, path = %file_path.display(), "item enqueued");
        self.emit(&id, None, Status::Pending, None);
        Ok(id)
    }

    /// Cancel a pending item.
    pub async fn cancel(&self, id: &str) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        self.commit(&mut state, |next| {
            let item = next
                .items
                .get_mut(id)
                .ok_or_else(|| QueueError::ItemNotFound(id.to_string()))?;
            if item.status != Status::Pending {
                return Err(QueueError::InvalidState {
                    id: id.to_string(),
                    status: item.status,
                    operation: "cancel",
                });
            }
            item.status = Status::Cancelled;
            Ok(())
        })?;
        drop(state);

        info!(item_id = %id, "item cancelled");
        self.emit(id, Some(Status::Pending), Status::Cancelled, None);
        Ok(())
    }

    /// Re-admit a failed item with a fresh attempt budget.
    pub async fn retry(&self, id: &str) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        self.commit(&mut state, |next| {
            let item = next
                .items
                .get_mut(id)
                .ok_or_else(|| QueueError::ItemNotFound(id.to_string()))?;
            if item.status != Status::Failed {
                return Err(QueueError::InvalidState {
                    id: id.to_string(),
                    status: item.status,
                    operation: "retry",
                });
            }
            item.status = Status::Pending;
            item.attempt_count = 0;
            item.error_message = None;
            item.error_kind = None;
            let priority = item.priority;

            // goes behind items of its priority that are already waiting
            next.order.retain(|other| other != id);
            next.insert_ordered(id.to_string(), priority);
            Ok(())
        })?;
        drop(state);

        info!(item_id = %id, "item re-admitted");
        self.emit(id, Some(Status::Failed), Status::Pending, None);
        Ok(())
    }

    pub async fn status(&self) -> QueueSummary {
        let state = self.state.read().await;
        let mut summary = QueueSummary {
            total: state.items.len(),
            processing: self.is_processing(),
            ..QueueSummary::default()
        };
        for item in state.items.values() {
            match item.status {
                Status::Pending => summary.pending += 1,
                Status::Uploading => summary.uploading += 1,
                Status::Success => summary.success += 1,
                Status::Failed => summary.failed += 1,
                Status::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    /// Items in processing order, optionally filtered by status.
    pub async fn list(&self, status: Option<Status>, limit: Option<usize>) -> Vec<QueueItem> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|id| state.items.get(id))
            .filter(|item| status.map_or(true, |s| item.status == s))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<QueueItem> {
        self.state.read().await.items.get(id).cloned()
    }

    /// One processing tick: deliver the head item if nothing else is in flight.
    ///
    /// Returns the item as it stands after the attempt, or `None` when the
    /// tick did nothing.
    pub async fn process_next(&self) -> Option<QueueItem> {
        if self.processing.swap(true, Ordering::AcqRel) {
            return None;
        }
        let _in_flight = InFlight(&self.processing);

        if !self.destination.borrow().enabled {
            return None;
        }

        let (id, previous_attempts) = {
            let state = self.state.read().await;
            let head = state.head()?;
            (head.id.clone(), head.attempt_count)
        };

        if previous_attempts > 0 {
            // linear backoff, read from the destination at attempt time
            let delay = self
                .destination
                .borrow()
                .retry_delay()
                .saturating_mul(previous_attempts);
            debug!(item_id = %id, ?delay, "waiting before next attempt");
            tokio::time::sleep(delay).await;
        }

        let destination = self.destination.borrow().clone();
        if !destination.enabled {
            return None;
        }

        let path = {
            let mut state = self.state.write().await;
            let item = state.items.get_mut(&id)?;
            if item.status != Status::Pending {
                // cancelled while we waited
                return None;
            }
            item.status = Status::Uploading;
            item.attempt_count += 1;
            item.last_attempt = Some(Utc::now());
            let path = item.file_path.clone();
            let attempt = item.attempt_count;
            self.persist_logged(&state);
            info!(item_id = %id, attempt, destination = %destination, "delivering");
            path
        };
        self.emit(&id, Some(Status::Pending), Status::Uploading, None);

        let deadline = destination.attempt_deadline(self.settings.attempt_timeout_cap());
        // the client bounds its own socket, this bounds everything else
        let outcome = match tokio::time::timeout(
            deadline,
            self.client.attempt(&path, &destination, deadline),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Outcome::failure(
                ErrorKind::Timeout,
                format!("attempt exceeded {} s", deadline.as_secs()),
            ),
        };

        let mut state = self.state.write().await;
        let item = state.items.get_mut(&id)?;
        let new_status = match &outcome {
            Outcome::Success => {
                item.status = Status::Success;
                item.error_message = None;
                item.error_kind = None;
                info!(item_id = %id, attempt = item.attempt_count, "delivered");
                Status::Success
            }
            Outcome::Failure { kind, message } => {
                item.error_message = Some(message.clone());
                item.error_kind = Some(*kind);
                let exhausted = item.attempt_count >= destination.attempt_limit();
                item.status = if !kind.is_retryable() || exhausted {
                    Status::Failed
                } else {
                    Status::Pending
                };
                warn!(
                    item_id = %id,
                    attempt = item.attempt_count,
                    %kind,
                    status = %item.status,
                    "delivery failed: {}",
                    message
                );
                item.status
            }
        };
        let error_kind = item.error_kind;
        let snapshot = item.clone();
        self.persist_logged(&state);
        drop(state);

        self.emit(&id, Some(Status::Uploading), new_status, error_kind);
        Some(snapshot)
    }

    /// Run `process_next` on the configured interval until the worker is stopped.
    pub fn spawn_worker(self: &Arc<Self>) -> QueueWorker {
        let queue = Arc::clone(self);
        let (stop, mut stopped) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(queue.settings.tick_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        queue.process_next().await;
                    }
                }
            }
            debug!("queue worker stopped");
        });
        QueueWorker {
            stop: Some(stop),
            handle,
        }
    }

    fn emit(&self, id: &str, old: Option<Status>, new: Status, kind: Option<ErrorKind>) {
        // no subscribers is fine
        let _ = self.events.send(StatusEvent {
            item_id: id.to_string(),
            old_status: old,
            new_status: new,
            error_kind: kind,
        });
    }

    /// Apply `change` to a copy of `state` and keep the copy only once it is on disk.
    fn commit<T>(
        &self,
        state: &mut QueueState,
        change: impl FnOnce(&mut QueueState) -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        let mut next = state.clone();
        let value = change(&mut next)?;
        self.persist(&next)?;
        *state = next;
        Ok(value)
    }

    fn persist(&self, state: &QueueState) -> Result<(), QueueError> {
        write_snapshot(&self.settings.snapshot_path, state)
    }

    /// Transitions made by the processing loop are kept in memory even when the
    /// write fails; the next successful write catches the snapshot up.
    fn persist_logged(&self, state: &QueueState) {
        if let Err(e) = self.persist(state) {
            error!(
                snapshot = %self.settings.snapshot_path.display(),
                "failed to persist queue: {}", e
            );
        }
    }
}

/// Handle on the background processing loop.
pub struct QueueWorker {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl QueueWorker {
    /// Stop after the attempt in flight (if any) has resolved.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = self.handle.await {
            error!("queue worker panicked: {}", e);
        }
    }
}

/// Take an exclusive advisory lock on `<snapshot>.lock`.
///
/// The snapshot itself is replaced by rename on every write, so the lock lives
/// on a sibling file that is never renamed.
fn lock_snapshot(snapshot: &Path) -> Result<File, QueueError> {
    let mut name = snapshot.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    let path = snapshot.with_file_name(name);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&path)?;
    match file.try_lock() {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => Err(QueueError::Locked(snapshot.to_path_buf())),
        Err(TryLockError::Error(e)) => Err(QueueError::Persistence(e)),
    }
}

fn load_snapshot(path: &Path) -> Result<QueueState, QueueError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(QueueState::default()),
        Err(e) => Err(QueueError::Persistence(e)),
    }
}

fn write_snapshot(path: &Path, state: &QueueState) -> Result<(), QueueError> {
    let json = serde_json::to_vec_pretty(state)?;
    storage::write_atomically(path, &json)?;
    Ok(())
}

fn next_id(state: &QueueState) -> String {
    let mut stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    loop {
        let id = format!("Q-{}", stamp);
        if !state.items.contains_key(&id) {
            return id;
        }
        stamp += 1;
    }
}
