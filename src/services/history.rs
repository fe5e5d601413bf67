//! History Manager: optimistic job records, reconciliation and polling.
//!
//! DESIGN
//! ======
//! Each remote job moves through one state machine:
//!
//! 1. `add_optimistic_item` prepends a `pending` item under a `temp-` id the
//!    moment a job is queued.
//! 2. `update_optimistic_id` swaps in the server's job id once submission
//!    returns, and starts polling it.
//! 3. A poll task checks the job every `poll.interval` for at most
//!    `poll.max_attempts` attempts. `processing` updates in place, `completed`
//!    merges the result, forces a reload and publishes the item on the
//!    completion channel exactly once, and `failed` or exhaustion marks the
//!    item failed.
//! 4. `load` debounces (trailing edge) and reconciles the server list
//!    against local items.
//!
//! Poll tasks are tracked by job id with their `AbortHandle`. Starting a poll
//! for a job already being polled is a no-op; `cancel_polling` aborts.
//!
//! All bookkeeping sits behind a `std::sync::Mutex` that is never held across
//! an await.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{EditorConfig, PollConfig};
use crate::consts::{TEMP_ID_PREFIX, TEMP_ID_SUFFIX_LEN};
use crate::layers::{LayerId, LayerManager, Side};
use crate::notify::Notifier;
use crate::remote::{HistoryItem, HistoryResponse, HistoryStats, JobResult, JobStatus, RemoteApi, RemoteError};

#[cfg(test)]
#[path = "history_test.rs"]
mod tests;

/// Provider recorded on entries for actions that never left the client.
pub const LOCAL_PROVIDER: &str = "local";

const TEMP_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Default)]
struct HistoryInner {
    items: Vec<HistoryItem>,
    stats: HistoryStats,
    polling: HashMap<String, AbortHandle>,
    /// Jobs whose terminal status was observed by polling.
    settled: HashSet<String>,
    /// Jobs already published on the completion channel.
    notified: HashSet<String>,
    expanded: HashSet<String>,
    load_generation: u64,
    completions: Option<mpsc::UnboundedSender<HistoryItem>>,
}

#[derive(Clone)]
pub struct HistoryManager {
    inner: Arc<Mutex<HistoryInner>>,
    remote: Arc<dyn RemoteApi>,
    notifier: Notifier,
    poll: PollConfig,
    debounce: Duration,
    template_id: Option<String>,
}

impl HistoryManager {
    #[must_use]
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        notifier: Notifier,
        config: &EditorConfig,
        template_id: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HistoryInner::default())),
            remote,
            notifier,
            poll: config.poll,
            debounce: Duration::from_millis(config.history_debounce_ms),
            template_id,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HistoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Queries ─────────────────────────────────────────────────

    /// Items newest first.
    #[must_use]
    pub fn items(&self) -> Vec<HistoryItem> {
        self.lock().items.clone()
    }

    #[must_use]
    pub fn item(&self, id: &str) -> Option<HistoryItem> {
        self.lock().items.iter().find(|i| i.id == id).cloned()
    }

    #[must_use]
    pub fn stats(&self) -> HistoryStats {
        self.lock().stats.clone()
    }

    #[must_use]
    pub fn is_polling(&self, job_id: &str) -> bool {
        self.lock().polling.contains_key(job_id)
    }

    #[must_use]
    pub fn is_expanded(&self, id: &str) -> bool {
        self.lock().expanded.contains(id)
    }

    /// Receive every job that completes. Replaces any previous subscriber.
    #[must_use]
    pub fn subscribe_completions(&self) -> mpsc::UnboundedReceiver<HistoryItem> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().completions = Some(tx);
        rx
    }

    // ── Optimistic items ────────────────────────────────────────

    /// Record a just-queued job under a temporary id and return that id.
    pub fn add_optimistic_item(&self, provider: &str, model: &str, input_image_ref: &str, side: Option<Side>) -> String {
        let temp_id = generate_temp_id();
        let item = HistoryItem {
            id: temp_id.clone(),
            created_at: OffsetDateTime::now_utc(),
            status: JobStatus::Pending,
            provider: provider.to_string(),
            model: model.to_string(),
            input_image_ref: input_image_ref.to_string(),
            side,
            layers: Vec::new(),
            credits_used: 0,
            is_optimistic: true,
            result_url: None,
            action: None,
            error: None,
        };
        self.lock().items.insert(0, item);
        debug!(%temp_id, %provider, "history: optimistic item added");
        temp_id
    }

    /// Swap a temporary id for the server's job id and start polling it.
    /// Unknown temporary ids are ignored. Must be called within a Tokio
    /// runtime.
    pub fn update_optimistic_id(&self, temp_id: &str, job_id: &str) -> bool {
        {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let Some(pos) = inner.items.iter().position(|i| i.id == temp_id) else {
                warn!(%temp_id, %job_id, "history: unknown optimistic id");
                return false;
            };
            if inner.items.iter().any(|i| i.id == job_id) {
                // A reload already brought the server's record in.
                inner.items.remove(pos);
            } else {
                let item = &mut inner.items[pos];
                item.id = job_id.to_string();
                item.is_optimistic = true;
            }
        }
        info!(%temp_id, %job_id, "history: reconciled optimistic id");
        self.start_polling(job_id);
        true
    }

    /// Mark an item failed, e.g. when its submission was rejected.
    pub fn mark_failed(&self, id: &str, reason: &str) {
        {
            let mut inner = self.lock();
            if let Some(item) = inner.items.iter_mut().find(|i| i.id == id) {
                item.status = JobStatus::Failed;
                item.is_optimistic = false;
                item.error = Some(reason.to_string());
            }
            inner.settled.insert(id.to_string());
        }
        warn!(%id, %reason, "history: job failed");
    }

    // ── Polling ─────────────────────────────────────────────────

    /// Spawn a poll task for `job_id` unless one is running or the job has
    /// already settled. Must be called within a Tokio runtime.
    pub fn start_polling(&self, job_id: &str) -> bool {
        let mut inner = self.lock();
        if inner.polling.contains_key(job_id) || inner.settled.contains(job_id) {
            return false;
        }
        let this = self.clone();
        let id = job_id.to_string();
        let handle = tokio::spawn(async move { this.poll_job(id).await });
        inner.polling.insert(job_id.to_string(), handle.abort_handle());
        debug!(%job_id, "history: polling started");
        true
    }

    pub fn cancel_polling(&self, job_id: &str) -> bool {
        let Some(handle) = self.lock().polling.remove(job_id) else {
            return false;
        };
        handle.abort();
        info!(%job_id, "history: polling cancelled");
        true
    }

    async fn poll_job(self, job_id: String) {
        let interval = self.poll.interval();
        for attempt in 1..=self.poll.max_attempts {
            match self.remote.check_job_status(&job_id).await {
                Ok(response) => match response.status {
                    JobStatus::Pending => {}
                    JobStatus::Processing => self.set_status(&job_id, JobStatus::Processing),
                    JobStatus::Completed => {
                        self.finish_completed(&job_id, response.result).await;
                        return;
                    }
                    JobStatus::Failed => {
                        let reason = response.error.unwrap_or_else(|| "job failed".into());
                        self.finish_failed(&job_id, &reason);
                        return;
                    }
                },
                Err(err) => warn!(%job_id, attempt, error = %err, "history: status check failed"),
            }
            tokio::time::sleep(interval).await;
        }
        warn!(%job_id, attempts = self.poll.max_attempts, "history: polling exhausted");
        self.finish_failed(&job_id, "timed out waiting for job");
    }

    fn set_status(&self, job_id: &str, status: JobStatus) {
        if let Some(item) = self.lock().items.iter_mut().find(|i| i.id == job_id) {
            item.status = status;
        }
    }

    async fn finish_completed(&self, job_id: &str, result: Option<JobResult>) {
        {
            let mut guard = self.lock();
            let inner = &mut *guard;
            if let Some(item) = inner.items.iter_mut().find(|i| i.id == job_id) {
                item.status = JobStatus::Completed;
                item.is_optimistic = false;
                if let Some(result) = result {
                    if !result.layers.is_empty() {
                        item.layers = result.layers;
                    }
                    if result.result_url.is_some() {
                        item.result_url = result.result_url;
                    }
                    if let Some(credits) = result.credits_used {
                        item.credits_used = credits;
                    }
                }
            }
            inner.settled.insert(job_id.to_string());
        }
        info!(%job_id, "history: job completed");

        if let Err(err) = self.reload().await {
            warn!(%job_id, error = %err, "history: reload after completion failed");
        }
        self.lock().polling.remove(job_id);

        let (item, sender) = {
            let mut inner = self.lock();
            if !inner.notified.insert(job_id.to_string()) {
                return;
            }
            let item = inner.items.iter().find(|i| i.id == job_id).cloned();
            (item, inner.completions.clone())
        };
        self.notifier.success("A background task has completed");
        if let (Some(item), Some(sender)) = (item, sender) {
            if sender.send(item).is_err() {
                debug!(%job_id, "history: completion receiver dropped");
            }
        }
    }

    fn finish_failed(&self, job_id: &str, reason: &str) {
        self.mark_failed(job_id, reason);
        self.lock().polling.remove(job_id);
        self.notifier.error(format!("Background task failed: {reason}"));
    }

    // ── Loading ─────────────────────────────────────────────────

    /// Debounced reload: only the last call within the debounce window
    /// fetches. Returns whether this call did.
    pub async fn load(&self) -> Result<bool, RemoteError> {
        let generation = {
            let mut inner = self.lock();
            inner.load_generation += 1;
            inner.load_generation
        };
        tokio::time::sleep(self.debounce).await;
        if self.lock().load_generation != generation {
            debug!("history: load superseded");
            return Ok(false);
        }
        self.reload().await?;
        Ok(true)
    }

    /// Fetch and reconcile immediately.
    pub async fn reload(&self) -> Result<(), RemoteError> {
        let response = self.remote.get_history(self.template_id.as_deref()).await?;
        if !response.success {
            return Err(RemoteError::Rejected("history unavailable".into()));
        }
        let count = response.history.len();
        let to_poll = self.reconcile(response);
        debug!(count, rearmed = to_poll.len(), "history: reloaded");
        for job_id in to_poll {
            self.start_polling(&job_id);
        }
        Ok(())
    }

    /// Merge a server listing into local state; returns unfinished jobs
    /// that need a poll task.
    fn reconcile(&self, response: HistoryResponse) -> Vec<String> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let server_ids: HashSet<String> = response.history.iter().map(|i| i.id.clone()).collect();
        let mut local_matches: HashMap<String, HistoryItem> = HashMap::new();
        let mut merged: Vec<HistoryItem> = Vec::with_capacity(inner.items.len() + response.history.len());

        for item in std::mem::take(&mut inner.items) {
            if server_ids.contains(&item.id) {
                local_matches.insert(item.id.clone(), item);
            } else if item.is_optimistic || item.provider == LOCAL_PROVIDER || inner.settled.contains(&item.id) {
                merged.push(item);
            }
        }
        for server_item in response.history {
            // A lagging server must not reopen a job polling already settled.
            let keep_local = inner.settled.contains(&server_item.id) && !server_item.status.is_terminal();
            match local_matches.remove(&server_item.id) {
                Some(local) if keep_local => merged.push(local),
                Some(local) => merged.push(backfill_results(server_item, local)),
                None => merged.push(server_item),
            }
        }
        inner.items = merged;
        if let Some(stats) = response.stats {
            inner.stats = stats;
        }

        inner
            .items
            .iter()
            .filter(|i| matches!(i.status, JobStatus::Pending | JobStatus::Processing))
            .filter(|i| !i.id.starts_with(TEMP_ID_PREFIX))
            .filter(|i| !inner.polling.contains_key(&i.id) && !inner.settled.contains(&i.id))
            .map(|i| i.id.clone())
            .collect()
    }

    // ── Local entries and panel state ───────────────────────────

    /// Record an action that completed locally (draw, erase, move, fill).
    pub fn add_local_entry(&self, action: &str, input_image_ref: &str, side: Side) -> String {
        let id = Uuid::new_v4().to_string();
        let item = HistoryItem {
            id: id.clone(),
            created_at: OffsetDateTime::now_utc(),
            status: JobStatus::Completed,
            provider: LOCAL_PROVIDER.to_string(),
            model: action.to_string(),
            input_image_ref: input_image_ref.to_string(),
            side: Some(side),
            layers: Vec::new(),
            credits_used: 0,
            is_optimistic: false,
            result_url: None,
            action: Some(action.to_string()),
            error: None,
        };
        self.lock().items.insert(0, item);
        debug!(%id, %action, "history: local entry");
        id
    }

    /// Returns whether the item is expanded afterwards.
    pub fn toggle_expand(&self, id: &str) -> bool {
        let mut inner = self.lock();
        if inner.expanded.remove(id) {
            false
        } else {
            inner.expanded.insert(id.to_string());
            true
        }
    }

    /// Replace the item's side with the item's result layers.
    pub fn restore_session(&self, item: &HistoryItem, layers: &mut LayerManager) -> Vec<LayerId> {
        let side = item.side.unwrap_or(layers.active_side());
        if layers.active_side() != side {
            layers.set_side(side);
            self.notifier.info(format!("Switched to {side} side"));
        }
        layers.clear_current_side();
        let added = layers.add_from_history(&item.layers);
        info!(item_id = %item.id, %side, layers = added.len(), "history: session restored");
        self.notifier.success("Session restored from history");
        added
    }
}

fn generate_temp_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..TEMP_ID_SUFFIX_LEN)
        .map(|_| {
            let idx = rng.random_range(0..TEMP_ID_ALPHABET.len());
            TEMP_ID_ALPHABET[idx] as char
        })
        .collect();
    format!("{TEMP_ID_PREFIX}{suffix}")
}

/// Server copy of an item, with results the listing omits carried over from
/// the local copy. A listing can trail the status endpoint that completed
/// the job.
fn backfill_results(mut server: HistoryItem, local: HistoryItem) -> HistoryItem {
    if server.layers.is_empty() {
        server.layers = local.layers;
    }
    if server.result_url.is_none() {
        server.result_url = local.result_url;
    }
    server
}
