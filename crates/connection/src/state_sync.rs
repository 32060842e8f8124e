//! Change debouncing, batched state pushes and device snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use hasslife_protocol::messages::{SyncDevicePayload, SyncStatePayload};
use hasslife_protocol::{EntitySnapshot, EntityState, Message, MessageType};

use crate::config::{EntityWhitelist, MIN_TICK, SyncConfig};
use crate::error::QueueError;
use crate::provider::DeviceStateProvider;
use crate::queue::OutboundQueue;
use crate::session::Session;

/// Debounce timestamps older than this are pruned on flush.
const DEBOUNCE_RETENTION: Duration = Duration::from_secs(60);

/// Result of feeding one change event to [`StateSyncManager::on_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// Added to the pending set.
    Queued,
    /// The entity no longer has a state.
    Removed,
    NotWhitelisted,
    /// The peer did not ask for this entity.
    Untracked,
    /// Neither state nor attributes changed.
    Unchanged,
    /// Inside the debounce window of the last accepted change.
    ///
    /// The entity is still marked pending, so the next flush reports its
    /// latest state. If a flush already drained the accepted change, this
    /// produces a second `SyncState` for the same window.
    Debounced,
}

/// Parameters of one snapshot push.
#[derive(Debug, Clone, Default)]
pub struct SnapshotRequest {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub search_keyword: Option<String>,
    pub request_id: Option<String>,
    /// Bypasses the minimum interval between snapshots.
    pub force: bool,
}

/// One page of the device snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPage {
    pub entities: Vec<EntitySnapshot>,
    pub total_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

/// Counters exposed to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStats {
    pub pending: usize,
    pub debounce_entries: usize,
    pub since_last_full_sync: Option<Duration>,
}

#[derive(Default)]
struct SyncInner {
    pending: HashSet<String>,
    last_change: HashMap<String, Instant>,
    last_full_sync: Option<Instant>,
}

/// Turns entity change events into `SyncState` pushes and serves
/// `SyncDevice` snapshots.
pub struct StateSyncManager {
    config: SyncConfig,
    whitelist: EntityWhitelist,
    session: Arc<Session>,
    provider: Arc<dyn DeviceStateProvider>,
    queue: OutboundQueue,
    inner: Mutex<SyncInner>,
}

impl StateSyncManager {
    pub fn new(
        config: SyncConfig,
        whitelist: EntityWhitelist,
        session: Arc<Session>,
        provider: Arc<dyn DeviceStateProvider>,
        queue: OutboundQueue,
    ) -> Self {
        Self {
            config,
            whitelist,
            session,
            provider,
            queue,
            inner: Mutex::new(SyncInner::default()),
        }
    }

    /// Records a change event. Never blocks on I/O.
    pub fn on_change(
        &self,
        entity_id: &str,
        old: Option<&EntityState>,
        new: Option<&EntityState>,
    ) -> ChangeOutcome {
        let Some(new) = new else {
            return ChangeOutcome::Removed;
        };
        if !self.whitelist.admits(entity_id) {
            return ChangeOutcome::NotWhitelisted;
        }
        if !self.session.is_tracked(entity_id) {
            return ChangeOutcome::Untracked;
        }
        if let Some(old) = old
            && old.state == new.state
            && old.attributes == new.attributes
        {
            return ChangeOutcome::Unchanged;
        }

        let now = Instant::now();
        let mut inner = self.lock();
        if let Some(last) = inner.last_change.get(entity_id)
            && now.duration_since(*last) < self.config.debounce_window
        {
            // Keep the entity pending so the flush reports its latest state,
            // but leave the window where it is.
            inner.pending.insert(entity_id.to_string());
            trace!(entity_id, "change debounced");
            return ChangeOutcome::Debounced;
        }
        inner.last_change.insert(entity_id.to_string(), now);
        inner.pending.insert(entity_id.to_string());
        ChangeOutcome::Queued
    }

    /// Pushes one `SyncState` per pending entity. Returns how many were
    /// enqueued.
    pub async fn flush(&self) -> usize {
        let mut ids: Vec<String> = {
            let mut inner = self.lock();
            let now = Instant::now();
            let retention = DEBOUNCE_RETENTION.max(self.config.debounce_window);
            inner
                .last_change
                .retain(|_, at| now.duration_since(*at) < retention);
            std::mem::take(&mut inner.pending).into_iter().collect()
        };
        if ids.is_empty() {
            return 0;
        }
        ids.sort();

        let mut sent = 0;
        for (i, chunk) in ids.chunks(self.config.batch_size.max(1)).enumerate() {
            if i > 0 {
                tokio::task::yield_now().await;
            }
            for entity_id in chunk {
                if !self.session.is_tracked(entity_id) {
                    continue;
                }
                let Some(entity) = self.provider.get(entity_id) else {
                    debug!(entity_id = %entity_id, "pending entity vanished, skipping");
                    continue;
                };
                match self.push_state(entity) {
                    Ok(()) => sent += 1,
                    Err(QueueError::Closed) => return sent,
                    Err(QueueError::Full) => {}
                }
            }
        }
        debug!(pending = ids.len(), sent, "flushed state changes");
        sent
    }

    /// Flushes pending changes every `batch_interval` until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.batch_interval.max(MIN_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.flush().await;
                }
            }
        }
        trace!("state sync loop stopped");
    }

    /// Builds and enqueues one snapshot page.
    ///
    /// Returns `None` when an unforced request arrives within
    /// `full_sync_interval` of the previous snapshot.
    pub fn sync_all(&self, request: SnapshotRequest) -> Option<SnapshotPage> {
        {
            let mut inner = self.lock();
            let now = Instant::now();
            if !request.force
                && let Some(last) = inner.last_full_sync
                && now.duration_since(last) < self.config.full_sync_interval
            {
                debug!("full sync skipped, interval not elapsed");
                return None;
            }
            inner.last_full_sync = Some(now);
        }

        let page = build_snapshot(
            self.provider.list_all_entities(),
            &self.whitelist,
            request.page,
            request.page_size,
            request.search_keyword.as_deref(),
        );

        let list = match serde_json::to_value(&page.entities) {
            Ok(v) => v.to_string(),
            Err(e) => {
                warn!(error = %e, "failed to serialize device list");
                return None;
            }
        };
        let payload = SyncDevicePayload {
            login: self.session.login().payload(),
            list,
            total_count: page.total_count,
            page: page.page,
            page_size: page.page_size,
            has_more: page.has_more,
        };
        match Message::new(MessageType::SyncDevice, &payload) {
            Ok(msg) => match self.queue.enqueue(msg.with_request_id(request.request_id)) {
                Ok(()) => info!(
                    total = page.total_count,
                    page = page.page,
                    returned = page.entities.len(),
                    "device snapshot queued"
                ),
                Err(QueueError::Full) => warn!(page = page.page, "device snapshot dropped, queue full"),
                Err(QueueError::Closed) => {
                    warn!(page = page.page, "device snapshot dropped, queue closed")
                }
            },
            Err(e) => warn!(error = %e, "failed to build SyncDevice message"),
        }
        Some(page)
    }

    pub fn stats(&self) -> SyncStats {
        let inner = self.lock();
        SyncStats {
            pending: inner.pending.len(),
            debounce_entries: inner.last_change.len(),
            since_last_full_sync: inner.last_full_sync.map(|t| t.elapsed()),
        }
    }

    fn push_state(&self, entity: EntityState) -> Result<(), QueueError> {
        let entity_id = entity.entity_id.clone();
        let payload = SyncStatePayload {
            login: self.session.login().payload(),
            entity_id: entity.entity_id,
            state: entity.state,
            attributes: entity.attributes,
        };
        match Message::new(MessageType::SyncState, &payload) {
            Ok(msg) => self.queue.enqueue(msg),
            Err(e) => {
                warn!(entity_id = %entity_id, error = %e, "failed to build SyncState message");
                Ok(())
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SyncInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Filters, projects, sorts and paginates a device list.
///
/// A page size of zero or `None` returns everything as page 1. Pages below
/// 1 are read as 1.
pub fn build_snapshot(
    entities: Vec<EntityState>,
    whitelist: &EntityWhitelist,
    page: Option<usize>,
    page_size: Option<usize>,
    search_keyword: Option<&str>,
) -> SnapshotPage {
    let keyword = search_keyword
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_lowercase);

    let mut items: Vec<EntitySnapshot> = entities
        .iter()
        .filter(|e| whitelist.admits(&e.entity_id))
        .filter(|e| match &keyword {
            None => true,
            Some(k) => {
                e.entity_id.to_lowercase().contains(k)
                    || e.friendly_name()
                        .is_some_and(|name| name.to_lowercase().contains(k))
            }
        })
        .map(EntityState::snapshot)
        .collect();
    items.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));

    let total_count = items.len();
    match page_size.filter(|&size| size > 0) {
        Some(size) => {
            let page = page.unwrap_or(1).max(1);
            let start = (page - 1).saturating_mul(size).min(total_count);
            let end = page.saturating_mul(size).min(total_count);
            SnapshotPage {
                entities: items.drain(start..end).collect(),
                total_count,
                page,
                page_size: size,
                has_more: page.saturating_mul(size) < total_count,
            }
        }
        None => SnapshotPage {
            entities: items,
            total_count,
            page: 1,
            page_size: total_count,
            has_more: false,
        },
    }
}
