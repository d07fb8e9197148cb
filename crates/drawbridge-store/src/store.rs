//! The annotation store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use drawbridge_protocols::{Annotation, AnnotationDraft, AnnotationId, AnnotationState, LifecycleEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::persistence::{AnnotationPersistence, MemoryPersistence, StoredRecord};
use crate::watch::{PendingSubscription, StoreEvent};

const EVENT_CAPACITY: usize = 256;
const MAX_ID_LEN: usize = 128;

/// Selects records returned by [`AnnotationStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub state: Option<AnnotationState>,
    pub pathname: Option<String>,
}

impl ListFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn pending() -> Self {
        Self {
            state: Some(AnnotationState::Pending),
            pathname: None,
        }
    }

    pub fn with_pathname(mut self, pathname: impl Into<String>) -> Self {
        self.pathname = Some(pathname.into());
        self
    }

    fn matches(&self, annotation: &Annotation) -> bool {
        self.state.is_none_or(|s| annotation.state == s)
            && self
                .pathname
                .as_deref()
                .is_none_or(|p| annotation.pathname == p)
    }
}

/// Number of records per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: usize,
    pub acknowledged: usize,
    pub resolved: usize,
    pub dismissed: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.pending + self.acknowledged + self.resolved + self.dismissed
    }
}

#[derive(Default)]
struct Inner {
    order: Vec<AnnotationId>,
    records: HashMap<AnnotationId, StoredRecord>,
    next_seq: u64,
}

/// Insertion-ordered annotation table with validated lifecycle transitions.
///
/// All mutations take the write lock and persist before becoming visible,
/// so readers never observe a record that failed to save.
pub struct AnnotationStore {
    inner: RwLock<Inner>,
    persistence: Arc<dyn AnnotationPersistence>,
    events: broadcast::Sender<StoreEvent>,
}

impl AnnotationStore {
    /// Open a store, loading every record from `persistence`.
    ///
    /// Undecodable records fail with [`StoreError::Corrupt`].
    pub async fn open(persistence: Arc<dyn AnnotationPersistence>) -> Result<Self, StoreError> {
        let loaded = persistence.load_all().await?;

        let mut inner = Inner::default();
        for record in loaded {
            inner.next_seq = inner.next_seq.max(record.seq + 1);
            inner.order.push(record.annotation.id.clone());
            inner.records.insert(record.annotation.id.clone(), record);
        }
        if !inner.order.is_empty() {
            info!("Loaded {} annotations", inner.order.len());
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: RwLock::new(inner),
            persistence,
            events,
        })
    }

    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            persistence: Arc::new(MemoryPersistence::new()),
            events,
        }
    }

    /// Accept a draft as a new `pending` record.
    pub async fn submit(&self, draft: AnnotationDraft) -> Result<Annotation, StoreError> {
        let mut inner = self.inner.write().await;

        let id = match draft.id.clone() {
            Some(id) => {
                validate_id(&id)?;
                if inner.records.contains_key(&id) {
                    return Err(StoreError::Duplicate(id));
                }
                id
            }
            None => Uuid::new_v4().to_string(),
        };

        let record = StoredRecord {
            seq: inner.next_seq,
            annotation: Annotation::from_draft(id.clone(), draft),
        };
        self.persistence.save(&record).await?;

        inner.next_seq += 1;
        inner.order.push(id.clone());
        let annotation = record.annotation.clone();
        inner.records.insert(id, record);

        info!(annotation_id = %annotation.id, kind = ?annotation.kind, "Annotation submitted");
        let _ = self.events.send(StoreEvent::Submitted(annotation.clone()));
        Ok(annotation)
    }

    /// Submit a draft, re-opening the record when its client id is already
    /// known and the record can be retried.
    ///
    /// A pending record with failed attempts is returned as is. A resolved or
    /// dismissed one is `Reset` to pending. Anything else is a duplicate.
    pub async fn resubmit(&self, draft: AnnotationDraft) -> Result<Annotation, StoreError> {
        let existing = match draft.id.as_deref() {
            Some(id) => self
                .inner
                .read()
                .await
                .records
                .get(id)
                .map(|r| r.annotation.clone()),
            None => None,
        };
        let Some(existing) = existing else {
            return self.submit(draft).await;
        };

        match existing.state {
            AnnotationState::Resolved | AnnotationState::Dismissed => {
                info!(annotation_id = %existing.id, from = %existing.state, "Annotation re-submitted");
                self.transition(&existing.id, LifecycleEvent::Reset).await
            }
            AnnotationState::Pending if existing.attempts > 0 => {
                info!(
                    annotation_id = %existing.id,
                    attempts = existing.attempts,
                    "Retrying failed annotation"
                );
                Ok(existing)
            }
            _ => Err(StoreError::Duplicate(existing.id)),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Annotation, StoreError> {
        let inner = self.inner.read().await;
        inner
            .records
            .get(id)
            .map(|r| r.annotation.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Records matching `filter`, in insertion order.
    pub async fn list(&self, filter: &ListFilter) -> Vec<Annotation> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .map(|r| &r.annotation)
            .filter(|a| filter.matches(a))
            .cloned()
            .collect()
    }

    /// Apply a lifecycle event atomically.
    ///
    /// Rejected transitions return [`StoreError::InvalidTransition`] and
    /// leave the record unchanged.
    pub async fn transition(&self, id: &str, event: LifecycleEvent) -> Result<Annotation, StoreError> {
        let mut inner = self.inner.write().await;
        let current = inner
            .records
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut updated = current.clone();
        let from = updated.annotation.state;
        updated
            .annotation
            .apply(&event)
            .map_err(|rejected| StoreError::rejected(id, rejected))?;

        self.persistence.save(&updated).await?;
        let annotation = updated.annotation.clone();
        inner.records.insert(id.to_string(), updated);

        debug!(
            annotation_id = %id,
            event = event.name(),
            from = %from,
            to = %annotation.state,
            "Annotation transitioned"
        );
        let _ = self.events.send(StoreEvent::Transitioned {
            annotation: annotation.clone(),
            from,
        });
        Ok(annotation)
    }

    /// Stamp `revertedAt` without changing state.
    pub async fn mark_reverted(&self, id: &str) -> Result<Annotation, StoreError> {
        let mut inner = self.inner.write().await;
        let current = inner
            .records
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut updated = current.clone();
        let now = drawbridge_protocols::now_millis();
        updated.annotation.reverted_at = Some(now);
        updated.annotation.updated_at = now;

        self.persistence.save(&updated).await?;
        let annotation = updated.annotation.clone();
        inner.records.insert(id.to_string(), updated);

        let _ = self.events.send(StoreEvent::Reverted(annotation.clone()));
        Ok(annotation)
    }

    /// Subscribe to records entering `pending` from now on.
    pub fn subscribe(&self) -> PendingSubscription {
        PendingSubscription::new(self.events.subscribe())
    }

    /// Raw change feed.
    pub fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Long-poll for pending work.
    ///
    /// Returns every currently pending record if there are any, otherwise
    /// waits up to `timeout` for one to appear. An empty result means no
    /// new work arrived before the ceiling.
    pub async fn watch_pending(&self, timeout: Duration) -> Vec<Annotation> {
        // Subscribe before listing so a submit between the two is not lost.
        let mut subscription = self.subscribe();

        let pending = self.list(&ListFilter::pending()).await;
        if !pending.is_empty() {
            return pending;
        }

        match subscription.next(timeout).await {
            Some(annotation) => vec![annotation],
            None => Vec::new(),
        }
    }

    pub async fn counts(&self) -> StateCounts {
        let inner = self.inner.read().await;
        let mut counts = StateCounts::default();
        for record in inner.records.values() {
            match record.annotation.state {
                AnnotationState::Pending => counts.pending += 1,
                AnnotationState::Acknowledged => counts.acknowledged += 1,
                AnnotationState::Resolved => counts.resolved += 1,
                AnnotationState::Dismissed => counts.dismissed += 1,
            }
        }
        counts
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Client ids become file names, so keep them to a safe alphabet.
fn validate_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
