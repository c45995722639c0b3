use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};

use crate::session_log::{LogError, Session, SessionLog};
use crate::tracking::{LogMutation, TrackingCursor};
use crate::types::{LearnerId, TransactionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A cursor update plus the log mutations behind it, applied all-or-nothing.
/// `base_version` is the cursor version the transaction was planned against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingTransaction {
    pub id: TransactionId,
    pub learner_id: LearnerId,
    pub base_version: u64,
    pub cursor: TrackingCursor,
    pub items: Vec<LogMutation>,
}

impl TrackingTransaction {
    pub fn new(
        learner_id: LearnerId,
        base_version: u64,
        cursor: TrackingCursor,
        items: Vec<LogMutation>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            learner_id,
            base_version,
            cursor,
            items,
        }
    }
}

/// Published to subscribers after every committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingChange {
    pub transaction_id: TransactionId,
    pub learner_id: LearnerId,
    pub cursor: TrackingCursor,
    pub session: Session,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("cursor of {learner_id} moved on: expected version {expected}, found {actual}")]
    VersionConflict {
        learner_id: LearnerId,
        expected: u64,
        actual: u64,
    },
    #[error("transaction {0} has no log mutations")]
    EmptyTransaction(TransactionId),
    #[error("transaction {0} touches more than one session")]
    MixedSessions(TransactionId),
    #[error("cursor does not match the session log of {0}")]
    InconsistentCursor(LearnerId),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("snapshot error: {0}")]
    Snapshot(String),
}

/// Persistence for tracking cursors and session logs, keyed by learner.
pub trait TrackingStore {
    /// `None` means the learner never clocked in: an implicit `clocked_out`.
    fn load(&self, learner_id: &str) -> Result<Option<TrackingCursor>, StoreError>;

    fn commit(&mut self, tx: TrackingTransaction) -> Result<TrackingChange, StoreError>;

    fn sessions(&self, learner_id: &str) -> Result<Vec<Session>, StoreError>;

    /// The newest session of the learner, open or closed.
    fn last_session(&self, learner_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions(learner_id)?.pop())
    }

    fn subscribe(&mut self, learner_id: &str) -> Receiver<TrackingChange>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LearnerRecord {
    cursor: TrackingCursor,
    log: SessionLog,
}

#[derive(Debug, Default)]
pub struct MemoryTrackingStore {
    learners: HashMap<LearnerId, LearnerRecord>,
    subscribers: HashMap<LearnerId, Vec<Sender<TrackingChange>>>,
}

impl MemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn learner_ids(&self) -> impl Iterator<Item = &LearnerId> {
        self.learners.keys()
    }

    pub fn snapshot(&self) -> Result<TrackingSnapshot, StoreError> {
        bincode::serialize(&self.learners)
            .map(|content| TrackingSnapshot { content })
            .map_err(|e| StoreError::Snapshot(e.to_string()))
    }

    pub fn from_snapshot(snapshot: &TrackingSnapshot) -> Result<Self, StoreError> {
        let learners = bincode::deserialize(&snapshot.content)
            .map_err(|e| StoreError::Snapshot(e.to_string()))?;
        Ok(Self {
            learners,
            subscribers: HashMap::new(),
        })
    }

    /// Replaces every learner record with the snapshot's content. Subscribers
    /// are kept.
    pub fn restore(&mut self, snapshot: &TrackingSnapshot) -> Result<(), StoreError> {
        self.learners = bincode::deserialize(&snapshot.content)
            .map_err(|e| StoreError::Snapshot(e.to_string()))?;
        Ok(())
    }

    fn publish(&mut self, change: &TrackingChange) {
        if let Some(senders) = self.subscribers.get_mut(&change.learner_id) {
            senders.retain(|tx| tx.send(change.clone()).is_ok());
            if senders.is_empty() {
                self.subscribers.remove(&change.learner_id);
            }
        }
    }
}

fn apply_mutation(log: &mut SessionLog, mutation: LogMutation) -> Result<(), LogError> {
    match mutation {
        LogMutation::OpenSession(session) => log.open(session).map(|_| ()),
        LogMutation::AppendActivity(session_id, activity) => {
            log.append_activity(&session_id, activity).map(|_| ())
        }
        LogMutation::CloseSession {
            session_id,
            end_time,
            duration_minutes,
        } => log.close(&session_id, end_time, duration_minutes).map(|_| ()),
    }
}

impl TrackingStore for MemoryTrackingStore {
    fn load(&self, learner_id: &str) -> Result<Option<TrackingCursor>, StoreError> {
        Ok(self.learners.get(learner_id).map(|r| r.cursor.clone()))
    }

    fn commit(&mut self, tx: TrackingTransaction) -> Result<TrackingChange, StoreError> {
        let session_id = match tx.items.first() {
            Some(item) => item.session_id(),
            None => return Err(StoreError::EmptyTransaction(tx.id)),
        };
        if tx.items.iter().any(|item| item.session_id() != session_id) {
            return Err(StoreError::MixedSessions(tx.id));
        }

        let current = self.learners.get(&tx.learner_id);
        let actual = current.map(|r| r.cursor.version).unwrap_or(0);
        if actual != tx.base_version {
            log::info!(
                "Reject transaction {} of {}: version {} != {}",
                tx.id,
                tx.learner_id,
                tx.base_version,
                actual
            );
            return Err(StoreError::VersionConflict {
                learner_id: tx.learner_id,
                expected: tx.base_version,
                actual,
            });
        }

        // Work on a copy so a failing mutation leaves the record untouched.
        let mut record = current.cloned().unwrap_or_default();
        for item in tx.items {
            apply_mutation(&mut record.log, item)?;
        }

        let open_session_id = record.log.open_session().map(|s| s.session_id);
        if !tx.cursor.is_consistent() || tx.cursor.current_session_id != open_session_id {
            return Err(StoreError::InconsistentCursor(tx.learner_id));
        }

        record.cursor = TrackingCursor {
            version: actual + 1,
            ..tx.cursor
        };
        let session = record
            .log
            .get(&session_id)
            .cloned()
            .ok_or(LogError::UnknownSession(session_id))?;
        let change = TrackingChange {
            transaction_id: tx.id,
            learner_id: tx.learner_id.clone(),
            cursor: record.cursor.clone(),
            session,
        };
        self.learners.insert(tx.learner_id, record);
        log::debug!(
            "Committed transaction {} of {} at version {}",
            change.transaction_id,
            change.learner_id,
            change.cursor.version
        );

        self.publish(&change);
        Ok(change)
    }

    fn sessions(&self, learner_id: &str) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .learners
            .get(learner_id)
            .map(|r| r.log.sessions().to_vec())
            .unwrap_or_default())
    }

    fn last_session(&self, learner_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self
            .learners
            .get(learner_id)
            .and_then(|r| r.log.sessions().last().cloned()))
    }

    fn subscribe(&mut self, learner_id: &str) -> Receiver<TrackingChange> {
        let (tx, rx) = channel();
        self.subscribers
            .entry(learner_id.to_owned())
            .or_insert_with(Vec::new)
            .push(tx);
        rx
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    content: Vec<u8>,
}

impl TrackingSnapshot {
    pub fn from_vec(content: Vec<u8>) -> Self {
        Self { content }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

impl std::fmt::Debug for TrackingSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingSnapshot")
            .field("size", &self.content.len())
            .finish()
    }
}
