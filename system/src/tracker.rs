use std::sync::mpsc::Receiver;

use crate::session_log::Session;
use crate::tracking::{TrackerConfig, TrackingCursor, Transition};
use crate::tracking_store::{StoreError, TrackingChange, TrackingStore, TrackingTransaction};
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransitionOutcome {
    Applied {
        cursor: TrackingCursor,
        session: Session,
    },
    /// The transition was not valid from the current status; nothing changed.
    Ignored { cursor: TrackingCursor },
}

impl TransitionOutcome {
    pub fn cursor(&self) -> &TrackingCursor {
        match self {
            TransitionOutcome::Applied { cursor, .. } => cursor,
            TransitionOutcome::Ignored { cursor } => cursor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackingError {
    #[error("learner id must not be empty")]
    EmptyLearnerId,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Runs state machine transitions for many learners against one store.
pub struct Tracker<S: TrackingStore> {
    store: S,
    config: TrackerConfig,
}

impl<S: TrackingStore> Tracker<S> {
    pub fn new(store: S, config: TrackerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn cursor(&self, learner_id: &str) -> Result<TrackingCursor, TrackingError> {
        check_learner_id(learner_id)?;
        Ok(self.store.load(learner_id)?.unwrap_or_default())
    }

    pub fn sessions(&self, learner_id: &str) -> Result<Vec<Session>, TrackingError> {
        check_learner_id(learner_id)?;
        Ok(self.store.sessions(learner_id)?)
    }

    pub fn subscribe(&mut self, learner_id: &str) -> Receiver<TrackingChange> {
        self.store.subscribe(learner_id)
    }

    pub fn apply(
        &mut self,
        learner_id: &str,
        transition: Transition,
        now: Timestamp,
    ) -> Result<TransitionOutcome, TrackingError> {
        let cursor = self.cursor(learner_id)?;
        let now = self.not_before_last_entry(learner_id, now)?;
        let plan = match cursor.plan(transition, now, self.config.clock_out_policy) {
            Some(plan) => plan,
            None => return Ok(TransitionOutcome::Ignored { cursor }),
        };

        let tx = TrackingTransaction::new(
            learner_id.to_owned(),
            cursor.version,
            plan.cursor,
            plan.items,
        );
        let change = self.store.commit(tx).map_err(|e| {
            log::warn!("{:?} of {} failed: {}", transition, learner_id, e);
            e
        })?;
        log::info!(
            "{} {:?} -> {:?}",
            learner_id,
            transition,
            change.cursor.status
        );
        Ok(TransitionOutcome::Applied {
            cursor: change.cursor,
            session: change.session,
        })
    }

    /// The session log only moves forward. When the wall clock stepped back
    /// since the learner's last entry, that entry's instant is used instead.
    fn not_before_last_entry(
        &self,
        learner_id: &str,
        now: Timestamp,
    ) -> Result<Timestamp, TrackingError> {
        let latest = match self.store.last_session(learner_id)? {
            Some(session) => session.latest_timestamp(),
            None => return Ok(now),
        };
        if now < latest {
            log::warn!(
                "Clock of {} stepped back from {} to {}",
                learner_id,
                latest,
                now
            );
            Ok(latest)
        } else {
            Ok(now)
        }
    }
}

fn check_learner_id(learner_id: &str) -> Result<(), TrackingError> {
    if learner_id.trim().is_empty() {
        Err(TrackingError::EmptyLearnerId)
    } else {
        Ok(())
    }
}
