use crate::types::{SessionId, Timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    BreakStart,
    BreakEnd,
    LunchStart,
    LunchEnd,
}

impl ActivityKind {
    fn is_start(&self) -> bool {
        matches!(self, ActivityKind::BreakStart | ActivityKind::LunchStart)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub timestamp: Timestamp,
}

impl Activity {
    pub fn new(kind: ActivityKind, timestamp: Timestamp) -> Self {
        Self { kind, timestamp }
    }
}

/// Minutes between two instants, rounded to the nearest minute. A negative
/// span (clock skew between devices) counts as zero.
pub fn duration_minutes(start: Timestamp, end: Timestamp) -> i64 {
    let millis = (end - start).num_milliseconds();
    if millis <= 0 {
        if millis < 0 {
            log::warn!("Session ends before it starts: {} < {}", end, start);
        }
        return 0;
    }
    (millis as f64 / 60_000.0).round() as i64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: SessionId,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
    pub duration_minutes: i64,
    pub activities: Vec<Activity>,
}

impl Session {
    pub fn open(start_time: Timestamp) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4(),
            start_time,
            end_time: None,
            duration_minutes: 0,
            activities: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    fn last_timestamp(&self) -> Timestamp {
        self.activities
            .last()
            .map(|a| a.timestamp)
            .unwrap_or(self.start_time)
    }

    /// The latest instant recorded in this session: its end, or else its
    /// newest activity, or else its start.
    pub fn latest_timestamp(&self) -> Timestamp {
        self.end_time.unwrap_or_else(|| self.last_timestamp())
    }

    /// Minutes spent between matching start/end markers of the given pause.
    /// An unmatched start is counted up to `end_time`, or not at all while the
    /// session is still open.
    pub fn pause_minutes(&self, start: ActivityKind, end: ActivityKind) -> i64 {
        let mut total = 0;
        let mut started_at = None;
        for activity in &self.activities {
            if activity.kind == start {
                started_at = Some(activity.timestamp);
            } else if activity.kind == end {
                if let Some(from) = started_at.take() {
                    total += duration_minutes(from, activity.timestamp);
                }
            }
        }
        if let (Some(from), Some(end_time)) = (started_at, self.end_time) {
            total += duration_minutes(from, end_time);
        }
        total
    }

    pub fn break_minutes(&self) -> i64 {
        self.pause_minutes(ActivityKind::BreakStart, ActivityKind::BreakEnd)
    }

    pub fn lunch_minutes(&self) -> i64 {
        self.pause_minutes(ActivityKind::LunchStart, ActivityKind::LunchEnd)
    }

    /// Gross duration minus breaks and lunches. Reporting only: the stored
    /// `duration_minutes` stays gross.
    pub fn net_minutes(&self) -> i64 {
        (self.duration_minutes - self.break_minutes() - self.lunch_minutes()).max(0)
    }

    /// The pause that is currently running, if the last marker is a start.
    pub fn open_pause(&self) -> Option<ActivityKind> {
        self.activities
            .last()
            .map(|a| a.kind)
            .filter(|kind| kind.is_start())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LogError {
    #[error("session {0} does not exist")]
    UnknownSession(SessionId),
    #[error("session {0} is already closed")]
    SessionClosed(SessionId),
    #[error("session {open} is still open, cannot open {requested}")]
    AlreadyOpen {
        open: SessionId,
        requested: SessionId,
    },
    #[error("session {0} already exists")]
    DuplicateSession(SessionId),
    #[error("event at {timestamp} is earlier than the last entry of session {session_id}")]
    OutOfOrder {
        session_id: SessionId,
        timestamp: Timestamp,
    },
}

/// Append-only list of one learner's sessions, in creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLog {
    sessions: Vec<Session>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| &s.session_id == session_id)
    }

    pub fn open_session(&self) -> Option<&Session> {
        // Only the newest session can be open.
        self.sessions.last().filter(|s| s.is_open())
    }

    pub fn open(&mut self, session: Session) -> Result<&Session, LogError> {
        if let Some(open) = self.open_session() {
            return Err(LogError::AlreadyOpen {
                open: open.session_id,
                requested: session.session_id,
            });
        }
        if self.get(&session.session_id).is_some() {
            return Err(LogError::DuplicateSession(session.session_id));
        }
        if let Some(last) = self.sessions.last() {
            let last_end = last.end_time.unwrap_or(last.start_time);
            if session.start_time < last_end {
                return Err(LogError::OutOfOrder {
                    session_id: session.session_id,
                    timestamp: session.start_time,
                });
            }
        }
        log::debug!("Open session {} at {}", session.session_id, session.start_time);
        let session_id = session.session_id;
        self.sessions.push(session);
        self.sessions
            .last()
            .ok_or(LogError::UnknownSession(session_id))
    }

    pub fn append_activity(
        &mut self,
        session_id: &SessionId,
        activity: Activity,
    ) -> Result<&Session, LogError> {
        let session = self.open_session_mut(session_id)?;
        if activity.timestamp < session.last_timestamp() {
            return Err(LogError::OutOfOrder {
                session_id: *session_id,
                timestamp: activity.timestamp,
            });
        }
        session.activities.push(activity);
        Ok(session)
    }

    pub fn close(
        &mut self,
        session_id: &SessionId,
        end_time: Timestamp,
        duration_minutes: i64,
    ) -> Result<&Session, LogError> {
        let session = self.open_session_mut(session_id)?;
        if end_time < session.last_timestamp() {
            return Err(LogError::OutOfOrder {
                session_id: *session_id,
                timestamp: end_time,
            });
        }
        session.end_time = Some(end_time);
        session.duration_minutes = duration_minutes;
        log::debug!(
            "Close session {} after {} minutes",
            session_id,
            duration_minutes
        );
        Ok(session)
    }

    fn open_session_mut(&mut self, session_id: &SessionId) -> Result<&mut Session, LogError> {
        let session = self
            .sessions
            .iter_mut()
            .find(|s| &s.session_id == session_id)
            .ok_or(LogError::UnknownSession(*session_id))?;
        if session.is_open() {
            Ok(session)
        } else {
            Err(LogError::SessionClosed(*session_id))
        }
    }
}
