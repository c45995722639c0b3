use crate::session_log::{duration_minutes, Activity, ActivityKind, Session};
use crate::types::{SessionId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    ClockedOut,
    ClockedIn,
    OnBreak,
    OnLunch,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    ClockIn,
    ClockOut,
    StartBreak,
    EndBreak,
    StartLunch,
    EndLunch,
}

/// What happens to `clock_out` while a break or lunch is running.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockOutPolicy {
    /// Ignored; the pause has to be ended first.
    Strict,
    /// The implied `*_end` marker is appended, then the session is closed.
    AutoEndPause,
}

impl Default for ClockOutPolicy {
    fn default() -> Self {
        ClockOutPolicy::Strict
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub clock_out_policy: ClockOutPolicy,
}

/// A learner's live tracking status. `version` is bumped by the store on
/// every committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingCursor {
    pub status: TrackingStatus,
    pub last_clock_in_time: Option<Timestamp>,
    pub last_break_start_time: Option<Timestamp>,
    pub last_lunch_start_time: Option<Timestamp>,
    pub current_session_id: Option<SessionId>,
    pub version: u64,
}

impl Default for TrackingCursor {
    fn default() -> Self {
        Self {
            status: TrackingStatus::ClockedOut,
            last_clock_in_time: None,
            last_break_start_time: None,
            last_lunch_start_time: None,
            current_session_id: None,
            version: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogMutation {
    OpenSession(Session),
    AppendActivity(SessionId, Activity),
    CloseSession {
        session_id: SessionId,
        end_time: Timestamp,
        duration_minutes: i64,
    },
}

impl LogMutation {
    pub fn session_id(&self) -> SessionId {
        match self {
            LogMutation::OpenSession(session) => session.session_id,
            LogMutation::AppendActivity(session_id, _) => *session_id,
            LogMutation::CloseSession { session_id, .. } => *session_id,
        }
    }
}

/// The next cursor and the log mutations that take a learner there.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub cursor: TrackingCursor,
    pub items: Vec<LogMutation>,
}

impl TrackingCursor {
    pub fn is_consistent(&self) -> bool {
        (self.status == TrackingStatus::ClockedOut) == self.current_session_id.is_none()
    }

    /// Plans `transition` at `now`. Returns `None` when the transition is not
    /// allowed from the current status.
    pub fn plan(
        &self,
        transition: Transition,
        now: Timestamp,
        policy: ClockOutPolicy,
    ) -> Option<TransitionPlan> {
        use TrackingStatus::*;

        match (self.status, transition) {
            (ClockedOut, Transition::ClockIn) => {
                let session = Session::open(now);
                let cursor = TrackingCursor {
                    status: ClockedIn,
                    last_clock_in_time: Some(now),
                    last_break_start_time: None,
                    last_lunch_start_time: None,
                    current_session_id: Some(session.session_id),
                    version: self.version,
                };
                Some(TransitionPlan {
                    cursor,
                    items: vec![LogMutation::OpenSession(session)],
                })
            }
            (ClockedIn, Transition::ClockOut) => self.plan_clock_out(now, None),
            (OnBreak, Transition::ClockOut) if policy == ClockOutPolicy::AutoEndPause => {
                self.plan_clock_out(now, Some(ActivityKind::BreakEnd))
            }
            (OnLunch, Transition::ClockOut) if policy == ClockOutPolicy::AutoEndPause => {
                self.plan_clock_out(now, Some(ActivityKind::LunchEnd))
            }
            (ClockedIn, Transition::StartBreak) => {
                self.plan_marker(now, OnBreak, ActivityKind::BreakStart)
            }
            (OnBreak, Transition::EndBreak) => {
                self.plan_marker(now, ClockedIn, ActivityKind::BreakEnd)
            }
            (ClockedIn, Transition::StartLunch) => {
                self.plan_marker(now, OnLunch, ActivityKind::LunchStart)
            }
            (OnLunch, Transition::EndLunch) => {
                self.plan_marker(now, ClockedIn, ActivityKind::LunchEnd)
            }
            (status, transition) => {
                log::debug!("Ignore {:?} while {:?}", transition, status);
                None
            }
        }
    }

    fn plan_marker(
        &self,
        now: Timestamp,
        status: TrackingStatus,
        kind: ActivityKind,
    ) -> Option<TransitionPlan> {
        let session_id = self.current_session_id?;
        let mut cursor = TrackingCursor {
            status,
            ..self.clone()
        };
        match kind {
            ActivityKind::BreakStart => cursor.last_break_start_time = Some(now),
            ActivityKind::LunchStart => cursor.last_lunch_start_time = Some(now),
            ActivityKind::BreakEnd | ActivityKind::LunchEnd => {}
        }
        Some(TransitionPlan {
            cursor,
            items: vec![LogMutation::AppendActivity(
                session_id,
                Activity::new(kind, now),
            )],
        })
    }

    fn plan_clock_out(
        &self,
        now: Timestamp,
        implied_end: Option<ActivityKind>,
    ) -> Option<TransitionPlan> {
        let session_id = self.current_session_id?;
        let start_time = self.last_clock_in_time.unwrap_or_else(|| {
            log::warn!("Cursor of session {} has no clock-in time", session_id);
            now
        });

        let mut items = Vec::new();
        if let Some(kind) = implied_end {
            items.push(LogMutation::AppendActivity(
                session_id,
                Activity::new(kind, now),
            ));
        }
        items.push(LogMutation::CloseSession {
            session_id,
            end_time: now,
            duration_minutes: duration_minutes(start_time, now),
        });

        Some(TransitionPlan {
            cursor: TrackingCursor {
                version: self.version,
                ..TrackingCursor::default()
            },
            items,
        })
    }
}
