use crate::board::BoardError;
use crate::session_log::Session;
use crate::stroke::Stroke;
use crate::tracking::{TrackingCursor, Transition};
use crate::types::{CommandId, ConnectionId, StrokeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifiableCommand {
    pub command_id: CommandId,
    pub command: ClientCommand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientCommand {
    Tracking(Transition),
    CommitStroke(Stroke),
    ClearBoard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IdentifiableEvent {
    ByMyself {
        command_id: CommandId,
        result: CommandResult,
    },
    BySystem {
        event: ServerEvent,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommandResult {
    TransitionApplied {
        cursor: TrackingCursor,
        session: Session,
    },
    TransitionIgnored {
        cursor: TrackingCursor,
    },
    StrokeAck {
        stroke_id: StrokeId,
        version: u64,
    },
    StrokeNack {
        stroke_id: StrokeId,
        reason: BoardError,
    },
    BoardCleared {
        version: u64,
    },
    Error(CommandError),
}

/// A failed command. The connection stays open and the client keeps showing
/// the last confirmed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandError {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerEvent {
    Init {
        connection_id: ConnectionId,
        cursor: TrackingCursor,
        sessions: Vec<Session>,
        strokes: Vec<Stroke>,
        board_version: u64,
    },
    TrackingChanged {
        cursor: TrackingCursor,
        session: Session,
    },
    StrokeAdded {
        version: u64,
        stroke: Stroke,
    },
    BoardCleared {
        version: u64,
    },
    SomeoneJoined(ConnectionId),
    SomeoneLeft(ConnectionId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stroke::Tool;
    use crate::types::{Color, LogicalPoint};

    #[test]
    fn it_survives_bincode_frame() {
        let command = IdentifiableCommand {
            command_id: 7,
            command: ClientCommand::CommitStroke(Stroke {
                id: uuid::Uuid::new_v4(),
                points: vec![LogicalPoint::new(1.5, 2.5)],
                color: Color::new(1, 2, 3),
                stroke_width: 3.0,
                tool: Tool::Eraser,
            }),
        };
        let bytes = bincode::serialize(&command).unwrap();
        let decoded = bincode::deserialize::<IdentifiableCommand>(&bytes).unwrap();
        assert_eq!(decoded.command_id, 7);
        match (decoded.command, command.command) {
            (ClientCommand::CommitStroke(a), ClientCommand::CommitStroke(b)) => assert_eq!(a, b),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
