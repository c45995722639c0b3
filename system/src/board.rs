use crate::stroke::Stroke;
use crate::types::{RoomId, StrokeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BoardMutation {
    AddStroke(Stroke),
    Clear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoardChange {
    StrokeAdded { version: u64, stroke: Stroke },
    Cleared { version: u64 },
}

impl BoardChange {
    pub fn version(&self) -> u64 {
        match self {
            BoardChange::StrokeAdded { version, .. } => *version,
            BoardChange::Cleared { version } => *version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum BoardError {
    #[error("stroke {0} is already on the board")]
    DuplicateStroke(StrokeId),
    #[error("stroke {0} has no points or an invalid width")]
    InvalidStroke(StrokeId),
    #[error("snapshot error: {0}")]
    Snapshot(String),
}

/// The whiteboard of one study room: strokes in commit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    room_id: RoomId,
    strokes: Vec<Stroke>,
    version: u64,
}

impl Board {
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            strokes: Vec::new(),
            version: 0,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn apply(&mut self, mutation: BoardMutation) -> Result<BoardChange, BoardError> {
        match mutation {
            BoardMutation::AddStroke(stroke) => {
                if !stroke.is_valid() {
                    return Err(BoardError::InvalidStroke(stroke.id));
                }
                if self.strokes.iter().any(|s| s.id == stroke.id) {
                    return Err(BoardError::DuplicateStroke(stroke.id));
                }
                self.version += 1;
                self.strokes.push(stroke.clone());
                Ok(BoardChange::StrokeAdded {
                    version: self.version,
                    stroke,
                })
            }
            BoardMutation::Clear => {
                log::info!("Clear board {} ({} strokes)", self.room_id, self.strokes.len());
                self.version += 1;
                self.strokes.clear();
                Ok(BoardChange::Cleared {
                    version: self.version,
                })
            }
        }
    }

    pub fn snapshot(&self) -> Result<BoardSnapshot, BoardError> {
        bincode::serialize(self)
            .map(|content| BoardSnapshot { content })
            .map_err(|e| BoardError::Snapshot(e.to_string()))
    }

    pub fn from_snapshot(snapshot: &BoardSnapshot) -> Result<Self, BoardError> {
        bincode::deserialize(&snapshot.content).map_err(|e| BoardError::Snapshot(e.to_string()))
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BoardSnapshot {
    content: Vec<u8>,
}

impl BoardSnapshot {
    pub fn from_vec(content: Vec<u8>) -> Self {
        Self { content }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

impl std::fmt::Debug for BoardSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardSnapshot")
            .field("size", &self.content.len())
            .finish()
    }
}
