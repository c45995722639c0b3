use system::{Board, ConnectionId, RoomId};

/// A study room: its whiteboard and the connections currently looking at it.
pub struct Room {
    pub connections: Vec<ConnectionId>,
    pub board: Board,
}

impl Room {
    pub fn new(board: Board) -> Self {
        Self {
            connections: Vec::new(),
            board,
        }
    }

    pub fn empty(room_id: RoomId) -> Self {
        Self::new(Board::new(room_id))
    }
}
