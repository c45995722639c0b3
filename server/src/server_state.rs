use crate::room::Room;
use std::collections::HashMap;
use std::num::Wrapping;
use system::{Board, BoardError, ConnectionId, LearnerId, RoomId, TrackingError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionLocation {
    pub learner_id: LearnerId,
    pub room_id: RoomId,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
    #[error("room {0} does not exist")]
    UnknownRoom(RoomId),
    #[error(transparent)]
    Tracking(#[from] TrackingError),
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error("every connection id is in use")]
    TooManyConnections,
    #[error("cannot write snapshot: {0}")]
    Persist(#[from] std::io::Error),
}

pub struct ServerState {
    connection_id_source: Wrapping<ConnectionId>,
    connection_locations: HashMap<ConnectionId, ConnectionLocation>,
    rooms: HashMap<RoomId, Room>,
}

impl ServerState {
    pub fn new(boards: Vec<Board>) -> Self {
        let rooms = boards
            .into_iter()
            .map(|board| (board.room_id().clone(), Room::new(board)))
            .collect();
        Self {
            connection_id_source: Wrapping(0),
            connection_locations: HashMap::new(),
            rooms,
        }
    }

    pub fn create_connection(
        &mut self,
        learner_id: LearnerId,
        room_id: RoomId,
    ) -> Result<ConnectionId, ServerError> {
        let connection_id = self
            .new_connection_id()
            .ok_or(ServerError::TooManyConnections)?;
        self.rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::empty(room_id.clone()))
            .connections
            .push(connection_id);
        log::info!(
            "Connection {} of {} joined room {}",
            connection_id,
            learner_id,
            room_id
        );
        self.connection_locations.insert(
            connection_id,
            ConnectionLocation {
                learner_id,
                room_id,
            },
        );
        Ok(connection_id)
    }

    /// Boards outlive their connections; only the membership is dropped.
    pub fn leave(&mut self, connection_id: &ConnectionId) -> Option<ConnectionLocation> {
        let location = self.connection_locations.remove(connection_id)?;
        if let Some(room) = self.rooms.get_mut(&location.room_id) {
            room.connections.retain(|c| c != connection_id);
        }
        log::info!(
            "Connection {} left room {}",
            connection_id,
            location.room_id
        );
        Some(location)
    }

    pub fn location(&self, connection_id: &ConnectionId) -> Option<&ConnectionLocation> {
        self.connection_locations.get(connection_id)
    }

    pub fn connection_ids_in_room(&self, room_id: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room_id)
            .map(|room| room.connections.clone())
            .unwrap_or_default()
    }

    pub fn connection_ids_of_learner(&self, learner_id: &str) -> Vec<ConnectionId> {
        self.connection_locations
            .iter()
            .filter(|(_, location)| location.learner_id == learner_id)
            .map(|(connection_id, _)| *connection_id)
            .collect()
    }

    pub fn board(&self, room_id: &str) -> Result<&Board, ServerError> {
        self.rooms
            .get(room_id)
            .map(|room| &room.board)
            .ok_or_else(|| ServerError::UnknownRoom(room_id.to_owned()))
    }

    pub fn board_mut(&mut self, room_id: &str) -> Result<&mut Board, ServerError> {
        self.rooms
            .get_mut(room_id)
            .map(|room| &mut room.board)
            .ok_or_else(|| ServerError::UnknownRoom(room_id.to_owned()))
    }

    /// `None` once every non-zero id is taken.
    fn new_connection_id(&mut self) -> Option<ConnectionId> {
        for _ in 0..=ConnectionId::MAX {
            self.connection_id_source += Wrapping(1);
            let candidate = self.connection_id_source.0;
            if candidate != 0 && !self.connection_locations.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_keeps_board_when_all_connections_leave() {
        let mut state = ServerState::new(vec![]);
        let connection_id = state.create_connection("ada".into(), "chemistry".into()).unwrap();
        assert_eq!(state.connection_ids_in_room("chemistry"), vec![connection_id]);

        let location = state.leave(&connection_id).expect("");
        assert_eq!(location.room_id, "chemistry");
        assert!(state.connection_ids_in_room("chemistry").is_empty());
        assert!(state.board("chemistry").is_ok());
        assert!(state.leave(&connection_id).is_none());
    }

    #[test]
    fn it_finds_every_tab_of_a_learner() {
        let mut state = ServerState::new(vec![]);
        let a = state.create_connection("ada".into(), "chemistry".into()).unwrap();
        let b = state.create_connection("ada".into(), "physics".into()).unwrap();
        state.create_connection("grace".into(), "chemistry".into()).unwrap();

        let mut tabs = state.connection_ids_of_learner("ada");
        tabs.sort();
        assert_eq!(tabs, vec![a, b]);
    }

    #[test]
    fn it_skips_connection_ids_in_use_after_wrapping() {
        let mut state = ServerState::new(vec![]);
        let first = state.create_connection("ada".into(), "chemistry".into()).unwrap();
        state.connection_id_source = Wrapping(ConnectionId::MAX);
        let next = state.create_connection("grace".into(), "chemistry".into()).unwrap();
        assert_eq!(first, 1);
        assert_eq!(next, 2);
    }

    #[test]
    fn it_refuses_connection_when_ids_run_out() {
        let mut state = ServerState::new(vec![]);
        for _ in 0..ConnectionId::MAX {
            state
                .create_connection("ada".into(), "chemistry".into())
                .unwrap();
        }
        assert!(matches!(
            state.create_connection("grace".into(), "chemistry".into()),
            Err(ServerError::TooManyConnections)
        ));

        state.leave(&42);
        assert_eq!(
            state
                .create_connection("grace".into(), "chemistry".into())
                .unwrap(),
            42
        );
    }

    #[test]
    fn it_restores_rooms_from_boards() {
        let state = ServerState::new(vec![Board::new("biology".into())]);
        assert!(state.board("biology").is_ok());
        assert!(state.board("history").is_err());
    }
}
