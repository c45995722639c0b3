use std::io;

use tokio::sync::mpsc::{channel, Sender};
use tokio::sync::oneshot;

use system::chrono::Utc;
use system::{
    Board, BoardChange, BoardMutation, ClientCommand, CommandError, CommandResult, ConnectionId,
    IdentifiableCommand, IdentifiableEvent, LearnerId, MemoryTrackingStore, RoomId, ServerEvent,
    Session, Stroke, Tracker, TrackingCursor, TrackingError, TransitionOutcome,
};

use super::connection::{ConnectionCommand, ConnectionEvent};
use crate::connection_tx_storage::ConnectionTxStorage;
use crate::server_state::{ServerError, ServerState};
use crate::snapshot_file::SnapshotDir;

pub type ServerTx = Sender<ServerCommand>;
pub type QueryTx<T> = oneshot::Sender<Result<T, ServerError>>;

#[derive(Debug)]
pub enum ServerCommand {
    Connection(ConnectionCommand),
    Query(QueryCommand),
}

/// Read-only requests from the HTTP handlers.
#[derive(Debug)]
pub enum QueryCommand {
    Sessions {
        learner_id: LearnerId,
        tx: QueryTx<Vec<Session>>,
    },
    Cursor {
        learner_id: LearnerId,
        tx: QueryTx<TrackingCursor>,
    },
    Strokes {
        room_id: RoomId,
        tx: QueryTx<Vec<Stroke>>,
    },
}

struct Server {
    state: ServerState,
    tracker: Tracker<MemoryTrackingStore>,
    connections: ConnectionTxStorage,
    snapshots: Option<SnapshotDir>,
}

impl Server {
    fn new(
        tracker: Tracker<MemoryTrackingStore>,
        boards: Vec<Board>,
        snapshots: Option<SnapshotDir>,
    ) -> Self {
        Self {
            state: ServerState::new(boards),
            tracker,
            connections: ConnectionTxStorage::new(),
            snapshots,
        }
    }

    async fn handle_command(&mut self, command: ServerCommand) {
        match command {
            ServerCommand::Connection(command) => self.handle_connection_command(command).await,
            ServerCommand::Query(query) => self.handle_query(query),
        }
    }

    async fn handle_connection_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Connect {
                mut tx,
                learner_id,
                room_id,
            } => {
                let connection_id = match self
                    .state
                    .create_connection(learner_id.clone(), room_id.clone())
                {
                    Ok(connection_id) => connection_id,
                    Err(e) => {
                        log::warn!("Refusing connection of {}: {}", learner_id, e);
                        let event = ConnectionEvent::Disconnected { connection_id: 0 };
                        if tx.send(event).await.is_err() {
                            log::debug!("Refused connection was already gone");
                        }
                        return;
                    }
                };
                self.connections.insert(connection_id, tx);
                self.connections
                    .send(&connection_id, ConnectionEvent::Connected { connection_id })
                    .await;

                let init = match self.init_event(connection_id, &learner_id, &room_id) {
                    Ok(init) => init,
                    Err(e) => {
                        log::warn!("Cannot initialize connection {}: {}", connection_id, e);
                        self.disconnect(&connection_id).await;
                        return;
                    }
                };
                self.connections
                    .send(
                        &connection_id,
                        ConnectionEvent::IdentifiableEvent(IdentifiableEvent::BySystem {
                            event: init,
                        }),
                    )
                    .await;

                let room_members = self.state.connection_ids_in_room(&room_id);
                self.broadcast(
                    &room_members,
                    ServerEvent::SomeoneJoined(connection_id),
                    Some(&connection_id),
                )
                .await;
            }
            ConnectionCommand::Disconnect { from } => {
                self.disconnect(&from).await;
            }
            ConnectionCommand::IdentifiableCommand {
                from,
                command:
                    IdentifiableCommand {
                        command_id,
                        command,
                    },
            } => match self.handle_client_command(&from, command).await {
                Ok(result) => {
                    self.connections
                        .send(
                            &from,
                            ConnectionEvent::IdentifiableEvent(IdentifiableEvent::ByMyself {
                                command_id,
                                result,
                            }),
                        )
                        .await
                }
                Err(ServerError::UnknownConnection(_)) => {
                    log::warn!("Disconnecting unregistered connection {}", from);
                    self.disconnect(&from).await;
                }
                Err(e) => {
                    self.connections
                        .send(
                            &from,
                            ConnectionEvent::IdentifiableEvent(IdentifiableEvent::ByMyself {
                                command_id,
                                result: CommandResult::Error(CommandError {
                                    reason: e.to_string(),
                                }),
                            }),
                        )
                        .await;
                }
            },
        }
    }

    fn init_event(
        &self,
        connection_id: ConnectionId,
        learner_id: &str,
        room_id: &str,
    ) -> Result<ServerEvent, ServerError> {
        let board = self.state.board(room_id)?;
        Ok(ServerEvent::Init {
            connection_id,
            cursor: self.tracker.cursor(learner_id)?,
            sessions: self.tracker.sessions(learner_id)?,
            strokes: board.strokes().to_vec(),
            board_version: board.version(),
        })
    }

    async fn handle_client_command(
        &mut self,
        from: &ConnectionId,
        command: ClientCommand,
    ) -> Result<CommandResult, ServerError> {
        let location = self
            .state
            .location(from)
            .cloned()
            .ok_or(ServerError::UnknownConnection(*from))?;

        match command {
            ClientCommand::Tracking(transition) => {
                let rollback = match &self.snapshots {
                    Some(_) => Some(
                        self.tracker
                            .store()
                            .snapshot()
                            .map_err(TrackingError::from)?,
                    ),
                    None => None,
                };
                match self
                    .tracker
                    .apply(&location.learner_id, transition, Utc::now())?
                {
                    TransitionOutcome::Applied { cursor, session } => {
                        if let Err(e) = self.persist_tracking().await {
                            log::error!(
                                "Cannot persist {:?} of {}: {}",
                                transition,
                                location.learner_id,
                                e
                            );
                            if let Some(rollback) = rollback {
                                self.tracker
                                    .store_mut()
                                    .restore(&rollback)
                                    .map_err(TrackingError::from)?;
                            }
                            return Err(ServerError::Persist(e));
                        }
                        let tabs = self.state.connection_ids_of_learner(&location.learner_id);
                        self.broadcast(
                            &tabs,
                            ServerEvent::TrackingChanged {
                                cursor: cursor.clone(),
                                session: session.clone(),
                            },
                            Some(from),
                        )
                        .await;
                        Ok(CommandResult::TransitionApplied { cursor, session })
                    }
                    TransitionOutcome::Ignored { cursor } => {
                        log::debug!("{:?} ignored for {}", transition, location.learner_id);
                        Ok(CommandResult::TransitionIgnored { cursor })
                    }
                }
            }
            ClientCommand::CommitStroke(stroke) => {
                let stroke_id = stroke.id;
                let board = self.state.board_mut(&location.room_id)?;
                let rollback = self.snapshots.as_ref().map(|_| board.clone());
                match board.apply(BoardMutation::AddStroke(stroke)) {
                    Ok(change) => {
                        let version = change.version();
                        self.publish_board_change(&location.room_id, change, from, rollback)
                            .await?;
                        Ok(CommandResult::StrokeAck { stroke_id, version })
                    }
                    Err(reason) => {
                        log::warn!("Stroke {} rejected: {}", stroke_id, reason);
                        Ok(CommandResult::StrokeNack { stroke_id, reason })
                    }
                }
            }
            ClientCommand::ClearBoard => {
                let board = self.state.board_mut(&location.room_id)?;
                let rollback = self.snapshots.as_ref().map(|_| board.clone());
                let change = board.apply(BoardMutation::Clear)?;
                let version = change.version();
                self.publish_board_change(&location.room_id, change, from, rollback)
                    .await?;
                Ok(CommandResult::BoardCleared { version })
            }
        }
    }

    fn handle_query(&mut self, query: QueryCommand) {
        match query {
            QueryCommand::Sessions { learner_id, tx } => reply(
                tx,
                self.tracker.sessions(&learner_id).map_err(ServerError::from),
            ),
            QueryCommand::Cursor { learner_id, tx } => reply(
                tx,
                self.tracker.cursor(&learner_id).map_err(ServerError::from),
            ),
            QueryCommand::Strokes { room_id, tx } => reply(
                tx,
                self.state
                    .board(&room_id)
                    .map(|board| board.strokes().to_vec()),
            ),
        }
    }

    /// Persists the board first; on failure `rollback` is put back and
    /// nobody hears about the change.
    async fn publish_board_change(
        &mut self,
        room_id: &RoomId,
        change: BoardChange,
        from: &ConnectionId,
        rollback: Option<Board>,
    ) -> Result<(), ServerError> {
        if let Err(e) = self.persist_board(room_id).await {
            log::error!("Cannot persist board {}: {}", room_id, e);
            if let Some(rollback) = rollback {
                *self.state.board_mut(room_id)? = rollback;
            }
            return Err(ServerError::Persist(e));
        }
        let event = match change {
            BoardChange::StrokeAdded { version, stroke } => {
                ServerEvent::StrokeAdded { version, stroke }
            }
            BoardChange::Cleared { version } => ServerEvent::BoardCleared { version },
        };
        let room_members = self.state.connection_ids_in_room(room_id);
        self.broadcast(&room_members, event, Some(from)).await;
        Ok(())
    }

    async fn broadcast(
        &mut self,
        connection_ids: &[ConnectionId],
        event: ServerEvent,
        without: Option<&ConnectionId>,
    ) {
        for connection_id in connection_ids {
            if without != Some(connection_id) {
                let event = ConnectionEvent::IdentifiableEvent(IdentifiableEvent::BySystem {
                    event: event.clone(),
                });
                self.connections.send(connection_id, event).await;
            }
        }
    }

    async fn persist_tracking(&mut self) -> io::Result<()> {
        let dir = match &self.snapshots {
            Some(dir) => dir.clone(),
            None => return Ok(()),
        };
        let snapshot = self
            .tracker
            .store()
            .snapshot()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        dir.write_tracking(&snapshot).await
    }

    async fn persist_board(&mut self, room_id: &RoomId) -> io::Result<()> {
        let dir = match &self.snapshots {
            Some(dir) => dir.clone(),
            None => return Ok(()),
        };
        let snapshot = self
            .state
            .board(room_id)
            .map_err(|e| io::Error::new(io::ErrorKind::NotFound, e.to_string()))?
            .snapshot()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        dir.write_board(room_id, &snapshot).await
    }

    async fn disconnect(&mut self, connection_id: &ConnectionId) {
        if let Some(location) = self.state.leave(connection_id) {
            let room_members = self.state.connection_ids_in_room(&location.room_id);
            self.broadcast(&room_members, ServerEvent::SomeoneLeft(*connection_id), None)
                .await;
        }
        if let Some(mut tx) = self.connections.remove(connection_id) {
            let event = ConnectionEvent::Disconnected {
                connection_id: *connection_id,
            };
            if tx.send(event).await.is_err() {
                log::debug!("Connection {} was already gone", connection_id);
            }
        }
    }
}

fn reply<T>(tx: QueryTx<T>, result: Result<T, ServerError>) {
    if tx.send(result).is_err() {
        log::debug!("Query requester went away");
    }
}

pub fn spawn_server(
    tracker: Tracker<MemoryTrackingStore>,
    boards: Vec<Board>,
    snapshots: Option<SnapshotDir>,
) -> ServerTx {
    let (srv_tx, mut srv_rx) = channel::<ServerCommand>(16);

    tokio::spawn(async move {
        let mut server = Box::new(Server::new(tracker, boards, snapshots));

        while let Some(command) = srv_rx.recv().await {
            server.handle_command(command).await;
        }
        log::info!("Server loop terminated");
    });

    srv_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use system::{
        BoardError, Color, LogicalPoint, Tool, TrackerConfig, TrackingStatus, TrackingStore,
        Transition,
    };
    use tokio::sync::mpsc::Receiver;

    fn new_server() -> ServerTx {
        server_writing_to(None)
    }

    fn server_writing_to(snapshots: Option<SnapshotDir>) -> ServerTx {
        spawn_server(
            Tracker::new(MemoryTrackingStore::new(), TrackerConfig::default()),
            vec![],
            snapshots,
        )
    }

    async fn query<T>(
        srv_tx: &mut ServerTx,
        make_query: impl FnOnce(QueryTx<T>) -> QueryCommand,
    ) -> Result<T, ServerError> {
        let (tx, rx) = oneshot::channel();
        srv_tx
            .send(ServerCommand::Query(make_query(tx)))
            .await
            .unwrap();
        rx.await.unwrap()
    }

    async fn connect(
        srv_tx: &mut ServerTx,
        learner_id: &str,
        room_id: &str,
    ) -> (ConnectionId, Receiver<ConnectionEvent>) {
        let (tx, mut rx) = channel(32);
        srv_tx
            .send(ServerCommand::Connection(ConnectionCommand::Connect {
                tx,
                learner_id: learner_id.into(),
                room_id: room_id.into(),
            }))
            .await
            .unwrap();
        let connection_id = match rx.recv().await {
            Some(ConnectionEvent::Connected { connection_id }) => connection_id,
            other => panic!("expected Connected, got {:?}", other),
        };
        assert_matches!(
            rx.recv().await,
            Some(ConnectionEvent::IdentifiableEvent(IdentifiableEvent::BySystem {
                event: ServerEvent::Init { .. }
            }))
        );
        (connection_id, rx)
    }

    async fn send_command(
        srv_tx: &mut ServerTx,
        from: ConnectionId,
        command_id: u16,
        command: ClientCommand,
    ) {
        srv_tx
            .send(ServerCommand::Connection(
                ConnectionCommand::IdentifiableCommand {
                    from,
                    command: IdentifiableCommand {
                        command_id,
                        command,
                    },
                },
            ))
            .await
            .unwrap();
    }

    async fn next_result(rx: &mut Receiver<ConnectionEvent>) -> (u16, CommandResult) {
        match rx.recv().await {
            Some(ConnectionEvent::IdentifiableEvent(IdentifiableEvent::ByMyself {
                command_id,
                result,
            })) => (command_id, result),
            other => panic!("expected a command result, got {:?}", other),
        }
    }

    /// Skips broadcasts until the reply to one of our own commands arrives.
    async fn next_result_skipping_events(rx: &mut Receiver<ConnectionEvent>) -> CommandResult {
        loop {
            match rx.recv().await {
                Some(ConnectionEvent::IdentifiableEvent(IdentifiableEvent::ByMyself {
                    result,
                    ..
                })) => return result,
                Some(ConnectionEvent::IdentifiableEvent(IdentifiableEvent::BySystem { .. })) => {}
                other => panic!("expected a command result, got {:?}", other),
            }
        }
    }

    async fn next_system_event(rx: &mut Receiver<ConnectionEvent>) -> ServerEvent {
        match rx.recv().await {
            Some(ConnectionEvent::IdentifiableEvent(IdentifiableEvent::BySystem { event })) => {
                event
            }
            other => panic!("expected a system event, got {:?}", other),
        }
    }

    fn stroke() -> Stroke {
        Stroke {
            id: system::uuid::Uuid::new_v4(),
            points: vec![LogicalPoint::new(1.0, 1.0), LogicalPoint::new(5.0, 5.0)],
            color: Color::BLACK,
            stroke_width: 2.0,
            tool: Tool::Pen,
        }
    }

    #[tokio::test]
    async fn it_tells_other_tabs_of_the_learner() {
        let mut srv_tx = new_server();
        let (tab_a, mut rx_a) = connect(&mut srv_tx, "ada", "chemistry").await;
        let (_tab_b, mut rx_b) = connect(&mut srv_tx, "ada", "physics").await;

        send_command(&mut srv_tx, tab_a, 1, ClientCommand::Tracking(Transition::ClockIn)).await;

        let (command_id, result) = next_result(&mut rx_a).await;
        assert_eq!(command_id, 1);
        assert_matches!(
            result,
            CommandResult::TransitionApplied { ref cursor, .. }
                if cursor.status == TrackingStatus::ClockedIn
        );
        assert_matches!(
            next_system_event(&mut rx_b).await,
            ServerEvent::TrackingChanged { ref cursor, ref session }
                if cursor.status == TrackingStatus::ClockedIn && session.is_open()
        );
    }

    #[tokio::test]
    async fn it_reports_ignored_transition() {
        let mut srv_tx = new_server();
        let (tab, mut rx) = connect(&mut srv_tx, "ada", "chemistry").await;

        send_command(&mut srv_tx, tab, 3, ClientCommand::Tracking(Transition::EndBreak)).await;

        assert_matches!(
            next_result(&mut rx).await,
            (3, CommandResult::TransitionIgnored { ref cursor })
                if cursor.status == TrackingStatus::ClockedOut
        );
    }

    #[tokio::test]
    async fn it_shares_strokes_within_the_room() {
        let mut srv_tx = new_server();
        let (ada, mut rx_ada) = connect(&mut srv_tx, "ada", "algebra").await;
        let (grace, mut rx_grace) = connect(&mut srv_tx, "grace", "algebra").await;
        assert_matches!(
            next_system_event(&mut rx_ada).await,
            ServerEvent::SomeoneJoined(id) if id == grace
        );

        let s = stroke();
        send_command(&mut srv_tx, ada, 1, ClientCommand::CommitStroke(s.clone())).await;
        assert_matches!(
            next_result(&mut rx_ada).await,
            (1, CommandResult::StrokeAck { stroke_id, version: 1 }) if stroke_id == s.id
        );
        assert_matches!(
            next_system_event(&mut rx_grace).await,
            ServerEvent::StrokeAdded { version: 1, ref stroke } if *stroke == s
        );

        send_command(&mut srv_tx, ada, 2, ClientCommand::CommitStroke(s.clone())).await;
        assert_matches!(
            next_result(&mut rx_ada).await,
            (2, CommandResult::StrokeNack { reason: BoardError::DuplicateStroke(_), .. })
        );

        let (tx, rx) = oneshot::channel();
        srv_tx
            .send(ServerCommand::Query(QueryCommand::Strokes {
                room_id: "algebra".into(),
                tx,
            }))
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), vec![s]);
    }

    #[tokio::test]
    async fn it_answers_history_queries() {
        let mut srv_tx = new_server();
        let (tab, mut rx) = connect(&mut srv_tx, "ada", "chemistry").await;
        send_command(&mut srv_tx, tab, 1, ClientCommand::Tracking(Transition::ClockIn)).await;
        next_result(&mut rx).await;

        let (tx, sessions) = oneshot::channel();
        srv_tx
            .send(ServerCommand::Query(QueryCommand::Sessions {
                learner_id: "ada".into(),
                tx,
            }))
            .await
            .unwrap();
        assert_eq!(sessions.await.unwrap().unwrap().len(), 1);

        let (tx, cursor) = oneshot::channel();
        srv_tx
            .send(ServerCommand::Query(QueryCommand::Cursor {
                learner_id: " ".into(),
                tx,
            }))
            .await
            .unwrap();
        assert_matches!(cursor.await.unwrap(), Err(ServerError::Tracking(_)));
    }

    #[tokio::test]
    async fn it_announces_leaving_connection() {
        let mut srv_tx = new_server();
        let (_ada, mut rx_ada) = connect(&mut srv_tx, "ada", "algebra").await;
        let (grace, mut rx_grace) = connect(&mut srv_tx, "grace", "algebra").await;
        next_system_event(&mut rx_ada).await;

        srv_tx
            .send(ServerCommand::Connection(ConnectionCommand::Disconnect {
                from: grace,
            }))
            .await
            .unwrap();

        assert_matches!(
            next_system_event(&mut rx_ada).await,
            ServerEvent::SomeoneLeft(id) if id == grace
        );
        assert_matches!(
            rx_grace.recv().await,
            Some(ConnectionEvent::Disconnected { connection_id }) if connection_id == grace
        );
    }

    #[tokio::test]
    async fn it_lets_only_one_of_racing_tabs_clock_in() {
        let mut srv_tx = new_server();
        let (tab_a, mut rx_a) = connect(&mut srv_tx, "ada", "chemistry").await;
        let (tab_b, mut rx_b) = connect(&mut srv_tx, "ada", "physics").await;

        send_command(&mut srv_tx, tab_a, 1, ClientCommand::Tracking(Transition::ClockIn)).await;
        send_command(&mut srv_tx, tab_b, 1, ClientCommand::Tracking(Transition::ClockIn)).await;

        let results = vec![
            next_result_skipping_events(&mut rx_a).await,
            next_result_skipping_events(&mut rx_b).await,
        ];
        let applied = results
            .iter()
            .filter(|r| matches!(r, CommandResult::TransitionApplied { .. }))
            .count();
        let ignored = results
            .iter()
            .filter(|r| matches!(r, CommandResult::TransitionIgnored { .. }))
            .count();
        assert_eq!((applied, ignored), (1, 1));

        let sessions = query(&mut srv_tx, |tx| QueryCommand::Sessions {
            learner_id: "ada".into(),
            tx,
        })
        .await
        .unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].is_open());
    }

    #[tokio::test]
    async fn it_writes_snapshots_that_load_back() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = SnapshotDir::new(tmp.path().to_path_buf());
        let mut srv_tx = server_writing_to(Some(dir.clone()));
        let (tab, mut rx) = connect(&mut srv_tx, "ada", "algebra").await;

        send_command(&mut srv_tx, tab, 1, ClientCommand::Tracking(Transition::ClockIn)).await;
        assert_matches!(
            next_result(&mut rx).await,
            (1, CommandResult::TransitionApplied { .. })
        );
        let s = stroke();
        send_command(&mut srv_tx, tab, 2, ClientCommand::CommitStroke(s.clone())).await;
        assert_matches!(next_result(&mut rx).await, (2, CommandResult::StrokeAck { .. }));

        let (store, boards) = dir.load().await.unwrap();
        let cursor = store.load("ada").unwrap().unwrap();
        assert_eq!(cursor.status, TrackingStatus::ClockedIn);
        assert_eq!(store.sessions("ada").unwrap().len(), 1);
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].room_id(), "algebra");
        assert_eq!(boards[0].strokes(), &[s][..]);
    }

    #[tokio::test]
    async fn it_reports_failed_snapshot_and_keeps_confirmed_state() {
        // A data dir below a regular file can never be created.
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut srv_tx = server_writing_to(Some(SnapshotDir::new(file.path().join("data"))));
        let (tab, mut rx) = connect(&mut srv_tx, "ada", "algebra").await;

        send_command(&mut srv_tx, tab, 1, ClientCommand::Tracking(Transition::ClockIn)).await;
        assert_matches!(next_result(&mut rx).await, (1, CommandResult::Error(_)));
        send_command(&mut srv_tx, tab, 2, ClientCommand::CommitStroke(stroke())).await;
        assert_matches!(next_result(&mut rx).await, (2, CommandResult::Error(_)));
        send_command(&mut srv_tx, tab, 3, ClientCommand::ClearBoard).await;
        assert_matches!(next_result(&mut rx).await, (3, CommandResult::Error(_)));

        let cursor = query(&mut srv_tx, |tx| QueryCommand::Cursor {
            learner_id: "ada".into(),
            tx,
        })
        .await
        .unwrap();
        assert_eq!(cursor, TrackingCursor::default());
        let strokes = query(&mut srv_tx, |tx| QueryCommand::Strokes {
            room_id: "algebra".into(),
            tx,
        })
        .await
        .unwrap();
        assert!(strokes.is_empty());

        // Still clocked out, so the retry is attempted again rather than ignored.
        send_command(&mut srv_tx, tab, 4, ClientCommand::Tracking(Transition::ClockIn)).await;
        assert_matches!(next_result(&mut rx).await, (4, CommandResult::Error(_)));
    }
}
