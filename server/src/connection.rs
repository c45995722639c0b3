use actix::{Actor, ActorContext, AsyncContext, Handler, Message, Running, StreamHandler};
use actix_web::{error, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;

use system::{
    bincode, CommandError, CommandId, CommandResult, ConnectionId, IdentifiableCommand,
    IdentifiableEvent, LearnerId, RoomId,
};

use crate::connection_tx_storage::ConnectionTx;
use crate::server::{ServerCommand, ServerTx};
use crate::snapshot_file::is_valid_room_id;
use actix_web_actors::ws::{CloseCode, CloseReason};

#[derive(Debug)]
pub enum ConnectionCommand {
    Connect {
        tx: ConnectionTx,
        learner_id: LearnerId,
        room_id: RoomId,
    },
    Disconnect {
        from: ConnectionId,
    },
    IdentifiableCommand {
        from: ConnectionId,
        command: IdentifiableCommand,
    },
}

#[derive(Debug)]
pub enum ConnectionEvent {
    Connected { connection_id: ConnectionId },
    IdentifiableEvent(IdentifiableEvent),
    Disconnected { connection_id: ConnectionId },
}

#[derive(Message)]
#[rtype(result = "()")]
struct ConnectionActorMessage(ConnectionEvent);

/// The server dropped this connection's event sender.
#[derive(Message)]
#[rtype(result = "()")]
struct EventsEnded;

enum ConnectionState {
    Idle,
    Connected(ConnectionId),
}

struct ConnectionActor {
    state: ConnectionState,
    srv_tx: ServerTx,
    learner_id: LearnerId,
    room_id: RoomId,
}

impl ConnectionActor {
    fn send_to_server(&mut self, command: ConnectionCommand) -> bool {
        if self
            .srv_tx
            .try_send(ServerCommand::Connection(command))
            .is_err()
        {
            log::warn!("Server queue is full or closed");
            false
        } else {
            true
        }
    }

    fn release(&mut self) {
        if let ConnectionState::Connected(id) = self.state {
            release_later(&self.srv_tx, id);
            self.state = ConnectionState::Idle;
        }
    }

    fn send_event(&mut self, event: &IdentifiableEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match bincode::serialize(event) {
            Ok(serialized) => ctx.binary(serialized),
            Err(e) => log::error!("Cannot encode event {:?}: {}", event, e),
        }
    }
}

/// Queues `Disconnect` without giving up when the server queue is full, so the
/// server always gets to drop the connection from its room.
pub fn release_later(srv_tx: &ServerTx, from: ConnectionId) {
    let mut srv_tx = srv_tx.clone();
    tokio::spawn(async move {
        let command = ServerCommand::Connection(ConnectionCommand::Disconnect { from });
        if srv_tx.send(command).await.is_err() {
            log::warn!("Server stopped before connection {} was released", from);
        }
    });
}

pub fn rejected(command_id: CommandId, reason: &str) -> IdentifiableEvent {
    IdentifiableEvent::ByMyself {
        command_id,
        result: CommandResult::Error(CommandError {
            reason: reason.to_owned(),
        }),
    }
}

impl Actor for ConnectionActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<ConnectionEvent>(32);

        let connect = ConnectionCommand::Connect {
            tx,
            learner_id: self.learner_id.clone(),
            room_id: self.room_id.clone(),
        };
        if !self.send_to_server(connect) {
            ctx.close(Some(CloseReason {
                code: CloseCode::Again,
                description: None,
            }));
            ctx.stop();
            return;
        }

        let addr = ctx.address();

        tokio::spawn(async move {
            log::debug!("connection green thread - started");
            while let Some(msg) = rx.recv().await {
                if addr.send(ConnectionActorMessage(msg)).await.is_err() {
                    log::debug!("connection actor is gone");
                    break;
                }
            }
            addr.do_send(EventsEnded);
            log::debug!("connection green thread - terminated");
        });
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        self.release();
        Running::Stop
    }
}

/// Ingress
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ConnectionActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Binary(bin)) => {
                log::debug!("Ingress size: {}", bin.len());
                if let ConnectionState::Connected(from) = self.state {
                    if let Ok(command) = bincode::deserialize::<IdentifiableCommand>(&bin) {
                        log::debug!("Ingress {:?}", command);
                        let command_id = command.command_id;
                        let sent = self.send_to_server(ConnectionCommand::IdentifiableCommand {
                            from,
                            command,
                        });
                        if !sent {
                            self.send_event(&rejected(command_id, "server is busy"), ctx);
                        }
                    } else {
                        ctx.close(Some(CloseReason {
                            code: CloseCode::Invalid,
                            description: None,
                        }));
                        ctx.stop();
                    }
                }
            }
            Ok(ws::Message::Close(_)) => {
                self.release();
                ctx.stop();
            }
            Ok(_) => (),
            Err(e) => {
                log::warn!("Websocket protocol error: {}", e);
                ctx.stop();
            }
        }
    }
}

/// Egress
impl Handler<ConnectionActorMessage> for ConnectionActor {
    type Result = ();

    fn handle(
        &mut self,
        msg: ConnectionActorMessage,
        ctx: &mut ws::WebsocketContext<Self>,
    ) -> Self::Result {
        let connection_event = &msg.0;
        log::debug!("Egress {:?}", connection_event);
        match connection_event {
            ConnectionEvent::Connected { connection_id } => {
                self.state = ConnectionState::Connected(*connection_id);
            }
            ConnectionEvent::Disconnected { .. } => {
                self.state = ConnectionState::Idle;
                ctx.close(None);
                ctx.stop();
            }
            ConnectionEvent::IdentifiableEvent(event) => self.send_event(event, ctx),
        }
    }
}

impl Handler<EventsEnded> for ConnectionActor {
    type Result = ();

    fn handle(&mut self, _: EventsEnded, ctx: &mut ws::WebsocketContext<Self>) -> Self::Result {
        // Without the server's sender nothing can reach this socket anymore.
        self.state = ConnectionState::Idle;
        ctx.close(None);
        ctx.stop();
    }
}

pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<(LearnerId, RoomId)>,
    srv_tx: web::Data<ServerTx>,
) -> Result<HttpResponse, Error> {
    let (learner_id, room_id) = path.into_inner();
    if learner_id.trim().is_empty() || !is_valid_room_id(&room_id) {
        return Err(error::ErrorBadRequest("invalid learner or room id"));
    }
    ws::start(
        ConnectionActor {
            srv_tx: srv_tx.get_ref().clone(),
            state: ConnectionState::Idle,
            learner_id,
            room_id,
        },
        &req,
        stream,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::sync::mpsc::channel;

    fn disconnect(from: ConnectionId) -> ServerCommand {
        ServerCommand::Connection(ConnectionCommand::Disconnect { from })
    }

    #[tokio::test]
    async fn it_releases_connection_even_when_queue_is_full() {
        let (mut srv_tx, mut srv_rx) = channel(1);
        srv_tx.try_send(disconnect(1)).unwrap();
        assert!(srv_tx.try_send(disconnect(2)).is_err());

        release_later(&srv_tx, 3);

        assert_matches!(
            srv_rx.recv().await,
            Some(ServerCommand::Connection(ConnectionCommand::Disconnect { from: 1 }))
        );
        assert_matches!(
            srv_rx.recv().await,
            Some(ServerCommand::Connection(ConnectionCommand::Disconnect { from: 3 }))
        );
    }

    #[test]
    fn it_answers_dropped_command_with_error() {
        let frame = bincode::serialize(&rejected(9, "server is busy")).unwrap();
        assert_matches!(
            bincode::deserialize::<IdentifiableEvent>(&frame).unwrap(),
            IdentifiableEvent::ByMyself {
                command_id: 9,
                result: CommandResult::Error(CommandError { ref reason }),
            } if reason == "server is busy"
        );
    }
}
