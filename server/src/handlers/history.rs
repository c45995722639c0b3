use crate::server::{QueryCommand, QueryTx, ServerCommand, ServerTx};
use crate::server_state::ServerError;
use actix_web::error;
use actix_web::web::{self, HttpResponse};
use actix_web::Responder;
use actix_web::Result;
use system::{LearnerId, RoomId, TrackingError};

pub fn configure_history_handlers(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/learners/{learner_id}")
            .service(web::resource("/sessions").route(web::get().to(list_sessions)))
            .service(web::resource("/cursor").route(web::get().to(show_cursor))),
    )
    .service(web::resource("/rooms/{room_id}/strokes").route(web::get().to(list_strokes)));
}

pub async fn list_sessions(
    path: web::Path<LearnerId>,
    srv_tx: web::Data<ServerTx>,
) -> Result<impl Responder> {
    let learner_id = path.into_inner();
    let sessions = query(srv_tx.get_ref(), |tx| QueryCommand::Sessions { learner_id, tx }).await?;
    Ok(HttpResponse::Ok().json(sessions))
}

pub async fn show_cursor(
    path: web::Path<LearnerId>,
    srv_tx: web::Data<ServerTx>,
) -> Result<impl Responder> {
    let learner_id = path.into_inner();
    let cursor = query(srv_tx.get_ref(), |tx| QueryCommand::Cursor { learner_id, tx }).await?;
    Ok(HttpResponse::Ok().json(cursor))
}

pub async fn list_strokes(
    path: web::Path<RoomId>,
    srv_tx: web::Data<ServerTx>,
) -> Result<impl Responder> {
    let room_id = path.into_inner();
    let strokes = query(srv_tx.get_ref(), |tx| QueryCommand::Strokes { room_id, tx }).await?;
    Ok(HttpResponse::Ok().json(strokes))
}

async fn query<T>(
    srv_tx: &ServerTx,
    make_query: impl FnOnce(QueryTx<T>) -> QueryCommand,
) -> Result<T> {
    let (tx, rx) = tokio::sync::oneshot::channel::<std::result::Result<T, ServerError>>();

    srv_tx
        .clone()
        .send(ServerCommand::Query(make_query(tx)))
        .await
        .map_err(|_| error::ErrorInternalServerError("Internal Server Error"))?;

    let result = rx
        .await
        .map_err(|_| error::ErrorInternalServerError("Receiver await error"))?;
    result.map_err(to_http_error)
}

fn to_http_error(e: ServerError) -> actix_web::Error {
    match e {
        ServerError::UnknownRoom(room_id) => {
            error::ErrorNotFound(format!("room {} does not exist", room_id))
        }
        ServerError::Tracking(TrackingError::EmptyLearnerId) => {
            error::ErrorBadRequest("learner id must not be empty")
        }
        e => {
            log::error!("History query failed: {}", e);
            error::ErrorInternalServerError(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use system::StoreError;

    fn status_of(e: ServerError) -> StatusCode {
        to_http_error(e).as_response_error().status_code()
    }

    #[test]
    fn it_maps_query_errors_to_status_codes() {
        assert_eq!(
            status_of(ServerError::UnknownRoom("nowhere".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ServerError::Tracking(TrackingError::EmptyLearnerId)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ServerError::Tracking(TrackingError::Store(
                StoreError::EmptyTransaction(system::uuid::Uuid::nil())
            ))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
