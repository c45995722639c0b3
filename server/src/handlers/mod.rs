use crate::connection::ws_index;
use crate::handlers::history::configure_history_handlers;
use actix_web::web;

mod history;

pub fn root(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/ws/{learner_id}/{room_id}").route(web::get().to(ws_index)));

    configure_history_handlers(cfg);
}
