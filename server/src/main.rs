use actix_cors::Cors;
use actix_web::{App, HttpServer};
use clap::Parser;

use server::config::{Cli, Config};
use server::handlers;
use server::server::spawn_server;
use server::snapshot_file::SnapshotDir;
use system::{MemoryTrackingStore, Tracker};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::load(&cli)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

    let snapshots = config.data_dir.clone().map(SnapshotDir::new);
    let (store, boards) = match &snapshots {
        Some(dir) => dir.load().await?,
        None => {
            log::info!("No data directory given; state is kept in memory only");
            (MemoryTrackingStore::new(), vec![])
        }
    };

    let srv_tx = spawn_server(Tracker::new(store, config.tracker), boards, snapshots);

    log::info!("Listening on {}", config.bind);
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();
        App::new()
            .wrap(cors)
            .data(srv_tx.clone())
            .configure(handlers::root)
    })
    .bind(&config.bind)?
    .run()
    .await
}
