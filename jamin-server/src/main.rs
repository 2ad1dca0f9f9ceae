use std::sync::Arc;

use anyhow::Context;
use jamin_collab::{Collab, CollabEvent, HttpStorage, MixerConfig, PgDatabase};
use jamin_server::{
    config::ServerConfig, logging, run_server, JaminCollab, ServerContext,
};
use log::debug;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logger();

    let config = ServerConfig::from_env()?;

    let database = PgDatabase::new(&config.database_url)
        .await
        .context("failed to connect to the database")?;

    let storage =
        HttpStorage::new(&config.storage_url).context("JAMIN_STORAGE_URL is not a valid URL")?;

    let mixer_config = MixerConfig::new(config.ffmpeg_path.clone());

    let collab = Arc::new(Collab::new(database, storage, mixer_config));

    spawn_event_drain(collab.clone());

    run_server(config.port, ServerContext { collab }).await
}

/// Keeps the collab event channel drained, dropping cached collaboration
/// views whenever the underlying layers change.
fn spawn_event_drain(collab: Arc<JaminCollab>) {
    let events = collab.events();

    tokio::task::spawn_blocking(move || {
        while let Ok(event) = events.recv() {
            debug!("Collab event: {event:?}");

            match event {
                CollabEvent::ThemeCreated { .. }
                | CollabEvent::LayerCreated { .. }
                | CollabEvent::ThemeDeleted { .. } => collab.collaborations.invalidate(),
            }
        }
    });
}
