use anyhow::Context;
use std::{env, path::PathBuf};

use crate::DEFAULT_PORT;

/// Server configuration, read once from the environment at startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: String,
    pub storage_url: String,
    /// Optional override for the audio processor binary
    pub ffmpeg_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = env::var("JAMIN_SERVER_PORT")
            .ok()
            .map(|x| x.parse::<u16>())
            .transpose()
            .context("JAMIN_SERVER_PORT must be a number")?
            .unwrap_or(DEFAULT_PORT);

        let database_url =
            env::var("JAMIN_DATABASE_URL").context("JAMIN_DATABASE_URL must be set")?;

        let storage_url = env::var("JAMIN_STORAGE_URL").context("JAMIN_STORAGE_URL must be set")?;

        let ffmpeg_path = env::var("JAMIN_FFMPEG_PATH").ok().map(PathBuf::from);

        Ok(Self {
            port,
            database_url,
            storage_url,
            ffmpeg_path,
        })
    }
}
