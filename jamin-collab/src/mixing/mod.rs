use log::{error, info};
use reqwest::Client;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;

use crate::{object_key, NormalizedMedia, Storage, StorageError};

/// Install locations probed when no explicit processor path is configured
const KNOWN_LOCATIONS: &[&str] = &[
    "/usr/bin/ffmpeg",
    "/usr/local/bin/ffmpeg",
    "/opt/homebrew/bin/ffmpeg",
    "/snap/bin/ffmpeg",
];

const OUTPUT_NAME: &str = "mix.mp3";
const OUTPUT_MIME: &str = "audio/mpeg";

#[derive(Debug, Error)]
pub enum MixError {
    /// The external audio processor is not installed where expected
    #[error("Audio processor binary unavailable: {0}")]
    BinaryUnavailable(String),
    #[error("Failed to download source recording: {0}")]
    Download(String),
    #[error("Audio processor failed: {0}")]
    Process(String),
    #[error("Audio processor produced no output")]
    EmptyOutput,
    #[error("Failed to store mixed recording: {0}")]
    Upload(StorageError),
    #[error("Mix workspace error: {0}")]
    Io(#[from] std::io::Error),
}

/// Locates the external audio processor. The path is resolved lazily, once
/// per config, and the config is handed to [MixPipeline] explicitly so tests
/// can point it at a stand-in binary.
#[derive(Debug, Default)]
pub struct MixerConfig {
    explicit: Option<PathBuf>,
    resolved: OnceLock<PathBuf>,
}

impl MixerConfig {
    pub fn new(explicit: Option<PathBuf>) -> Self {
        Self {
            explicit,
            resolved: OnceLock::new(),
        }
    }

    /// Returns the processor binary, probing the known install locations on
    /// first use. An explicitly configured path is authoritative and is not
    /// silently substituted when missing.
    pub fn resolve(&self) -> Result<&Path, MixError> {
        if let Some(path) = self.resolved.get() {
            return Ok(path);
        }

        let path = self.locate()?;
        Ok(self.resolved.get_or_init(|| path))
    }

    fn locate(&self) -> Result<PathBuf, MixError> {
        if let Some(explicit) = &self.explicit {
            if explicit.is_file() {
                return Ok(explicit.clone());
            }

            return Err(MixError::BinaryUnavailable(format!(
                "configured path {} doesn't exist",
                explicit.display()
            )));
        }

        for candidate in KNOWN_LOCATIONS {
            let path = Path::new(candidate);

            if path.is_file() {
                return Ok(path.to_path_buf());
            }
        }

        Err(MixError::BinaryUnavailable(format!(
            "not found in any of: {}",
            KNOWN_LOCATIONS.join(", ")
        )))
    }
}

/// Produces a single mixed recording from two source recordings, for
/// collaborations that want a pre-mixed "latest" track instead of separate
/// ones.
///
/// The pipeline never retries, whether a failed mix is fatal is the caller's
/// decision.
pub struct MixPipeline<St> {
    storage: Arc<St>,
    config: MixerConfig,
    client: Client,
    workspace_root: Option<PathBuf>,
}

impl<St> MixPipeline<St>
where
    St: Storage,
{
    pub fn new(storage: &Arc<St>, config: MixerConfig) -> Self {
        Self {
            storage: storage.clone(),
            config,
            client: Client::new(),
            workspace_root: None,
        }
    }

    /// Overrides where the scoped mix workspaces are created
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    /// Downloads both recordings, mixes them with longest-input semantics,
    /// and uploads the result, returning its URL. The temporary workspace is
    /// removed on every exit path.
    pub async fn mix(&self, first_url: &str, second_url: &str) -> Result<String, MixError> {
        let binary = self.config.resolve().map_err(|e| {
            error!("{e}");
            e
        })?;

        let workspace = self.workspace()?;

        let first = self.download(first_url, workspace.path().join("first")).await?;
        let second = self
            .download(second_url, workspace.path().join("second"))
            .await?;

        let output = workspace.path().join(OUTPUT_NAME);
        run_mix(binary, &first, &second, &output).await?;

        let bytes = read_output(&output).await?;
        let media = NormalizedMedia {
            bytes,
            mime: OUTPUT_MIME.to_string(),
            file_name: OUTPUT_NAME.to_string(),
        };

        let key = object_key("mixes", None, OUTPUT_NAME);
        let url = self.storage.upload(&key, &media).await.map_err(|e| {
            error!("Failed to store mixed recording {key}: {e}");
            MixError::Upload(e)
        })?;

        info!("Mixed {first_url} and {second_url} into {url}");

        Ok(url)
    }

    fn workspace(&self) -> Result<TempDir, MixError> {
        let builder_result = match &self.workspace_root {
            Some(root) => tempfile::Builder::new().prefix("jamin-mix").tempdir_in(root),
            None => tempfile::Builder::new().prefix("jamin-mix").tempdir(),
        };

        Ok(builder_result?)
    }

    async fn download(&self, url: &str, target: PathBuf) -> Result<PathBuf, MixError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            error!("Failed to download {url}: {e}");
            MixError::Download(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            error!("Download of {url} failed with {status}");
            return Err(MixError::Download(format!("{url} returned {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| MixError::Download(e.to_string()))?;

        tokio::fs::write(&target, &bytes).await?;

        Ok(target)
    }
}

/// The fixed command line handed to the processor: both inputs are mixed with
/// `duration=longest`, so the output is as long as the longer source, and
/// encoded to mp3.
fn mix_args(first: &Path, second: &Path, output: &Path) -> Vec<OsString> {
    [
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-i".into(),
        first.into(),
        "-i".into(),
        second.into(),
        "-filter_complex".into(),
        "amix=inputs=2:duration=longest".into(),
        "-c:a".into(),
        "libmp3lame".into(),
        output.into(),
    ]
    .to_vec()
}

async fn run_mix(binary: &Path, first: &Path, second: &Path, output: &Path) -> Result<(), MixError> {
    let result = Command::new(binary)
        .args(mix_args(first, second, output))
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| MixError::Process(e.to_string()))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        error!(
            "Audio processor exited with {}: {}",
            result.status,
            stderr.trim()
        );

        return Err(MixError::Process(stderr.trim().to_string()));
    }

    Ok(())
}

/// A missing or zero-byte output means the mix failed, even when the
/// processor exited cleanly
async fn read_output(output: &Path) -> Result<Vec<u8>, MixError> {
    let bytes = tokio::fs::read(output)
        .await
        .map_err(|_| MixError::EmptyOutput)?;

    if bytes.is_empty() {
        error!("Audio processor produced an empty file at {}", output.display());
        return Err(MixError::EmptyOutput);
    }

    Ok(bytes)
}

#[cfg(test)]
mod test {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::{mix_args, read_output, run_mix, MixError, MixPipeline, MixerConfig};
    use crate::MemoryStorage;

    #[test]
    fn missing_explicit_binary_is_reported() {
        let config = MixerConfig::new(Some(PathBuf::from("/nonexistent/ffmpeg")));
        let result = config.resolve();

        let Err(MixError::BinaryUnavailable(message)) = result else {
            panic!("expected a binary resolution error");
        };

        assert!(message.contains("/nonexistent/ffmpeg"));
    }

    #[test]
    fn mix_uses_longest_input_semantics() {
        let args = mix_args(
            Path::new("/tmp/first"),
            Path::new("/tmp/second"),
            Path::new("/tmp/mix.mp3"),
        );

        assert!(args.contains(&"amix=inputs=2:duration=longest".into()));

        let first_position = args.iter().position(|a| a == "/tmp/first").unwrap();
        let second_position = args.iter().position(|a| a == "/tmp/second").unwrap();
        assert!(first_position < second_position);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exits_are_process_errors() {
        let workspace = tempfile::tempdir().unwrap();
        let first = workspace.path().join("first");
        let second = workspace.path().join("second");
        tokio::fs::write(&first, b"a").await.unwrap();
        tokio::fs::write(&second, b"b").await.unwrap();

        let result = run_mix(
            Path::new("/bin/false"),
            &first,
            &second,
            &workspace.path().join("mix.mp3"),
        )
        .await;

        assert!(matches!(result, Err(MixError::Process(_))));
    }

    #[tokio::test]
    async fn missing_or_empty_output_is_rejected() {
        let workspace = tempfile::tempdir().unwrap();

        let missing = workspace.path().join("missing.mp3");
        assert!(matches!(
            read_output(&missing).await,
            Err(MixError::EmptyOutput)
        ));

        let empty = workspace.path().join("empty.mp3");
        tokio::fs::write(&empty, b"").await.unwrap();
        assert!(matches!(
            read_output(&empty).await,
            Err(MixError::EmptyOutput)
        ));
    }

    /// Serves a fixed response to every request on a local port
    async fn serve(status_line: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };

                let mut request = [0u8; 1024];
                let _ = socket.read(&mut request).await;

                let head = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );

                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body).await;
            }
        });

        format!("http://{address}/recording")
    }

    fn file_count(root: &Path) -> usize {
        std::fs::read_dir(root).unwrap().count()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn workspaces_are_removed_when_the_processor_fails() {
        let root = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new());

        let pipeline = MixPipeline::new(
            &storage,
            MixerConfig::new(Some(PathBuf::from("/bin/false"))),
        )
        .with_workspace_root(root.path());

        let url = serve("200 OK", b"not really audio").await;
        let result = pipeline.mix(&url, &url).await;

        assert!(matches!(result, Err(MixError::Process(_))));
        assert_eq!(file_count(root.path()), 0);
        assert!(storage.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_downloads_abort_the_mix_and_clean_up() {
        let root = tempfile::tempdir().unwrap();
        let storage = Arc::new(MemoryStorage::new());

        let pipeline = MixPipeline::new(
            &storage,
            MixerConfig::new(Some(PathBuf::from("/bin/false"))),
        )
        .with_workspace_root(root.path());

        let url = serve("404 Not Found", b"").await;
        let result = pipeline.mix(&url, &url).await;

        assert!(matches!(result, Err(MixError::Download(_))));
        assert_eq!(file_count(root.path()), 0);
    }
}
