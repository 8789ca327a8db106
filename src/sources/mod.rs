pub mod ytdlp;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::Child;
use url::Url;

use crate::audio::Track;

pub use ytdlp::YtDlp;

/// Turns user queries and playlist links into tracks.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resolves a URL, or a free-text search when `query` is not a URL.
    async fn resolve_one(&self, query: &str) -> Option<Track>;

    /// Resolves every entry of a playlist. Non-URL input yields `None` immediately.
    async fn resolve_playlist(&self, url: &str) -> Option<Vec<Track>>;
}

/// Raw PCM produced by a transcoder, plus the process producing it (if any).
pub struct TranscodedStream {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub process: Option<Child>,
}

impl TranscodedStream {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            process: None,
        }
    }

    pub fn with_process(mut self, process: Child) -> Self {
        self.process = Some(process);
        self
    }
}

/// The two external legs of a decode pipeline.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Returns a time-limited locator for the track's audio stream.
    async fn locate(&self, source_url: &str) -> Result<String>;

    /// Starts transcoding `locator` from `offset_ms` into 48kHz stereo s16le PCM.
    async fn transcode(&self, locator: &str, offset_ms: u64) -> Result<TranscodedStream>;
}

/// True when `input` parses as a URL at all.
pub fn is_url(input: &str) -> bool {
    Url::parse(input.trim()).is_ok()
}

/// True when `input` is something ffmpeg can fetch over the network.
pub fn is_network_locator(input: &str) -> bool {
    Url::parse(input.trim())
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}
