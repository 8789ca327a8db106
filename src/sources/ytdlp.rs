use anyhow::{Context as _, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{is_network_locator, is_url, MediaBackend, TrackResolver, TranscodedStream};
use crate::audio::{Track, CHANNEL_COUNT, SAMPLE_RATE};
use crate::config::Config;

/// Fields printed by yt-dlp for every resolved entry, one per line.
const PRINT_FIELDS: [&str; 6] = [
    "webpage_url",
    "title",
    "channel",
    "channel_url",
    "duration",
    "thumbnail",
];

/// yt-dlp + ffmpeg backed resolver and media backend.
#[derive(Debug, Clone)]
pub struct YtDlp {
    ytdlp_path: String,
    ffmpeg_path: String,
    user_agent: String,
    thumbnail_fallback: String,
}

impl YtDlp {
    pub fn new(config: &Config) -> Self {
        Self {
            ytdlp_path: config.ytdlp_path.clone(),
            ffmpeg_path: config.ffmpeg_path.clone(),
            user_agent: config.user_agent.clone(),
            thumbnail_fallback: config.thumbnail_fallback.clone(),
        }
    }

    fn print_args(&self) -> Vec<&'static str> {
        PRINT_FIELDS
            .iter()
            .flat_map(|field| ["--print", *field])
            .collect()
    }

    /// Runs yt-dlp to completion and returns its stdout.
    async fn run_ytdlp(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.ytdlp_path)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.ytdlp_path))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!("yt-dlp stderr ({}): {}", output.status, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Groups yt-dlp's per-line output into tracks, six lines per entry.
///
/// Trailing partial groups are dropped. Durations that do not parse (live
/// streams print `NA`) become 0 and invalid thumbnails fall back to
/// `thumbnail_fallback`.
pub fn parse_tracks(raw: &str, thumbnail_fallback: &str) -> Vec<Track> {
    let lines: Vec<&str> = raw.trim().lines().map(str::trim).collect();

    lines
        .chunks_exact(PRINT_FIELDS.len())
        .filter(|entry| !entry[0].is_empty() && entry[0] != "NA")
        .map(|entry| {
            let author_url = match entry[3] {
                "" | "NA" => None,
                url => Some(url.to_string()),
            };
            let length = entry[4]
                .parse::<f64>()
                .ok()
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .map(|secs| secs.round() as u64)
                .unwrap_or(0);
            let thumbnail = if is_network_locator(entry[5]) {
                entry[5]
            } else {
                thumbnail_fallback
            };

            Track::new(entry[1], entry[0])
                .with_author(entry[2])
                .with_author_url(author_url)
                .with_length(length)
                .with_thumbnail(thumbnail)
        })
        .collect()
}

#[async_trait]
impl TrackResolver for YtDlp {
    async fn resolve_one(&self, query: &str) -> Option<Track> {
        let query = if is_url(query) {
            query.trim().to_string()
        } else {
            format!("ytsearch1:{}", query.trim())
        };
        info!("🔍 Resolviendo track: {}", query);

        let mut args: Vec<&str> = self.print_args();
        args.extend(["--no-playlist", "--flat-playlist", "-f", "ba"]);
        args.push(&query);

        match self.run_ytdlp(&args).await {
            Ok(raw) => parse_tracks(&raw, &self.thumbnail_fallback).into_iter().next(),
            Err(e) => {
                warn!("❌ yt-dlp falló resolviendo {}: {:?}", query, e);
                None
            }
        }
    }

    async fn resolve_playlist(&self, url: &str) -> Option<Vec<Track>> {
        if !is_url(url) {
            return None;
        }
        info!("📃 Resolviendo playlist: {}", url);

        let mut args: Vec<&str> = self.print_args();
        args.extend(["--yes-playlist", "--flat-playlist"]);
        args.push(url.trim());

        match self.run_ytdlp(&args).await {
            Ok(raw) => {
                let tracks = parse_tracks(&raw, &self.thumbnail_fallback);
                (!tracks.is_empty()).then_some(tracks)
            }
            Err(e) => {
                warn!("❌ yt-dlp falló resolviendo playlist {}: {:?}", url, e);
                None
            }
        }
    }
}

#[async_trait]
impl MediaBackend for YtDlp {
    async fn locate(&self, source_url: &str) -> Result<String> {
        let raw = self
            .run_ytdlp(&["--print", "url", "-f", "ba", source_url])
            .await?;
        // Formats with separate streams print one locator per line; audio comes first.
        Ok(raw.lines().next().unwrap_or_default().trim().to_string())
    }

    async fn transcode(&self, locator: &str, offset_ms: u64) -> Result<TranscodedStream> {
        let seek = format!("{}ms", offset_ms);
        let rate = SAMPLE_RATE.to_string();
        let channels = CHANNEL_COUNT.to_string();

        let mut child = Command::new(&self.ffmpeg_path)
            .args(["-loglevel", "error", "-vn", "-re"])
            .args(["-ss", &seek])
            .args(["-reconnect", "1", "-multiple_requests", "1"])
            .args(["-user_agent", &self.user_agent])
            .args(["-i", locator])
            .args(["-acodec", "pcm_s16le"])
            .args(["-ar", &rate])
            .args(["-ac", &channels])
            .args(["-f", "s16le", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.ffmpeg_path))?;

        let stdout = child
            .stdout
            .take()
            .context("ffmpeg stdout was not captured")?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("ffmpeg: {}", line);
                }
            });
        }

        Ok(TranscodedStream::new(stdout).with_process(child))
    }
}
