use bytes::BytesMut;
use serenity::model::id::GuildId;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::VoiceConnection;
use super::{AudioFrame, Track, FRAME_BYTES, FRAME_DURATION_MS};
use crate::sources::{is_network_locator, MediaBackend, TranscodedStream};

/// How a pipeline run ended, or that it got going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The stream was located and the transcoder is producing audio.
    Started,
    /// The transcoder ran out of audio or exited.
    Finished,
    /// Locating or transcoding failed before any audio was produced.
    Failed(String),
    /// The voice connection stopped accepting frames.
    SinkClosed,
}

/// A signal from the pipeline run identified by `generation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineEvent {
    pub generation: u64,
    pub outcome: PipelineOutcome,
}

/// One playback attempt: locate, transcode and frame a single track.
///
/// Position starts at the requested offset and advances by
/// [`FRAME_DURATION_MS`] for every frame the voice connection accepts.
/// A pipeline that is stopped never reports anything afterwards.
pub struct DecodePipeline {
    generation: u64,
    position_ms: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DecodePipeline {
    pub fn start<F>(
        guild_id: GuildId,
        generation: u64,
        track: &Track,
        offset_ms: u64,
        backend: Arc<dyn MediaBackend>,
        sink: Arc<dyn VoiceConnection>,
        notify: F,
    ) -> Self
    where
        F: Fn(PipelineEvent) + Send + Sync + 'static,
    {
        let position_ms = Arc::new(AtomicU64::new(offset_ms));
        let cancel = CancellationToken::new();

        let run = PipelineRun {
            guild_id,
            source_url: track.source_url().to_string(),
            offset_ms,
            backend,
            sink,
            position_ms: position_ms.clone(),
            cancel: cancel.clone(),
        };

        let task = tokio::spawn(async move {
            let outcome = run
                .execute(|| {
                    notify(PipelineEvent {
                        generation,
                        outcome: PipelineOutcome::Started,
                    })
                })
                .await;
            if let Some(outcome) = outcome {
                notify(PipelineEvent {
                    generation,
                    outcome,
                });
            }
        });

        Self {
            generation,
            position_ms,
            cancel,
            task: Some(task),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn position_ms(&self) -> u64 {
        self.position_ms.load(Ordering::Acquire)
    }

    /// Kills both external legs and waits for the run to wind down.
    /// Safe to call on a pipeline that already finished, and more than once.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct PipelineRun {
    guild_id: GuildId,
    source_url: String,
    offset_ms: u64,
    backend: Arc<dyn MediaBackend>,
    sink: Arc<dyn VoiceConnection>,
    position_ms: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl PipelineRun {
    /// Returns `None` when the run was cancelled.
    async fn execute(self, on_started: impl FnOnce()) -> Option<PipelineOutcome> {
        let located = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            located = self.backend.locate(&self.source_url) => located,
        };

        let locator = match located {
            Ok(locator) if is_network_locator(&locator) => locator,
            Ok(_) => {
                warn!(
                    "⚠️ URL de stream inválida en guild {} para {}",
                    self.guild_id, self.source_url
                );
                return Some(PipelineOutcome::Failed("invalid stream locator".into()));
            }
            Err(e) => {
                warn!(
                    "❌ No se pudo localizar el stream en guild {} para {}: {:?}",
                    self.guild_id, self.source_url, e
                );
                return Some(PipelineOutcome::Failed(e.to_string()));
            }
        };

        let transcoded = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            transcoded = self.backend.transcode(&locator, self.offset_ms) => transcoded,
        };

        let mut stream = match transcoded {
            Ok(stream) => stream,
            Err(e) => {
                warn!("❌ Error iniciando transcodificación en guild {}: {:?}", self.guild_id, e);
                return Some(PipelineOutcome::Failed(e.to_string()));
            }
        };

        info!(
            "🎵 Pipeline iniciado en guild {} desde {}ms",
            self.guild_id, self.offset_ms
        );
        on_started();

        let outcome = self.pump(&mut stream).await;
        if let Some(mut process) = stream.process.take() {
            // kill() also waits, so the process is reaped here.
            let _ = process.kill().await;
        }
        outcome
    }

    async fn pump(&self, stream: &mut TranscodedStream) -> Option<PipelineOutcome> {
        loop {
            let mut pcm = BytesMut::zeroed(FRAME_BYTES);
            let read = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                read = stream.reader.read_exact(&mut pcm[..]) => read,
            };

            if let Err(e) = read {
                if e.kind() != ErrorKind::UnexpectedEof {
                    warn!("⚠️ Error leyendo audio en guild {}: {}", self.guild_id, e);
                }
                debug!(
                    "⏹️ Stream terminado en guild {} en {}ms",
                    self.guild_id,
                    self.position_ms.load(Ordering::Acquire)
                );
                return Some(PipelineOutcome::Finished);
            }

            let frame = AudioFrame::new(pcm.freeze());
            let sent = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                sent = self.sink.send_frame(frame) => sent,
            };

            if let Err(e) = sent {
                warn!("🔌 La conexión de voz rechazó audio en guild {}: {:?}", self.guild_id, e);
                return Some(PipelineOutcome::SinkClosed);
            }

            self.position_ms
                .fetch_add(FRAME_DURATION_MS, Ordering::AcqRel);
        }
    }
}
