//! Songbird-backed voice transport.
//!
//! Each connection plays a single endless live input. Decoded frames reach
//! the mixer through a bounded channel and silence fills any gap, so the
//! driver never sees the input end while the connection lives.

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::driver::Bitrate;
use songbird::events::CoreEvent;
use songbird::input::{AudioStream, Input, LiveInput, RawAdapter};
use songbird::{Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird};
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use symphonia::core::io::MediaSource;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audio::transport::{ConnectionState, VoiceConnection, VoiceGateway};
use crate::audio::{AudioFrame, CHANNEL_COUNT, SAMPLE_RATE};

const PCM_MIME: &str = "audio/pcm;rate=48000;encoding=float;bits=32";

/// Opens voice connections through the shared songbird manager.
pub struct SongbirdGateway {
    manager: Arc<Songbird>,
    frame_buffer: usize,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>, frame_buffer: usize) -> Self {
        Self {
            manager,
            frame_buffer,
        }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        events: UnboundedSender<ConnectionState>,
    ) -> Result<Arc<dyn VoiceConnection>> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .with_context(|| format!("failed to join voice channel {}", channel_id))?;

        let (frames, backlog) = flume::bounded(self.frame_buffer);
        {
            let mut handler = call.lock().await;
            handler.remove_all_global_events();
            register_transport_events(&mut handler, guild_id, events);
            handler.play_only_input(frame_input(backlog.clone()));
        }

        info!("🔊 Entrada de audio lista en guild {}", guild_id);
        Ok(Arc::new(SongbirdConnection {
            manager: self.manager.clone(),
            guild_id,
            call,
            frames,
            backlog,
            closed: AtomicBool::new(false),
        }))
    }
}

/// One guild's songbird call plus the frame channel feeding it.
pub struct SongbirdConnection {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
    frames: flume::Sender<AudioFrame>,
    backlog: flume::Receiver<AudioFrame>,
    closed: AtomicBool,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn send_frame(&self, frame: AudioFrame) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(anyhow!("voice connection was destroyed"));
        }
        self.frames
            .send_async(frame)
            .await
            .map_err(|_| anyhow!("voice input closed"))
    }

    async fn set_bitrate(&self, bps: u32) {
        let bps = i32::try_from(bps).unwrap_or(i32::MAX);
        self.call
            .lock()
            .await
            .set_bitrate(Bitrate::BitsPerSecond(bps));
        debug!("🎚️ Bitrate del driver {} bps en guild {}", bps, self.guild_id);
    }

    fn pending(&self) -> usize {
        self.backlog.len()
    }

    fn flush(&self) -> usize {
        let dropped = self.backlog.drain().count();
        if dropped > 0 {
            debug!("🧹 {} frames descartados en guild {}", dropped, self.guild_id);
        }
        dropped
    }

    async fn disconnect(&self) {
        if let Err(e) = self.call.lock().await.leave().await {
            warn!("⚠️ Error al salir del canal en guild {}: {:?}", self.guild_id, e);
        }
    }

    async fn destroy(&self) {
        self.closed.store(true, Ordering::Release);
        self.flush();
        if let Err(e) = self.manager.remove(self.guild_id).await {
            debug!("Llamada ya eliminada en guild {}: {:?}", self.guild_id, e);
        }
    }
}

/// Maps driver lifecycle events onto [`ConnectionState`] transitions.
struct TransportEventHandler {
    guild_id: GuildId,
    state: ConnectionState,
    events: UnboundedSender<ConnectionState>,
}

#[async_trait]
impl VoiceEventHandler for TransportEventHandler {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        debug!("📡 {:?} en guild {}", self.state, self.guild_id);
        if self.events.send(self.state).is_err() {
            return Some(Event::Cancel);
        }
        None
    }
}

fn register_transport_events(
    handler: &mut Call,
    guild_id: GuildId,
    events: UnboundedSender<ConnectionState>,
) {
    let mapping = [
        (CoreEvent::DriverConnect, ConnectionState::Connected),
        (CoreEvent::DriverReconnect, ConnectionState::Connecting),
        (CoreEvent::DriverDisconnect, ConnectionState::Disconnected),
    ];

    for (event, state) in mapping {
        handler.add_global_event(
            Event::Core(event),
            TransportEventHandler {
                guild_id,
                state,
                events: events.clone(),
            },
        );
    }
}

fn frame_input(frames: flume::Receiver<AudioFrame>) -> Input {
    let adapter = RawAdapter::new(FrameStream::new(frames), SAMPLE_RATE, CHANNEL_COUNT);

    let mut hint = Hint::new();
    hint.mime_type(PCM_MIME);

    let stream = AudioStream {
        input: Box::new(adapter) as Box<dyn MediaSource>,
        hint: Some(hint),
    };

    Input::Live(LiveInput::Raw(stream), None)
}

/// Float PCM view over the frame channel. Never blocks: an empty channel
/// reads as silence and a closed one as end of stream.
struct FrameStream {
    frames: flume::Receiver<AudioFrame>,
    pending: Vec<u8>,
    cursor: usize,
}

impl FrameStream {
    fn new(frames: flume::Receiver<AudioFrame>) -> Self {
        Self {
            frames,
            pending: Vec::new(),
            cursor: 0,
        }
    }

    fn refill(&mut self) -> bool {
        let frame = match self.frames.try_recv() {
            Ok(frame) => frame,
            Err(flume::TryRecvError::Empty) => AudioFrame::silence(),
            Err(flume::TryRecvError::Disconnected) => return false,
        };

        self.pending.clear();
        self.pending
            .extend(frame.samples_f32().flat_map(f32::to_le_bytes));
        self.cursor = 0;
        true
    }
}

impl Read for FrameStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cursor >= self.pending.len() && !self.refill() {
            return Ok(0);
        }

        let available = &self.pending[self.cursor..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.cursor += n;
        Ok(n)
    }
}

impl Seek for FrameStream {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "live frame stream cannot seek",
        ))
    }
}

impl MediaSource for FrameStream {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}
