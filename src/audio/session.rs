use rand::seq::SliceRandom;
use serenity::model::id::{ChannelId, GuildId, MessageId};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::pipeline::{DecodePipeline, PipelineEvent, PipelineOutcome};
use super::transport::{
    spawn_disconnect_watchdog, AnnouncementSink, ConnectionState, VoiceConnection, VoiceGateway,
};
use super::{clamp_bitrate, PlaybackState, Track, DEFAULT_BITRATE, FRAME_DURATION_MS};
use crate::sources::MediaBackend;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("nothing is playing")]
    NothingPlaying,

    #[error("live streams cannot be seeked")]
    LiveStream,

    #[error("playback session is closed")]
    Closed,
}

/// Tunables shared by every session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub default_bitrate: u32,
    /// How long a disconnect may last before it counts as terminal.
    pub grace_window: Duration,
    /// Pause between tearing down a pipeline and restarting it on seek.
    pub seek_settle: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_bitrate: DEFAULT_BITRATE,
            grace_window: Duration::from_millis(5_000),
            seek_settle: Duration::from_millis(300),
        }
    }
}

/// Everything a session needs from the outside world.
#[derive(Clone)]
pub struct SessionDeps {
    pub media: Arc<dyn MediaBackend>,
    pub gateway: Arc<dyn VoiceGateway>,
    pub config: SessionConfig,
}

/// Read-only view of a session, taken atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: PlaybackState,
    pub queue: Vec<Track>,
    pub position_ms: u64,
    pub bitrate_bps: u32,
    pub voice_channel_id: Option<ChannelId>,
}

impl SessionSnapshot {
    pub fn now_playing(&self) -> Option<&Track> {
        self.queue.first()
    }
}

enum Command {
    EnsureTransport {
        user_channel: Option<ChannelId>,
        announce: Option<Arc<dyn AnnouncementSink>>,
        force: bool,
        reply: oneshot::Sender<bool>,
    },
    AddTracks {
        tracks: Vec<Track>,
        reply: oneshot::Sender<()>,
    },
    Skip {
        amount: usize,
        reply: oneshot::Sender<Vec<Track>>,
    },
    Remove {
        from: i64,
        to: i64,
        reply: oneshot::Sender<usize>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    Shuffle {
        reply: oneshot::Sender<bool>,
    },
    SetBitrate {
        bps: i64,
        reply: oneshot::Sender<u32>,
    },
    Pause {
        reply: oneshot::Sender<()>,
    },
    Resume {
        reply: oneshot::Sender<()>,
    },
    Seek {
        offset_ms: u64,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    Destroy {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Pipeline(PipelineEvent),
    Announced {
        generation: u64,
        notice: Notice,
    },
    TransportLost {
        epoch: u64,
    },
}

/// Handle to one guild's playback.
///
/// All state lives in a task owned by the session; every method sends a
/// message and waits for it to be processed, so operations on one guild
/// never interleave. Dropping every handle shuts the task down.
pub struct PlaybackSession {
    guild_id: GuildId,
    inbox: UnboundedSender<Command>,
}

impl PlaybackSession {
    pub fn spawn(guild_id: GuildId, deps: SessionDeps) -> Self {
        let (inbox, rx) = mpsc::unbounded_channel();
        let actor = SessionActor::new(guild_id, deps, inbox.downgrade());
        tokio::spawn(actor.run(rx));
        Self { guild_id, inbox }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.inbox
            .send(build(reply))
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)
    }

    /// Makes sure a voice connection exists, joining `user_channel` if needed.
    ///
    /// Returns `false` when there is no connection and the caller is not in a
    /// voice channel, or when joining failed. `force` rejoins even if already
    /// connected. A provided `announce` sink replaces the previous one only
    /// when this returns `true`.
    pub async fn ensure_transport(
        &self,
        user_channel: Option<ChannelId>,
        announce: Option<Arc<dyn AnnouncementSink>>,
        force: bool,
    ) -> Result<bool, SessionError> {
        self.request(|reply| Command::EnsureTransport {
            user_channel,
            announce,
            force,
            reply,
        })
        .await
    }

    /// Appends to the queue; starts playback from 0 if the session was idle.
    pub async fn add_tracks(&self, tracks: Vec<Track>) -> Result<(), SessionError> {
        self.request(|reply| Command::AddTracks { tracks, reply })
            .await
    }

    /// Drops up to `amount` tracks from the head (0 counts as 1) and plays the new head.
    pub async fn skip(&self, amount: usize) -> Result<Vec<Track>, SessionError> {
        self.request(|reply| Command::Skip { amount, reply }).await
    }

    /// Removes the inclusive index range `from..=to`, clamped to the queue.
    ///
    /// Ranges with `from < 0`, `to < 1` or `from >= to` remove nothing.
    pub async fn remove(&self, from: i64, to: i64) -> Result<usize, SessionError> {
        self.request(|reply| Command::Remove { from, to, reply })
            .await
    }

    pub async fn clear(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Clear { reply }).await
    }

    /// Shuffles everything after the head. Returns whether anything moved.
    pub async fn shuffle(&self) -> Result<bool, SessionError> {
        self.request(|reply| Command::Shuffle { reply }).await
    }

    /// Clamps into 8000..=96000, applies it live and returns the applied value.
    pub async fn set_bitrate(&self, bps: i64) -> Result<u32, SessionError> {
        self.request(|reply| Command::SetBitrate { bps, reply })
            .await
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Resume { reply }).await
    }

    /// Restarts the head track at `offset_ms`.
    pub async fn seek(&self, offset_ms: u64) -> Result<(), SessionError> {
        self.request(|reply| Command::Seek { offset_ms, reply })
            .await?
    }

    /// Pauses and leaves the voice channel. The queue is kept.
    pub async fn leave(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Leave { reply }).await
    }

    /// Releases every resource and resets to an empty idle session.
    pub async fn destroy(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Destroy { reply }).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }
}

struct SessionActor {
    guild_id: GuildId,
    deps: SessionDeps,
    inbox: WeakUnboundedSender<Command>,

    queue: VecDeque<Track>,
    state: PlaybackState,
    /// Position while no pipeline is running.
    position_ms: u64,
    bitrate: u32,

    voice_channel: Option<ChannelId>,
    connection: Option<Arc<dyn VoiceConnection>>,
    /// Bumped whenever the connection is replaced or released.
    transport_epoch: u64,
    watchdog: Option<JoinHandle<()>>,

    announcer: Option<Arc<dyn AnnouncementSink>>,
    notice: Option<Notice>,

    pipeline: Option<DecodePipeline>,
    next_generation: u64,
}

impl SessionActor {
    fn new(guild_id: GuildId, deps: SessionDeps, inbox: WeakUnboundedSender<Command>) -> Self {
        let bitrate = deps.config.default_bitrate;
        Self {
            guild_id,
            deps,
            inbox,
            queue: VecDeque::new(),
            state: PlaybackState::Idle,
            position_ms: 0,
            bitrate,
            voice_channel: None,
            connection: None,
            transport_epoch: 0,
            watchdog: None,
            announcer: None,
            notice: None,
            pipeline: None,
            next_generation: 0,
        }
    }

    async fn run(mut self, mut rx: UnboundedReceiver<Command>) {
        debug!("🎛️ Sesión creada para guild {}", self.guild_id);
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        self.destroy().await;
        debug!("🎛️ Sesión finalizada para guild {}", self.guild_id);
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::EnsureTransport {
                user_channel,
                announce,
                force,
                reply,
            } => {
                let ok = self.ensure_transport(user_channel, announce, force).await;
                let _ = reply.send(ok);
            }
            Command::AddTracks { tracks, reply } => {
                self.add_tracks(tracks).await;
                let _ = reply.send(());
            }
            Command::Skip { amount, reply } => {
                let removed = self.skip(amount).await;
                let _ = reply.send(removed);
            }
            Command::Remove { from, to, reply } => {
                let removed = self.remove(from, to).await;
                let _ = reply.send(removed);
            }
            Command::Clear { reply } => {
                self.clear().await;
                let _ = reply.send(());
            }
            Command::Shuffle { reply } => {
                let _ = reply.send(self.shuffle());
            }
            Command::SetBitrate { bps, reply } => {
                let applied = self.set_bitrate(bps).await;
                let _ = reply.send(applied);
            }
            Command::Pause { reply } => {
                self.pause().await;
                let _ = reply.send(());
            }
            Command::Resume { reply } => {
                self.resume().await;
                let _ = reply.send(());
            }
            Command::Seek { offset_ms, reply } => {
                let result = self.seek(offset_ms).await;
                let _ = reply.send(result);
            }
            Command::Leave { reply } => {
                self.leave().await;
                let _ = reply.send(());
            }
            Command::Destroy { reply } => {
                self.destroy().await;
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Pipeline(event) => self.on_pipeline_event(event).await,
            Command::Announced { generation, notice } => self.on_announced(generation, notice),
            Command::TransportLost { epoch } => self.on_transport_lost(epoch).await,
        }
    }

    /// Frames still queued in the transport have not been heard yet.
    fn current_position(&self) -> u64 {
        let Some(pipeline) = &self.pipeline else {
            return self.position_ms;
        };
        let unplayed = self.connection.as_ref().map_or(0, |c| c.pending()) as u64;
        pipeline
            .position_ms()
            .saturating_sub(unplayed * FRAME_DURATION_MS)
    }

    fn current_generation(&self) -> Option<u64> {
        self.pipeline.as_ref().map(DecodePipeline::generation)
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            queue: self.queue.iter().cloned().collect(),
            position_ms: self.current_position(),
            bitrate_bps: self.bitrate,
            voice_channel_id: self.voice_channel,
        }
    }

    async fn ensure_transport(
        &mut self,
        user_channel: Option<ChannelId>,
        announce: Option<Arc<dyn AnnouncementSink>>,
        force: bool,
    ) -> bool {
        if self.connection.is_some() && !force {
            if announce.is_some() {
                self.announcer = announce;
            }
            return true;
        }
        let Some(channel_id) = user_channel else {
            debug!("🔇 Sin canal de voz para unirse en guild {}", self.guild_id);
            return false;
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = match self
            .deps
            .gateway
            .join(self.guild_id, channel_id, events_tx)
            .await
        {
            Ok(connection) => connection,
            Err(e) => {
                warn!(
                    "❌ Error al unirse al canal {} en guild {}: {:?}",
                    channel_id, self.guild_id, e
                );
                return false;
            }
        };

        if announce.is_some() {
            self.announcer = announce;
        }
        connection.set_bitrate(self.bitrate).await;
        let replaced = self
            .connection
            .as_ref()
            .is_some_and(|previous| !Arc::ptr_eq(previous, &connection));
        // A running pipeline still feeds the old connection.
        if replaced {
            self.stop_pipeline().await;
        }
        self.connection = Some(connection);
        self.voice_channel = Some(channel_id);
        self.watch_transport(events_rx);
        info!("🔊 Conectado al canal {} en guild {}", channel_id, self.guild_id);

        if replaced && self.state == PlaybackState::Playing {
            self.play(self.position_ms).await;
        }
        true
    }

    fn watch_transport(&mut self, events: UnboundedReceiver<ConnectionState>) {
        self.transport_epoch += 1;
        if let Some(previous) = self.watchdog.take() {
            previous.abort();
        }

        let epoch = self.transport_epoch;
        let inbox = self.inbox.clone();
        self.watchdog = Some(spawn_disconnect_watchdog(
            self.guild_id,
            events,
            self.deps.config.grace_window,
            move || {
                if let Some(inbox) = inbox.upgrade() {
                    let _ = inbox.send(Command::TransportLost { epoch });
                }
            },
        ));
    }

    fn release_transport_watch(&mut self) {
        self.transport_epoch += 1;
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
    }

    async fn add_tracks(&mut self, tracks: Vec<Track>) {
        if tracks.is_empty() {
            return;
        }
        info!("➕ {} tracks añadidos en guild {}", tracks.len(), self.guild_id);
        self.queue.extend(tracks);
        if self.state == PlaybackState::Idle {
            self.play(0).await;
        }
    }

    async fn skip(&mut self, amount: usize) -> Vec<Track> {
        let amount = amount.max(1).min(self.queue.len());
        let removed: Vec<Track> = self.queue.drain(..amount).collect();
        info!("⏭️ {} tracks saltados en guild {}", removed.len(), self.guild_id);
        self.restart_head().await;
        removed
    }

    async fn remove(&mut self, from: i64, to: i64) -> usize {
        if from < 0 || to < 1 || from >= to {
            return 0;
        }
        let len = self.queue.len();
        let start = usize::try_from(from).unwrap_or(usize::MAX).min(len);
        let end = usize::try_from(to)
            .unwrap_or(usize::MAX)
            .saturating_add(1)
            .min(len);
        if start >= end {
            return 0;
        }

        let removed = self.queue.drain(start..end).count();
        info!(
            "🗑️ {} tracks eliminados ({}..={}) en guild {}",
            removed, from, to, self.guild_id
        );
        if start == 0 {
            self.restart_head().await;
        }
        removed
    }

    /// The head changed underneath the pipeline; play whatever is first now.
    async fn restart_head(&mut self) {
        self.state = PlaybackState::Paused;
        self.retract_notice();
        self.play(0).await;
    }

    async fn clear(&mut self) {
        self.queue.clear();
        self.stop_pipeline().await;
        self.state = PlaybackState::Idle;
        self.position_ms = 0;
        self.bitrate = self.deps.config.default_bitrate;
        if let Some(connection) = &self.connection {
            connection.set_bitrate(self.bitrate).await;
        }
        self.retract_notice();
        info!("🧹 Cola limpiada en guild {}", self.guild_id);
    }

    fn shuffle(&mut self) -> bool {
        if self.queue.len() <= 2 {
            return false;
        }
        self.queue.make_contiguous()[1..].shuffle(&mut rand::thread_rng());
        info!("🔀 Cola mezclada en guild {}", self.guild_id);
        true
    }

    async fn set_bitrate(&mut self, bps: i64) -> u32 {
        self.bitrate = clamp_bitrate(bps);
        if let Some(connection) = &self.connection {
            connection.set_bitrate(self.bitrate).await;
        }
        info!("🎚️ Bitrate {} bps en guild {}", self.bitrate, self.guild_id);
        self.bitrate
    }

    async fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
        self.stop_pipeline().await;
    }

    async fn resume(&mut self) {
        if self.state == PlaybackState::Paused {
            self.play(self.position_ms).await;
        }
    }

    async fn seek(&mut self, offset_ms: u64) -> Result<(), SessionError> {
        let head = self.queue.front().ok_or(SessionError::NothingPlaying)?;
        if head.is_live() {
            return Err(SessionError::LiveStream);
        }

        info!("⏩ Seek a {}ms en guild {}", offset_ms, self.guild_id);
        self.pause().await;
        tokio::time::sleep(self.deps.config.seek_settle).await;
        self.state = PlaybackState::Paused;
        self.play(offset_ms).await;
        Ok(())
    }

    async fn leave(&mut self) {
        self.pause().await;
        self.release_transport_watch();
        if let Some(connection) = self.connection.take() {
            connection.disconnect().await;
        }
        self.voice_channel = None;
        info!("👋 Canal de voz abandonado en guild {}", self.guild_id);
    }

    async fn destroy(&mut self) {
        self.stop_pipeline().await;
        self.release_transport_watch();
        if let Some(connection) = self.connection.take() {
            connection.destroy().await;
        }
        self.voice_channel = None;

        self.queue.clear();
        self.state = PlaybackState::Idle;
        self.position_ms = 0;
        self.bitrate = self.deps.config.default_bitrate;

        self.announcer = None;
        if let Some(notice) = self.notice.take() {
            if let Err(e) = notice.sink.retract(notice.message).await {
                debug!("No se pudo borrar el aviso en guild {}: {:?}", self.guild_id, e);
            }
        }
    }

    /// Stops whatever pipeline is running, then starts the head at `offset_ms`.
    ///
    /// Ends Idle when the queue is empty and Paused when there is no voice
    /// connection to play into.
    async fn play(&mut self, offset_ms: u64) {
        self.stop_pipeline().await;
        self.position_ms = offset_ms;

        let Some(track) = self.queue.front().cloned() else {
            self.state = PlaybackState::Idle;
            self.position_ms = 0;
            return;
        };
        let Some(connection) = self.connection.clone() else {
            warn!("⚠️ Sin conexión de voz para reproducir en guild {}", self.guild_id);
            self.state = PlaybackState::Paused;
            return;
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        let inbox = self.inbox.clone();
        self.pipeline = Some(DecodePipeline::start(
            self.guild_id,
            generation,
            &track,
            offset_ms,
            self.deps.media.clone(),
            connection,
            move |event| {
                if let Some(inbox) = inbox.upgrade() {
                    let _ = inbox.send(Command::Pipeline(event));
                }
            },
        ));
        self.state = PlaybackState::Playing;
        info!(
            "▶️ Reproduciendo '{}' desde {}ms en guild {}",
            track.title(),
            offset_ms,
            self.guild_id
        );
    }

    async fn stop_pipeline(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.stop().await;
            let dropped = self.connection.as_ref().map_or(0, |c| c.flush()) as u64;
            self.position_ms = pipeline
                .position_ms()
                .saturating_sub(dropped * FRAME_DURATION_MS);
        }
    }

    async fn on_pipeline_event(&mut self, event: PipelineEvent) {
        if self.current_generation() != Some(event.generation) {
            debug!(
                "Evento de pipeline obsoleto ({}) ignorado en guild {}",
                event.generation, self.guild_id
            );
            return;
        }

        match event.outcome {
            PipelineOutcome::Started => self.announce_head(event.generation),
            PipelineOutcome::Finished => {
                if self.state == PlaybackState::Paused {
                    return;
                }
                self.stop_pipeline().await;
                self.retract_notice();
                if let Some(finished) = self.queue.pop_front() {
                    debug!("✅ '{}' terminado en guild {}", finished.title(), self.guild_id);
                }
                self.play(0).await;
            }
            PipelineOutcome::Failed(reason) => {
                warn!(
                    "❌ No se pudo iniciar la reproducción en guild {}: {}",
                    self.guild_id, reason
                );
                self.stop_pipeline().await;
                self.state = PlaybackState::Paused;
            }
            PipelineOutcome::SinkClosed => {
                self.stop_pipeline().await;
                self.state = PlaybackState::Paused;
            }
        }
    }

    fn announce_head(&mut self, generation: u64) {
        let (Some(announcer), Some(track)) = (self.announcer.clone(), self.queue.front().cloned())
        else {
            return;
        };
        self.retract_notice();

        let inbox = self.inbox.clone();
        let guild_id = self.guild_id;
        tokio::spawn(async move {
            let message = match announcer.announce(&track).await {
                Ok(message) => message,
                Err(e) => {
                    debug!("No se pudo anunciar el track en guild {}: {:?}", guild_id, e);
                    return;
                }
            };
            let notice = Notice {
                sink: announcer,
                message,
            };

            // Nobody is left to own the notice once the session is gone.
            let orphan = match inbox.upgrade() {
                Some(inbox) => match inbox.send(Command::Announced { generation, notice }) {
                    Ok(()) => None,
                    Err(mpsc::error::SendError(Command::Announced { notice, .. })) => Some(notice),
                    Err(_) => None,
                },
                None => Some(notice),
            };
            if let Some(notice) = orphan {
                spawn_retract(guild_id, notice);
            }
        });
    }

    /// Keeps the notice of the running pipeline; anything older is deleted.
    fn on_announced(&mut self, generation: u64, notice: Notice) {
        if self.current_generation() == Some(generation) {
            self.retract_notice();
            self.notice = Some(notice);
        } else {
            spawn_retract(self.guild_id, notice);
        }
    }

    fn retract_notice(&mut self) {
        if let Some(notice) = self.notice.take() {
            spawn_retract(self.guild_id, notice);
        }
    }

    async fn on_transport_lost(&mut self, epoch: u64) {
        if epoch != self.transport_epoch {
            return;
        }
        warn!("🔌 Conexión de voz perdida en guild {}", self.guild_id);
        self.pause().await;
        self.watchdog = None;
        if let Some(connection) = self.connection.take() {
            connection.destroy().await;
        }
        self.voice_channel = None;
    }
}

/// A posted "now playing" message and the sink that can delete it.
struct Notice {
    sink: Arc<dyn AnnouncementSink>,
    message: MessageId,
}

fn spawn_retract(guild_id: GuildId, notice: Notice) {
    tokio::spawn(async move {
        if let Err(e) = notice.sink.retract(notice.message).await {
            debug!("No se pudo borrar el aviso en guild {}: {:?}", guild_id, e);
        }
    });
}
