//! In-memory media backend and voice gateway for session tests.
//!
//! Track paths select the behaviour of the fake media backend:
//! `frames/N` yields N frames then ends, `hold/N` yields N frames then
//! stalls, `endless` never ends, `broken` locates to something that is not
//! a URL and `fail` cannot be transcoded.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, MessageId};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, DuplexStream, ReadBuf};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

use super::transport::{AnnouncementSink, ConnectionState, VoiceConnection, VoiceGateway};
use super::{AudioFrame, Track, FRAME_BYTES};
use crate::sources::{MediaBackend, TranscodedStream};

const MEDIA_HOST: &str = "https://media.test/";
const CDN_HOST: &str = "https://cdn.test/";

pub fn track(path: &str, title: &str) -> Track {
    Track::new(title, format!("{MEDIA_HOST}{path}")).with_length(180)
}

pub fn live_track(path: &str, title: &str) -> Track {
    Track::new(title, format!("{MEDIA_HOST}{path}"))
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        if Instant::now() > deadline {
            panic!("condition not met within 2s");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Default)]
pub struct FakeMedia {
    transcodes: Mutex<Vec<(String, u64)>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    stalled: Mutex<Vec<DuplexStream>>,
}

impl FakeMedia {
    /// Every transcode request as `(path, offset_ms)`, in order.
    pub fn transcodes(&self) -> Vec<(String, u64)> {
        self.transcodes.lock().clone()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn track_stream(&self, reader: impl AsyncRead + Send + Unpin + 'static) -> TranscodedStream {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        TranscodedStream::new(Tracked {
            inner: reader,
            active: self.active.clone(),
        })
    }
}

#[async_trait]
impl MediaBackend for FakeMedia {
    async fn locate(&self, source_url: &str) -> Result<String> {
        let path = source_url.trim_start_matches(MEDIA_HOST);
        match path {
            "broken" => Ok("ERROR: this video is unavailable".to_string()),
            "gone" => bail!("video removed"),
            _ => Ok(format!("{CDN_HOST}{path}")),
        }
    }

    async fn transcode(&self, locator: &str, offset_ms: u64) -> Result<TranscodedStream> {
        let path = locator.trim_start_matches(CDN_HOST).to_string();
        self.transcodes.lock().push((path.clone(), offset_ms));

        let (kind, count) = match path.split_once('/') {
            Some((kind, count)) => (kind, count.parse::<usize>().unwrap_or(0)),
            None => (path.as_str(), 0),
        };
        let pcm = io::Cursor::new(vec![1u8; count * FRAME_BYTES]);

        let stream = match kind {
            "frames" => self.track_stream(pcm),
            "hold" => {
                let (reader, writer) = tokio::io::duplex(64);
                self.stalled.lock().push(writer);
                self.track_stream(pcm.chain(reader))
            }
            "fail" => bail!("transcoder refused the stream"),
            _ => self.track_stream(tokio::io::repeat(1)),
        };
        Ok(stream)
    }
}

struct Tracked<R> {
    inner: R,
    active: Arc<AtomicUsize>,
}

impl<R: AsyncRead + Unpin> AsyncRead for Tracked<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<R> Drop for Tracked<R> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeConnection {
    frames: AtomicUsize,
    bitrate: AtomicU32,
    flushes: AtomicUsize,
    disconnects: AtomicUsize,
    destroys: AtomicUsize,
    rejecting: AtomicBool,
    /// How many accepted frames sit unplayed at most.
    buffer: AtomicUsize,
    buffered: AtomicUsize,
}

impl FakeConnection {
    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn bitrate(&self) -> u32 {
        self.bitrate.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    pub fn reject_frames(&self) {
        self.rejecting.store(true, Ordering::SeqCst);
    }

    /// Keeps up to `frames` accepted frames unplayed, like a jitter buffer.
    pub fn buffer_frames(&self, frames: usize) {
        self.buffer.store(frames, Ordering::SeqCst);
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    async fn send_frame(&self, frame: AudioFrame) -> Result<()> {
        if self.rejecting.load(Ordering::SeqCst) {
            bail!("connection closed");
        }
        assert_eq!(frame.as_bytes().len(), FRAME_BYTES);
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.frames.fetch_add(1, Ordering::SeqCst);
        let buffer = self.buffer.load(Ordering::SeqCst);
        let _ = self
            .buffered
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some((n + 1).min(buffer)));
        Ok(())
    }

    async fn set_bitrate(&self, bps: u32) {
        self.bitrate.store(bps, Ordering::SeqCst);
    }

    fn pending(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn flush(&self) -> usize {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.buffered.swap(0, Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn destroy(&self) {
        self.destroys.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeGateway {
    joins: Mutex<Vec<ChannelId>>,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    events: Mutex<Vec<UnboundedSender<ConnectionState>>>,
    refused: Mutex<Vec<ChannelId>>,
}

impl FakeGateway {
    pub fn refuse(&self, channel_id: ChannelId) {
        self.refused.lock().push(channel_id);
    }

    pub fn joins(&self) -> Vec<ChannelId> {
        self.joins.lock().clone()
    }

    pub fn last_connection(&self) -> Arc<FakeConnection> {
        self.connections
            .lock()
            .last()
            .cloned()
            .expect("no connection was opened")
    }

    /// Pushes a state transition into the most recent connection's stream.
    pub fn emit(&self, state: ConnectionState) {
        if let Some(events) = self.events.lock().last() {
            let _ = events.send(state);
        }
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn join(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
        events: UnboundedSender<ConnectionState>,
    ) -> Result<Arc<dyn VoiceConnection>> {
        if self.refused.lock().contains(&channel_id) {
            bail!("missing permissions for {}", channel_id);
        }
        self.joins.lock().push(channel_id);

        let connection = Arc::new(FakeConnection::default());
        self.connections.lock().push(connection.clone());
        self.events.lock().push(events);
        Ok(connection)
    }
}

/// Announcement sink that records every call, optionally slow to post.
#[derive(Default)]
pub struct RecordingSink {
    delay: Duration,
    announced: Mutex<Vec<String>>,
    retracted: Mutex<Vec<MessageId>>,
}

impl RecordingSink {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Titles announced so far; message ids are their 1-based positions here.
    pub fn announced(&self) -> Vec<String> {
        self.announced.lock().clone()
    }

    pub fn retracted(&self) -> Vec<MessageId> {
        self.retracted.lock().clone()
    }
}

#[async_trait]
impl AnnouncementSink for RecordingSink {
    async fn announce(&self, track: &Track) -> Result<MessageId> {
        tokio::time::sleep(self.delay).await;
        let mut announced = self.announced.lock();
        announced.push(track.title().to_string());
        Ok(MessageId::new(announced.len() as u64))
    }

    async fn retract(&self, message: MessageId) -> Result<()> {
        self.retracted.lock().push(message);
        Ok(())
    }
}

/// Hands a recording sink to `ensure_transport`.
pub fn announce_to(sink: &Arc<RecordingSink>) -> Option<Arc<dyn AnnouncementSink>> {
    Some(sink.clone())
}
