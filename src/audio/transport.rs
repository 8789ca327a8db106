use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, MessageId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{AudioFrame, Track};

/// Connectivity transitions reported by a voice connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Signalling,
    Connecting,
    Disconnected,
}

/// A live voice connection for one guild.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Ships one frame. Errors mean the connection can no longer accept audio.
    async fn send_frame(&self, frame: AudioFrame) -> Result<()>;

    /// Applies a new encoder bitrate without interrupting playback.
    async fn set_bitrate(&self, bps: u32);

    /// Frames accepted but not yet played out.
    fn pending(&self) -> usize;

    /// Drops frames that were accepted but not yet played out, returning how many.
    fn flush(&self) -> usize;

    /// Leaves the channel, keeping the handle reusable.
    async fn disconnect(&self);

    /// Tears the connection down for good.
    async fn destroy(&self);
}

/// Opens voice connections. State transitions are pushed into `events`.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        events: UnboundedSender<ConnectionState>,
    ) -> Result<Arc<dyn VoiceConnection>>;
}

/// Where "now playing" notices go.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnnouncementSink: Send + Sync {
    async fn announce(&self, track: &Track) -> Result<MessageId>;

    /// Best-effort; callers swallow the error.
    async fn retract(&self, message: MessageId) -> Result<()>;
}

/// Watches a connection's state stream and calls `on_terminal` once when a
/// disconnect is not followed by a reconnect attempt within `grace`.
///
/// A `Signalling`, `Connecting` or `Connected` transition inside the window
/// means the transport is healing itself and nothing happens. The task ends
/// when the state stream closes or after `on_terminal` ran.
pub fn spawn_disconnect_watchdog<F>(
    guild_id: GuildId,
    mut events: UnboundedReceiver<ConnectionState>,
    grace: Duration,
    on_terminal: F,
) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(state) = events.recv().await {
            if state != ConnectionState::Disconnected {
                debug!("🔊 Estado de voz {:?} en guild {}", state, guild_id);
                continue;
            }

            match tokio::time::timeout(grace, wait_for_recovery(&mut events)).await {
                Ok(true) => {
                    info!("🔄 Reconectando al canal de voz en guild {}", guild_id);
                }
                Ok(false) => return,
                Err(_) => {
                    warn!(
                        "🔌 Desconexión definitiva tras {:?} en guild {}",
                        grace, guild_id
                    );
                    on_terminal();
                    return;
                }
            }
        }
    })
}

/// Resolves to `true` on the first recovery transition, `false` if the stream closed.
async fn wait_for_recovery(events: &mut UnboundedReceiver<ConnectionState>) -> bool {
    while let Some(state) = events.recv().await {
        if state != ConnectionState::Disconnected {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    const GRACE: Duration = Duration::from_millis(60);

    fn watch() -> (
        UnboundedSender<ConnectionState>,
        Arc<AtomicUsize>,
        JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let handle = spawn_disconnect_watchdog(GuildId::new(1), rx, GRACE, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (tx, fired, handle)
    }

    #[tokio::test]
    async fn test_terminal_disconnect_fires_once() {
        let (tx, fired, handle) = watch();
        tx.send(ConnectionState::Connected).unwrap();
        tx.send(ConnectionState::Disconnected).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("watchdog should finish")
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnect_within_grace_is_ignored() {
        let (tx, fired, handle) = watch();
        tx.send(ConnectionState::Disconnected).unwrap();
        tx.send(ConnectionState::Signalling).unwrap();
        tokio::time::sleep(GRACE * 3).await;

        tx.send(ConnectionState::Disconnected).unwrap();
        tx.send(ConnectionState::Connecting).unwrap();
        tokio::time::sleep(GRACE * 3).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!handle.is_finished());
        drop(tx);
        handle.await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_closed_stream_during_grace_does_not_fire() {
        let (tx, fired, handle) = watch();
        tx.send(ConnectionState::Disconnected).unwrap();
        drop(tx);

        handle.await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
