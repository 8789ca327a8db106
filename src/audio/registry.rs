use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::{info, warn};

use super::session::{PlaybackSession, SessionDeps};

/// Maps every guild to its one playback session.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<PlaybackSession>>,
    deps: SessionDeps,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            sessions: DashMap::new(),
            deps,
        }
    }

    /// Returns the guild's session, creating an idle one on first use.
    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<PlaybackSession> {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                info!("🆕 Nueva sesión de reproducción para guild {}", guild_id);
                Arc::new(PlaybackSession::spawn(guild_id, self.deps.clone()))
            })
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<PlaybackSession>> {
        self.sessions.get(&guild_id).map(|entry| entry.clone())
    }

    /// Removes the session and destroys it. Returns whether one existed.
    pub async fn remove(&self, guild_id: GuildId) -> bool {
        let Some((_, session)) = self.sessions.remove(&guild_id) else {
            return false;
        };
        if let Err(e) = session.destroy().await {
            warn!("⚠️ Error destruyendo sesión de guild {}: {}", guild_id, e);
        }
        info!("🗑️ Sesión eliminada para guild {}", guild_id);
        true
    }

    /// Destroys every session, used on shutdown.
    pub async fn destroy_all(&self) {
        let guilds: Vec<GuildId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for guild_id in guilds {
            self.remove(guild_id).await;
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
