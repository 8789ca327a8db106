use anyhow::Result;
use rand::seq::SliceRandom;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, ComponentInteraction},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use crate::{
    audio::{
        session::{PlaybackSession, SessionError},
        transport::AnnouncementSink,
    },
    bot::{ChannelAnnouncer, OpenMusicBot},
    ui::{buttons, embeds},
};

/// Discord's epoch (2015-01-01) in unix milliseconds.
const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &OpenMusicBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "join" => handle_join(ctx, &command, bot, guild_id).await?,
        "leave" => handle_leave(ctx, &command, bot, guild_id).await?,
        "add" => handle_add(ctx, &command, bot, guild_id).await?,
        "playlist" => handle_playlist(ctx, &command, bot, guild_id).await?,
        "skip" => handle_skip(ctx, &command, bot, guild_id).await?,
        "seek" => handle_seek(ctx, &command, bot, guild_id).await?,
        "queue" => handle_queue(ctx, &command, bot, guild_id).await?,
        "nowplaying" => handle_nowplaying(ctx, &command, bot, guild_id).await?,
        "clear" => handle_clear(ctx, &command, bot, guild_id).await?,
        "shuffle" => handle_shuffle(ctx, &command, bot, guild_id).await?,
        "remove" => handle_remove(ctx, &command, bot, guild_id).await?,
        "resume" => handle_resume(ctx, &command, bot, guild_id).await?,
        "pause" => handle_pause(ctx, &command, bot, guild_id).await?,
        "bitrate" => handle_bitrate(ctx, &command, bot, guild_id).await?,
        "ping" => handle_ping(ctx, &command).await?,
        "reset" => handle_reset(ctx, &command, bot, guild_id).await?,
        _ => {
            respond(
                ctx,
                &command,
                embeds::create_error_embed("Error", "Comando no reconocido"),
                true,
            )
            .await?;
        }
    }

    Ok(())
}

/// Maneja interacciones con componentes (botones de la cola)
pub async fn handle_component(
    ctx: &Context,
    component: ComponentInteraction,
    bot: &OpenMusicBot,
) -> Result<()> {
    let guild_id = component
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Componente usado fuera de un servidor"))?;

    info!(
        "🔘 Botón {} presionado por {} en guild {}",
        component.data.custom_id, component.user.name, guild_id
    );

    let Some(page) = buttons::parse_queue_page(&component.data.custom_id) else {
        component
            .create_response(&ctx.http, CreateInteractionResponse::Acknowledge)
            .await?;
        return Ok(());
    };

    let snapshot = bot.registry.get_or_create(guild_id).snapshot().await?;
    let total_pages = embeds::queue_page_count(snapshot.queue.len());
    let page = page.min(total_pages - 1);

    let mut message =
        CreateInteractionResponseMessage::new().embed(embeds::create_queue_embed(&snapshot, page));
    message = if snapshot.queue.is_empty() {
        message.components(Vec::new())
    } else {
        message.components(vec![buttons::create_queue_buttons(page, total_pages)])
    };

    component
        .create_response(&ctx.http, CreateInteractionResponse::UpdateMessage(message))
        .await?;

    Ok(())
}

async fn handle_join(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenMusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(channel_id) = get_user_voice_channel(ctx, guild_id, command.user.id) else {
        return respond(ctx, command, not_in_voice_embed(), true).await;
    };

    let session = bot.registry.get_or_create(guild_id);
    let joined = session
        .ensure_transport(Some(channel_id), Some(announcer(ctx, command)), true)
        .await?;

    if joined {
        respond(
            ctx,
            command,
            embeds::create_success_embed("Conectado", &format!("🔊 Canal de voz <#{}>", channel_id)),
            false,
        )
        .await
    } else {
        respond(
            ctx,
            command,
            embeds::create_error_embed("Error", "No pude unirme a tu canal de voz"),
            true,
        )
        .await
    }
}

async fn handle_leave(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenMusicBot,
    guild_id: GuildId,
) -> Result<()> {
    bot.registry.get_or_create(guild_id).leave().await?;

    respond(
        ctx,
        command,
        embeds::create_info_embed("Desconectado", "Saliendo, buenas noches 😴💤"),
        false,
    )
    .await
}

async fn handle_add(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenMusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = option_str(command, "query")
        .ok_or_else(|| anyhow::anyhow!("Query requerido"))?
        .to_string();

    let session = bot.registry.get_or_create(guild_id);
    if !ensure_voice(ctx, command, &session, guild_id).await? {
        return respond(ctx, command, bot_not_in_voice_embed(), false).await;
    }

    // Resolver puede tardar varios segundos
    command.defer(&ctx.http).await?;

    let Some(track) = bot.resolver.resolve_one(&query).await else {
        return edit(
            ctx,
            command,
            embeds::create_error_embed("Sin resultados", "Canción no encontrada"),
        )
        .await;
    };

    let position = session.snapshot().await?.queue.len();
    session.add_tracks(vec![track.clone()]).await?;

    edit(ctx, command, embeds::create_track_added_embed(&track, position)).await
}

async fn handle_playlist(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenMusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let url = option_str(command, "url")
        .ok_or_else(|| anyhow::anyhow!("URL requerida"))?
        .to_string();
    let shuffle = option_bool(command, "shuffle").unwrap_or(false);

    let session = bot.registry.get_or_create(guild_id);
    if !ensure_voice(ctx, command, &session, guild_id).await? {
        return respond(ctx, command, bot_not_in_voice_embed(), false).await;
    }

    command.defer(&ctx.http).await?;

    let Some(mut tracks) = bot.resolver.resolve_playlist(&url).await else {
        return edit(
            ctx,
            command,
            embeds::create_error_embed("Sin resultados", "No se encontraron canciones"),
        )
        .await;
    };

    if shuffle {
        tracks.shuffle(&mut rand::thread_rng());
    }
    let count = tracks.len();
    session.add_tracks(tracks).await?;

    edit(ctx, command, embeds::create_playlist_added_embed(count, shuffle)).await
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenMusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let amount = option_i64(command, "amount")
        .and_then(|amount| usize::try_from(amount).ok())
        .unwrap_or(1);

    let skipped = bot.registry.get_or_create(guild_id).skip(amount).await?;

    let description = match skipped.len() {
        1 => "⏩ Saltada 1 canción".to_string(),
        n => format!("⏩ Saltadas {} canciones", n),
    };
    respond(ctx, command, embeds::create_success_embed("Skip", &description), false).await
}

async fn handle_seek(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenMusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let offset_ms = seek_offset_ms(
        option_i64(command, "hour").unwrap_or(0),
        option_i64(command, "minute").unwrap_or(0),
        option_i64(command, "second").unwrap_or(0),
    );

    command.defer(&ctx.http).await?;

    let embed = match bot.registry.get_or_create(guild_id).seek(offset_ms).await {
        Ok(()) => embeds::create_success_embed(
            "Seek",
            &format!(
                "⏩ Posición: {}",
                embeds::format_duration(Duration::from_millis(offset_ms))
            ),
        ),
        Err(SessionError::NothingPlaying) => {
            embeds::create_error_embed("Seek", "No hay nada sonando ahora mismo 🗿")
        }
        Err(SessionError::LiveStream) => {
            embeds::create_error_embed("Seek", "No se puede adelantar una transmisión en vivo 🔴")
        }
        Err(e) => return Err(e.into()),
    };

    edit(ctx, command, embed).await
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenMusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let page = option_i64(command, "page")
        .and_then(|page| usize::try_from(page).ok())
        .unwrap_or(1)
        .saturating_sub(1);

    let snapshot = bot.registry.get_or_create(guild_id).snapshot().await?;
    let total_pages = embeds::queue_page_count(snapshot.queue.len());
    let page = page.min(total_pages - 1);

    let mut message =
        CreateInteractionResponseMessage::new().embed(embeds::create_queue_embed(&snapshot, page));
    if !snapshot.queue.is_empty() {
        message = message.components(vec![buttons::create_queue_buttons(page, total_pages)]);
    }

    command
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await?;

    Ok(())
}

async fn handle_nowplaying(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenMusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let snapshot = bot.registry.get_or_create(guild_id).snapshot().await?;
    respond(ctx, command, embeds::create_now_playing_embed(&snapshot), false).await
}

async fn handle_clear(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenMusicBot,
    guild_id: GuildId,
) -> Result<()> {
    bot.registry.get_or_create(guild_id).clear().await?;
    respond(
        ctx,
        command,
        embeds::create_success_embed("Cola limpiada", "🧹 Se eliminaron todas las canciones"),
        false,
    )
    .await
}

async fn handle_shuffle(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenMusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = if bot.registry.get_or_create(guild_id).shuffle().await? {
        embeds::create_success_embed("Aleatorio", "🔀 Cola mezclada")
    } else {
        embeds::create_error_embed("Aleatorio", "No hay suficientes canciones para mezclar 🤦‍♂️")
    };
    respond(ctx, command, embed, false).await
}

async fn handle_remove(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenMusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let from = option_i64(command, "from").ok_or_else(|| anyhow::anyhow!("from requerido"))?;
    let (from, to) = remove_range(from, option_i64(command, "to"));

    let removed = bot.registry.get_or_create(guild_id).remove(from, to).await?;
    respond(
        ctx,
        command,
        embeds::create_success_embed("Eliminadas", &format!("🗑️ {} canciones eliminadas", removed)),
        false,
    )
    .await
}

async fn handle_resume(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenMusicBot,
    guild_id: GuildId,
) -> Result<()> {
    bot.registry.get_or_create(guild_id).resume().await?;
    respond(
        ctx,
        command,
        embeds::create_success_embed("Reanudado", "▶️ Reanudando la reproducción"),
        false,
    )
    .await
}

async fn handle_pause(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenMusicBot,
    guild_id: GuildId,
) -> Result<()> {
    bot.registry.get_or_create(guild_id).pause().await?;
    respond(
        ctx,
        command,
        embeds::create_success_embed("Pausado", "⏸️ Reproducción pausada"),
        false,
    )
    .await
}

async fn handle_bitrate(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenMusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let kbps = option_i64(command, "quality").ok_or_else(|| anyhow::anyhow!("quality requerido"))?;

    let applied = bot
        .registry
        .get_or_create(guild_id)
        .set_bitrate(kbps.saturating_mul(1000))
        .await?;

    respond(
        ctx,
        command,
        embeds::create_success_embed("Bitrate", &format!("🎚️ Bitrate: {}kbps", applied / 1000)),
        false,
    )
    .await
}

async fn handle_ping(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    let latency = snowflake_age(command.id.get());

    let started = Instant::now();
    ctx.http.get_current_user().await?;
    let api = started.elapsed();

    respond(ctx, command, embeds::create_ping_embed(api, latency), false).await
}

async fn handle_reset(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &OpenMusicBot,
    guild_id: GuildId,
) -> Result<()> {
    let allowed = !bot.config().reset_requires_manage_guild
        || command
            .member
            .as_ref()
            .and_then(|member| member.permissions)
            .is_some_and(|permissions| permissions.manage_guild());

    if !allowed {
        warn!(
            "🚫 {} intentó /reset sin permisos en guild {}",
            command.user.name, guild_id
        );
        return respond(
            ctx,
            command,
            embeds::create_error_embed("Sin permisos", "Necesitas el permiso `Gestionar servidor`"),
            true,
        )
        .await;
    }

    command.defer(&ctx.http).await?;
    bot.registry.remove(guild_id).await;

    edit(
        ctx,
        command,
        embeds::create_success_embed("Reiniciado", "♻️ La sesión de música se reinició"),
    )
    .await
}

// Utilidades

/// Joins the caller's voice channel unless the session already has a connection.
async fn ensure_voice(
    ctx: &Context,
    command: &CommandInteraction,
    session: &PlaybackSession,
    guild_id: GuildId,
) -> Result<bool> {
    let channel_id = get_user_voice_channel(ctx, guild_id, command.user.id);
    Ok(session
        .ensure_transport(channel_id, Some(announcer(ctx, command)), false)
        .await?)
}

fn announcer(ctx: &Context, command: &CommandInteraction) -> Arc<dyn AnnouncementSink> {
    Arc::new(ChannelAnnouncer::new(ctx.http.clone(), command.channel_id))
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

fn not_in_voice_embed() -> CreateEmbed {
    embeds::create_error_embed("Error", "No estás conectado a ningún canal de voz")
}

fn bot_not_in_voice_embed() -> CreateEmbed {
    embeds::create_error_embed("Error", "No estoy conectado a un canal de voz 😡")
}

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    embed: CreateEmbed,
    ephemeral: bool,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .embed(embed)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;
    Ok(())
}

async fn edit(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;
    Ok(())
}

fn option_str<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn option_i64(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

fn option_bool(command: &CommandInteraction, name: &str) -> Option<bool> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_bool())
}

fn seek_offset_ms(hour: i64, minute: i64, second: i64) -> u64 {
    let total = hour.max(0) * 3_600 + minute.max(0) * 60 + second.max(0);
    u64::try_from(total).unwrap_or(0) * 1_000
}

/// `/remove from [to]`: `to` defaults to `from + 1`.
fn remove_range(from: i64, to: Option<i64>) -> (i64, i64) {
    (from, to.unwrap_or_else(|| from.saturating_add(1)))
}

/// Time elapsed since a snowflake was minted.
fn snowflake_age(id: u64) -> Duration {
    let created_ms = (id >> 22) + DISCORD_EPOCH_MS;
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|now| now.as_millis() as u64)
        .unwrap_or(created_ms);
    Duration::from_millis(now_ms.saturating_sub(created_ms))
}
