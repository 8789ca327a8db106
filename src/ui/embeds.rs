use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::session::SessionSnapshot;
use crate::audio::{PlaybackState, Track};

/// Tracks shown per queue page.
pub const QUEUE_PAGE_SIZE: usize = 10;

/// Slots in the now-playing progress bar.
const PROGRESS_SLOTS: usize = 10;

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Open Music Bot";

fn author_link(track: &Track) -> String {
    let author = if track.author().is_empty() {
        "Desconocido"
    } else {
        track.author()
    };
    match track.author_url() {
        Some(url) => format!("[{}]({})", author, url),
        None => author.to_string(),
    }
}

fn track_length(track: &Track) -> String {
    if track.is_live() {
        "🔴 En vivo".to_string()
    } else {
        format_duration(track.length())
    }
}

/// Aviso que se publica en el canal cuando empieza un track
pub fn create_notice_embed(track: &Track) -> CreateEmbed {
    CreateEmbed::default()
        .description(format!(
            "🎶 Now playing: [{}]({})",
            track.title(),
            track.source_url()
        ))
        .color(colors::MUSIC_PURPLE)
}

/// Crea un embed para mostrar la canción actual con su progreso
pub fn create_now_playing_embed(snapshot: &SessionSnapshot) -> CreateEmbed {
    let Some(track) = snapshot.now_playing() else {
        return create_info_embed("Sin reproducción", "No hay nada sonando ahora mismo 🗿");
    };

    let status = match snapshot.state {
        PlaybackState::Paused => "⏸️ En pausa",
        _ => "🎵 Reproduciendo Ahora",
    };
    let position = Duration::from_millis(snapshot.position_ms);

    let progress = if track.is_live() {
        format!("{} • 🔴 En vivo", format_duration(position))
    } else {
        format!(
            "{} `{}` {}",
            format_duration(position),
            progress_bar(snapshot.position_ms, track.length_seconds()),
            format_duration(track.length())
        )
    };

    CreateEmbed::default()
        .title(status)
        .description(format!("**[{}]({})**", track.title(), track.source_url()))
        .color(colors::SUCCESS_GREEN)
        .field("⏱️ Progreso", progress, false)
        .field("🎤 Artista", author_link(track), true)
        .field("🎚️ Bitrate", format!("{}kbps", snapshot.bitrate_bps / 1000), true)
        .thumbnail(track.thumbnail_url())
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar que se agregó una canción
pub fn create_track_added_embed(track: &Track, position: usize) -> CreateEmbed {
    let position = if position == 0 {
        "Sonando ahora".to_string()
    } else {
        format!("#{}", position)
    };

    CreateEmbed::default()
        .title("✅ Canción Agregada")
        .description(format!("[{}]({})", track.title(), track.source_url()))
        .color(colors::SUCCESS_GREEN)
        .field("📍 Posición", position, true)
        .field("⏱️ Duración", track_length(track), true)
        .field("🎤 Artista", author_link(track), true)
        .thumbnail(track.thumbnail_url())
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar que una playlist fue agregada
pub fn create_playlist_added_embed(track_count: usize, shuffled: bool) -> CreateEmbed {
    let mut description = format!("📃 Se agregaron **{}** canciones a la cola", track_count);
    if shuffled {
        description.push_str(" • 🔀 **Aleatorio**");
    }

    create_success_embed("Playlist Agregada", &description)
}

/// Number of queue pages after the head track, never less than one.
pub fn queue_page_count(queue_len: usize) -> usize {
    let upcoming = queue_len.saturating_sub(1);
    upcoming.div_ceil(QUEUE_PAGE_SIZE).max(1)
}

/// Crea un embed para mostrar la cola de reproducción (páginas desde 0)
pub fn create_queue_embed(snapshot: &SessionSnapshot, page: usize) -> CreateEmbed {
    let Some(current) = snapshot.now_playing() else {
        return CreateEmbed::default()
            .title("📋 Cola de Reproducción")
            .description("😴 **La cola está vacía** 💀\n\n💡 Usa `/add <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    };

    let total_pages = queue_page_count(snapshot.queue.len());
    let page = page.min(total_pages - 1);

    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE)
        .field(
            "▶️ Reproduciendo",
            format!(
                "**{}** - {}\n{} `{}`",
                current.title(),
                author_link(current),
                progress_bar(snapshot.position_ms, current.length_seconds()),
                track_length(current)
            ),
            false,
        );

    let start = 1 + page * QUEUE_PAGE_SIZE;
    let upcoming: Vec<String> = snapshot
        .queue
        .iter()
        .enumerate()
        .skip(start)
        .take(QUEUE_PAGE_SIZE)
        .map(|(index, track)| {
            format!(
                "**#{}** [{}]({}) `[{}]` - {}",
                index,
                track.title(),
                track.source_url(),
                track_length(track),
                track.author()
            )
        })
        .collect();

    if !upcoming.is_empty() {
        embed = embed.field("Próximas canciones", upcoming.join("\n"), false);
    }

    let total: u64 = snapshot.queue.iter().map(Track::length_seconds).sum();
    embed = embed.field(
        "Información",
        format!(
            "**Total:** {} canciones • **Duración:** {}",
            snapshot.queue.len(),
            format_duration(Duration::from_secs(total))
        ),
        false,
    );

    embed
        .footer(CreateEmbedFooter::new(format!(
            "Página {} de {} • Open Music Bot",
            page + 1,
            total_pages
        )))
        .timestamp(Timestamp::now())
}

pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("ℹ️ {}", title))
        .description(description)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed con la latencia del bot
pub fn create_ping_embed(api: Duration, latency: Duration) -> CreateEmbed {
    CreateEmbed::default()
        .color(colors::INFO_BLUE)
        .field("💓 API", format!("{}ms", api.as_millis()), true)
        .field("⏱️ Latencia", format!("{}ms", latency.as_millis()), true)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Barra de progreso de diez posiciones
pub fn progress_bar(position_ms: u64, length_seconds: u64) -> String {
    let filled = if length_seconds == 0 {
        0
    } else {
        let ratio = position_ms as f64 / (length_seconds as f64 * 1000.0);
        ((ratio * PROGRESS_SLOTS as f64) as usize).min(PROGRESS_SLOTS)
    };

    "▰".repeat(filled) + &"▱".repeat(PROGRESS_SLOTS - filled)
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00");
        assert_eq!(format_duration(Duration::from_secs(212)), "3:32");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "1:02:05");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0, 200), "▱▱▱▱▱▱▱▱▱▱");
        assert_eq!(progress_bar(100_000, 200), "▰▰▰▰▰▱▱▱▱▱");
        assert_eq!(progress_bar(500_000, 200), "▰▰▰▰▰▰▰▰▰▰");
        assert_eq!(progress_bar(10_000, 0), "▱▱▱▱▱▱▱▱▱▱");
    }

    #[test]
    fn test_queue_page_count() {
        assert_eq!(queue_page_count(0), 1);
        assert_eq!(queue_page_count(1), 1);
        assert_eq!(queue_page_count(11), 1);
        assert_eq!(queue_page_count(12), 2);
        assert_eq!(queue_page_count(31), 3);
    }
}
