use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// Bitrates offered by `/bitrate`, in kbps.
pub const BITRATE_CHOICES: [u32; 5] = [8, 16, 32, 64, 96];

fn all_commands() -> Vec<CreateCommand> {
    vec![
        join_command(),
        leave_command(),
        add_command(),
        playlist_command(),
        skip_command(),
        seek_command(),
        queue_command(),
        nowplaying_command(),
        clear_command(),
        shuffle_command(),
        remove_command(),
        resume_command(),
        pause_command(),
        bitrate_command(),
        ping_command(),
        reset_command(),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

// Comandos de conexión

fn join_command() -> CreateCommand {
    CreateCommand::new("join").description("Conecta el bot a tu canal de voz")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Desconecta el bot del canal de voz")
}

// Comandos de cola

fn add_command() -> CreateCommand {
    CreateCommand::new("add")
        .description("Agrega una canción al final de la cola")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL o término de búsqueda",
            )
            .required(true),
        )
}

fn playlist_command() -> CreateCommand {
    CreateCommand::new("playlist")
        .description("Agrega una playlist a la cola")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "url", "URL de la playlist")
                .required(true),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::Boolean,
            "shuffle",
            "Mezclar la playlist antes de agregarla",
        ))
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip")
        .description("Salta canciones de la cola")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "amount",
                "Cantidad de canciones a saltar",
            )
            .min_int_value(1),
        )
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Muestra la cola de reproducción")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "page", "Página de la cola")
                .min_int_value(1),
        )
}

fn clear_command() -> CreateCommand {
    CreateCommand::new("clear").description("Elimina todas las canciones de la cola")
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Mezcla la cola aleatoriamente")
}

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Elimina canciones de la cola (ambos extremos incluidos)")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "from",
                "Posición desde la que eliminar",
            )
            .required(true),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::Integer,
            "to",
            "Posición hasta la que eliminar (por defecto: from+1)",
        ))
}

// Comandos de reproducción

fn seek_command() -> CreateCommand {
    let unit = |name: &str, description: &str, max: u64| {
        CreateCommandOption::new(CommandOptionType::Integer, name, description)
            .min_int_value(0)
            .max_int_value(max)
            .required(true)
    };

    CreateCommand::new("seek")
        .description("Salta a un momento de la canción actual")
        .add_option(unit("hour", "Horas", 23))
        .add_option(unit("minute", "Minutos", 59))
        .add_option(unit("second", "Segundos", 59))
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Muestra la canción actual")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Reanuda la reproducción")
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pausa la reproducción actual")
}

fn bitrate_command() -> CreateCommand {
    let quality = BITRATE_CHOICES.iter().fold(
        CreateCommandOption::new(CommandOptionType::Integer, "quality", "Calidad del audio")
            .required(true),
        |option, kbps| option.add_int_choice(format!("{}kbps", kbps), *kbps as i32),
    );

    CreateCommand::new("bitrate")
        .description("Cambia la calidad del audio (por defecto: 64kbps)")
        .add_option(quality)
}

// Comandos adicionales

fn ping_command() -> CreateCommand {
    CreateCommand::new("ping").description("Muestra la latencia del bot")
}

fn reset_command() -> CreateCommand {
    CreateCommand::new("reset")
        .description("Reinicia por completo la sesión de música del servidor")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_command_is_registered() {
        assert_eq!(all_commands().len(), 16);
    }

    #[test]
    fn test_bitrate_choices_are_in_range() {
        for kbps in BITRATE_CHOICES {
            let bps = kbps * 1000;
            assert!((crate::audio::MIN_BITRATE..=crate::audio::MAX_BITRATE).contains(&bps));
        }
    }
}
