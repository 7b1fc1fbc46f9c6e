use anyhow::Result;
use serenity::{
    all::{ChannelId, GuildId, Message, UserId},
    prelude::Context,
};
use songbird::tracks::PlayMode;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{player::Announcer, queue::QueueEntry},
    bot::CadenceBot,
};

/// Punto de entrada de cada mensaje: parsea el prefijo y despacha
pub async fn handle_message(ctx: &Context, msg: &Message, bot: &CadenceBot) -> Result<()> {
    let Some((command, arg)) = parse_command(&msg.content, &bot.config.command_prefix) else {
        return Ok(());
    };

    let Some(guild_id) = msg.guild_id else {
        debug!("Comando {} usado fuera de una guild, ignorado", command);
        return Ok(());
    };

    info!(
        "📝 Comando {}{} usado por {} en guild {}",
        bot.config.command_prefix, command, msg.author.name, guild_id
    );

    match command {
        "join" => handle_join(ctx, msg, bot, guild_id).await?,
        "leave" => handle_leave(ctx, msg, bot, guild_id).await?,
        "play" => handle_play(ctx, msg, bot, guild_id, arg).await?,
        "skip" => handle_skip(ctx, msg, bot, guild_id).await?,
        "stop" => handle_stop(ctx, msg, bot, guild_id).await?,
        "pause" => handle_pause(ctx, msg, bot, guild_id).await?,
        "resume" => handle_resume(ctx, msg, bot, guild_id).await?,
        "volume" => handle_volume(ctx, msg, bot, guild_id, arg).await?,
        _ => {
            // Cualquier mensaje puede empezar con el prefijo; solo se
            // responde a los comandos conocidos
            debug!("Comando desconocido: {}", command);
        }
    }

    Ok(())
}

/// Separa `prefijo + comando + argumento` de un mensaje.
///
/// Devuelve `None` si el mensaje no es un comando.
pub(crate) fn parse_command<'a>(
    content: &'a str,
    prefix: &str,
) -> Option<(&'a str, Option<&'a str>)> {
    let rest = content.trim().strip_prefix(prefix)?;
    let mut parts = rest.splitn(2, char::is_whitespace);

    let command = parts.next()?.trim();
    if command.is_empty() {
        return None;
    }

    let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());
    Some((command, arg))
}

// Handlers específicos para cada comando

async fn handle_join(
    ctx: &Context,
    msg: &Message,
    bot: &CadenceBot,
    guild_id: GuildId,
) -> Result<()> {
    match user_voice_channel(ctx, guild_id, msg.author.id) {
        Some(channel_id) => {
            bot.join_voice_channel(ctx, guild_id, channel_id).await?;
            msg.channel_id
                .say(&ctx.http, "Joined the voice channel.")
                .await?;
        }
        None => {
            msg.channel_id
                .say(&ctx.http, "You are not in a voice channel!")
                .await?;
        }
    }

    Ok(())
}

async fn handle_leave(
    ctx: &Context,
    msg: &Message,
    bot: &CadenceBot,
    guild_id: GuildId,
) -> Result<()> {
    if bot.get_voice_handler(guild_id).is_some() {
        bot.leave_voice_channel(ctx, guild_id).await?;
        msg.channel_id
            .say(&ctx.http, "Left the voice channel.")
            .await?;
    } else {
        msg.channel_id
            .say(&ctx.http, "I'm not connected to a voice channel.")
            .await?;
    }

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    msg: &Message,
    bot: &CadenceBot,
    guild_id: GuildId,
    arg: Option<&str>,
) -> Result<()> {
    let Some(url) = arg else {
        msg.channel_id
            .say(
                &ctx.http,
                format!("Usage: {}play <url>", bot.config.command_prefix),
            )
            .await?;
        return Ok(());
    };

    // Conectar automáticamente si no hay canal de voz
    if bot.get_voice_handler(guild_id).is_none() {
        let Some(channel_id) = user_voice_channel(ctx, guild_id, msg.author.id) else {
            msg.channel_id
                .say(&ctx.http, "You are not in a voice channel!")
                .await?;
            return Ok(());
        };
        bot.join_voice_channel(ctx, guild_id, channel_id).await?;
    }

    let call = bot
        .get_voice_handler(guild_id)
        .ok_or_else(|| anyhow::anyhow!("Sin handler de voz tras join en guild {}", guild_id))?;

    msg.channel_id
        .say(&ctx.http, format!("Adding to queue and preloading: {url}"))
        .await?;

    // El epoch se captura antes de resolver: si llega un stop mientras
    // la descarga está en vuelo, el resultado se descarta
    let epoch = bot.player.current_epoch(guild_id);

    let player = bot.player.clone();
    let resolver = bot.resolver.clone();
    let http = ctx.http.clone();
    let channel_id = msg.channel_id;
    let url = url.to_string();

    // La resolución (red + descarga) corre en segundo plano para no
    // retener este handler; la cola se muta recién con el resultado
    tokio::spawn(async move {
        let track = match resolver.resolve(&url).await {
            Ok(track) => track,
            Err(e) => {
                error!("Preload error: {}", e);
                let _ = channel_id
                    .say(&http, "An error occurred while preloading the song.")
                    .await;
                return;
            }
        };

        let title = track.title.clone();
        let entry = QueueEntry::from(track);

        match player.enqueue(guild_id, entry, epoch).await {
            Ok(true) => {
                let _ = channel_id
                    .say(&http, format!("Preloaded and added to queue: {title}"))
                    .await;

                // Arrancar solo si no hay una cadena de reproducción
                // activa; si la hay, el evento de fin avanza solo
                let announcer = Announcer::new(http.clone(), channel_id);
                if let Err(e) = player.try_start(guild_id, call, &announcer).await {
                    error!("Playback error: {:?}", e);
                    let _ = channel_id
                        .say(&http, "An error occurred during playback.")
                        .await;
                }
            }
            Ok(false) => {
                // Resolución obsoleta: hubo un stop, ya se limpió
            }
            Err(e) => {
                warn!("No se pudo encolar {}: {}", title, e);
                let _ = channel_id.say(&http, e.to_string()).await;
            }
        }
    });

    Ok(())
}

async fn handle_skip(
    ctx: &Context,
    msg: &Message,
    bot: &CadenceBot,
    guild_id: GuildId,
) -> Result<()> {
    if matches!(bot.player.play_state(guild_id).await, Some(PlayMode::Play)) {
        bot.player.skip(guild_id).await?;
        msg.channel_id.say(&ctx.http, "Skipped the song.").await?;
    } else {
        msg.channel_id
            .say(&ctx.http, "No song is currently playing.")
            .await?;
    }

    Ok(())
}

async fn handle_stop(
    ctx: &Context,
    msg: &Message,
    bot: &CadenceBot,
    guild_id: GuildId,
) -> Result<()> {
    bot.player.stop(guild_id).await?;
    msg.channel_id
        .say(&ctx.http, "Stopped playback and cleared the queue.")
        .await?;

    Ok(())
}

async fn handle_pause(
    ctx: &Context,
    msg: &Message,
    bot: &CadenceBot,
    guild_id: GuildId,
) -> Result<()> {
    if matches!(bot.player.play_state(guild_id).await, Some(PlayMode::Play)) {
        bot.player.pause(guild_id).await?;
        msg.channel_id.say(&ctx.http, "Paused the music.").await?;
    } else {
        msg.channel_id
            .say(&ctx.http, "No audio is playing currently.")
            .await?;
    }

    Ok(())
}

async fn handle_resume(
    ctx: &Context,
    msg: &Message,
    bot: &CadenceBot,
    guild_id: GuildId,
) -> Result<()> {
    if matches!(bot.player.play_state(guild_id).await, Some(PlayMode::Pause)) {
        bot.player.resume(guild_id).await?;
        msg.channel_id.say(&ctx.http, "Resumed the music.").await?;
    } else {
        msg.channel_id
            .say(&ctx.http, "The music is not paused.")
            .await?;
    }

    Ok(())
}

async fn handle_volume(
    ctx: &Context,
    msg: &Message,
    bot: &CadenceBot,
    guild_id: GuildId,
    arg: Option<&str>,
) -> Result<()> {
    let parsed: Option<f32> = arg.and_then(|a| a.parse().ok());

    match parsed {
        Some(volume) if bot.player.set_volume(guild_id, volume).is_ok() => {
            msg.channel_id
                .say(
                    &ctx.http,
                    format!("Volume set to {:.0}%", volume * 100.0),
                )
                .await?;
        }
        _ => {
            msg.channel_id
                .say(
                    &ctx.http,
                    "Please enter a volume between 0.0 and 2.0 (where 1.0 is 100%).",
                )
                .await?;
        }
    }

    Ok(())
}

// Funciones auxiliares

/// Canal de voz donde está el usuario, según la caché de la guild
fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_command_with_argument() {
        assert_eq!(
            parse_command("!play https://youtu.be/abc", "!"),
            Some(("play", Some("https://youtu.be/abc")))
        );
        assert_eq!(parse_command("!volume 1.5", "!"), Some(("volume", Some("1.5"))));
    }

    #[test]
    fn parses_bare_command() {
        assert_eq!(parse_command("!skip", "!"), Some(("skip", None)));
        assert_eq!(parse_command("  !pause  ", "!"), Some(("pause", None)));
    }

    #[test]
    fn ignores_messages_without_prefix() {
        assert_eq!(parse_command("hello there", "!"), None);
        assert_eq!(parse_command("play song", "!"), None);
    }

    #[test]
    fn ignores_bare_prefix_and_whitespace() {
        assert_eq!(parse_command("!", "!"), None);
        assert_eq!(parse_command("!   ", "!"), None);
    }

    #[test]
    fn trailing_whitespace_does_not_become_an_argument() {
        assert_eq!(parse_command("!skip   ", "!"), Some(("skip", None)));
    }

    #[test]
    fn supports_custom_prefixes() {
        assert_eq!(parse_command("?play url", "?"), Some(("play", Some("url"))));
        assert_eq!(parse_command("!play url", "?"), None);
    }
}
