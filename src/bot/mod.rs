//! # Bot Module
//!
//! Discord-facing layer of Cadence.
//!
//! [`CadenceBot`] implements Serenity's [`EventHandler`] and owns the
//! per-process state: configuration, the [`AudioPlayer`] with its
//! per-guild sessions, the track resolver, and the voice call handle of
//! each connected guild. Commands arrive as prefix-text messages
//! (`!play <url>`, `!skip`, ...) and are dispatched by [`handlers`];
//! every command isolates its own failure, nothing is fatal.

use anyhow::Result;
use dashmap::DashMap;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Message, Ready, VoiceState},
    async_trait,
};
use songbird::driver::Bitrate;
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod handlers;

use crate::{
    audio::player::AudioPlayer,
    config::Config,
    sources::{TrackResolver, YtDlpResolver},
};

pub struct CadenceBot {
    /// Configuración cargada de variables de entorno
    pub config: Arc<Config>,
    /// Controlador de reproducción con las sesiones por guild
    pub player: Arc<AudioPlayer>,
    /// Resolver de URLs a tracks descargados
    pub resolver: Arc<dyn TrackResolver>,
    /// Handler de voz por guild conectada
    voice_handlers: DashMap<GuildId, Arc<tokio::sync::Mutex<songbird::Call>>>,
}

impl CadenceBot {
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let player = Arc::new(AudioPlayer::new(
            config.default_volume,
            config.max_queue_size,
        )?);
        let resolver: Arc<dyn TrackResolver> =
            Arc::new(YtDlpResolver::new(config.download_dir.clone()));

        Ok(Self {
            config,
            player,
            resolver,
            voice_handlers: DashMap::new(),
        })
    }

    /// Conecta el bot a un canal de voz y guarda el handler.
    ///
    /// Aplica el bitrate configurado al call recién creado; el resto del
    /// formato (48kHz estéreo) es fijo en el driver.
    pub async fn join_voice_channel(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

        match manager.join(guild_id, channel_id).await {
            Ok(call) => {
                {
                    let mut call_lock = call.lock().await;
                    call_lock.set_bitrate(Bitrate::BitsPerSecond(
                        self.config.audio.bitrate_kbps as i32 * 1000,
                    ));
                }

                self.voice_handlers.insert(guild_id, call.clone());
                info!("🔊 Conectado al canal de voz en guild {}", guild_id);
                Ok(())
            }
            Err(e) => {
                error!("Error al obtener handler de voz: {:?}", e);
                Err(anyhow::anyhow!("Error al conectar al canal de voz"))
            }
        }
    }

    /// Desconecta el bot del canal de voz de la guild
    pub async fn leave_voice_channel(&self, ctx: &Context, guild_id: GuildId) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

        manager.remove(guild_id).await?;
        self.voice_handlers.remove(&guild_id);

        info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        Ok(())
    }

    /// Handler de voz de la guild, si el bot está conectado
    pub fn get_voice_handler(
        &self,
        guild_id: GuildId,
    ) -> Option<Arc<tokio::sync::Mutex<songbird::Call>>> {
        self.voice_handlers.get(&guild_id).map(|h| h.clone())
    }
}

#[async_trait]
impl EventHandler for CadenceBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.resolver.verify_dependencies().await {
            warn!("⚠️ yt-dlp no disponible, el comando play va a fallar: {}", e);
        }
    }

    /// Dispatch de comandos con prefijo.
    ///
    /// Cada evento corre en su propia tarea de serenity, así que un
    /// comando lento no bloquea a los demás. Los errores se loguean y el
    /// bot sigue.
    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        if let Err(e) = handlers::handle_message(&ctx, &msg, self).await {
            error!("Error manejando comando: {:?}", e);
        }
    }

    /// Limpieza cuando el bot es desconectado del canal de voz
    /// (por `leave`, por un moderador o por Discord)
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;

        if new.user_id == current_user_id && old.is_some() && new.channel_id.is_none() {
            if let Some(guild_id) = new.guild_id {
                info!("🔌 Bot desconectado en guild {}", guild_id);

                self.voice_handlers.remove(&guild_id);

                // Al cortar la sesión no deben quedar descargas huérfanas
                if let Err(e) = self.player.stop(guild_id).await {
                    error!("Error al detener reproducción: {:?}", e);
                }
            }
        }
    }
}
