use anyhow::Result;
use dashmap::DashMap;
use parking_lot::RwLock;
use serenity::{
    http::Http,
    model::id::{ChannelId, GuildId},
};
use songbird::{
    input::{HttpRequest, Input},
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent,
};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::audio::queue::{QueueEntry, TrackQueue};

/// Estado de reproducción de una guild: cola, volumen y epoch de
/// resoluciones. Nada de globales; cada guild tiene su sesión.
struct GuildSession {
    queue: RwLock<TrackQueue>,
    /// Se lee al iniciar el siguiente track, nunca se aplica al actual
    volume: RwLock<f32>,
    /// Contador de generación: `stop` lo incrementa y una resolución
    /// iniciada bajo un epoch anterior se descarta al llegar
    epoch: AtomicU64,
    /// Cadena de reproducción activa: arbitra entre el arranque por
    /// comando y el avance por evento de fin, para que nunca arranquen
    /// dos tracks a la vez
    playing: AtomicBool,
}

impl GuildSession {
    fn new(default_volume: f32, max_queue_size: usize) -> Self {
        Self {
            queue: RwLock::new(TrackQueue::new(max_queue_size)),
            volume: RwLock::new(default_volume),
            epoch: AtomicU64::new(0),
            playing: AtomicBool::new(false),
        }
    }
}

/// Destino de los mensajes de estado ("Now playing", errores de
/// reproducción) que se emiten fuera de un handler de comando.
#[derive(Clone)]
pub struct Announcer {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl Announcer {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }

    pub async fn say(&self, content: impl Into<String>) {
        if let Err(e) = self.channel_id.say(&self.http, content.into()).await {
            warn!("⚠️ No se pudo enviar mensaje al canal: {:?}", e);
        }
    }
}

pub struct AudioPlayer {
    sessions: DashMap<GuildId, Arc<GuildSession>>,
    current_tracks: DashMap<GuildId, TrackHandle>,
    http_client: reqwest::Client,
    default_volume: f32,
    max_queue_size: usize,
}

impl AudioPlayer {
    pub fn new(default_volume: f32, max_queue_size: usize) -> Result<Self> {
        // Cliente compartido para streaming; sin timeout global porque un
        // track puede durar más que cualquier límite razonable
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (compatible; Discord Music Bot)")
            .build()?;

        Ok(Self {
            sessions: DashMap::new(),
            current_tracks: DashMap::new(),
            http_client,
            default_volume,
            max_queue_size,
        })
    }

    /// Epoch actual de la guild; capturarlo antes de iniciar una
    /// resolución permite descartar el resultado si hubo un `stop`
    pub fn current_epoch(&self, guild_id: GuildId) -> u64 {
        self.session(guild_id).epoch.load(Ordering::Acquire)
    }

    /// Encola un track resuelto.
    ///
    /// Devuelve `false` si la resolución es de un epoch anterior (hubo un
    /// `stop` mientras descargaba); en ese caso el archivo se elimina y no
    /// se encola. Con la cola llena el archivo también se elimina y el
    /// error lleva el mensaje para el usuario.
    pub async fn enqueue(
        &self,
        guild_id: GuildId,
        entry: QueueEntry,
        epoch: u64,
    ) -> Result<bool> {
        let session = self.session(guild_id);

        let rejected = {
            let mut queue = session.queue.write();
            if session.epoch.load(Ordering::Acquire) != epoch {
                Some((entry, true))
            } else {
                match queue.push(entry) {
                    Ok(()) => None,
                    Err(entry) => Some((entry, false)),
                }
            }
        };

        match rejected {
            None => Ok(true),
            Some((entry, stale)) => {
                remove_track_file(&entry.file_path).await;
                if stale {
                    info!("🗑️ Descartando resolución obsoleta tras stop: {}", entry.title);
                    Ok(false)
                } else {
                    anyhow::bail!("The queue is full (max {} songs).", self.max_queue_size)
                }
            }
        }
    }

    /// Reproduce el siguiente track de la cola, si hay alguno.
    ///
    /// Como máximo un track suena a la vez: el encadenamiento ocurre solo
    /// desde el evento de fin del track anterior o desde un `play` con la
    /// guild inactiva.
    pub async fn play_next(
        self: &Arc<Self>,
        guild_id: GuildId,
        call: Arc<Mutex<Call>>,
        announcer: &Announcer,
    ) -> Result<()> {
        let session = self.session(guild_id);

        let next = session.queue.write().pop();
        let Some(entry) = next else {
            self.current_tracks.remove(&guild_id);
            session.playing.store(false, Ordering::Release);
            debug!("📭 Cola vacía en guild {}, reproducción inactiva", guild_id);
            return Ok(());
        };

        // El volumen vigente se aplica al track que arranca ahora
        let volume = *session.volume.read();

        info!(
            "🎵 Reproduciendo: {} al {}% en guild {}",
            entry.title,
            (volume * 100.0) as u32,
            guild_id
        );

        let source = HttpRequest::new(self.http_client.clone(), entry.stream_url.clone());

        let track_handle = {
            let mut call_lock = call.lock().await;
            call_lock.play_input(Input::from(source))
        };

        let _ = track_handle.set_volume(volume);

        // El fin del track (natural o por stop/skip) dispara la limpieza
        // del archivo y el avance de la cola
        if let Err(e) = track_handle.add_event(
            Event::Track(TrackEvent::End),
            TrackEndHandler {
                player: Arc::clone(self),
                guild_id,
                call: call.clone(),
                file_path: entry.file_path.clone(),
                announcer: announcer.clone(),
            },
        ) {
            // Sin evento de fin no hay avance ni limpieza: mejor cortar
            // el track y liberar la cadena
            let _ = track_handle.stop();
            session.playing.store(false, Ordering::Release);
            remove_track_file(&entry.file_path).await;
            return Err(anyhow::anyhow!("Error al agregar event handler: {}", e));
        }

        self.current_tracks.insert(guild_id, track_handle);

        announcer
            .say(format!(
                "Now playing: {} at {:.0}% volume",
                entry.title,
                volume * 100.0
            ))
            .await;

        Ok(())
    }

    /// Arranca la cadena de reproducción si no hay una activa.
    ///
    /// El flag de la sesión arbitra entre este camino (un `play` con la
    /// guild inactiva) y el avance por evento de fin: si la cadena ya
    /// está viva, el track recién encolado espera su turno aunque el
    /// estado del track actual ya figure como terminado. Devuelve si la
    /// cadena fue adquirida.
    pub async fn try_start(
        self: &Arc<Self>,
        guild_id: GuildId,
        call: Arc<Mutex<Call>>,
        announcer: &Announcer,
    ) -> Result<bool> {
        let session = self.session(guild_id);
        if session
            .playing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("▶️ Cadena de reproducción ya activa en guild {}", guild_id);
            return Ok(false);
        }

        self.play_next(guild_id, call, announcer).await?;
        Ok(true)
    }

    /// Cierre de un track que terminó: elimina su archivo y recién
    /// después intenta avanzar la cola
    pub async fn finish_track(
        self: &Arc<Self>,
        guild_id: GuildId,
        call: Arc<Mutex<Call>>,
        file_path: &Path,
        announcer: &Announcer,
    ) -> Result<()> {
        remove_track_file(file_path).await;
        self.play_next(guild_id, call, announcer).await
    }

    /// Detiene el track actual; el evento de fin se encarga de limpiar
    /// su archivo y arrancar el siguiente
    pub async fn skip(&self, guild_id: GuildId) -> Result<()> {
        if let Some(track) = self.current_tracks.get(&guild_id) {
            let _ = track.stop();
            info!("⏭️ Track saltado en guild {}", guild_id);
        }
        Ok(())
    }

    /// Detiene la reproducción y limpia la cola.
    ///
    /// Elimina el archivo de cada entrada pendiente (una sola vez cada
    /// uno) e invalida las resoluciones en vuelo. El archivo del track
    /// actual lo limpia su propio evento de fin.
    pub async fn stop(&self, guild_id: GuildId) -> Result<()> {
        let session = self.session(guild_id);

        // El epoch y el drain cambian bajo el mismo lock: una resolución
        // en vuelo no puede colarse entre el bump y la limpieza
        let drained = {
            let mut queue = session.queue.write();
            session.epoch.fetch_add(1, Ordering::AcqRel);
            queue.drain()
        };

        for entry in &drained {
            remove_track_file(&entry.file_path).await;
        }

        if let Some((_, track)) = self.current_tracks.remove(&guild_id) {
            let _ = track.stop();
        }

        // Si el driver ya murió (desconexión) el evento de fin puede
        // perderse; liberar la cadena acá evita dejar la sesión trabada
        session.playing.store(false, Ordering::Release);

        info!("⏹️ Reproducción detenida en guild {}", guild_id);
        Ok(())
    }

    /// Pausa la reproducción actual
    pub async fn pause(&self, guild_id: GuildId) -> Result<()> {
        if let Some(track) = self.current_tracks.get(&guild_id) {
            let _ = track.pause();
            info!("⏸️ Reproducción pausada en guild {}", guild_id);
        }
        Ok(())
    }

    /// Reanuda la reproducción
    pub async fn resume(&self, guild_id: GuildId) -> Result<()> {
        if let Some(track) = self.current_tracks.get(&guild_id) {
            let _ = track.play();
            info!("▶️ Reproducción reanudada en guild {}", guild_id);
        }
        Ok(())
    }

    /// Ajusta el volumen de la sesión; afecta solo a los tracks que
    /// arranquen después, nunca al que está sonando
    pub fn set_volume(&self, guild_id: GuildId, volume: f32) -> Result<()> {
        if !(0.0..=2.0).contains(&volume) {
            anyhow::bail!("volume out of range: {}", volume);
        }

        let session = self.session(guild_id);
        *session.volume.write() = volume;
        info!(
            "🔊 Volumen ajustado a {}% en guild {}",
            (volume * 100.0) as u32,
            guild_id
        );
        Ok(())
    }

    /// Volumen vigente de la sesión
    #[allow(dead_code)]
    pub fn volume(&self, guild_id: GuildId) -> f32 {
        *self.session(guild_id).volume.read()
    }

    /// Estado del track actual, si hay uno
    pub async fn play_state(&self, guild_id: GuildId) -> Option<PlayMode> {
        let track = self.current_tracks.get(&guild_id)?.value().clone();
        track.get_info().await.ok().map(|state| state.playing)
    }

    /// Verifica si hay algo sonando o en pausa
    #[allow(dead_code)]
    pub async fn is_active(&self, guild_id: GuildId) -> bool {
        matches!(
            self.play_state(guild_id).await,
            Some(PlayMode::Play | PlayMode::Pause)
        )
    }

    /// Cantidad de tracks pendientes en la cola
    #[allow(dead_code)]
    pub fn queue_len(&self, guild_id: GuildId) -> usize {
        self.session(guild_id).queue.read().len()
    }

    fn session(&self, guild_id: GuildId) -> Arc<GuildSession> {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                Arc::new(GuildSession::new(self.default_volume, self.max_queue_size))
            })
            .clone()
    }
}

/// Elimina el archivo de un track de forma idempotente: que ya no
/// exista no es un error
pub async fn remove_track_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("🗑️ Archivo eliminado: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Archivo ya eliminado: {}", path.display());
        }
        Err(e) => warn!("⚠️ No se pudo eliminar {}: {}", path.display(), e),
    }
}

/// Callback de fin de reproducción.
///
/// songbird lo invoca en su propia tarea tanto al terminar naturalmente
/// como al detener el track; delega en [`AudioPlayer::finish_track`].
struct TrackEndHandler {
    player: Arc<AudioPlayer>,
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
    file_path: PathBuf,
    announcer: Announcer,
}

#[async_trait::async_trait]
impl VoiceEventHandler for TrackEndHandler {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        debug!("🎵 Track terminó en guild {}", self.guild_id);

        if let Err(e) = self
            .player
            .finish_track(
                self.guild_id,
                self.call.clone(),
                &self.file_path,
                &self.announcer,
            )
            .await
        {
            error!("Error al reproducir siguiente track: {:?}", e);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::queue::QueueEntry;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn player(max_queue_size: usize) -> Arc<AudioPlayer> {
        Arc::new(AudioPlayer::new(1.0, max_queue_size).unwrap())
    }

    fn entry_with_file(dir: &tempfile::TempDir, name: &str) -> QueueEntry {
        let file_path = dir.path().join(format!("{name}.m4a"));
        fs::write(&file_path, b"audio").unwrap();
        QueueEntry {
            stream_url: format!("https://cdn.example.com/{name}.m4a"),
            file_path,
            title: name.to_string(),
            enqueued_at: Utc::now(),
        }
    }

    fn guild() -> GuildId {
        GuildId::new(42)
    }

    // Call sin gateway: alcanza para los caminos que no tocan el driver
    fn standalone_call() -> Arc<Mutex<Call>> {
        Arc::new(Mutex::new(Call::standalone::<
            songbird::id::GuildId,
            songbird::id::UserId,
        >(
            guild().into(),
            serenity::model::id::UserId::new(1).into(),
        )))
    }

    fn test_announcer() -> Announcer {
        Announcer::new(Arc::new(Http::new("")), ChannelId::new(1))
    }

    #[test]
    fn set_volume_accepts_range_bounds() {
        let player = player(10);
        assert!(player.set_volume(guild(), 0.0).is_ok());
        assert!(player.set_volume(guild(), 2.0).is_ok());
        assert!(player.set_volume(guild(), 1.5).is_ok());
        assert_eq!(player.volume(guild()), 1.5);
    }

    #[test]
    fn set_volume_rejects_out_of_range_and_keeps_prior_value() {
        let player = player(10);
        player.set_volume(guild(), 0.8).unwrap();

        assert!(player.set_volume(guild(), 2.1).is_err());
        assert!(player.set_volume(guild(), -0.1).is_err());
        assert_eq!(player.volume(guild()), 0.8);
    }

    #[tokio::test]
    async fn enqueue_with_current_epoch_appends() {
        let dir = tempfile::tempdir().unwrap();
        let player = player(10);
        let epoch = player.current_epoch(guild());

        let accepted = player
            .enqueue(guild(), entry_with_file(&dir, "a"), epoch)
            .await
            .unwrap();
        assert!(accepted);
        assert_eq!(player.queue_len(guild()), 1);
    }

    #[tokio::test]
    async fn stop_clears_queue_deletes_files_and_bumps_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let player = player(10);
        let epoch = player.current_epoch(guild());

        let a = entry_with_file(&dir, "a");
        let b = entry_with_file(&dir, "b");
        let (path_a, path_b) = (a.file_path.clone(), b.file_path.clone());

        player.enqueue(guild(), a, epoch).await.unwrap();
        player.enqueue(guild(), b, epoch).await.unwrap();
        assert_eq!(player.queue_len(guild()), 2);

        player.stop(guild()).await.unwrap();

        assert_eq!(player.queue_len(guild()), 0);
        assert!(!path_a.exists());
        assert!(!path_b.exists());
        assert_eq!(player.current_epoch(guild()), epoch + 1);
    }

    #[tokio::test]
    async fn stale_resolution_is_discarded_and_its_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let player = player(10);

        // Epoch capturado antes del stop, como hace el comando play
        let epoch = player.current_epoch(guild());
        player.stop(guild()).await.unwrap();

        let late = entry_with_file(&dir, "late");
        let late_path = late.file_path.clone();

        let accepted = player.enqueue(guild(), late, epoch).await.unwrap();
        assert!(!accepted);
        assert_eq!(player.queue_len(guild()), 0);
        assert!(!late_path.exists());
    }

    #[tokio::test]
    async fn full_queue_rejects_enqueue_and_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let player = player(1);
        let epoch = player.current_epoch(guild());

        player
            .enqueue(guild(), entry_with_file(&dir, "a"), epoch)
            .await
            .unwrap();

        let overflow = entry_with_file(&dir, "b");
        let overflow_path = overflow.file_path.clone();

        let result = player.enqueue(guild(), overflow, epoch).await;
        assert!(result.is_err());
        assert_eq!(player.queue_len(guild()), 1);
        assert!(!overflow_path.exists());
    }

    #[tokio::test]
    async fn remove_track_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.m4a");
        fs::write(&path, b"audio").unwrap();

        remove_track_file(&path).await;
        assert!(!path.exists());

        // La segunda eliminación no falla ni hace ruido
        remove_track_file(&path).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn finish_track_deletes_the_file_before_advancing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finished.m4a");
        fs::write(&path, b"audio").unwrap();

        let player = player(10);
        player
            .finish_track(guild(), standalone_call(), &path, &test_announcer())
            .await
            .unwrap();

        // El archivo del track terminado se eliminó y el avance sobre la
        // cola vacía quedó en no-op: nada sonando, nada pendiente
        assert!(!path.exists());
        assert!(player.play_state(guild()).await.is_none());
        assert_eq!(player.queue_len(guild()), 0);
    }

    #[tokio::test]
    async fn try_start_releases_the_chain_when_the_queue_is_empty() {
        let player = player(10);

        let acquired = player
            .try_start(guild(), standalone_call(), &test_announcer())
            .await
            .unwrap();
        assert!(acquired);

        // Con la cola vacía la cadena se libera, así que un segundo
        // arranque vuelve a adquirirla en vez de quedar bloqueado
        let acquired_again = player
            .try_start(guild(), standalone_call(), &test_announcer())
            .await
            .unwrap();
        assert!(acquired_again);
        assert!(player.play_state(guild()).await.is_none());
    }

    #[tokio::test]
    async fn play_state_is_none_when_idle() {
        let player = player(10);
        assert!(player.play_state(guild()).await.is_none());
        assert!(!player.is_active(guild()).await);
    }
}
