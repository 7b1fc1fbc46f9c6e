use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{error, info, warn};
use url::Url;

use super::{ResolveError, ResolvedTrack, TrackResolver};

/// Resolver que usa yt-dlp como subproceso.
///
/// Una sola invocación descarga el mejor formato de audio al directorio
/// configurado y emite el info-JSON del video por stdout, del que se
/// extraen título, URL de streaming directa y ruta del archivo.
pub struct YtDlpResolver {
    download_dir: PathBuf,
}

impl YtDlpResolver {
    pub fn new(download_dir: PathBuf) -> Self {
        Self { download_dir }
    }

    /// Extrae el track del info-JSON que imprime `yt-dlp --print-json`.
    fn parse_info(raw: &[u8]) -> Result<ResolvedTrack, ResolveError> {
        let info: YtDlpInfo = serde_json::from_slice(raw)?;

        // Con un solo formato seleccionado la URL directa queda en el nivel
        // superior; si no, en la lista de descargas solicitadas.
        let stream_url = info
            .url
            .clone()
            .or_else(|| {
                info.requested_downloads
                    .iter()
                    .find_map(|download| download.url.clone())
            })
            .ok_or(ResolveError::NoAudioStream)?;

        let file_path = info
            .requested_downloads
            .iter()
            .find_map(|download| download.filepath.clone())
            .or_else(|| info.filename.clone())
            .ok_or(ResolveError::MissingFile)?;

        Ok(ResolvedTrack {
            title: info.title,
            stream_url,
            file_path,
            resolved_at: Utc::now(),
        })
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, url: &str) -> Result<ResolvedTrack, ResolveError> {
        if !self.is_valid_url(url) {
            return Err(ResolveError::InvalidUrl(url.to_string()));
        }

        info!("⬇️ Resolviendo y descargando: {}", url);

        let output_template = self.download_dir.join("%(id)s.%(ext)s");

        let mut cmd = tokio::process::Command::new("yt-dlp");
        cmd.args([
            "--format",
            "bestaudio/best",
            "--no-playlist",
            "--print-json",
            "--no-progress",
            "--no-warnings",
            "--socket-timeout",
            "30",
            "--retries",
            "3",
        ]);
        cmd.arg("--output").arg(&output_template);
        cmd.arg(url);

        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("❌ yt-dlp falló para {}: {}", url, stderr);
            return Err(ResolveError::ExtractorFailed { stderr });
        }

        let track = Self::parse_info(&output.stdout)?;
        info!(
            "✅ Track resuelto: {} ({})",
            track.title,
            track.file_path.display()
        );

        Ok(track)
    }

    fn is_valid_url(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => matches!(parsed.scheme(), "http" | "https"),
            Err(_) => false,
        }
    }

    async fn verify_dependencies(&self) -> Result<(), ResolveError> {
        let check = tokio::process::Command::new("yt-dlp")
            .arg("--version")
            .output()
            .await;

        match check {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                info!("✅ yt-dlp versión: {}", version.trim());
                Ok(())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                warn!("❌ yt-dlp no funcional: {}", stderr);
                Err(ResolveError::ExtractorFailed { stderr })
            }
            Err(e) => {
                warn!("❌ yt-dlp no encontrado. Instala con: pip install yt-dlp");
                Err(ResolveError::Io(e))
            }
        }
    }

    fn resolver_name(&self) -> &'static str {
        "YtDlp"
    }
}

/// Subconjunto del info-JSON de yt-dlp que nos interesa
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(rename = "_filename", default)]
    filename: Option<PathBuf>,
    #[serde(default)]
    requested_downloads: Vec<RequestedDownload>,
}

#[derive(Debug, Deserialize)]
struct RequestedDownload {
    #[serde(default)]
    filepath: Option<PathBuf>,
    #[serde(default)]
    url: Option<String>,
}
