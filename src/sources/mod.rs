//! # Sources Module
//!
//! Track resolution: turning a user-supplied URL into something the
//! audio layer can play.
//!
//! A resolver produces a [`ResolvedTrack`] containing the track title,
//! a direct audio stream URL, and the path of the file it downloaded
//! as a side effect. Ownership of that file passes to the queue entry
//! built from the result; it must be deleted exactly when the track
//! finishes playing or the queue is cleared.

pub mod ytdlp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

pub use ytdlp::YtDlpResolver;

/// Errores de resolución de tracks
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid or unsupported URL: {0}")]
    InvalidUrl(String),

    #[error("yt-dlp failed: {stderr}")]
    ExtractorFailed { stderr: String },

    #[error("no suitable audio stream found")]
    NoAudioStream,

    #[error("yt-dlp reported no downloaded file")]
    MissingFile,

    #[error("yt-dlp metadata was not valid JSON: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("failed to run yt-dlp: {0}")]
    Io(#[from] std::io::Error),
}

/// Resultado exitoso de una resolución
#[derive(Debug, Clone)]
pub struct ResolvedTrack {
    pub title: String,
    pub stream_url: String,
    pub file_path: PathBuf,
    #[allow(dead_code)]
    pub resolved_at: DateTime<Utc>,
}

/// Trait común para resolvers de tracks
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resuelve una URL a un track reproducible, descargando el audio
    async fn resolve(&self, url: &str) -> Result<ResolvedTrack, ResolveError>;

    /// Verifica si la URL es válida para este resolver
    fn is_valid_url(&self, url: &str) -> bool;

    /// Verifica que las dependencias externas estén disponibles
    async fn verify_dependencies(&self) -> Result<(), ResolveError>;

    /// Nombre del resolver
    #[allow(dead_code)]
    fn resolver_name(&self) -> &'static str;
}
