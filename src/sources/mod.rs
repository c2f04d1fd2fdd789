//! # Sources
//!
//! Everything that turns a [`Track`](crate::audio::track::Track) reference
//! into a [`StreamLocator`](crate::audio::track::StreamLocator).
//!
//! - [`SourceProvider`]: the seam to an external metadata/stream provider
//!   (text search plus extraction of stream candidates).
//! - [`resolver::SourceResolver`]: the staged pipeline (direct URL fast path,
//!   search, extraction with format selection, one relaxed retry).
//! - [`ytdlp::YtDlpProvider`]: provider backed by the `yt-dlp` binary.

pub mod direct_url;
pub mod resolver;
pub mod ytdlp;

use async_trait::async_trait;

use crate::error::ProviderError;

pub use resolver::{Resolved, ResolutionStage, ResolverSettings, SourceResolver};
pub use ytdlp::YtDlpProvider;

/// Cómo elegir entre los formatos que ofrece el proveedor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSelector {
    /// Mejor audio disponible.
    Best,
    /// Menor calidad; se usa en el reintento tras un fallo transitorio.
    Relaxed,
}

/// Un formato de stream ofrecido por el proveedor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamCandidate {
    pub url: String,
    pub format_id: Option<String>,
    pub container: Option<String>,
    pub bitrate_kbps: Option<f64>,
    pub sample_rate: Option<u32>,
    pub filesize: Option<u64>,
    pub audio_only: bool,
}

/// Resultado de extraer una página.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub candidates: Vec<StreamCandidate>,
    /// URL ya elegida por el proveedor, si la hay.
    pub direct_url: Option<String>,
    pub title: Option<String>,
    pub duration_secs: Option<u64>,
    pub thumbnail: Option<String>,
    pub webpage_url: Option<String>,
    pub uploader: Option<String>,
}

/// Trait común para los proveedores de metadata y streams
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Busca texto libre y devuelve la referencia canónica del primer resultado.
    async fn search(&self, text: &str) -> Result<String, ProviderError>;

    /// Extrae candidatos de stream y metadata de una referencia.
    async fn extract(
        &self,
        reference: &str,
        selector: FormatSelector,
    ) -> Result<Extraction, ProviderError>;
}
