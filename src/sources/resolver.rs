use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{direct_url, Extraction, FormatSelector, SourceProvider, StreamCandidate};
use crate::audio::track::{StreamLocator, Track, TrackMetadata, TrackReference};
use crate::cache::SearchCache;
use crate::error::{ProviderError, ResolutionError, ResolutionFailure};

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Tamaño máximo preferido para un stream.
    pub max_stream_bytes: u64,
    /// Contenedor a evitar cuando hay alternativas (p.ej. `webm`).
    pub avoid_container: Option<String>,
    /// Límite por llamada al proveedor.
    pub timeout: Duration,
    pub search_cache_size: usize,
    pub search_cache_ttl: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_stream_bytes: 50 * 1024 * 1024,
            avoid_container: Some("webm".to_string()),
            timeout: Duration::from_secs(20),
            search_cache_size: 256,
            search_cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Etapa que produjo el locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStage {
    Direct,
    Extracted,
    Relaxed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub locator: StreamLocator,
    pub metadata: TrackMetadata,
    pub stage: ResolutionStage,
}

/// Convierte la referencia de una pista en un stream reproducible.
///
/// Nunca modifica la pista: la sesión decide qué metadata incorporar.
pub struct SourceResolver {
    provider: Arc<dyn SourceProvider>,
    settings: ResolverSettings,
    searches: SearchCache,
}

impl SourceResolver {
    pub fn new(provider: Arc<dyn SourceProvider>, settings: ResolverSettings) -> Self {
        let searches = SearchCache::new(settings.search_cache_size, settings.search_cache_ttl);
        Self {
            provider,
            settings,
            searches,
        }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub async fn resolve(&self, track: &Track) -> Result<Resolved, ResolutionError> {
        match track.reference() {
            TrackReference::Stream(url) => Ok(direct(url)),
            TrackReference::Webpage(url) if direct_url::is_audio_url(url) => Ok(direct(url)),
            TrackReference::Webpage(url) => self.extract(url).await,
            TrackReference::Search(text) => {
                let canonical = self.search(text).await?;
                let mut resolved = self.extract(&canonical).await?;
                if resolved.metadata.webpage_url.is_none() {
                    resolved.metadata.webpage_url = Some(canonical);
                }
                Ok(resolved)
            }
        }
    }

    async fn search(&self, text: &str) -> Result<String, ResolutionError> {
        if let Some(reference) = self.searches.get(text) {
            return Ok(reference);
        }

        info!("🔍 Buscando: {}", text);
        let reference = self
            .bounded(self.provider.search(text))
            .await
            .map_err(|e| e.into_resolution(text))?;

        if reference.trim().is_empty() {
            return Err(ResolutionError::new(
                text,
                ResolutionFailure::NotFound,
                "la búsqueda no devolvió resultados",
            ));
        }

        self.searches.put(text, reference.clone());
        Ok(reference)
    }

    async fn extract(&self, reference: &str) -> Result<Resolved, ResolutionError> {
        debug!("🎵 Extrayendo stream de: {}", reference);

        let (extraction, stage) = match self
            .bounded(self.provider.extract(reference, FormatSelector::Best))
            .await
        {
            Ok(extraction) => (extraction, ResolutionStage::Extracted),
            Err(e) if e.is_transient() => {
                warn!("⚠️ Fallo transitorio extrayendo {}: {}. Reintentando con menor calidad", reference, e);
                let extraction = self
                    .bounded(self.provider.extract(reference, FormatSelector::Relaxed))
                    .await
                    .map_err(|e| e.into_resolution(reference))?;
                (extraction, ResolutionStage::Relaxed)
            }
            Err(e) => return Err(e.into_resolution(reference)),
        };

        let selector = match stage {
            ResolutionStage::Relaxed => FormatSelector::Relaxed,
            _ => FormatSelector::Best,
        };

        let url = select_candidate(&extraction.candidates, selector, &self.settings)
            .map(|candidate| candidate.url.clone())
            .or_else(|| extraction.direct_url.clone())
            .ok_or_else(|| {
                ResolutionError::new(
                    reference,
                    ResolutionFailure::UnsupportedFormat,
                    "el extractor no ofreció ningún formato reproducible",
                )
            })?;

        Ok(Resolved {
            locator: StreamLocator::new(url),
            metadata: metadata_of(extraction),
            stage,
        })
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        tokio::time::timeout(self.settings.timeout, call)
            .await
            .map_err(|_| ProviderError::Timeout)?
    }
}

fn direct(url: &str) -> Resolved {
    debug!("⚡ URL directa, sin extractor: {}", url);
    Resolved {
        locator: StreamLocator::new(url),
        metadata: TrackMetadata::default(),
        stage: ResolutionStage::Direct,
    }
}

fn metadata_of(extraction: Extraction) -> TrackMetadata {
    TrackMetadata {
        title: extraction.title,
        duration_secs: extraction.duration_secs,
        thumbnail: extraction.thumbnail,
        webpage_url: extraction.webpage_url,
        uploader: extraction.uploader,
    }
}

/// Elige el formato a reproducir.
///
/// Audio-only antes que formatos con video; dentro de eso, los de tamaño
/// conocido bajo el límite. Se ordena por bitrate, sample rate y tamaño
/// (descendente con `Best`, ascendente con `Relaxed`) y se toma el primero
/// cuyo contenedor no sea el evitado, o el primero a secas.
pub fn select_candidate<'a>(
    candidates: &'a [StreamCandidate],
    selector: FormatSelector,
    settings: &ResolverSettings,
) -> Option<&'a StreamCandidate> {
    let usable: Vec<&StreamCandidate> = candidates.iter().filter(|c| !c.url.is_empty()).collect();

    let audio_only: Vec<&StreamCandidate> = usable.iter().copied().filter(|c| c.audio_only).collect();
    let pool = if audio_only.is_empty() { usable } else { audio_only };

    let within_size: Vec<&StreamCandidate> = pool
        .iter()
        .copied()
        .filter(|c| c.filesize.is_some_and(|size| size <= settings.max_stream_bytes))
        .collect();
    let mut ranked = if within_size.is_empty() { pool } else { within_size };

    ranked.sort_by(|a, b| {
        let order = quality_order(a, b);
        match selector {
            FormatSelector::Best => order.reverse(),
            FormatSelector::Relaxed => order,
        }
    });

    let avoided = settings.avoid_container.as_deref();
    ranked
        .iter()
        .copied()
        .find(|c| {
            avoided.is_none_or(|avoid| {
                c.container
                    .as_deref()
                    .is_none_or(|container| !container.eq_ignore_ascii_case(avoid))
            })
        })
        .or_else(|| ranked.first().copied())
}

fn quality_order(a: &StreamCandidate, b: &StreamCandidate) -> Ordering {
    let bitrate = |c: &StreamCandidate| c.bitrate_kbps.unwrap_or(0.0);
    bitrate(a)
        .total_cmp(&bitrate(b))
        .then_with(|| a.sample_rate.unwrap_or(0).cmp(&b.sample_rate.unwrap_or(0)))
        .then_with(|| a.filesize.unwrap_or(0).cmp(&b.filesize.unwrap_or(0)))
}
