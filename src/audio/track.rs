use chrono::{DateTime, Utc};
use serde::Serialize;
use serenity::model::id::UserId;
use std::time::{Duration, Instant};

use crate::error::TrackError;
use crate::sources::direct_url;

/// Entrada del resolver: lo que el usuario pidió.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackReference {
    /// URL que el transporte puede reproducir tal cual.
    Stream(String),
    /// Página de una plataforma de video que hay que extraer.
    Webpage(String),
    /// Texto libre que hay que buscar antes de extraer.
    Search(String),
}

impl TrackReference {
    pub fn as_str(&self) -> &str {
        match self {
            TrackReference::Stream(s) | TrackReference::Webpage(s) | TrackReference::Search(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Provenance {
    Direct,
    SearchDerived,
}

/// URI opaca (posiblemente con caducidad) que el transporte sabe reproducir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLocator(String);

impl StreamLocator {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
struct ResolvedStream {
    locator: StreamLocator,
    resolved_at: Instant,
}

/// Metadata descubierta durante la resolución.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub duration_secs: Option<u64>,
    pub thumbnail: Option<String>,
    pub webpage_url: Option<String>,
    pub uploader: Option<String>,
}

/// Una pista en cola y su estado de resolución.
#[derive(Debug, Clone)]
pub struct Track {
    title: String,
    provisional_title: bool,
    reference: TrackReference,
    provenance: Provenance,
    resolved: Option<ResolvedStream>,
    duration_secs: Option<u64>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    uploader: Option<String>,
    requested_by: Option<UserId>,
    resolution_attempts: u32,
    unplayable: bool,
    added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(title: impl Into<String>, reference: TrackReference) -> Result<Self, TrackError> {
        let title = title.into().trim().to_string();
        if title.is_empty() {
            return Err(TrackError::EmptyTitle);
        }
        if reference.as_str().trim().is_empty() {
            return Err(TrackError::EmptyQuery);
        }

        let provenance = match reference {
            TrackReference::Search(_) => Provenance::SearchDerived,
            _ => Provenance::Direct,
        };

        Ok(Self {
            title,
            provisional_title: false,
            reference,
            provenance,
            resolved: None,
            duration_secs: None,
            thumbnail: None,
            webpage_url: None,
            uploader: None,
            requested_by: None,
            resolution_attempts: 0,
            unplayable: false,
            added_at: Utc::now(),
        })
    }

    /// Clasifica lo que escribió el usuario: URL de audio, página o búsqueda.
    pub fn from_query(query: &str) -> Result<Self, TrackError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(TrackError::EmptyQuery);
        }

        let reference = if direct_url::is_audio_url(query) {
            TrackReference::Stream(query.to_string())
        } else if direct_url::is_http_url(query) {
            TrackReference::Webpage(query.to_string())
        } else {
            TrackReference::Search(query.to_string())
        };

        let mut track = Self::new(query, reference)?;
        // El título real llega con la resolución
        track.provisional_title = true;
        Ok(track)
    }

    /// Pista de catálogo (p.ej. un servicio de streaming) que se busca en texto antes de extraer.
    pub fn search_derived(
        title: impl Into<String>,
        search_text: impl Into<String>,
    ) -> Result<Self, TrackError> {
        Self::new(title, TrackReference::Search(search_text.into()))
    }

    // Builders

    pub fn with_duration(mut self, secs: u64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn with_webpage_url(mut self, url: impl Into<String>) -> Self {
        self.webpage_url = Some(url.into());
        self
    }

    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = Some(uploader.into());
        self
    }

    pub fn with_requested_by(mut self, user_id: UserId) -> Self {
        self.requested_by = Some(user_id);
        self
    }

    // Getters

    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn reference(&self) -> &TrackReference {
        &self.reference
    }
    pub fn provenance(&self) -> Provenance {
        self.provenance
    }
    pub fn duration_secs(&self) -> Option<u64> {
        self.duration_secs
    }
    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }
    pub fn webpage_url(&self) -> Option<&str> {
        self.webpage_url.as_deref()
    }
    pub fn uploader(&self) -> Option<&str> {
        self.uploader.as_deref()
    }
    pub fn requested_by(&self) -> Option<UserId> {
        self.requested_by
    }
    pub fn resolution_attempts(&self) -> u32 {
        self.resolution_attempts
    }
    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }

    pub fn is_playable(&self) -> bool {
        !self.unplayable
    }

    pub fn resolved_locator(&self) -> Option<&StreamLocator> {
        self.resolved.as_ref().map(|r| &r.locator)
    }

    /// Locator resuelto si todavía no caducó.
    pub fn fresh_locator(&self, ttl: Duration) -> Option<&StreamLocator> {
        self.resolved
            .as_ref()
            .filter(|r| r.resolved_at.elapsed() < ttl)
            .map(|r| &r.locator)
    }

    pub fn set_resolved(&mut self, locator: StreamLocator) {
        self.resolved = Some(ResolvedStream {
            locator,
            resolved_at: Instant::now(),
        });
    }

    pub fn invalidate_locator(&mut self) {
        self.resolved = None;
    }

    /// Cuenta un intento fallido; al superar `ceiling` la pista queda
    /// irreproducible. Devuelve true si quedó marcada.
    pub fn record_failed_attempt(&mut self, ceiling: u32) -> bool {
        self.resolution_attempts = self.resolution_attempts.saturating_add(1);
        if self.resolution_attempts > ceiling {
            self.unplayable = true;
        }
        self.unplayable
    }

    /// Completa solo los campos vacíos; nunca pisa datos del llamador.
    pub fn merge_metadata(&mut self, metadata: TrackMetadata) {
        if self.provisional_title {
            if let Some(title) = metadata.title.filter(|t| !t.trim().is_empty()) {
                self.title = title;
                self.provisional_title = false;
            }
        }
        if self.duration_secs.is_none() {
            self.duration_secs = metadata.duration_secs;
        }
        if self.thumbnail.is_none() {
            self.thumbnail = metadata.thumbnail;
        }
        if self.webpage_url.is_none() {
            self.webpage_url = metadata.webpage_url;
        }
        if self.uploader.is_none() {
            self.uploader = metadata.uploader;
        }
    }

    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            title: self.title.clone(),
            reference: self.reference.as_str().to_string(),
            duration_secs: self.duration_secs,
            webpage_url: self.webpage_url.clone(),
            thumbnail: self.thumbnail.clone(),
            requested_by: self.requested_by.map(|id| id.get()),
            playable: self.is_playable(),
        }
    }
}

/// Vista de solo lectura de una pista, para snapshots y listados.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackSummary {
    pub title: String,
    pub reference: String,
    pub duration_secs: Option<u64>,
    pub webpage_url: Option<String>,
    pub thumbnail: Option<String>,
    pub requested_by: Option<u64>,
    pub playable: bool,
}
