//! # Error Taxonomy
//!
//! Typed errors produced by the playback engine.
//!
//! - [`ResolutionError`]: no stage of the resolver produced a playable stream.
//! - [`TransportError`]: the voice transport refused or lost playback.
//!   [`TransportError::ConnectionLost`] is fatal to the session.
//! - [`QueueError`]: capacity and range violations on the queue.
//! - [`SessionError`]: what the public session operations return.
//! - [`ProviderError`]: raw failures from a metadata/stream provider, later
//!   classified into a [`ResolutionFailure`].
//!
//! Stale completion notifications never reach callers; they surface only as
//! [`SessionError::StaleCallback`] inside the session and are logged at
//! debug level.

use serde::Serialize;
use serenity::model::id::GuildId;
use std::fmt;
use thiserror::Error;

/// Motivo clasificado de un fallo de resolución.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionFailure {
    NotFound,
    RateLimited,
    UnsupportedFormat,
    Timeout,
    Provider,
}

impl ResolutionFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionFailure::NotFound => "not-found",
            ResolutionFailure::RateLimited => "rate-limited",
            ResolutionFailure::UnsupportedFormat => "unsupported-format",
            ResolutionFailure::Timeout => "timeout",
            ResolutionFailure::Provider => "provider",
        }
    }
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no se pudo resolver '{reference}' ({reason}): {detail}")]
pub struct ResolutionError {
    pub reference: String,
    pub reason: ResolutionFailure,
    pub detail: String,
}

impl ResolutionError {
    pub fn new(
        reference: impl Into<String>,
        reason: ResolutionFailure,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            reference: reference.into(),
            reason,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("conexión de voz perdida")]
    ConnectionLost,

    #[error("no se pudo conectar al canal de voz: {0}")]
    Connect(String),

    #[error("el transporte rechazó la reproducción: {0}")]
    Start(String),

    #[error("error durante la reproducción: {0}")]
    Playback(String),

    #[error("no se pudo cerrar la conexión de voz: {0}")]
    Disconnect(String),

    #[error("no hay ningún stream activo")]
    NoActiveStream,
}

impl TransportError {
    /// Solo la pérdida de conectividad termina la sesión.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::ConnectionLost)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("la cola está llena (máximo {max} canciones)")]
    QueueFull { max: usize },

    #[error("la cola está vacía")]
    QueueEmpty,

    #[error("posición {position} fuera de rango (la cola tiene {len})")]
    OutOfRange { position: usize, len: usize },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackError {
    #[error("el título no puede estar vacío")]
    EmptyTitle,

    #[error("la búsqueda no puede estar vacía")]
    EmptyQuery,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("la sesión de la guild {0} ya fue detenida")]
    Stopped(GuildId),

    #[error("notificación obsoleta (epoch {captured}, actual {current})")]
    StaleCallback { captured: u64, current: u64 },
}

/// Errores crudos de un proveedor de metadata/streams.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("sin resultados: {0}")]
    NotFound(String),

    #[error("límite de peticiones alcanzado: {0}")]
    RateLimited(String),

    #[error("formato no soportado: {0}")]
    Unsupported(String),

    #[error("tiempo de espera agotado")]
    Timeout,

    #[error("fallo transitorio del extractor: {0}")]
    Transient(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Fallos que justifican un segundo intento con un selector relajado.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Timeout | ProviderError::Transient(_))
    }

    pub fn classify(&self) -> ResolutionFailure {
        match self {
            ProviderError::NotFound(_) => ResolutionFailure::NotFound,
            ProviderError::RateLimited(_) => ResolutionFailure::RateLimited,
            ProviderError::Unsupported(_) => ResolutionFailure::UnsupportedFormat,
            ProviderError::Timeout => ResolutionFailure::Timeout,
            ProviderError::Transient(_) | ProviderError::Other(_) => ResolutionFailure::Provider,
        }
    }

    pub fn into_resolution(self, reference: &str) -> ResolutionError {
        ResolutionError::new(reference, self.classify(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_classification() {
        assert_eq!(
            ProviderError::NotFound("x".into()).classify(),
            ResolutionFailure::NotFound
        );
        assert_eq!(ProviderError::Timeout.classify(), ResolutionFailure::Timeout);
        assert_eq!(
            ProviderError::Transient("reset".into()).classify(),
            ResolutionFailure::Provider
        );
        assert!(ProviderError::Timeout.is_transient());
        assert!(!ProviderError::RateLimited("429".into()).is_transient());
    }

    #[test]
    fn test_only_connection_loss_is_fatal() {
        assert!(TransportError::ConnectionLost.is_fatal());
        assert!(!TransportError::Start("ffmpeg".into()).is_fatal());
        assert!(!TransportError::NoActiveStream.is_fatal());
    }
}
