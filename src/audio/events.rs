use serde::Serialize;
use serenity::model::id::{ChannelId, GuildId};
use std::fmt;

use crate::error::ResolutionFailure;

/// Motivo por el que una sesión terminó.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    IdleTimeout,
    ConnectionLost,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::Requested => "detenido por comando",
            StopReason::IdleTimeout => "inactividad",
            StopReason::ConnectionLost => "conexión de voz perdida",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayerEventKind {
    TrackQueued { title: String, position: usize },
    TrackStarted { title: String, position: usize },
    TrackFailed {
        title: String,
        reason: Option<ResolutionFailure>,
        error: String,
    },
    QueueFinished,
    QueueExhausted { failures: u32 },
    IdleTimeout,
    Stopped { reason: StopReason },
}

/// Notificación emitida por una sesión hacia la capa de comandos.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerEvent {
    pub guild_id: GuildId,
    /// Canal de texto donde se originó la sesión.
    pub channel: Option<ChannelId>,
    pub kind: PlayerEventKind,
}

impl PlayerEvent {
    /// Mensaje corto para mostrar en el canal.
    pub fn describe(&self) -> String {
        match &self.kind {
            PlayerEventKind::TrackQueued { title, position } => {
                format!("➕ **{title}** agregado en la posición {position}")
            }
            PlayerEventKind::TrackStarted { title, .. } => format!("🎵 Reproduciendo: **{title}**"),
            PlayerEventKind::TrackFailed { title, error, .. } => {
                format!("⚠️ No se pudo reproducir **{title}**: {error}. Saltando...")
            }
            PlayerEventKind::QueueFinished => "📭 La cola terminó".to_string(),
            PlayerEventKind::QueueExhausted { failures } => format!(
                "❌ Demasiados errores seguidos ({failures}). Reproducción detenida, la cola se conserva"
            ),
            PlayerEventKind::IdleTimeout => "💤 Desconectado por inactividad".to_string(),
            PlayerEventKind::Stopped { reason } => format!("⏹️ Reproducción detenida ({reason})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_mentions_track_title() {
        let event = PlayerEvent {
            guild_id: GuildId::new(1),
            channel: None,
            kind: PlayerEventKind::TrackFailed {
                title: "One More Time".into(),
                reason: Some(ResolutionFailure::NotFound),
                error: "not-found".into(),
            },
        };
        assert!(event.describe().contains("One More Time"));
    }

    #[test]
    fn test_events_serialize_with_kind_tag() {
        let event = PlayerEvent {
            guild_id: GuildId::new(42),
            channel: Some(ChannelId::new(7)),
            kind: PlayerEventKind::Stopped {
                reason: StopReason::ConnectionLost,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"]["kind"], "stopped");
        assert_eq!(json["kind"]["reason"], "connection_lost");
    }
}
