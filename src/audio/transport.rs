//! Seam between the playback engine and the voice connection.
//!
//! A [`VoiceTransport`] plays one stream at a time. When the stream ends it
//! reports back through the [`CompletionHandle`] it was started with; the
//! handle carries the guild and the epoch captured at start so the session
//! can discard notifications that belong to a track it already moved past.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::audio::track::StreamLocator;
use crate::error::TransportError;

/// Mensaje de fin de reproducción que llega al driver de la sesión.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub guild_id: GuildId,
    pub epoch: u64,
    pub result: Result<(), TransportError>,
}

/// Se entrega al transporte en cada `play`; dispara una sola vez.
#[derive(Debug, Clone)]
pub struct CompletionHandle {
    guild_id: GuildId,
    epoch: u64,
    fired: Arc<AtomicBool>,
    sender: mpsc::UnboundedSender<Completion>,
}

impl CompletionHandle {
    pub fn new(guild_id: GuildId, epoch: u64, sender: mpsc::UnboundedSender<Completion>) -> Self {
        Self {
            guild_id,
            epoch,
            fired: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Notifica el fin del stream. Devuelve false si ya se había notificado
    /// o si la sesión ya no existe.
    pub fn complete(&self, result: Result<(), TransportError>) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }

        let sent = self
            .sender
            .send(Completion {
                guild_id: self.guild_id,
                epoch: self.epoch,
                result,
            })
            .is_ok();

        if !sent {
            debug!("Sesión de guild {} cerrada, completion descartado", self.guild_id);
        }
        sent
    }

    /// Marca el handle como usado sin notificar (stop explícito).
    pub fn cancel(&self) {
        self.fired.store(true, Ordering::Release);
    }
}

/// Conexión de voz de una guild.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Empieza a reproducir `locator` reemplazando lo que estuviera sonando.
    /// `volume` es una ganancia entre 0.0 y 1.0.
    async fn play(
        &self,
        locator: &StreamLocator,
        volume: f32,
        completion: CompletionHandle,
    ) -> Result<(), TransportError>;

    /// Detiene el stream actual sin disparar su completion.
    async fn stop(&self) -> Result<(), TransportError>;

    async fn pause(&self) -> Result<(), TransportError>;

    async fn resume(&self) -> Result<(), TransportError>;

    async fn set_volume(&self, volume: f32) -> Result<(), TransportError>;

    async fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Abre conexiones de voz.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceTransport>, TransportError>;
}
