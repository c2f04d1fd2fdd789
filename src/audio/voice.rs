use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::HttpRequest,
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audio::track::StreamLocator;
use crate::audio::transport::{CompletionHandle, TransportConnector, VoiceTransport};
use crate::error::TransportError;

/// Abre conexiones de voz a través del manager de songbird.
pub struct SongbirdConnector {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdConnector {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TransportConnector for SongbirdConnector {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceTransport>, TransportError> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);

        Ok(Arc::new(SongbirdTransport {
            guild_id,
            manager: self.manager.clone(),
            call,
            http: self.http.clone(),
            current: SyncMutex::new(None),
        }))
    }
}

struct ActiveTrack {
    handle: TrackHandle,
    completion: CompletionHandle,
}

/// Transporte sobre un `Call` de songbird.
pub struct SongbirdTransport {
    guild_id: GuildId,
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    http: reqwest::Client,
    current: SyncMutex<Option<ActiveTrack>>,
}

impl SongbirdTransport {
    fn with_current<T>(
        &self,
        action: impl FnOnce(&TrackHandle) -> songbird::tracks::TrackResult<T>,
    ) -> Result<T, TransportError> {
        let current = self.current.lock();
        let active = current.as_ref().ok_or(TransportError::NoActiveStream)?;
        action(&active.handle).map_err(|e| TransportError::Playback(e.to_string()))
    }

    fn take_current(&self) -> Option<ActiveTrack> {
        let active = self.current.lock().take();
        if let Some(active) = &active {
            // El stop de songbird dispara TrackEvent::End; no debe contar como fin natural
            active.completion.cancel();
        }
        active
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn play(
        &self,
        locator: &StreamLocator,
        volume: f32,
        completion: CompletionHandle,
    ) -> Result<(), TransportError> {
        if let Some(previous) = self.take_current() {
            let _ = previous.handle.stop();
        }

        let input = HttpRequest::new(self.http.clone(), locator.as_str().to_string());
        let handle = {
            let mut call = self.call.lock().await;
            if call.current_connection().is_none() {
                return Err(TransportError::ConnectionLost);
            }
            call.play_input(input.into())
        };

        handle
            .set_volume(volume.clamp(0.0, 1.0))
            .map_err(|e| TransportError::Start(e.to_string()))?;

        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    TrackEndNotifier {
                        completion: completion.clone(),
                    },
                )
                .map_err(|e| TransportError::Start(format!("Error al agregar event handler: {e}")))?;
        }

        *self.current.lock() = Some(ActiveTrack { handle, completion });
        debug!("▶️ Stream iniciado en guild {}", self.guild_id);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        if let Some(active) = self.take_current() {
            active
                .handle
                .stop()
                .map_err(|e| TransportError::Playback(e.to_string()))?;
        }
        Ok(())
    }

    async fn pause(&self) -> Result<(), TransportError> {
        self.with_current(|handle| handle.pause())
    }

    async fn resume(&self) -> Result<(), TransportError> {
        self.with_current(|handle| handle.play())
    }

    async fn set_volume(&self, volume: f32) -> Result<(), TransportError> {
        match self.with_current(|handle| handle.set_volume(volume.clamp(0.0, 1.0))) {
            // Sin stream activo el volumen se aplica en el próximo play
            Err(TransportError::NoActiveStream) => Ok(()),
            other => other,
        }
    }

    async fn is_connected(&self) -> bool {
        self.call.lock().await.current_connection().is_some()
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(active) = self.take_current() {
            let _ = active.handle.stop();
        }

        match self.manager.remove(self.guild_id).await {
            Ok(()) | Err(songbird::error::JoinError::NoCall) => {
                info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
                Ok(())
            }
            Err(e) => Err(TransportError::Disconnect(e.to_string())),
        }
    }
}

/// Traduce los eventos de fin/error de songbird a un completion.
struct TrackEndNotifier {
    completion: CompletionHandle,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let errored = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(format!("{e:?}")),
                _ => None,
            }),
            _ => None,
        };

        let result = match errored {
            Some(detail) => {
                warn!("❌ Error de reproducción en guild {}: {}", self.completion.guild_id(), detail);
                Err(TransportError::Playback(detail))
            }
            None => Ok(()),
        };

        if self.completion.complete(result) {
            debug!("Track terminado (epoch {})", self.completion.epoch());
        }

        None
    }
}
