use serenity::http::Http;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::audio::{PlayerEvent, PlayerEventKind};

/// Eventos que se anuncian en el canal de texto. El encolado ya lo responde
/// el comando que lo originó.
pub fn should_announce(kind: &PlayerEventKind) -> bool {
    !matches!(kind, PlayerEventKind::TrackQueued { .. })
}

/// Publica los eventos del registro en el canal de origen de cada sesión.
pub fn spawn_notifier(
    http: Arc<Http>,
    mut events: broadcast::Receiver<PlayerEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("⚠️ Notificador atrasado, {} eventos descartados", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            let Some(channel) = event.channel else {
                continue;
            };
            if !should_announce(&event.kind) {
                continue;
            }

            if let Err(e) = channel.say(&*http, event.describe()).await {
                debug!("No se pudo enviar mensaje a {}: {:?}", channel, e);
            }
        }
    })
}
