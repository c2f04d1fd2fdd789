//! # Bot Module
//!
//! Serenity glue that hosts the playback engine.
//!
//! - [`JukeboxBot`] implements serenity's [`EventHandler`]: it logs the
//!   connection and turns the bot being removed from a voice channel into a
//!   `ConnectionLost` stop of that guild's session.
//! - [`JukeboxRegistry`] exposes the [`SessionRegistry`] through the client's
//!   `TypeMap`, so any command framework can reach the sessions.
//! - [`notifier`] posts player events to the text channel a session was
//!   started from.

use serenity::{
    all::{Context, EventHandler, Ready, VoiceState},
    async_trait,
    prelude::TypeMapKey,
};
use std::sync::Arc;
use tracing::info;

pub mod notifier;

use crate::audio::{SessionRegistry, StopReason};

/// Clave del `TypeMap` de serenity para el registro de sesiones.
pub struct JukeboxRegistry;

impl TypeMapKey for JukeboxRegistry {
    type Value = Arc<SessionRegistry>;
}

/// Handler de eventos de Discord.
pub struct JukeboxBot {
    registry: Arc<SessionRegistry>,
}

impl JukeboxBot {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

/// Obtiene el registro desde el contexto de serenity.
pub async fn registry_from(ctx: &Context) -> Option<Arc<SessionRegistry>> {
    ctx.data.read().await.get::<JukeboxRegistry>().cloned()
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());
    }

    /// Detecta si el bot fue desconectado del canal de voz.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id {
            return;
        }

        if old.is_some() && new.channel_id.is_none() {
            if let Some(guild_id) = new.guild_id {
                if self
                    .registry
                    .stop_with_reason(guild_id, StopReason::ConnectionLost)
                    .await
                {
                    info!("🔌 Bot desconectado en guild {}", guild_id);
                }
            }
        }
    }
}
