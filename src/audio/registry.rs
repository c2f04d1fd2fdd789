use dashmap::DashMap;
use futures::future::join_all;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audio::events::{PlayerEvent, StopReason};
use crate::audio::session::{PlaybackSession, SessionSettings};
use crate::audio::transport::TransportConnector;
use crate::error::TransportError;
use crate::sources::SourceResolver;

type SessionMap = DashMap<GuildId, Arc<PlaybackSession>>;

const HUB_CAPACITY: usize = 256;

/// Permite a una sesión salir del registro al terminar.
#[derive(Clone, Default)]
pub struct RegistryLink {
    sessions: Weak<SessionMap>,
}

impl RegistryLink {
    fn new(sessions: &Arc<SessionMap>) -> Self {
        Self {
            sessions: Arc::downgrade(sessions),
        }
    }

    /// Quita la sesión solo si la entrada sigue siendo ella misma.
    pub(crate) fn detach(&self, guild_id: GuildId, session: &PlaybackSession) -> bool {
        let Some(sessions) = self.sessions.upgrade() else {
            return false;
        };
        sessions
            .remove_if(&guild_id, |_, current| std::ptr::eq(Arc::as_ptr(current), session))
            .is_some()
    }
}

/// Dueño único de las sesiones activas, una por guild.
pub struct SessionRegistry {
    sessions: Arc<SessionMap>,
    connector: Arc<dyn TransportConnector>,
    resolver: Arc<SourceResolver>,
    settings: SessionSettings,
    idle_timeout: Duration,
    events: broadcast::Sender<PlayerEvent>,
    /// Una compuerta por guild mientras se crea su sesión.
    creating: DashMap<GuildId, Arc<Mutex<()>>>,
}

impl SessionRegistry {
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        resolver: Arc<SourceResolver>,
        settings: SessionSettings,
        idle_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(HUB_CAPACITY);
        Self {
            sessions: Arc::new(DashMap::new()),
            connector,
            resolver,
            settings,
            idle_timeout,
            events,
            creating: DashMap::new(),
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<PlaybackSession>> {
        self.sessions.get(&guild_id).map(|entry| entry.value().clone())
    }

    /// Devuelve la sesión de la guild o conecta al canal de voz y crea una.
    pub async fn get_or_connect(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
        origin: Option<ChannelId>,
    ) -> Result<Arc<PlaybackSession>, TransportError> {
        if let Some(session) = self.get(guild_id) {
            return Ok(session);
        }

        let gate = self.creating.entry(guild_id).or_default().value().clone();
        let result = {
            let _guard = gate.lock().await;
            match self.get(guild_id) {
                Some(session) => Ok(session),
                None => self.create(guild_id, voice_channel, origin).await,
            }
        };

        // Nadie más espera en la compuerta: se puede soltar
        self.creating.remove_if(&guild_id, |_, current| {
            Arc::ptr_eq(current, &gate) && Arc::strong_count(current) <= 2
        });
        result
    }

    async fn create(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
        origin: Option<ChannelId>,
    ) -> Result<Arc<PlaybackSession>, TransportError> {
        let transport = self.connector.connect(guild_id, voice_channel).await?;
        let session = PlaybackSession::new(
            guild_id,
            origin,
            transport,
            self.resolver.clone(),
            self.settings.clone(),
            Some(self.events.clone()),
            RegistryLink::new(&self.sessions),
        );
        self.sessions.insert(guild_id, session.clone());
        info!("🎧 Nueva sesión para guild {} ({} activas)", guild_id, self.sessions.len());
        Ok(session)
    }

    pub async fn stop(&self, guild_id: GuildId) -> bool {
        self.stop_with_reason(guild_id, StopReason::Requested).await
    }

    /// Detiene y desregistra la sesión. Devuelve false si no existía.
    pub async fn stop_with_reason(&self, guild_id: GuildId, reason: StopReason) -> bool {
        let Some(session) = self.get(guild_id) else {
            return false;
        };
        session.shutdown(reason).await;
        // Por si la sesión ya estaba detenida y no se quitó sola
        self.sessions
            .remove_if(&guild_id, |_, current| Arc::ptr_eq(current, &session));
        true
    }

    pub async fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(Instant::now()).await
    }

    /// Detiene las sesiones Idle sin actividad desde hace más de `idle_timeout`.
    pub async fn sweep_idle_at(&self, now: Instant) -> usize {
        let candidates: Vec<Arc<PlaybackSession>> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().looks_expired(now, self.idle_timeout))
            .map(|entry| entry.value().clone())
            .collect();

        if candidates.is_empty() {
            return 0;
        }

        let results = join_all(
            candidates
                .iter()
                .map(|session| session.expire_if_idle(now, self.idle_timeout)),
        )
        .await;

        let expired = results.into_iter().filter(|expired| *expired).count();
        if expired > 0 {
            info!("💤 {} sesiones cerradas por inactividad", expired);
        }
        expired
    }

    /// Lanza el barrido periódico; termina al cancelar el token.
    pub fn spawn_idle_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Barrido de inactividad detenido");
                        break;
                    }
                    _ = ticker.tick() => {
                        registry.sweep_idle().await;
                    }
                }
            }
        })
    }

    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<PlaybackSession>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        join_all(
            sessions
                .iter()
                .map(|session| session.shutdown(StopReason::Requested)),
        )
        .await;
        self.sessions.clear();
        info!("👋 {} sesiones cerradas", sessions.len());
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Eventos de todas las sesiones.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::events::PlayerEventKind;
    use crate::audio::session::PlayerState;
    use crate::audio::testing::*;
    use crate::sources::ResolverSettings;

    fn guild() -> GuildId {
        GuildId::new(1)
    }

    fn voice() -> ChannelId {
        ChannelId::new(100)
    }

    fn registry() -> (Arc<SessionRegistry>, Arc<FakeConnector>) {
        let connector = Arc::new(FakeConnector::default());
        let provider = Arc::new(ScriptedProvider::default());
        let resolver = Arc::new(SourceResolver::new(provider, ResolverSettings::default()));
        let registry = Arc::new(SessionRegistry::new(
            connector.clone(),
            resolver,
            SessionSettings::default(),
            Duration::from_secs(300),
        ));
        (registry, connector)
    }

    #[tokio::test]
    async fn test_one_session_per_guild() {
        let (registry, connector) = registry();

        let first = registry.get_or_connect(guild(), voice(), Some(ChannelId::new(200))).await.unwrap();
        let second = registry.get_or_connect(guild(), voice(), None).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.connects(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(first.origin_channel(), Some(ChannelId::new(200)));
    }

    #[tokio::test]
    async fn test_concurrent_connects_create_one_session() {
        let (registry, connector) = registry();

        let attempts = (0..8).map(|_| registry.get_or_connect(guild(), voice(), None));
        let sessions = join_all(attempts).await;

        assert!(sessions.iter().all(|s| s.is_ok()));
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_slow_join_does_not_block_other_guilds() {
        let (registry, connector) = registry();
        let release = connector.hold(guild());

        let slow = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_connect(guild(), voice(), None).await })
        };
        settle().await;

        let other = tokio::time::timeout(
            Duration::from_millis(500),
            registry.get_or_connect(GuildId::new(2), voice(), None),
        )
        .await
        .expect("la otra guild quedó esperando")
        .unwrap();
        assert_eq!(other.guild_id(), GuildId::new(2));
        assert!(registry.get(guild()).is_none());

        release.notify_one();
        let first = slow.await.unwrap().unwrap();
        assert_eq!(first.guild_id(), guild());
        assert_eq!(registry.len(), 2);
        assert!(registry.creating.is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_registers_nothing() {
        let (registry, connector) = registry();
        connector.refuse();

        let result = registry.get_or_connect(guild(), voice(), None).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_stop_unregisters_and_disconnects() {
        let (registry, connector) = registry();
        let session = registry.get_or_connect(guild(), voice(), None).await.unwrap();

        assert!(registry.stop(guild()).await);
        assert!(registry.get(guild()).is_none());
        assert_eq!(session.snapshot().state, PlayerState::Stopped);
        assert_eq!(connector.transport(0).unwrap().disconnects(), 1);
        assert!(!registry.stop(guild()).await);

        // Un nuevo comando crea una sesión nueva
        let fresh = registry.get_or_connect(guild(), voice(), None).await.unwrap();
        assert!(!Arc::ptr_eq(&session, &fresh));
    }

    #[tokio::test]
    async fn test_sweep_only_stops_idle_sessions() {
        let (registry, _) = registry();
        let mut events = registry.subscribe();

        let idle_guild = GuildId::new(2);
        registry.get_or_connect(idle_guild, voice(), None).await.unwrap();

        let busy = registry.get_or_connect(guild(), voice(), None).await.unwrap();
        busy.enqueue(page("a")).await.unwrap();
        wait_for(&busy, |s| s.state == PlayerState::Playing).await;

        // Todavía dentro del timeout
        assert_eq!(registry.sweep_idle_at(Instant::now()).await, 0);

        let later = Instant::now() + Duration::from_secs(301);
        assert_eq!(registry.sweep_idle_at(later).await, 1);
        assert!(registry.get(idle_guild).is_none());
        assert!(registry.get(guild()).is_some());

        let kind = next_event(&mut events, |k| matches!(k, PlayerEventKind::IdleTimeout)).await;
        assert_eq!(kind, PlayerEventKind::IdleTimeout);

        // Un segundo barrido no vuelve a emitir nada
        assert_eq!(registry.sweep_idle_at(later).await, 0);
    }

    #[tokio::test]
    async fn test_connection_loss_removes_session() {
        let (registry, connector) = registry();
        let session = registry.get_or_connect(guild(), voice(), None).await.unwrap();
        session.enqueue(page("a")).await.unwrap();
        wait_for(&session, |s| s.state == PlayerState::Playing).await;

        connector
            .transport(0)
            .unwrap()
            .finish(Err(TransportError::ConnectionLost));
        wait_for(&session, |s| s.state == PlayerState::Stopped).await;

        assert!(registry.get(guild()).is_none());
    }

    #[tokio::test]
    async fn test_stale_detach_keeps_replacement() {
        let (registry, _) = registry();
        let old = registry.get_or_connect(guild(), voice(), None).await.unwrap();
        registry.stop(guild()).await;
        let replacement = registry.get_or_connect(guild(), voice(), None).await.unwrap();

        // La sesión vieja no puede sacar a la nueva
        let link = RegistryLink::new(&registry.sessions);
        assert!(!link.detach(guild(), &old));
        assert!(!old.shutdown(StopReason::ConnectionLost).await);
        assert!(Arc::ptr_eq(&registry.get(guild()).unwrap(), &replacement));
        assert!(link.detach(guild(), &replacement));
    }

    #[tokio::test]
    async fn test_idle_sweeper_stops_on_cancel() {
        let (registry, _) = registry();
        let token = CancellationToken::new();
        let sweeper = registry.spawn_idle_sweeper(Duration::from_millis(10), token.clone());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_all() {
        let (registry, connector) = registry();
        registry.get_or_connect(guild(), voice(), None).await.unwrap();
        registry.get_or_connect(GuildId::new(2), voice(), None).await.unwrap();

        registry.shutdown_all().await;
        assert!(registry.is_empty());
        assert_eq!(connector.transport(1).unwrap().disconnects(), 1);
    }
}
