//! Per-guild playback session.
//!
//! A [`PlaybackSession`] owns the queue of one guild and drives the voice
//! transport through `Idle -> Resolving -> Playing <-> Paused`, ending in
//! `Stopped`. All state changes happen inside one async critical section
//! ([`SessionCore`]); stream resolution runs outside of it in a spawned task
//! and re-enters when done.
//!
//! Every skip, stop, clear and pointer move bumps the session epoch. Transport
//! completions and finished resolutions carry the epoch they were started
//! with and are dropped when it no longer matches.

use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::events::{PlayerEvent, PlayerEventKind, StopReason};
use crate::audio::queue::{Advance, PlaybackQueue, QueuePage};
use crate::audio::registry::RegistryLink;
use crate::audio::track::{StreamLocator, Track, TrackSummary};
use crate::audio::transport::{Completion, CompletionHandle, VoiceTransport};
use crate::error::{QueueError, ResolutionError, ResolutionFailure, SessionError, TransportError};
use crate::sources::{Resolved, SourceResolver};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_queue_size: usize,
    pub max_playlist_size: usize,
    /// Ganancia inicial (0.0 - 1.0).
    pub default_volume: f32,
    /// Fallos seguidos tolerados antes de detener la cola.
    pub retry_budget: u32,
    /// Intentos fallidos tolerados por pista; al superarlos se marca irreproducible.
    pub max_track_attempts: u32,
    /// Vida útil de un locator resuelto.
    pub stream_ttl: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            max_playlist_size: 20,
            default_volume: 0.5,
            retry_budget: 3,
            max_track_attempts: 2,
            stream_ttl: Duration::from_secs(5 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Idle,
    Resolving,
    Playing,
    Paused,
    Stopped,
}

/// Vista de solo lectura publicada tras cada cambio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub guild_id: GuildId,
    pub state: PlayerState,
    pub current: Option<TrackSummary>,
    /// Posición 1-based de la pista actual.
    pub position: Option<usize>,
    pub queue_len: usize,
    /// Volumen en porcentaje.
    pub volume: u8,
    pub loop_enabled: bool,
    pub epoch: u64,
    pub failures: u32,
}

/// Resultado de `enqueue_many`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueBatch {
    pub first_position: Option<usize>,
    pub added: usize,
    pub truncated: bool,
}

struct SessionCore {
    queue: PlaybackQueue,
    state: PlayerState,
    epoch: u64,
    failures: u32,
    resolving: Option<JoinHandle<()>>,
}

pub struct PlaybackSession {
    guild_id: GuildId,
    origin: Option<ChannelId>,
    settings: SessionSettings,
    transport: Arc<dyn VoiceTransport>,
    resolver: Arc<SourceResolver>,
    core: Mutex<SessionCore>,
    snapshot: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<PlayerEvent>,
    hub: Option<broadcast::Sender<PlayerEvent>>,
    completions: mpsc::UnboundedSender<Completion>,
    last_activity: SyncMutex<Instant>,
    link: RegistryLink,
    me: Weak<PlaybackSession>,
}

impl PlaybackSession {
    /// Crea la sesión y su tarea de completions.
    pub fn new(
        guild_id: GuildId,
        origin: Option<ChannelId>,
        transport: Arc<dyn VoiceTransport>,
        resolver: Arc<SourceResolver>,
        settings: SessionSettings,
        hub: Option<broadcast::Sender<PlayerEvent>>,
        link: RegistryLink,
    ) -> Arc<Self> {
        let (completions, completion_rx) = mpsc::unbounded_channel();
        let core = SessionCore {
            queue: PlaybackQueue::new(settings.max_queue_size, settings.default_volume),
            state: PlayerState::Idle,
            epoch: 0,
            failures: 0,
            resolving: None,
        };
        let (snapshot, _) = watch::channel(build_snapshot(guild_id, &core));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let session = Arc::new_cyclic(|me| Self {
            guild_id,
            origin,
            settings,
            transport,
            resolver,
            core: Mutex::new(core),
            snapshot,
            events,
            hub,
            completions,
            last_activity: SyncMutex::new(Instant::now()),
            link,
            me: me.clone(),
        });

        tokio::spawn(run_completions(Arc::downgrade(&session), completion_rx));
        debug!("🆕 Sesión creada para guild {}", guild_id);
        session
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn origin_channel(&self) -> Option<ChannelId> {
        self.origin
    }

    // ----- Operaciones públicas -----

    /// Agrega una pista; arranca la reproducción solo si la sesión está Idle.
    /// Devuelve la posición 1-based.
    pub async fn enqueue(&self, track: Track) -> Result<usize, SessionError> {
        self.touch();
        let mut core = self.core.lock().await;
        self.ensure_active(&core)?;

        let title = track.title().to_string();
        let position = core.queue.add(track)? + 1;
        self.emit(PlayerEventKind::TrackQueued { title, position });

        if core.state == PlayerState::Idle {
            core.failures = 0;
            self.drive(&mut core).await;
        }

        self.publish(&core);
        Ok(position)
    }

    /// Agrega una playlist, truncando a `max_playlist_size` y a la capacidad de la cola.
    pub async fn enqueue_many(&self, tracks: Vec<Track>) -> Result<EnqueueBatch, SessionError> {
        self.touch();
        let mut core = self.core.lock().await;
        self.ensure_active(&core)?;

        let requested = tracks.len();
        let limit = self.settings.max_playlist_size;
        let tracks: Vec<Track> = tracks.into_iter().take(limit).collect();

        let added = core.queue.add_many(tracks);
        if added.added == 0 && requested > 0 {
            return Err(QueueError::QueueFull {
                max: self.settings.max_queue_size,
            }
            .into());
        }

        info!("📋 [{}] {} canciones agregadas a la cola", self.guild_id, added.added);

        if core.state == PlayerState::Idle && added.added > 0 {
            core.failures = 0;
            self.drive(&mut core).await;
        }

        self.publish(&core);
        Ok(EnqueueBatch {
            first_position: added.first_index.map(|i| i + 1),
            added: added.added,
            truncated: added.truncated || requested > limit,
        })
    }

    /// Salta la pista actual. Devuelve false si no había nada sonando.
    pub async fn skip(&self) -> Result<bool, SessionError> {
        self.touch();
        let mut core = self.core.lock().await;
        self.ensure_active(&core)?;

        if !is_active(core.state) {
            return Ok(false);
        }

        if let Some(task) = core.resolving.take() {
            task.abort();
        }
        if let Err(e) = self.transport.stop().await {
            warn!("⚠️ [{}] Error al detener el stream: {}", self.guild_id, e);
        }

        info!("⏭️ [{}] Canción saltada", self.guild_id);
        self.on_track_end(&mut core).await;

        self.publish(&core);
        Ok(true)
    }

    pub async fn pause(&self) -> Result<bool, SessionError> {
        self.touch();
        let mut core = self.core.lock().await;
        self.ensure_active(&core)?;

        if core.state != PlayerState::Playing {
            return Ok(false);
        }

        self.transport.pause().await?;
        core.state = PlayerState::Paused;
        info!("⏸️ [{}] Reproducción pausada", self.guild_id);
        self.publish(&core);
        Ok(true)
    }

    pub async fn resume(&self) -> Result<bool, SessionError> {
        self.touch();
        let mut core = self.core.lock().await;
        self.ensure_active(&core)?;

        if core.state != PlayerState::Paused {
            return Ok(false);
        }

        self.transport.resume().await?;
        core.state = PlayerState::Playing;
        info!("▶️ [{}] Reproducción reanudada", self.guild_id);
        self.publish(&core);
        Ok(true)
    }

    /// Ajusta el volumen (0-100) y lo aplica en vivo. Devuelve el valor aplicado.
    pub async fn set_volume(&self, percent: i32) -> Result<u8, SessionError> {
        self.touch();
        let applied = percent.clamp(0, 100) as u8;
        let mut core = self.core.lock().await;
        self.ensure_active(&core)?;

        let gain = f32::from(applied) / 100.0;
        core.queue.set_volume(gain);
        if matches!(core.state, PlayerState::Playing | PlayerState::Paused) {
            self.transport.set_volume(gain).await?;
        }

        debug!("🔊 [{}] Volumen: {}%", self.guild_id, applied);
        self.publish(&core);
        Ok(applied)
    }

    /// Vacía la cola y detiene lo que esté sonando, sin desconectar.
    pub async fn clear(&self) -> Result<(), SessionError> {
        self.touch();
        let mut core = self.core.lock().await;
        self.ensure_active(&core)?;

        if let Some(task) = core.resolving.take() {
            task.abort();
        }
        core.epoch += 1;

        if is_active(core.state) {
            if let Err(e) = self.transport.stop().await {
                warn!("⚠️ [{}] Error al detener el stream: {}", self.guild_id, e);
            }
        }

        core.queue.clear();
        core.state = PlayerState::Idle;
        core.failures = 0;
        self.publish(&core);
        Ok(())
    }

    /// Detiene la sesión, desconecta y la saca del registro.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.shutdown(StopReason::Requested).await;
        Ok(())
    }

    /// Elimina la pista en `position` (1-based).
    pub async fn remove(&self, position: usize) -> Result<Track, SessionError> {
        self.touch();
        let mut core = self.core.lock().await;
        self.ensure_active(&core)?;

        let len = core.queue.len();
        if len == 0 {
            return Err(QueueError::QueueEmpty.into());
        }
        if position == 0 || position > len {
            return Err(QueueError::OutOfRange { position, len }.into());
        }

        let index = position - 1;
        let removes_playing = is_active(core.state)
            && core.queue.current_track().is_some()
            && index == core.queue.current_index();

        let removed = core.queue.remove_at(index)?;

        if removes_playing {
            if let Some(task) = core.resolving.take() {
                task.abort();
            }
            core.epoch += 1;
            if let Err(e) = self.transport.stop().await {
                warn!("⚠️ [{}] Error al detener el stream: {}", self.guild_id, e);
            }
            if core.queue.current_track().is_some() {
                self.drive(&mut core).await;
            } else {
                self.finish_queue(&mut core);
            }
        }

        self.publish(&core);
        Ok(removed)
    }

    /// Mezcla la cola dejando la pista actual primero.
    pub async fn shuffle(&self) -> Result<bool, SessionError> {
        self.touch();
        let mut core = self.core.lock().await;
        self.ensure_active(&core)?;

        if core.queue.len() < 2 {
            return Ok(false);
        }
        core.queue.shuffle_except_current();
        self.publish(&core);
        Ok(true)
    }

    pub async fn set_loop(&self, enabled: bool) -> Result<(), SessionError> {
        self.touch();
        let mut core = self.core.lock().await;
        self.ensure_active(&core)?;
        core.queue.set_loop(enabled);
        self.publish(&core);
        Ok(())
    }

    pub async fn toggle_loop(&self) -> Result<bool, SessionError> {
        self.touch();
        let mut core = self.core.lock().await;
        self.ensure_active(&core)?;
        let enabled = !core.queue.loop_enabled();
        core.queue.set_loop(enabled);
        self.publish(&core);
        Ok(enabled)
    }

    pub async fn queue_page(&self, page: usize, per_page: usize) -> QueuePage {
        self.core.lock().await.queue.page(page, per_page)
    }

    /// Último estado publicado; no espera al lock de la sesión.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_activity.lock())
    }

    /// Chequeo rápido, sin lock, para el barrido de inactividad.
    pub(crate) fn looks_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.snapshot.borrow().state == PlayerState::Idle && self.idle_for(now) >= timeout
    }

    /// Detiene la sesión si sigue Idle e inactiva bajo el lock.
    pub(crate) async fn expire_if_idle(&self, now: Instant, timeout: Duration) -> bool {
        let mut core = self.core.lock().await;
        if core.state != PlayerState::Idle || self.idle_for(now) < timeout {
            return false;
        }
        self.terminate(&mut core, StopReason::IdleTimeout).await;
        true
    }

    /// Termina la sesión. Devuelve false si ya estaba detenida.
    pub(crate) async fn shutdown(&self, reason: StopReason) -> bool {
        let mut core = self.core.lock().await;
        if core.state == PlayerState::Stopped {
            return false;
        }
        self.terminate(&mut core, reason).await;
        true
    }

    // ----- Motor interno -----

    /// Busca la próxima pista reproducible desde el puntero y la arranca,
    /// o lanza su resolución. Sin pistas reproducibles la sesión queda Idle.
    async fn drive(&self, core: &mut SessionCore) {
        loop {
            if !seek_playable(core) {
                self.finish_queue(core);
                return;
            }

            let Some(track) = core.queue.current_track() else {
                self.finish_queue(core);
                return;
            };

            let Some(locator) = track.fresh_locator(self.settings.stream_ttl).cloned() else {
                self.spawn_resolution(core);
                return;
            };

            debug!("♻️ [{}] Reutilizando stream de {}", self.guild_id, track.title());
            let title = track.title().to_string();
            match self.start_transport(core, &locator).await {
                Ok(()) => return,
                Err(e) if e.is_fatal() => {
                    self.terminate(core, StopReason::ConnectionLost).await;
                    return;
                }
                Err(e) => {
                    if let Some(track) = core.queue.current_track_mut() {
                        track.invalidate_locator();
                    }
                    if !self.fail_and_advance(core, title, None, e.to_string()) {
                        return;
                    }
                }
            }
        }
    }

    fn spawn_resolution(&self, core: &mut SessionCore) {
        if let Some(task) = core.resolving.take() {
            task.abort();
        }
        let Some(track) = core.queue.current_track().cloned() else {
            return;
        };

        core.state = PlayerState::Resolving;
        let epoch = core.epoch;
        let resolver = self.resolver.clone();
        let session = self.me.clone();
        debug!("🔎 [{}] Resolviendo {} (epoch {})", self.guild_id, track.title(), epoch);

        core.resolving = Some(tokio::spawn(async move {
            let result = resolver.resolve(&track).await;
            if let Some(session) = session.upgrade() {
                session.finish_resolution(epoch, result).await;
            }
        }));
        self.publish(core);
    }

    async fn finish_resolution(&self, epoch: u64, result: Result<Resolved, ResolutionError>) {
        let mut core = self.core.lock().await;
        if core.epoch != epoch || core.state != PlayerState::Resolving {
            let stale = SessionError::StaleCallback {
                captured: epoch,
                current: core.epoch,
            };
            debug!("[{}] Resolución descartada: {}", self.guild_id, stale);
            return;
        }
        // Es el handle de esta misma tarea
        core.resolving = None;

        match result {
            Ok(resolved) => {
                let Some(track) = core.queue.current_track_mut() else {
                    self.finish_queue(&mut core);
                    self.publish(&core);
                    return;
                };
                track.merge_metadata(resolved.metadata);
                track.set_resolved(resolved.locator.clone());
                let title = track.title().to_string();

                match self.start_transport(&mut core, &resolved.locator).await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => {
                        self.terminate(&mut core, StopReason::ConnectionLost).await;
                    }
                    Err(e) => {
                        if let Some(track) = core.queue.current_track_mut() {
                            track.invalidate_locator();
                        }
                        if self.fail_and_advance(&mut core, title, None, e.to_string()) {
                            self.drive(&mut core).await;
                        }
                    }
                }
            }
            Err(e) => {
                let title = core
                    .queue
                    .current_track()
                    .map(|t| t.title().to_string())
                    .unwrap_or_default();
                warn!("❌ [{}] No se pudo resolver {}: {}", self.guild_id, title, e);
                if self.fail_and_advance(&mut core, title, Some(e.reason), e.reason.to_string()) {
                    self.drive(&mut core).await;
                }
            }
        }

        self.publish(&core);
    }

    async fn start_transport(
        &self,
        core: &mut SessionCore,
        locator: &StreamLocator,
    ) -> Result<(), TransportError> {
        let completion = CompletionHandle::new(self.guild_id, core.epoch, self.completions.clone());
        self.transport
            .play(locator, core.queue.volume(), completion)
            .await?;

        core.state = PlayerState::Playing;
        core.failures = 0;
        self.touch();

        if let Some(track) = core.queue.current_track() {
            info!("🎵 [{}] Reproduciendo: {}", self.guild_id, track.title());
            self.emit(PlayerEventKind::TrackStarted {
                title: track.title().to_string(),
                position: core.queue.current_index() + 1,
            });
        }
        self.publish(core);
        Ok(())
    }

    /// Registra un fallo de la pista actual y avanza. Devuelve true si hay que
    /// seguir reproduciendo; false si la sesión quedó Idle.
    fn fail_and_advance(
        &self,
        core: &mut SessionCore,
        title: String,
        reason: Option<ResolutionFailure>,
        error: String,
    ) -> bool {
        core.failures += 1;

        let unplayable = core
            .queue
            .current_track_mut()
            .map(|t| t.record_failed_attempt(self.settings.max_track_attempts))
            .unwrap_or(false);
        if unplayable {
            warn!("🚫 [{}] {} marcada como irreproducible", self.guild_id, title);
        }

        self.emit(PlayerEventKind::TrackFailed {
            title,
            reason,
            error,
        });

        if core.failures > self.settings.retry_budget {
            error!(
                "❌ [{}] {} fallos seguidos, deteniendo la cola",
                self.guild_id, core.failures
            );
            core.state = PlayerState::Idle;
            self.emit(PlayerEventKind::QueueExhausted {
                failures: core.failures,
            });
            return false;
        }

        match advance(core) {
            Advance::Exhausted => {
                self.finish_queue(core);
                false
            }
            Advance::Next | Advance::Wrapped => true,
        }
    }

    async fn handle_completion(&self, completion: Completion) {
        let mut core = self.core.lock().await;

        if completion.epoch != core.epoch {
            let stale = SessionError::StaleCallback {
                captured: completion.epoch,
                current: core.epoch,
            };
            debug!("[{}] Completion ignorado: {}", self.guild_id, stale);
            return;
        }
        if !matches!(core.state, PlayerState::Playing | PlayerState::Paused) {
            debug!("[{}] Completion fuera de reproducción ignorado", self.guild_id);
            return;
        }

        match completion.result {
            Ok(()) => {
                debug!("⏭️ [{}] Pista terminada", self.guild_id);
                self.on_track_end(&mut core).await;
            }
            Err(e) if e.is_fatal() => {
                error!("🔌 [{}] {}", self.guild_id, e);
                self.terminate(&mut core, StopReason::ConnectionLost).await;
            }
            Err(e) => {
                let title = match core.queue.current_track_mut() {
                    Some(track) => {
                        track.invalidate_locator();
                        track.title().to_string()
                    }
                    None => String::new(),
                };
                warn!("⚠️ [{}] Error durante la reproducción: {}", self.guild_id, e);
                if self.fail_and_advance(&mut core, title, None, e.to_string()) {
                    self.drive(&mut core).await;
                }
            }
        }

        self.publish(&core);
    }

    /// Fin de la pista actual, por skip o por completion: avanza y sigue.
    async fn on_track_end(&self, core: &mut SessionCore) {
        match advance(core) {
            Advance::Exhausted => self.finish_queue(core),
            Advance::Next | Advance::Wrapped => self.drive(core).await,
        }
    }

    fn finish_queue(&self, core: &mut SessionCore) {
        if core.state == PlayerState::Stopped {
            return;
        }
        core.state = PlayerState::Idle;
        info!("📭 [{}] No quedan canciones por reproducir", self.guild_id);
        self.emit(PlayerEventKind::QueueFinished);
    }

    async fn terminate(&self, core: &mut SessionCore, reason: StopReason) {
        if let Some(task) = core.resolving.take() {
            task.abort();
        }
        core.epoch += 1;

        if let Err(e) = self.transport.stop().await {
            debug!("[{}] stop al terminar: {}", self.guild_id, e);
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!("⚠️ [{}] {}", self.guild_id, e);
        }

        core.queue.clear();
        core.state = PlayerState::Stopped;
        info!("⏹️ [{}] Sesión terminada ({})", self.guild_id, reason);

        match reason {
            StopReason::IdleTimeout => self.emit(PlayerEventKind::IdleTimeout),
            _ => self.emit(PlayerEventKind::Stopped { reason }),
        }

        self.link.detach(self.guild_id, self);
        self.publish(core);
    }

    // ----- Utilidades -----

    fn ensure_active(&self, core: &SessionCore) -> Result<(), SessionError> {
        if core.state == PlayerState::Stopped {
            return Err(SessionError::Stopped(self.guild_id));
        }
        Ok(())
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn publish(&self, core: &SessionCore) {
        self.snapshot.send_replace(build_snapshot(self.guild_id, core));
    }

    fn emit(&self, kind: PlayerEventKind) {
        let event = PlayerEvent {
            guild_id: self.guild_id,
            channel: self.origin,
            kind,
        };
        // Sin suscriptores el envío falla; no es un error
        if let Some(hub) = &self.hub {
            let _ = hub.send(event.clone());
        }
        let _ = self.events.send(event);
    }
}

fn is_active(state: PlayerState) -> bool {
    matches!(
        state,
        PlayerState::Playing | PlayerState::Paused | PlayerState::Resolving
    )
}

fn advance(core: &mut SessionCore) -> Advance {
    core.epoch += 1;
    core.queue.advance()
}

/// Deja el puntero sobre una pista reproducible. Recorre como máximo la
/// cola completa una vez.
fn seek_playable(core: &mut SessionCore) -> bool {
    let steps = core.queue.len() + 1;
    for _ in 0..steps {
        match core.queue.current_track() {
            None => return false,
            Some(track) if track.is_playable() => return true,
            Some(_) => {
                if advance(core) == Advance::Exhausted {
                    return false;
                }
            }
        }
    }
    false
}

fn build_snapshot(guild_id: GuildId, core: &SessionCore) -> SessionSnapshot {
    let current = core.queue.current_track();
    SessionSnapshot {
        guild_id,
        state: core.state,
        current: current.map(Track::summary),
        position: current.map(|_| core.queue.current_index() + 1),
        queue_len: core.queue.len(),
        volume: (core.queue.volume() * 100.0).round() as u8,
        loop_enabled: core.queue.loop_enabled(),
        epoch: core.epoch,
        failures: core.failures,
    }
}

async fn run_completions(
    session: Weak<PlaybackSession>,
    mut completions: mpsc::UnboundedReceiver<Completion>,
) {
    while let Some(completion) = completions.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        session.handle_completion(completion).await;
    }
}
