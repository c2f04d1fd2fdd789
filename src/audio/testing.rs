//! Fakes shared by the session and registry tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

use crate::audio::events::{PlayerEvent, PlayerEventKind};
use crate::audio::session::{PlaybackSession, SessionSnapshot};
use crate::audio::track::{StreamLocator, Track};
use crate::audio::transport::{CompletionHandle, TransportConnector, VoiceTransport};
use crate::error::{ProviderError, TransportError};
use crate::sources::{Extraction, FormatSelector, ResolverSettings, SourceProvider, SourceResolver};

const WAIT: Duration = Duration::from_secs(2);

#[derive(Default)]
pub struct FakeTransport {
    played: Mutex<Vec<String>>,
    handles: Mutex<Vec<CompletionHandle>>,
    volumes: Mutex<Vec<f32>>,
    play_failures: Mutex<VecDeque<TransportError>>,
    stops: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().clone()
    }

    pub fn last_handle(&self) -> Option<CompletionHandle> {
        self.handles.lock().last().cloned()
    }

    /// Simula el fin del stream actual.
    pub fn finish(&self, result: Result<(), TransportError>) -> bool {
        self.last_handle()
            .map(|handle| handle.complete(result))
            .unwrap_or(false)
    }

    pub fn fail_next_play(&self, error: TransportError) {
        self.play_failures.lock().push_back(error);
    }

    pub fn last_volume(&self) -> Option<f32> {
        self.volumes.lock().last().copied()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn play(
        &self,
        locator: &StreamLocator,
        _volume: f32,
        completion: CompletionHandle,
    ) -> Result<(), TransportError> {
        if let Some(error) = self.play_failures.lock().pop_front() {
            return Err(error);
        }
        self.played.lock().push(locator.as_str().to_string());
        self.handles.lock().push(completion);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pause(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn resume(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<(), TransportError> {
        self.volumes.lock().push(volume);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.disconnects() == 0
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeConnector {
    transports: Mutex<Vec<Arc<FakeTransport>>>,
    refuse: Mutex<bool>,
    held: Mutex<HashMap<GuildId, Arc<Notify>>>,
}

impl FakeConnector {
    pub fn connects(&self) -> usize {
        self.transports.lock().len()
    }

    pub fn transport(&self, index: usize) -> Option<Arc<FakeTransport>> {
        self.transports.lock().get(index).cloned()
    }

    pub fn refuse(&self) {
        *self.refuse.lock() = true;
    }

    /// Deja colgado el join de `guild_id` hasta notificar el `Notify` devuelto.
    pub fn hold(&self, guild_id: GuildId) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.held.lock().insert(guild_id, gate.clone());
        gate
    }
}

#[async_trait]
impl TransportConnector for FakeConnector {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceTransport>, TransportError> {
        let held = self.held.lock().get(&guild_id).cloned();
        if let Some(gate) = held {
            gate.notified().await;
        }
        if *self.refuse.lock() {
            return Err(TransportError::Connect(format!("sin permisos en {channel_id}")));
        }
        let transport = FakeTransport::new();
        self.transports.lock().push(transport.clone());
        Ok(transport)
    }
}

/// Proveedor que extrae `<ref>/stream` salvo para las referencias marcadas.
#[derive(Default)]
pub struct ScriptedProvider {
    failing: Mutex<HashSet<String>>,
    held: Mutex<HashMap<String, Arc<Notify>>>,
    per_reference: Mutex<HashMap<String, usize>>,
    extracts: AtomicUsize,
}

impl ScriptedProvider {
    pub fn fail(&self, name: &str) {
        self.failing.lock().insert(page_url(name));
    }

    /// La extracción de `name` no termina hasta notificar el `Notify` devuelto.
    pub fn hold(&self, name: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.held.lock().insert(page_url(name), gate.clone());
        gate
    }

    pub fn extracts(&self) -> usize {
        self.extracts.load(Ordering::SeqCst)
    }

    pub fn extracts_of(&self, name: &str) -> usize {
        self.per_reference
            .lock()
            .get(&page_url(name))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl SourceProvider for ScriptedProvider {
    async fn search(&self, text: &str) -> Result<String, ProviderError> {
        Ok(page_url(&text.replace(' ', "-")))
    }

    async fn extract(
        &self,
        reference: &str,
        _selector: FormatSelector,
    ) -> Result<Extraction, ProviderError> {
        self.extracts.fetch_add(1, Ordering::SeqCst);
        *self
            .per_reference
            .lock()
            .entry(reference.to_string())
            .or_default() += 1;

        let held = self.held.lock().get(reference).cloned();
        if let Some(gate) = held {
            gate.notified().await;
        }
        if self.failing.lock().contains(reference) {
            return Err(ProviderError::NotFound("Video unavailable".into()));
        }

        let name = reference.rsplit('/').next().unwrap_or(reference);
        Ok(Extraction {
            direct_url: Some(format!("{reference}/stream")),
            title: Some(format!("Título {name}")),
            duration_secs: Some(180),
            ..Default::default()
        })
    }
}

pub fn resolver_for(provider: Arc<ScriptedProvider>) -> Arc<SourceResolver> {
    Arc::new(SourceResolver::new(provider, ResolverSettings::default()))
}

pub fn page_url(name: &str) -> String {
    format!("https://video.example/watch/{name}")
}

pub fn page(name: &str) -> Track {
    Track::from_query(&page_url(name)).unwrap()
}

pub fn stream_of(name: &str) -> String {
    format!("{}/stream", page_url(name))
}

/// Deja correr las tareas pendientes.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub async fn wait_for(
    session: &PlaybackSession,
    predicate: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let mut rx = session.watch();
    let snapshot = tokio::time::timeout(WAIT, rx.wait_for(|s| predicate(s)))
        .await
        .expect("timeout esperando el estado de la sesión")
        .expect("sesión cerrada")
        .clone();
    snapshot
}

pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timeout esperando la condición");
}

pub async fn next_event(
    events: &mut broadcast::Receiver<PlayerEvent>,
    predicate: impl Fn(&PlayerEventKind) -> bool,
) -> PlayerEventKind {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("canal de eventos cerrado");
            if predicate(&event.kind) {
                return event.kind;
            }
        }
    })
    .await
    .expect("timeout esperando el evento")
}
