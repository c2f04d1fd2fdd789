use rand::seq::SliceRandom;
use std::time::Duration;
use tracing::{debug, info};

use crate::audio::track::{Track, TrackSummary};
use crate::error::QueueError;

/// Resultado de mover el puntero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Next,
    Wrapped,
    Exhausted,
}

/// Resultado de agregar varias pistas de una vez (playlist).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueAdd {
    pub first_index: Option<usize>,
    pub added: usize,
    pub truncated: bool,
}

/// Cola de reproducción de una guild con puntero a la pista actual.
///
/// Invariante: `0 <= current <= items.len()`, y `current == items.len()` solo
/// cuando la cola quedó vacía. Pasar del final sin loop no saca el puntero de
/// rango: se marca `exhausted`.
#[derive(Debug)]
pub struct PlaybackQueue {
    items: Vec<Track>,
    current: usize,
    exhausted: bool,
    loop_enabled: bool,
    volume: f32,
    max_size: usize,
}

impl PlaybackQueue {
    pub fn new(max_size: usize, volume: f32) -> Self {
        Self {
            items: Vec::new(),
            current: 0,
            exhausted: false,
            loop_enabled: false,
            volume: volume.clamp(0.0, 1.0),
            max_size,
        }
    }

    /// Agrega una pista al final. Devuelve su índice.
    pub fn add(&mut self, track: Track) -> Result<usize, QueueError> {
        if self.items.len() >= self.max_size {
            return Err(QueueError::QueueFull { max: self.max_size });
        }

        info!("➕ Agregado a la cola: {}", track.title());
        self.items.push(track);
        let index = self.items.len() - 1;

        // Una cola agotada sigue con lo que se agregue después
        if self.exhausted {
            self.current = index;
            self.exhausted = false;
        }

        Ok(index)
    }

    /// Agrega múltiples pistas, truncando al llegar a la capacidad.
    pub fn add_many(&mut self, tracks: Vec<Track>) -> QueueAdd {
        let available = self.max_size.saturating_sub(self.items.len());
        let requested = tracks.len();
        let mut first_index = None;
        let mut added = 0;

        for track in tracks.into_iter().take(available) {
            if let Ok(index) = self.add(track) {
                first_index.get_or_insert(index);
                added += 1;
            }
        }

        if added > 0 {
            info!("➕ Agregadas {} canciones a la cola", added);
        }

        QueueAdd {
            first_index,
            added,
            truncated: added < requested,
        }
    }

    /// Vacía la cola y reinicia el puntero.
    pub fn clear(&mut self) {
        self.items.clear();
        self.current = 0;
        self.exhausted = false;
        info!("🗑️ Cola limpiada");
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn current_track(&self) -> Option<&Track> {
        if self.exhausted {
            return None;
        }
        self.items.get(self.current)
    }

    pub fn current_track_mut(&mut self) -> Option<&mut Track> {
        if self.exhausted {
            return None;
        }
        self.items.get_mut(self.current)
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.items.iter()
    }

    /// Mueve el puntero a la siguiente pista.
    pub fn advance(&mut self) -> Advance {
        if self.items.is_empty() || self.exhausted {
            return Advance::Exhausted;
        }

        let last = self.items.len() - 1;
        if self.loop_enabled && self.current >= last {
            self.current = 0;
            debug!("🔁 Cola reiniciada por loop");
            return Advance::Wrapped;
        }

        if self.current < last {
            self.current += 1;
            Advance::Next
        } else {
            self.current = last;
            self.exhausted = true;
            debug!("📭 Fin de la cola");
            Advance::Exhausted
        }
    }

    /// Elimina la pista en `index` manteniendo el puntero sobre la misma pista lógica.
    pub fn remove_at(&mut self, index: usize) -> Result<Track, QueueError> {
        if self.items.is_empty() {
            return Err(QueueError::QueueEmpty);
        }
        if index >= self.items.len() {
            return Err(QueueError::OutOfRange {
                position: index + 1,
                len: self.items.len(),
            });
        }

        let removed = self.items.remove(index);

        if index < self.current {
            self.current -= 1;
        } else if index == self.current && self.current >= self.items.len() {
            // Se eliminó la última pista y era la actual
            if self.items.is_empty() {
                self.current = 0;
                self.exhausted = false;
            } else if self.loop_enabled && !self.exhausted {
                self.current = 0;
            } else {
                self.current = self.items.len() - 1;
                self.exhausted = true;
            }
        }

        debug!("❌ Pista eliminada en posición {}", index + 1);
        Ok(removed)
    }

    /// Mezcla la cola dejando la pista actual al frente.
    pub fn shuffle_except_current(&mut self) {
        if self.items.len() <= 1 {
            return;
        }

        let mut rng = rand::thread_rng();
        if self.current_track().is_some() {
            let current = self.items.remove(self.current);
            self.items.shuffle(&mut rng);
            self.items.insert(0, current);
            self.current = 0;
        } else {
            self.items.shuffle(&mut rng);
        }

        info!("🔀 Cola mezclada");
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
        if enabled {
            info!("🔁 Repetir cola activado");
        } else {
            info!("➡️ Repetición desactivada");
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    /// Pistas que siguen a la actual.
    pub fn upcoming(&self, limit: usize) -> Vec<&Track> {
        if self.exhausted {
            return Vec::new();
        }
        self.items.iter().skip(self.current + 1).take(limit).collect()
    }

    pub fn total_duration(&self) -> Duration {
        self.items
            .iter()
            .filter_map(|t| t.duration_secs())
            .map(Duration::from_secs)
            .sum()
    }

    /// Obtiene una página específica de la cola (1-based).
    pub fn page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let per_page = items_per_page.max(1);
        let total_items = self.items.len();
        let total_pages = if total_items == 0 {
            1
        } else {
            total_items.div_ceil(per_page)
        };
        let safe_page = page.clamp(1, total_pages);
        let start = (safe_page - 1) * per_page;

        QueuePage {
            items: self
                .items
                .iter()
                .enumerate()
                .skip(start)
                .take(per_page)
                .map(|(i, t)| (i + 1, t.summary()))
                .collect(),
            current_position: self.current_track().map(|_| self.current + 1),
            current_page: safe_page,
            total_pages,
            total_items,
            total_duration: self.total_duration(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuePage {
    /// Pares (posición 1-based, pista).
    pub items: Vec<(usize, TrackSummary)>,
    pub current_position: Option<usize>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub total_duration: Duration,
}
