use chrono::{DateTime, Utc};
use std::{collections::VecDeque, path::PathBuf};
use tracing::info;

use crate::sources::ResolvedTrack;

/// Un track pendiente en la cola.
///
/// `file_path` es el archivo descargado por el resolver; la entrada es
/// su dueña y el archivo se elimina cuando el track termina de sonar o
/// la cola se limpia.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub stream_url: String,
    pub file_path: PathBuf,
    pub title: String,
    #[allow(dead_code)]
    pub enqueued_at: DateTime<Utc>,
}

impl From<ResolvedTrack> for QueueEntry {
    fn from(track: ResolvedTrack) -> Self {
        Self {
            stream_url: track.stream_url,
            file_path: track.file_path,
            title: track.title,
            enqueued_at: Utc::now(),
        }
    }
}

/// Cola de reproducción: FIFO estricto, sin prioridades ni reordenamiento.
#[derive(Debug)]
pub struct TrackQueue {
    items: VecDeque<QueueEntry>,
    max_size: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Agrega un track al final; devuelve la entrada si la cola está llena
    pub fn push(&mut self, entry: QueueEntry) -> Result<(), QueueEntry> {
        if self.items.len() >= self.max_size {
            return Err(entry);
        }

        info!("➕ Agregado a la cola: {}", entry.title);
        self.items.push_back(entry);
        Ok(())
    }

    /// Saca el siguiente track (primero en entrar, primero en salir)
    pub fn pop(&mut self) -> Option<QueueEntry> {
        let next = self.items.pop_front();
        if let Some(ref entry) = next {
            info!("➡️ Siguiente en cola (FIFO): {}", entry.title);
        }
        next
    }

    /// Vacía la cola devolviendo todas las entradas pendientes,
    /// en orden, para que el caller limpie sus archivos
    pub fn drain(&mut self) -> Vec<QueueEntry> {
        let drained: Vec<QueueEntry> = self.items.drain(..).collect();
        if !drained.is_empty() {
            info!("🗑️ Cola limpiada ({} tracks)", drained.len());
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(title: &str) -> QueueEntry {
        QueueEntry {
            stream_url: format!("https://cdn.example.com/{title}.m4a"),
            file_path: PathBuf::from(format!("downloads/{title}.m4a")),
            title: title.to_string(),
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn pops_in_insertion_order() {
        let mut queue = TrackQueue::new(10);
        for title in ["a", "b", "c", "d"] {
            queue.push(entry(title)).unwrap();
        }

        let order: Vec<String> = std::iter::from_fn(|| queue.pop())
            .map(|e| e.title)
            .collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn rejects_push_when_full_and_returns_the_entry() {
        let mut queue = TrackQueue::new(2);
        queue.push(entry("a")).unwrap();
        queue.push(entry("b")).unwrap();

        let rejected = queue.push(entry("c")).unwrap_err();
        assert_eq!(rejected.title, "c");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn drain_returns_everything_in_order_and_empties() {
        let mut queue = TrackQueue::new(10);
        for title in ["a", "b", "c"] {
            queue.push(entry(title)).unwrap();
        }

        let drained: Vec<String> = queue.drain().into_iter().map(|e| e.title).collect();
        assert_eq!(drained, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn pop_on_empty_is_none() {
        let mut queue = TrackQueue::new(10);
        assert!(queue.pop().is_none());
        assert_eq!(queue.len(), 0);
    }
}
