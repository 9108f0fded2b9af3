//! Cola acotada de tareas de indexación de documentos con un pool de workers
//! supervisados.
//!
//! Cada tarea se ejecuta en su propia `tokio::spawn`; si entra en pánico el
//! documento queda en `FAILED` y el worker sigue atendiendo la cola. Los
//! workers terminan cuando se sueltan todos los `IndexingQueue`.
//!
//! Un documento sólo puede tener una tarea a la vez, encolada o en curso.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::ingest::DocumentIndexer;

const PANIC_MESSAGE: &str = "la tarea de indexación terminó de forma inesperada";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("la cola de indexación está llena")]
    Full,
    #[error("la cola de indexación está cerrada")]
    Closed,
    #[error("el documento ya tiene una indexación pendiente o en curso")]
    InFlight,
}

/// Documentos con una tarea encolada o en ejecución.
#[derive(Default)]
struct InFlight {
    ids: std::sync::Mutex<HashSet<Uuid>>,
}

impl InFlight {
    fn claim(&self, document_id: Uuid) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(document_id)
    }

    fn release(&self, document_id: Uuid) {
        self.ids
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&document_id);
    }
}

#[derive(Clone)]
pub struct IndexingQueue {
    sender: mpsc::Sender<Uuid>,
    in_flight: Arc<InFlight>,
}

/// Handles de los workers, para esperar su cierre.
pub struct IndexingWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl IndexingQueue {
    pub fn start(
        indexer: Arc<DocumentIndexer>,
        workers: usize,
        capacity: usize,
    ) -> (Self, IndexingWorkers) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let in_flight = Arc::new(InFlight::default());

        let handles = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&receiver),
                    Arc::clone(&indexer),
                    Arc::clone(&in_flight),
                ))
            })
            .collect();

        info!(workers = workers.max(1), capacity = capacity.max(1), "Cola de indexación iniciada");
        (Self { sender, in_flight }, IndexingWorkers { handles })
    }

    /// Encola un documento sin esperar a que haya hueco.
    ///
    /// Falla con `InFlight` si el documento ya está encolado o indexándose.
    pub fn submit(&self, document_id: Uuid) -> Result<(), QueueError> {
        if !self.in_flight.claim(document_id) {
            return Err(QueueError::InFlight);
        }
        self.sender.try_send(document_id).map_err(|e| {
            self.in_flight.release(document_id);
            match e {
                mpsc::error::TrySendError::Full(_) => QueueError::Full,
                mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
            }
        })
    }
}

impl IndexingWorkers {
    /// Espera a que todos los workers terminen.
    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!("Un worker de indexación terminó con error: {}", e);
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Uuid>>>,
    indexer: Arc<DocumentIndexer>,
    in_flight: Arc<InFlight>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(document_id) = next else {
            break;
        };

        debug!(worker, %document_id, "Tarea de indexación recibida");
        let job = {
            let indexer = Arc::clone(&indexer);
            tokio::spawn(async move { indexer.run(document_id).await })
        };

        if let Err(e) = job.await {
            error!(worker, %document_id, error = %e, "La tarea de indexación falló; se marca el documento como FAILED");
            indexer.mark_failed(document_id, PANIC_MESSAGE).await;
        }
        in_flight.release(document_id);
    }
    debug!(worker, "Worker de indexación detenido");
}
