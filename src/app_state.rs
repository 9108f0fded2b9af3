use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::chat::{MessageService, SessionLocks};
use crate::config::AppConfig;
use crate::extract::TextExtractor;
use crate::indexing_queue::{IndexingQueue, IndexingWorkers};
use crate::ingest::{DocumentIndexer, DocumentService};
use crate::llm::TextGenerator;
use crate::metrics::RagMetrics;
use crate::rag::{RagEngine, RagSettings};
use crate::repository::ChatRepository;
use crate::sessions::SessionService;
use crate::storage::FileStore;
use crate::vector_store::VectorIndex;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub sessions: SessionService,
    pub messages: MessageService,
    pub documents: DocumentService,
    pub metrics: Arc<RagMetrics>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

/// Colaboradores externos del núcleo, elegidos según el backend.
pub struct Collaborators {
    pub repository: Arc<dyn ChatRepository>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub generator: Arc<dyn TextGenerator>,
    pub extractor: Arc<dyn TextExtractor>,
}

/// Estado listo para servir más lo que `main` necesita para el cierre.
pub struct AppRuntime {
    pub state: AppState,
    pub workers: IndexingWorkers,
    pub shutdown: oneshot::Receiver<()>,
}

/// Conecta servicios, cola de indexación y canal de apagado.
///
/// Arranca los workers, así que debe llamarse dentro de un runtime de Tokio.
pub fn build(config: AppConfig, collaborators: Collaborators) -> AppRuntime {
    let Collaborators {
        repository,
        vector_index,
        generator,
        extractor,
    } = collaborators;

    let metrics = Arc::new(RagMetrics::new());
    let files = Arc::new(FileStore::new(config.storage_root.clone()));
    let locks = Arc::new(SessionLocks::new());

    let indexer = Arc::new(DocumentIndexer::new(
        Arc::clone(&repository),
        Arc::clone(&vector_index),
        extractor,
        Arc::clone(&files),
        Arc::clone(&metrics),
        config.vector_timeout,
    ));
    let (queue, workers) =
        IndexingQueue::start(indexer, config.indexing_workers, config.indexing_queue_capacity);

    let rag = RagEngine::new(
        Arc::clone(&repository),
        vector_index,
        generator,
        Arc::clone(&metrics),
        RagSettings::from(&config),
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let state = AppState {
        sessions: SessionService::new(Arc::clone(&repository), Arc::clone(&files), Arc::clone(&locks)),
        messages: MessageService::new(Arc::clone(&repository), rag, locks),
        documents: DocumentService::new(repository, files, queue, Arc::clone(&metrics)),
        metrics,
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
        config,
    };

    AppRuntime {
        state,
        workers,
        shutdown: shutdown_rx,
    }
}
