use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use session_rag::{
    api,
    app_state::{self, Collaborators},
    config::{AppConfig, StorageBackend},
    extract::DocumentTextExtractor,
    llm::LlmManager,
    memory::{InMemoryRepository, InMemoryVectorIndex},
    neo4j_client::{self, Neo4jRepository},
    vector_store::Neo4jVectorIndex,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Tiempo máximo para que los workers de indexación terminen tras el apagado.
const WORKERS_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Inicializar gestor de LLMs
    let llm_manager = LlmManager::from_config(&cfg).context("Error inicializando LLM Manager")?;

    // 4. Elegir backend de persistencia e índice vectorial
    let collaborators = match &cfg.backend {
        StorageBackend::Neo4j { uri, user, password } => {
            let graph = neo4j_client::connect(uri, user, password)
                .await
                .context("Error conectando a Neo4j")?;
            neo4j_client::ensure_schema(&graph)
                .await
                .context("Error asegurando el esquema de Neo4j")?;

            let graph = Arc::new(graph);
            Collaborators {
                repository: Arc::new(Neo4jRepository::new(Arc::clone(&graph))),
                vector_index: Arc::new(Neo4jVectorIndex::new(graph, llm_manager.clone())),
                generator: Arc::new(llm_manager),
                extractor: Arc::new(DocumentTextExtractor),
            }
        }
        StorageBackend::Memory => {
            warn!("Backend en memoria: los datos se pierden al cerrar el servidor.");
            Collaborators {
                repository: Arc::new(InMemoryRepository::new()),
                vector_index: Arc::new(InMemoryVectorIndex::new()),
                generator: Arc::new(llm_manager),
                extractor: Arc::new(DocumentTextExtractor),
            }
        }
    };

    // 5. Crear estado compartido, cola de indexación y canal de apagado
    let runtime = app_state::build(cfg.clone(), collaborators);
    let shutdown_rx = runtime.shutdown;

    // 6. Configurar el router de la API
    let app = api::create_router(runtime.state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            // /api/shutdown sólo existe con ENABLE_SHUTDOWN_ENDPOINT=true.
            tokio::select! {
                _ = shutdown_rx => {}
                _ = tokio::signal::ctrl_c() => {}
            }
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error del servidor HTTP")?;

    // El router ya no existe: la cola queda cerrada y los workers drenan lo pendiente.
    if tokio::time::timeout(WORKERS_SHUTDOWN_GRACE, runtime.workers.join())
        .await
        .is_err()
    {
        warn!("Los workers de indexación no terminaron a tiempo; se abandonan.");
    }

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
