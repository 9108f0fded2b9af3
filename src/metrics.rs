//! Contadores de eventos degradados del pipeline RAG.
//!
//! Los fallos de recuperación, generación e indexación no llegan al usuario;
//! estos contadores permiten detectar que la calidad del RAG ha caído.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct RagMetrics {
    retrieval_failures: AtomicU64,
    generation_failures: AtomicU64,
    message_indexing_failures: AtomicU64,
    documents_ready: AtomicU64,
    documents_failed: AtomicU64,
    indexing_jobs_rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub retrieval_failures: u64,
    pub generation_failures: u64,
    pub message_indexing_failures: u64,
    pub documents_ready: u64,
    pub documents_failed: u64,
    pub indexing_jobs_rejected: u64,
}

impl RagMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retrieval_failed(&self) {
        self.retrieval_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn generation_failed(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_indexing_failed(&self) {
        self.message_indexing_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn document_ready(&self) {
        self.documents_ready.fetch_add(1, Ordering::Relaxed);
    }

    pub fn document_failed(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn indexing_job_rejected(&self) {
        self.indexing_jobs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            retrieval_failures: self.retrieval_failures.load(Ordering::Relaxed),
            generation_failures: self.generation_failures.load(Ordering::Relaxed),
            message_indexing_failures: self.message_indexing_failures.load(Ordering::Relaxed),
            documents_ready: self.documents_ready.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            indexing_jobs_rejected: self.indexing_jobs_rejected.load(Ordering::Relaxed),
        }
    }
}
