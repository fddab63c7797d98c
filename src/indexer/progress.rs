//! In-flight progress, shared between the orchestrator and whoever renders
//! it. Cheap to clone, safe to read from another task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct IndexingProgress {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    total_files: AtomicU64,
    processed_files: AtomicU64,
    total_entities: AtomicU64,
    failed_entities: AtomicU64,
    current_file: Mutex<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total_files: u64,
    pub processed_files: u64,
    pub total_entities: u64,
    pub failed_entities: u64,
    pub current_file: Option<String>,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        self.processed_files as f64 * 100.0 / self.total_files as f64
    }
}

impl IndexingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_run(&self, total_files: u64, already_processed: u64) {
        self.inner.total_files.store(total_files, Ordering::Relaxed);
        self.inner
            .processed_files
            .store(already_processed, Ordering::Relaxed);
        self.inner.failed_entities.store(0, Ordering::Relaxed);
    }

    pub fn file_started(&self, rel_path: &str) {
        *self.inner.current_file.lock().unwrap() = Some(rel_path.to_string());
    }

    pub fn file_done(&self, entities: u64) {
        self.inner.processed_files.fetch_add(1, Ordering::Relaxed);
        self.inner.total_entities.fetch_add(entities, Ordering::Relaxed);
    }

    pub fn entity_failed(&self) {
        self.inner.failed_entities.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finish(&self) {
        *self.inner.current_file.lock().unwrap() = None;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total_files: self.inner.total_files.load(Ordering::Relaxed),
            processed_files: self.inner.processed_files.load(Ordering::Relaxed),
            total_entities: self.inner.total_entities.load(Ordering::Relaxed),
            failed_entities: self.inner.failed_entities.load(Ordering::Relaxed),
            current_file: self.inner.current_file.lock().unwrap().clone(),
        }
    }
}
