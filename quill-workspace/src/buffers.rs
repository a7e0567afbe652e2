use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

/// A resolved editor text model. Content is always LF-normalized, which
/// is what the host editor hands out regardless of the on-disk line
/// endings.
pub trait TextModel: Send + Sync {
    fn get_value(&self) -> String;
    fn set_value(&self, content: &str);
    fn is_disposed(&self) -> bool;
}

/// Resolves open editor buffers by path. Returns `None` when no model
/// is open for the path; callers then fall back to disk.
pub trait BufferRegistry: Send + Sync {
    fn resolve_model(&self, path: &Path) -> Option<Arc<dyn TextModel>>;
}

/// In-process buffer registry. Serves both as the host-integration seam
/// and as the dirty-buffer double in tests.
#[derive(Default)]
pub struct InMemoryBuffers {
    models: Mutex<HashMap<PathBuf, Arc<InMemoryModel>>>,
}

impl InMemoryBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a buffer with the given content, replacing any existing one.
    pub fn open(&self, path: impl Into<PathBuf>, content: &str) -> Arc<InMemoryModel> {
        let model = Arc::new(InMemoryModel {
            content: Mutex::new(content.to_string()),
            disposed: AtomicBool::new(false),
        });
        self.lock().insert(path.into(), model.clone());
        model
    }

    pub fn close(&self, path: &Path) {
        if let Some(model) = self.lock().remove(path) {
            model.disposed.store(true, Ordering::SeqCst);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<InMemoryModel>>> {
        match self.models.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl BufferRegistry for InMemoryBuffers {
    fn resolve_model(&self, path: &Path) -> Option<Arc<dyn TextModel>> {
        let model = self.lock().get(path).cloned()?;
        if model.is_disposed() {
            return None;
        }
        Some(model)
    }
}

pub struct InMemoryModel {
    content: Mutex<String>,
    disposed: AtomicBool,
}

impl TextModel for InMemoryModel {
    fn get_value(&self) -> String {
        match self.content.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_value(&self, content: &str) {
        match self.content.lock() {
            Ok(mut guard) => *guard = content.to_string(),
            Err(poisoned) => *poisoned.into_inner() = content.to_string(),
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}
