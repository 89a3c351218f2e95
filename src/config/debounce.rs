use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::file::ConfigError;

/// A configuration store that normally persists itself on every mutation.
pub trait PersistentStore: Send + Sync {
    fn save(&self) -> Result<(), ConfigError>;

    fn set_save_on_set(&self, enabled: bool);

    fn location(&self) -> String {
        String::from("<store>")
    }
}

#[derive(Default)]
struct DebounceState {
    window_open: bool,
    pending: Vec<Arc<dyn PersistentStore>>,
}

/// Holds back per-mutation saves of stores created during startup and writes
/// each of them once when startup finishes.
#[derive(Default)]
pub struct ConfigSaveDebouncer {
    state: Mutex<DebounceState>,
}

impl std::fmt::Debug for ConfigSaveDebouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConfigSaveDebouncer")
            .field("window_open", &state.window_open)
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl ConfigSaveDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_window(&self) {
        self.state.lock().window_open = true;
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Called when a store is created. Returns whether its saves are deferred.
    pub fn track(&self, store: Arc<dyn PersistentStore>) -> bool {
        let mut state = self.state.lock();
        if !state.window_open {
            return false;
        }

        store.set_save_on_set(false);
        let known = state
            .pending
            .iter()
            .any(|pending| std::ptr::addr_eq(Arc::as_ptr(pending), Arc::as_ptr(&store)));
        if !known {
            state.pending.push(store);
        }

        true
    }

    /// Persist every deferred store once, in creation order, and restore
    /// per-mutation saving. Stores created afterwards are left alone.
    pub fn flush(&self) -> usize {
        let pending = {
            let mut state = self.state.lock();
            state.window_open = false;
            std::mem::take(&mut state.pending)
        };

        for store in &pending {
            if let Err(err) = store.save() {
                tracing::warn!("deferred config save failed for {}: {err}", store.location());
            }
            store.set_save_on_set(true);
        }

        if !pending.is_empty() {
            tracing::info!("Saved {} config files after startup", pending.len());
        }

        pending.len()
    }
}
