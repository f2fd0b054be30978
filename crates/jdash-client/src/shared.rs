use jdash_core::store::{DashboardState, Store, StoreAction, StoreError};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Cloneable handle on the process-wide store. Every applied action bumps
/// the published revision.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<Mutex<Store>>,
    revision: Arc<watch::Sender<u64>>,
}

impl StoreHandle {
    pub fn new(store: Store) -> Self {
        let (revision, _) = watch::channel(store.revision());
        Self {
            store: Arc::new(Mutex::new(store)),
            revision: Arc::new(revision),
        }
    }

    /// Rejected actions are logged and returned; they never panic.
    pub fn dispatch(&self, action: StoreAction) -> Result<(), StoreError> {
        let name = action.name();
        let revision = {
            let mut store = self.lock();
            if let Err(err) = store.dispatch(action) {
                warn!(event = "store_action_rejected", action = name, error = %err);
                return Err(err);
            }
            store.revision()
        };
        debug!(event = "store_action", action = name, revision = revision);
        self.revision.send_replace(revision);
        Ok(())
    }

    /// Run `f` against a consistent view of the state.
    pub fn read<T>(&self, f: impl FnOnce(&DashboardState) -> T) -> T {
        let store = self.lock();
        f(store.state())
    }

    pub fn snapshot(&self) -> DashboardState {
        self.read(DashboardState::clone)
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jdash_core::store::DashboardConfig;

    #[test]
    fn publishes_revision_after_each_action() {
        let handle = StoreHandle::new(Store::new());
        let mut changes = handle.subscribe();
        handle
            .dispatch(StoreAction::StoreConfig(DashboardConfig::default()))
            .expect("config");
        assert!(changes.has_changed().expect("sender alive"));
        assert_eq!(*changes.borrow_and_update(), 1);
        assert!(handle.read(|state| state.config().is_some()));
    }

    #[test]
    fn rejected_actions_do_not_bump_revision() {
        let handle = StoreHandle::new(Store::new());
        let err = handle
            .dispatch(StoreAction::UpdateModelsError {
                ws_controller_url: "wss://example.com/api".to_string(),
                error: None,
            })
            .expect_err("gated");
        assert!(matches!(err, StoreError::NotAuthenticated { .. }));
        assert_eq!(handle.revision(), 0);
    }
}
