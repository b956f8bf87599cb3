//! Application state shared across request handlers.

use std::sync::Arc;

use crate::controller::ClusterController;
use crate::db::Store;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn Store>,
    controller: ClusterController,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, controller: ClusterController) -> Self {
        Self {
            inner: Arc::new(AppStateInner { store, controller }),
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.inner.store.as_ref()
    }

    pub fn controller(&self) -> &ClusterController {
        &self.inner.controller
    }
}
