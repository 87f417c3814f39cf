pub mod response;
pub mod runtime;

use std::sync::Arc;

use crate::products::ProductRepository;

pub use runtime::{build_router, serve, shutdown_signal, start_server};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service_name: Arc<str>,
    pub products: Arc<dyn ProductRepository>,
}

impl AppState {
    pub fn new(service_name: impl Into<Arc<str>>, products: Arc<dyn ProductRepository>) -> Self {
        Self {
            service_name: service_name.into(),
            products,
        }
    }
}
