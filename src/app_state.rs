use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::transform::{ImageTransformer, TransformAdapter};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub transformer: Arc<dyn TransformAdapter>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self::with_transformer(config, Arc::new(ImageTransformer::default()))
    }

    pub fn with_transformer(config: AppConfig, transformer: Arc<dyn TransformAdapter>) -> Self {
        Self {
            config: Arc::new(config),
            transformer,
        }
    }
}
