use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::device::select_device;
use crate::error::{Result, ServiceError};
use crate::model::{CandleBackend, ModelBackend, ModelLoader};

use super::LlmService;

/// Builder for constructing an [`LlmService`] instance
pub struct ServiceBuilder {
    config: Option<ServiceConfig>,
    backend: Option<Arc<dyn ModelBackend>>,
}

impl ServiceBuilder {
    /// Create a new builder instance
    pub fn new() -> Self {
        Self {
            config: None,
            backend: None,
        }
    }

    /// Set the service configuration
    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Serve from an already constructed backend instead of loading a model
    pub fn with_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Build the service, loading the configured model when no backend was
    /// supplied. Any failure here means the process must not serve.
    pub async fn build(self) -> Result<LlmService> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let backend = match self.backend {
            Some(backend) => backend,
            None => {
                let model_config = config.model.clone();
                tokio::task::spawn_blocking(move || load_backend(&model_config))
                    .await
                    .map_err(|e| ServiceError::startup("model loading task failed", e))??
            }
        };

        tracing::info!(
            model = backend.model_id(),
            device = %backend.device(),
            max_context = backend.max_context(),
            generation_slots = config.limits.max_concurrent_generations,
            "model service ready"
        );

        Ok(LlmService::new(
            backend,
            config.limits.max_concurrent_generations,
            config.limits.request_timeout,
        ))
    }
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn load_backend(config: &crate::config::ModelConfig) -> Result<Arc<dyn ModelBackend>> {
    let device = select_device(config.device)?;
    let loader = ModelLoader::from_config(config);
    let runtime = loader.load(&device).map_err(|e| {
        ServiceError::startup(format!("failed to load model '{}'", config.model_id), e)
    })?;
    Ok(Arc::new(CandleBackend::new(config.model_id.clone(), runtime)))
}
