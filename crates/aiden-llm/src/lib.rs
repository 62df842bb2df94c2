pub mod openai;
pub mod retry;
pub mod router;

use std::sync::Arc;

use aiden_core::config::ModelConfig;
use aiden_core::traits::ChatModel;

pub use openai::OpenAiModel;
pub use retry::RetryingModel;
pub use router::TaskModelRouter;

/// Create a chat model for a config entry, wrapped in retry/backoff.
///
/// Every provider goes through the OpenAI-compatible client; point
/// `base_url` at the provider's compatible endpoint.
pub fn create_model(config: &ModelConfig) -> Arc<dyn ChatModel> {
    let client: Arc<dyn ChatModel> = Arc::new(OpenAiModel::new(config.clone()));
    Arc::new(RetryingModel::new(
        client,
        config.retry.clone().unwrap_or_default(),
    ))
}
