use std::collections::HashMap;
use std::sync::Arc;

use aiden_core::config::AppConfig;
use aiden_core::error::{AidenError, Result};
use aiden_core::traits::{ChatModel, ModelProvider};
use aiden_core::types::TaskType;

use crate::create_model;

/// Routes each task type to a configured model.
pub struct TaskModelRouter {
    models: HashMap<String, Arc<dyn ChatModel>>,
    task_models: HashMap<String, String>,
    default_model: Option<String>,
}

impl TaskModelRouter {
    /// Build a model for every `[models.*]` entry. Task mappings that point at
    /// an undefined model are rejected up front.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let models = config
            .models
            .iter()
            .map(|(key, model)| (key.clone(), create_model(model)))
            .collect();
        Self::new(models, config.task_models.clone(), config.default_model.clone())
    }

    pub fn new(
        models: HashMap<String, Arc<dyn ChatModel>>,
        task_models: HashMap<String, String>,
        default_model: Option<String>,
    ) -> Result<Self> {
        for key in task_models.values().chain(default_model.iter()) {
            if !models.contains_key(key) {
                return Err(AidenError::Config(format!("model '{}' is not defined", key)));
            }
        }
        Ok(Self {
            models,
            task_models,
            default_model,
        })
    }
}

impl ModelProvider for TaskModelRouter {
    fn model_for_task(&self, task: TaskType) -> Result<Arc<dyn ChatModel>> {
        let key = self
            .task_models
            .get(task.as_str())
            .or(self.default_model.as_ref())
            .ok_or_else(|| AidenError::Config(format!("no model configured for task '{}'", task)))?;
        self.models
            .get(key)
            .cloned()
            .ok_or_else(|| AidenError::Config(format!("model '{}' is not defined", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiden_core::traits::{ChatRequest, ChatResponse};
    use futures::future::BoxFuture;

    struct Named(&'static str);

    impl ChatModel for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn complete(&self, _request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse>> {
            Box::pin(async { Ok(ChatResponse::default()) })
        }
    }

    fn models() -> HashMap<String, Arc<dyn ChatModel>> {
        let mut m: HashMap<String, Arc<dyn ChatModel>> = HashMap::new();
        m.insert("big".into(), Arc::new(Named("gpt-4.1")));
        m.insert("small".into(), Arc::new(Named("gpt-4.1-mini")));
        m
    }

    #[test]
    fn explicit_mapping_then_default() {
        let router = TaskModelRouter::new(
            models(),
            HashMap::from([("requirement_classification".to_string(), "small".to_string())]),
            Some("big".into()),
        )
        .unwrap();
        assert_eq!(
            router.model_for_task(TaskType::RequirementClassification).unwrap().name(),
            "gpt-4.1-mini"
        );
        assert_eq!(
            router.model_for_task(TaskType::DocumentGeneration).unwrap().name(),
            "gpt-4.1"
        );
    }

    #[test]
    fn unmapped_task_without_default_is_config_error() {
        let router = TaskModelRouter::new(models(), HashMap::new(), None).unwrap();
        let err = router.model_for_task(TaskType::Summarization).err().unwrap();
        assert!(matches!(err, AidenError::Config(_)));
    }

    #[test]
    fn undefined_model_reference_rejected() {
        let result = TaskModelRouter::new(models(), HashMap::new(), Some("huge".into()));
        assert!(result.is_err());
    }
}
