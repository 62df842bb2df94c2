use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;

use aiden_core::error::{AidenError, Result};
use aiden_core::traits::{ChatModel, ChatRequest, ChatResponse, ModelProvider};
use aiden_core::types::{TaskType, TokenUsage};

#[derive(Clone)]
enum Scripted {
    Reply(ChatResponse),
    Fail(String),
}

/// A chat model that replays queued responses.
///
/// The last queued entry is sticky: once the queue is down to one item it
/// is returned for every further call, which keeps revision loops simple.
pub struct ScriptedModel {
    name: String,
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a structured reply.
    pub fn reply_json(self, value: Value, tokens: u64) -> Self {
        self.push(Scripted::Reply(ChatResponse {
            text: value.to_string(),
            structured: Some(value),
            usage: usage(tokens),
            cost_usd: tokens as f64 * 0.00001,
        }))
    }

    /// Queue a free-text reply.
    pub fn reply_text(self, text: &str, tokens: u64) -> Self {
        self.push(Scripted::Reply(ChatResponse {
            text: text.to_string(),
            structured: None,
            usage: usage(tokens),
            cost_usd: tokens as f64 * 0.00001,
        }))
    }

    /// Queue a request failure.
    pub fn fail(self, message: &str) -> Self {
        self.push(Scripted::Fail(message.to_string()))
    }

    fn push(self, entry: Scripted) -> Self {
        self.script.lock().unwrap().push_back(entry);
        self
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

fn usage(tokens: u64) -> TokenUsage {
    TokenUsage {
        input_tokens: tokens / 2,
        output_tokens: tokens - tokens / 2,
    }
}

impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse>> {
        self.requests.lock().unwrap().push(request);
        let next = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            }
        };
        let result = match next {
            Some(Scripted::Reply(response)) => Ok(response),
            Some(Scripted::Fail(message)) => Err(AidenError::LlmRequest(message)),
            None => Err(AidenError::LlmRequest(format!(
                "scripted model '{}' has no responses",
                self.name
            ))),
        };
        Box::pin(async move { result })
    }
}

/// A model provider with one scripted model per task type.
#[derive(Default)]
pub struct ScriptedProvider {
    models: HashMap<TaskType, Arc<ScriptedModel>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, task: TaskType, model: ScriptedModel) -> Self {
        self.models.insert(task, Arc::new(model));
        self
    }

    /// The scripted model for a task, for inspecting requests.
    pub fn model(&self, task: TaskType) -> Option<Arc<ScriptedModel>> {
        self.models.get(&task).cloned()
    }
}

impl ModelProvider for ScriptedProvider {
    fn model_for_task(&self, task: TaskType) -> Result<Arc<dyn ChatModel>> {
        self.models
            .get(&task)
            .cloned()
            .map(|m| m as Arc<dyn ChatModel>)
            .ok_or_else(|| AidenError::Config(format!("no model configured for task '{}'", task)))
    }
}
