pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{AidenError, Result};
pub use event::{Event, EventBus, EventSink, Subscription};
pub use traits::{ChatModel, ChatRequest, ChatResponse, ModelProvider, OutputSchema, Retriever};
pub use types::*;
