//! Wire schemas for the OpenAI-compatible surface.
//!
//! Everything the proxy accepts or emits is declared here. Untrusted JSON
//! enters through [`validate::validate_chat_request`], which applies the
//! documented defaults and rejects out-of-domain values before anything
//! else touches the request.

pub mod chat_completions;
pub mod validate;

pub use chat_completions::{
    ChatCompletionChoice, ChatCompletionRequest, ChatCompletionResponse,
    ChatCompletionStreamChoice, ChatCompletionStreamResponse, ChatCompletionUsage, ChatMessage,
    ErrorResponse, ModelInfo, ModelsResponse, Role, StopSequence, Tool,
};
pub use validate::{ValidationError, Violation, validate_chat_request};
