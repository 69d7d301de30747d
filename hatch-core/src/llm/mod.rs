//! Streaming LLM client (C4): builds provider payloads, decodes streamed
//! responses, and dispatches tool calls as they complete.

pub mod api_manager;
pub mod decoder;

pub use api_manager::{ApiManager, StreamOutcome, ToolDispatcher};
pub use decoder::{OllamaDecoder, OpenAiDecoder, StreamDecoder};
