//! Summarization: the preread instruction template, response parsing and
//! the chat-completions adapter.

pub mod prompts;
pub mod provider;

pub use prompts::PREREAD_INSTRUCTIONS;
pub use provider::ChatCompletionsSummarizer;
