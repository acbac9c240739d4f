pub mod openai;
pub mod provider;
pub mod stream;
pub mod types;


pub use openai::OpenAiCompatProvider;
pub use provider::{EmbeddingProvider, LlmProvider};
pub use stream::FragmentStream;
pub use types::{ChatMessage, ChatRequest};
