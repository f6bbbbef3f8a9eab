//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、嵌入、价格表

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod pricing;
pub mod traits;

pub use embedding::{create_embedder_from_config, EmbeddingBatch, EmbeddingProvider, OpenAiEmbedder};
pub use mock::{estimate_tokens, MockEmbedder, MockLlmClient};
pub use openai::{OpenAiClient, DEEPSEEK_BASE_URL};
pub use pricing::{ModelPrice, PriceTable};
pub use traits::{Completion, CompletionRequest, LlmClient, Message, Role, TokenUsage};
