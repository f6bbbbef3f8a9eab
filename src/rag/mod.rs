//! 检索层：文档分块、会话向量索引、本地文档语料库、笔记相关度打分

pub mod chunker;
pub mod corpus;
pub mod index;
pub mod rerank;
pub mod tokenizer;

pub use chunker::{Chunker, ChunkingConfig};
pub use corpus::CorpusIndex;
pub use index::{cosine_similarity, AddReport, Retrieval, ScoredPassage, SessionIndex};
pub use rerank::{LexicalScorer, RelevanceScorer};
