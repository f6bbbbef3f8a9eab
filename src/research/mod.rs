//! 研究流程：澄清、决策控制、摘要、整合、综合与引用处理

pub mod citation;
pub mod clarifier;
pub mod consolidator;
pub mod controller;
pub mod decision;
pub mod loop_;
pub mod summarizer;
pub mod synthesizer;

pub use citation::{
    canonicalize_markers, format_marker, parse_markers, post_process, CitationMarker,
    ProcessedAnswer, Reference,
};
pub use clarifier::{Clarification, Clarifier, LlmClarifier};
pub use consolidator::{Consolidator, EMPTY_CONTEXT};
pub use controller::Controller;
pub use decision::{parse_decision, Decision};
pub use loop_::{research_loop, LoopReport, ResearchSession};
pub use summarizer::Summarizer;
pub use synthesizer::{apology, Synthesizer};
