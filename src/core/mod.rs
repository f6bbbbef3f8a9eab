//! 核心数据层：错误分类与单次运行状态

pub mod error;
pub mod state;

pub use error::{ErrorInfo, ResearchError};
pub use state::{
    normalize_query, DecisionRecord, NextAction, Note, Passage, RunState, SearchHit, Termination,
};
