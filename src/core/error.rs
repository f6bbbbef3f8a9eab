//! 研究流程错误类型
//!
//! 组件内可恢复的失败（搜索 / 抓取 / 单批嵌入）在发生处被吸收并降级为「空结果」；
//! 只有综合（Synthesis）失败会作为终止性 ErrorInfo 返回给调用方。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 研究运行中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResearchError {
    #[error("Search failed: {0}")]
    Search(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// 任意一次 LLM 调用失败（超时、提供方错误、空响应）
    #[error("Completion failed: {0}")]
    Completion(String),

    /// LLM 结构化输出无法解析（控制器决策、澄清 JSON 等）
    #[error("Parse error: {0}")]
    Parse(String),

    /// 迭代上限耗尽；这是设计内的终止路径，不作为运行错误上报
    #[error("Iteration bound reached ({max_iterations})")]
    BoundsExceeded { max_iterations: usize },

    #[error("Config error: {0}")]
    Config(String),
}

impl ResearchError {
    /// 错误类别名（用于 ErrorInfo.kind 与日志字段）
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Search(_) => "SearchError",
            Self::Fetch(_) => "FetchError",
            Self::Embedding(_) => "EmbeddingError",
            Self::Completion(_) => "CompletionError",
            Self::Parse(_) => "ParseError",
            Self::BoundsExceeded { .. } => "BoundsExceeded",
            Self::Config(_) => "ConfigError",
        }
    }
}

/// 终止性错误记录：一旦写入 RunState，循环直接短路到输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

impl From<&ResearchError> for ErrorInfo {
    fn from(err: &ResearchError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_info_from_error() {
        let err = ResearchError::Completion("timeout".to_string());
        let info = ErrorInfo::from(&err);
        assert_eq!(info.kind, "CompletionError");
        assert_eq!(info.message, "Completion failed: timeout");
    }

    #[test]
    fn test_bounds_exceeded_display() {
        let err = ResearchError::BoundsExceeded { max_iterations: 2 };
        assert_eq!(err.to_string(), "Iteration bound reached (2)");
        assert_eq!(err.kind(), "BoundsExceeded");
    }
}
