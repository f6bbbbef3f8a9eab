//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DELVE__*` 覆盖（双下划线表示嵌套，如 `DELVE__REASONER__MAX_ITERATIONS=8`）。
//! 未找到配置文件不是错误，所有字段均有默认值。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::llm::ModelPrice;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub clarifier: ClarifierSection,
    pub reasoner: ReasonerSection,
    pub summarizer: SummarizerSection,
    pub synthesizer: SynthesizerSection,
    pub embedding: EmbeddingSection,
    pub chunking: ChunkingSection,
    pub retrieval: RetrievalSection,
    pub consolidator: ConsolidatorSection,
    pub search: SearchSection,
    pub fetch: FetchSection,
    pub corpus: CorpusSection,
    pub pricing: PricingSection,
}

impl AppConfig {
    /// 组件未单独配置模型时使用 [llm].model
    pub fn model_or_default(&self, model: &Option<String>) -> String {
        model.clone().unwrap_or_else(|| self.llm.model.clone())
    }
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY（deepseek 读取 DEEPSEEK_API_KEY）
    pub api_key: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

/// [clarifier] 段：问题澄清与大纲
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClarifierSection {
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ClarifierSection {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.2,
            max_tokens: 600,
        }
    }
}

/// [reasoner] 段：控制器（决策循环）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReasonerSection {
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// 控制器决策次数上限
    pub max_iterations: usize,
    /// 连续失败达到该值时直接 STOP
    pub max_consecutive_failures: usize,
    /// 提示中每条笔记摘要的最大字符数
    pub note_preview_chars: usize,
}

impl Default for ReasonerSection {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.1,
            max_tokens: 300,
            max_iterations: 5,
            max_consecutive_failures: 3,
            note_preview_chars: 400,
        }
    }
}

/// [summarizer] 段：笔记摘要
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummarizerSection {
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// 目标长度（写入提示）
    pub target_words: String,
}

impl Default for SummarizerSection {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.0,
            max_tokens: 800,
            target_words: "300-400".to_string(),
        }
    }
}

/// [synthesizer] 段：最终答案综合
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesizerSection {
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SynthesizerSection {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.3,
            max_tokens: 1500,
        }
    }
}

/// [embedding] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub model: String,
    /// 未设置时与 [llm].base_url 相同
    pub base_url: Option<String>,
    /// 每个子批次的最大条数
    pub batch_size: usize,
    /// 每个子批次的最大字符数（粗略对应 token 上限）
    pub max_batch_chars: usize,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            base_url: None,
            batch_size: 64,
            max_batch_chars: 32_000,
        }
    }
}

/// [chunking] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingSection {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingSection {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
        }
    }
}

/// [retrieval] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub k: usize,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self { k: 6 }
    }
}

/// [consolidator] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsolidatorSection {
    pub top_n: usize,
    /// 整合上下文中每条原文片段的最大字符数
    pub max_passage_chars: usize,
}

impl Default for ConsolidatorSection {
    fn default() -> Self {
        Self {
            top_n: 6,
            max_passage_chars: 1200,
        }
    }
}

/// [search] 段：Serper 网页搜索
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub endpoint: Option<String>,
    /// 未设置时读取 SERPER_API_KEY
    pub api_key: Option<String>,
    pub num_results: usize,
    pub timeout_secs: u64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            num_results: 5,
            timeout_secs: 15,
        }
    }
}

/// [fetch] 段：页面抓取
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub timeout_secs: u64,
    pub max_chars: usize,
    /// 为空表示不限制域名
    pub allowed_domains: Vec<String>,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_chars: 20_000,
            allowed_domains: Vec::new(),
        }
    }
}

/// [corpus] 段：本地文档语料库（.md / .txt），未设置 path 时不启用
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorpusSection {
    /// 目录（递归读取）或单个入口文件
    pub path: Option<PathBuf>,
    /// 建库时沿文档内相对链接追加文件的最大深度
    pub link_follow_depth: usize,
    /// 查询时从命中文档沿链接扩展的跳数；0 表示不扩展
    pub link_depth: usize,
    /// 每个被链接文档额外返回的片段数
    pub link_k: usize,
}

impl Default for CorpusSection {
    fn default() -> Self {
        Self {
            path: None,
            link_follow_depth: 3,
            link_depth: 1,
            link_k: 2,
        }
    }
}

/// [pricing] 段：覆盖或补充内置价格表
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PricingSection {
    pub models: HashMap<String, ModelPrice>,
}

/// 默认配置文件候选（不含扩展名），取第一个存在的
const DEFAULT_CONFIG_CANDIDATES: [&str; 3] = ["config/default", "../config/default", "default"];

/// 加载配置：默认文件 -> 可选的 --config 文件 -> 环境变量 DELVE__*，后者覆盖前者
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(name) = DEFAULT_CONFIG_CANDIDATES
        .iter()
        .find(|name| Path::new(&format!("{}.toml", name)).exists())
    {
        builder = builder.add_source(config::File::with_name(name).required(false));
    }

    match config_path {
        Some(path) if path.exists() => {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        Some(path) => tracing::warn!(path = %path.display(), "config file not found, ignoring"),
        None => {}
    }

    builder
        .add_source(
            config::Environment::with_prefix("DELVE")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}
