//! Delve - LLM 驱动的迭代式研究 Agent
//!
//! 模块划分：
//! - **agent**: 组件组装与单次研究运行（ResearchAgent / ResearchOutcome）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类与单次运行状态（RunState）
//! - **llm**: LLM / 嵌入客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、价格表
//! - **observability**: tracing 日志初始化
//! - **rag**: 文档分块、会话向量索引、笔记相关度打分
//! - **research**: 澄清、决策控制、摘要、整合、综合、引用后处理与主循环
//! - **tools**: 网页搜索与页面抓取

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod rag;
pub mod research;
pub mod tools;

pub use agent::{ResearchAgent, ResearchOutcome};
pub use config::{load_config, AppConfig};
