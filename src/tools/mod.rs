//! 证据获取适配层：网页搜索与页面抓取
//!
//! 核心循环只依赖 SearchProvider / PageFetcher 两个能力接口；
//! 任何失败在循环中被吸收为「零结果」/「无内容」，不会中止运行。

pub mod fetch;
pub mod search;

use async_trait::async_trait;

use crate::core::{ResearchError, SearchHit};

pub use fetch::WebFetcher;
pub use search::SerperSearch;

/// 网页搜索：query -> 按排名排列的结果
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, n: usize) -> Result<Vec<SearchHit>, ResearchError>;
}

/// 页面抓取：url -> 尽力提取的可读文本
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String, ResearchError>;
}
