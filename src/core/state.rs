//! 单次研究运行的可变状态（RunState）与数据模型
//!
//! RunState 由一次运行独占：循环、控制器与各步骤只通过 `&mut RunState` 修改它，
//! 运行结束即丢弃（包括其中的 SessionIndex）。

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ErrorInfo;
use crate::rag::SessionIndex;
use crate::research::citation;

/// 控制器每轮选择的下一步动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NextAction {
    Search,
    Fetch,
    Retrieve,
    Summarize,
    Consolidate,
    Stop,
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Search => "SEARCH",
            Self::Fetch => "FETCH",
            Self::Retrieve => "RETRIEVE",
            Self::Summarize => "SUMMARIZE",
            Self::Consolidate => "CONSOLIDATE",
            Self::Stop => "STOP",
        };
        f.write_str(name)
    }
}

/// 搜索结果条目（由 SearchProvider 产生，不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// 带出处的文本片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source_url: String,
    pub source_title: String,
    /// 在来源文档内稳定的序号，用于生成引用标记
    pub chunk_index: usize,
}

impl Passage {
    /// 规范形式的引用标记：`[Source URL='…', Title='…', Chunk=N]`
    pub fn citation_marker(&self) -> String {
        citation::format_marker(&self.source_url, &self.source_title, self.chunk_index)
    }
}

/// 摘要笔记：summary 内嵌引用标记，source_passages 保留原文供整合 / 综合引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub summary: String,
    pub source_passages: Vec<Passage>,
}

/// 一次控制器决策的审计记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// 决策后的 iteration 值（从 1 开始）
    pub iteration: usize,
    pub action: NextAction,
    pub argument: Option<String>,
}

/// 循环结束的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// 控制器选择 CONSOLIDATE（包括最后一轮强制整合）
    Consolidated,
    /// 控制器选择 STOP，跳过重排直接综合
    Stopped,
    /// 迭代上限耗尽而未做出 CONSOLIDATE / STOP 决策
    BoundsExceeded,
}

/// 查询去重用的规范化：小写、压缩空白
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 单次研究运行的全部状态
pub struct RunState {
    pub original_question: String,
    pub refined_question: String,
    outline: String,
    pub iteration: usize,
    pub max_iterations: usize,
    /// 首次决策前为 None
    pub next_action: Option<NextAction>,
    pub pending_query: Option<String>,
    pub pending_url: Option<String>,
    /// 已发出的查询（规范化形式），只增不减
    pub seen_queries: BTreeSet<String>,
    /// 已选择抓取的 URL，只增不减
    pub seen_urls: HashSet<String>,
    /// 累积的搜索结果，按原始排名顺序；消费后不清空
    pub search_results: Vec<SearchHit>,
    /// url -> 产生该结果的查询（FETCH 之后 RETRIEVE 使用同一查询）
    hit_queries: HashMap<String, String>,
    pub fetched_text: Option<String>,
    pub retrieved_passages: Vec<Passage>,
    pub notes: Vec<Note>,
    pub session_index: SessionIndex,
    pub combined_context: Option<String>,
    pub final_answer: Option<String>,
    accumulated_cost: f64,
    pub error: Option<ErrorInfo>,
    /// 连续失败的步骤数（搜索无结果、抓取失败、检索为空、摘要失败）；产生笔记时归零
    pub consecutive_failures: usize,
    pub decisions: Vec<DecisionRecord>,
    pub started_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(
        original_question: impl Into<String>,
        refined_question: impl Into<String>,
        outline: impl Into<String>,
        max_iterations: usize,
        session_index: SessionIndex,
    ) -> Self {
        Self {
            original_question: original_question.into(),
            refined_question: refined_question.into(),
            outline: outline.into(),
            iteration: 0,
            max_iterations,
            next_action: None,
            pending_query: None,
            pending_url: None,
            seen_queries: BTreeSet::new(),
            seen_urls: HashSet::new(),
            search_results: Vec::new(),
            hit_queries: HashMap::new(),
            fetched_text: None,
            retrieved_passages: Vec::new(),
            notes: Vec::new(),
            session_index,
            combined_context: None,
            final_answer: None,
            accumulated_cost: 0.0,
            error: None,
            consecutive_failures: 0,
            decisions: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// 研究大纲（创建后不可变）
    pub fn outline(&self) -> &str {
        &self.outline
    }

    pub fn accumulated_cost(&self) -> f64 {
        self.accumulated_cost
    }

    /// 累加一次计量调用的费用；负数与非有限值被忽略，保证费用单调不减
    pub fn charge(&mut self, cost: f64) {
        if cost.is_finite() && cost > 0.0 {
            self.accumulated_cost += cost;
        }
    }

    pub fn is_query_seen(&self, query: &str) -> bool {
        self.seen_queries.contains(&normalize_query(query))
    }

    /// 登记查询；首次出现返回 true
    pub fn mark_query_seen(&mut self, query: &str) -> bool {
        self.seen_queries.insert(normalize_query(query))
    }

    /// 登记 URL；首次出现返回 true
    pub fn mark_url_seen(&mut self, url: &str) -> bool {
        self.seen_urls.insert(url.to_string())
    }

    /// 追加一批搜索结果；已存在的 URL 跳过，保持原始排名顺序
    pub fn record_search_hits(&mut self, query: &str, hits: Vec<SearchHit>) -> usize {
        let mut added = 0;
        for hit in hits {
            if hit.url.trim().is_empty() || self.hit_queries.contains_key(&hit.url) {
                continue;
            }
            self.hit_queries.insert(hit.url.clone(), query.to_string());
            self.search_results.push(hit);
            added += 1;
        }
        added
    }

    /// 尚未抓取的搜索结果（按排名）
    pub fn unseen_hits(&self) -> Vec<&SearchHit> {
        self.search_results
            .iter()
            .filter(|h| !self.seen_urls.contains(&h.url))
            .collect()
    }

    pub fn hit_for_url(&self, url: &str) -> Option<&SearchHit> {
        self.search_results.iter().find(|h| h.url == url)
    }

    /// 产生该 URL 的搜索查询
    pub fn query_for_url(&self, url: &str) -> Option<&str> {
        self.hit_queries.get(url).map(String::as_str)
    }

    pub fn is_terminal(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::llm::MockEmbedder;

    fn state() -> RunState {
        let index = SessionIndex::new(Arc::new(MockEmbedder::default()), 8);
        RunState::new("q", "q", "1. topic", 5, index)
    }

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            title: url.to_string(),
            url: url.to_string(),
            snippet: String::new(),
        }
    }

    #[test]
    fn test_charge_is_monotonic() {
        let mut s = state();
        s.charge(0.5);
        s.charge(-1.0);
        s.charge(f64::NAN);
        s.charge(0.25);
        assert!((s.accumulated_cost() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_query_dedup_is_normalized() {
        let mut s = state();
        assert!(s.mark_query_seen("Capital of  France"));
        assert!(s.is_query_seen("capital of france"));
        assert!(!s.mark_query_seen("CAPITAL OF FRANCE"));
    }

    #[test]
    fn test_search_hits_keep_rank_and_skip_duplicates() {
        let mut s = state();
        assert_eq!(s.record_search_hits("a", vec![hit("https://a"), hit("https://b")]), 2);
        assert_eq!(s.record_search_hits("b", vec![hit("https://b"), hit("https://c")]), 1);
        let urls: Vec<_> = s.search_results.iter().map(|h| h.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a", "https://b", "https://c"]);
        assert_eq!(s.query_for_url("https://b"), Some("a"));

        s.mark_url_seen("https://a");
        let unseen: Vec<_> = s.unseen_hits().iter().map(|h| h.url.clone()).collect();
        assert_eq!(unseen, vec!["https://b", "https://c"]);
    }

    #[test]
    fn test_next_action_display() {
        assert_eq!(NextAction::Consolidate.to_string(), "CONSOLIDATE");
        assert_eq!(
            serde_json::to_string(&NextAction::Fetch).unwrap(),
            "\"FETCH\""
        );
    }
}
