//! 研究主循环
//!
//! Controller 决策 -> 执行动作 -> 回到 Controller；FETCH 之后确定性地执行
//! chunk -> embed -> retrieve -> summarize（只查会话索引）；控制器主动选择的 RETRIEVE
//! 还会查询本地语料库。遇到 CONSOLIDATE / STOP 或迭代上限时退出，
//! 随后整合、综合并做引用后处理。所有外部调用逐个 await，不并发。

use crate::core::{ErrorInfo, ResearchError, RunState, Termination};
use crate::llm::PriceTable;
use crate::rag::{Chunker, CorpusIndex};
use crate::research::citation::{post_process, Reference};
use crate::research::synthesizer::apology;
use crate::research::{Consolidator, Controller, Decision, Summarizer, Synthesizer};
use crate::tools::{PageFetcher, SearchProvider};

/// 一次循环需要的全部组件（只借用，不持有）
pub struct ResearchSession<'a> {
    pub controller: &'a Controller,
    pub summarizer: &'a Summarizer,
    pub consolidator: &'a Consolidator,
    pub synthesizer: &'a Synthesizer,
    pub search: &'a dyn SearchProvider,
    pub fetcher: &'a dyn PageFetcher,
    pub chunker: &'a Chunker,
    /// 可选的本地文档语料库（跨运行共享，只读）
    pub corpus: Option<&'a CorpusIndex>,
    pub prices: &'a PriceTable,
    /// 每次搜索请求的结果数
    pub num_results: usize,
    /// 每次检索返回的片段数
    pub retrieval_k: usize,
}

/// 循环结束后的汇总
#[derive(Debug, Clone)]
pub struct LoopReport {
    pub termination: Termination,
    pub references: Vec<Reference>,
}

fn record_failure(state: &mut RunState, err: &ResearchError) {
    state.consecutive_failures += 1;
    tracing::warn!(
        kind = err.kind(),
        error = %err,
        consecutive_failures = state.consecutive_failures,
        "research step failed"
    );
}

async fn run_search(session: &ResearchSession<'_>, state: &mut RunState, query: &str) {
    match session.search.search(query, session.num_results).await {
        Ok(hits) => {
            let returned = hits.len();
            let added = state.record_search_hits(query, hits);
            tracing::info!(query = %query, returned, added, "search results recorded");
            if added == 0 {
                record_failure(state, &ResearchError::Search(format!("no new results for: {}", query)));
            }
        }
        Err(e) => record_failure(state, &e),
    }
}

/// FETCH 的确定性后继：抓取 -> 分块 -> 入索引 -> 用产生该结果的查询检索 -> 摘要
async fn run_fetch(session: &ResearchSession<'_>, state: &mut RunState, url: &str) {
    match session.fetcher.fetch_page(url).await {
        Ok(text) => state.fetched_text = Some(text),
        Err(e) => {
            record_failure(state, &e);
            return;
        }
    }

    let text = state.fetched_text.take().unwrap_or_default();
    let title = state
        .hit_for_url(url)
        .map(|h| h.title.clone())
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| url.to_string());
    let passages = session.chunker.chunk(url, &title, &text);
    if passages.is_empty() {
        record_failure(state, &ResearchError::Fetch(format!("no content at {}", url)));
        return;
    }

    let report = state.session_index.add(passages).await;
    let cost = session.prices.cost(state.session_index.embedding_model(), report.usage);
    state.charge(cost);
    tracing::info!(url = %url, added = report.added, failed = report.failed, "page indexed");
    if report.added == 0 {
        let err = report
            .errors
            .into_iter()
            .next()
            .unwrap_or_else(|| ResearchError::Embedding(format!("nothing indexed for {}", url)));
        record_failure(state, &err);
        return;
    }

    let query = state
        .query_for_url(url)
        .map(String::from)
        .unwrap_or_else(|| state.refined_question.clone());
    run_retrieve(session, state, &query, false).await;
}

/// 检索并在有结果时立即摘要；零结果视为一次空转，交回控制器。
/// with_corpus 为 true 时同时查询本地语料库，结果排在会话索引结果之后
async fn run_retrieve(
    session: &ResearchSession<'_>,
    state: &mut RunState,
    query: &str,
    with_corpus: bool,
) {
    let mut passages = Vec::new();
    let mut first_error = None;

    match state.session_index.query(query, session.retrieval_k).await {
        Ok(retrieval) => {
            let cost = session.prices.cost(state.session_index.embedding_model(), retrieval.usage);
            state.charge(cost);
            passages.extend(retrieval.into_passages());
        }
        Err(e) => {
            tracing::warn!(error = %e, "session index query failed");
            first_error = Some(e);
        }
    }

    if let Some(corpus) = session.corpus.filter(|_| with_corpus) {
        match corpus.query(query, session.retrieval_k).await {
            Ok(retrieval) => {
                state.charge(session.prices.cost(corpus.embedding_model(), retrieval.usage));
                passages.extend(retrieval.into_passages());
            }
            Err(e) => {
                tracing::warn!(error = %e, "local corpus query failed");
                first_error.get_or_insert(e);
            }
        }
    }

    tracing::info!(query = %query, passages = passages.len(), "passages retrieved");
    if passages.is_empty() {
        let err = first_error
            .unwrap_or_else(|| ResearchError::Embedding(format!("no passages for: {}", query)));
        record_failure(state, &err);
        return;
    }
    state.retrieved_passages = passages;
    run_summarize(session, state).await;
}

async fn run_summarize(session: &ResearchSession<'_>, state: &mut RunState) {
    match session.summarizer.summarize(state, session.prices).await {
        Ok(()) => state.consecutive_failures = 0,
        Err(e) => record_failure(state, &e),
    }
}

/// 运行决策循环直至终止，然后整合、综合并后处理引用
pub async fn research_loop(session: &ResearchSession<'_>, state: &mut RunState) -> LoopReport {
    let mut termination = Termination::BoundsExceeded;

    while state.iteration < state.max_iterations && !state.is_terminal() {
        match session.controller.decide(state, session.prices).await {
            Decision::Search { query } => run_search(session, state, &query).await,
            Decision::Fetch { .. } => {
                // 本轮决策写入的 URL；取出后清空
                if let Some(url) = state.pending_url.take() {
                    run_fetch(session, state, &url).await;
                }
            }
            Decision::Retrieve { query } => {
                let query = query
                    .or_else(|| state.pending_query.clone())
                    .unwrap_or_else(|| state.refined_question.clone());
                run_retrieve(session, state, &query, true).await;
            }
            Decision::Summarize => run_summarize(session, state).await,
            Decision::Consolidate => {
                termination = Termination::Consolidated;
                break;
            }
            Decision::Stop => {
                termination = Termination::Stopped;
                break;
            }
        }
    }

    match termination {
        Termination::Stopped => session.consolidator.collect_all(state),
        Termination::Consolidated => session.consolidator.consolidate(state),
        Termination::BoundsExceeded => {
            let bound = ResearchError::BoundsExceeded {
                max_iterations: state.max_iterations,
            };
            tracing::info!(reason = %bound, "answering with the notes gathered so far");
            session.consolidator.consolidate(state);
        }
    }

    let mut references = Vec::new();
    match session.synthesizer.synthesize(state, session.prices).await {
        Ok(raw_answer) => {
            let processed = post_process(&raw_answer);
            references = processed.references;
            state.final_answer = Some(processed.text);
        }
        Err(e) => {
            tracing::error!(error = %e, "synthesis failed");
            state.final_answer = Some(apology(&state.refined_question, &e));
            state.error = Some(ErrorInfo::from(&e));
        }
    }

    tracing::info!(
        iterations = state.iteration,
        notes = state.notes.len(),
        references = references.len(),
        cost = state.accumulated_cost(),
        termination = ?termination,
        "research loop finished"
    );
    LoopReport {
        termination,
        references,
    }
}
