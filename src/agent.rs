//! 研究 Agent：组装组件并执行一次完整研究
//!
//! from_config 按配置创建 LLM / 嵌入 / 搜索 / 抓取；缺少 API Key 时 LLM 与嵌入回退到 Mock 并警告。
//! run(question) 依次执行 澄清 -> 决策循环 -> 整合 -> 综合 -> 引用后处理，
//! 每次运行使用全新的 RunState 与 SessionIndex，互不影响；
//! 可选的本地语料库（CorpusIndex）由 Agent 持有，以只读引用供各次运行使用。

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::core::{DecisionRecord, ErrorInfo, Note, RunState, Termination};
use crate::llm::{
    create_embedder_from_config, EmbeddingProvider, LlmClient, MockEmbedder, MockLlmClient,
    OpenAiClient, PriceTable, DEEPSEEK_BASE_URL,
};
use crate::rag::{Chunker, ChunkingConfig, CorpusIndex, LexicalScorer, SessionIndex};
use crate::research::{
    research_loop, Clarification, Clarifier, Consolidator, Controller, LlmClarifier, Reference,
    ResearchSession, Summarizer, Synthesizer,
};
use crate::tools::{PageFetcher, SearchProvider, SerperSearch, WebFetcher};

/// 一次研究的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub run_id: Uuid,
    pub question: String,
    pub refined_question: String,
    /// 已做引用后处理的答案（综合失败时为降级说明）
    pub final_answer: String,
    pub references: Vec<Reference>,
    pub accumulated_cost: f64,
    /// 控制器决策次数
    pub iterations: usize,
    pub termination: Termination,
    /// 控制器每轮决策的审计记录
    pub decisions: Vec<DecisionRecord>,
    pub notes: Vec<Note>,
    /// 仅综合失败时存在
    pub error: Option<ErrorInfo>,
    pub elapsed_ms: i64,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// 按 [llm].provider 创建 LLM 客户端；没有可用 Key 时使用 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    match provider.as_str() {
        "mock" => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
        "deepseek" => {
            let key = non_empty(cfg.llm.api_key.clone())
                .or_else(|| non_empty(std::env::var("DEEPSEEK_API_KEY").ok()));
            match key {
                Some(key) => {
                    let base = cfg.llm.base_url.as_deref().unwrap_or(DEEPSEEK_BASE_URL);
                    tracing::info!(model = %cfg.llm.model, "Using DeepSeek LLM");
                    Arc::new(OpenAiClient::new(Some(base), Some(key.as_str())))
                }
                None => {
                    tracing::warn!("DEEPSEEK_API_KEY not set, using Mock LLM");
                    Arc::new(MockLlmClient::new())
                }
            }
        }
        other => {
            if other != "openai" {
                tracing::warn!(provider = %other, "unknown LLM provider, treating as OpenAI-compatible");
            }
            let key = non_empty(cfg.llm.api_key.clone())
                .or_else(|| non_empty(std::env::var("OPENAI_API_KEY").ok()));
            match key {
                Some(key) => {
                    tracing::info!(model = %cfg.llm.model, "Using OpenAI LLM");
                    Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), Some(key.as_str())))
                }
                None => {
                    tracing::warn!("OPENAI_API_KEY not set, using Mock LLM");
                    Arc::new(MockLlmClient::new())
                }
            }
        }
    }
}

/// 创建嵌入提供方；DeepSeek 没有嵌入端点，只在 provider 为 openai 时复用 [llm] 的 base_url 与 Key
pub fn create_embedding_from_config(cfg: &AppConfig) -> Arc<dyn EmbeddingProvider> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        return Arc::new(MockEmbedder::default());
    }
    let (base_url, api_key) = if provider == "openai" {
        (
            cfg.embedding.base_url.as_deref().or(cfg.llm.base_url.as_deref()),
            cfg.llm.api_key.as_deref(),
        )
    } else {
        (cfg.embedding.base_url.as_deref(), None)
    };
    create_embedder_from_config(base_url, &cfg.embedding.model, api_key).unwrap_or_else(|| {
        tracing::warn!("No embedding API key, using Mock embedder");
        Arc::new(MockEmbedder::default())
    })
}

/// 研究 Agent：组件在构建时创建，可多次 run
pub struct ResearchAgent {
    clarifier: Arc<dyn Clarifier>,
    controller: Controller,
    summarizer: Summarizer,
    consolidator: Consolidator,
    synthesizer: Synthesizer,
    search: Arc<dyn SearchProvider>,
    fetcher: Arc<dyn PageFetcher>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Chunker,
    corpus: Option<Arc<CorpusIndex>>,
    prices: PriceTable,
    max_iterations: usize,
    num_results: usize,
    retrieval_k: usize,
    embedding_batch_size: usize,
    max_batch_chars: usize,
}

impl ResearchAgent {
    /// 按配置创建全部真实组件
    pub fn from_config(cfg: &AppConfig) -> Self {
        let llm = create_llm_from_config(cfg);
        let embedder = create_embedding_from_config(cfg);
        let search = Arc::new(SerperSearch::new(
            cfg.search.endpoint.as_deref(),
            cfg.search.api_key.as_deref(),
            cfg.search.timeout_secs,
        ));
        let fetcher = Arc::new(WebFetcher::new(
            cfg.fetch.allowed_domains.clone(),
            cfg.fetch.timeout_secs,
            cfg.fetch.max_chars,
        ));
        Self::with_components(cfg, llm, embedder, search, fetcher)
    }

    /// 使用外部注入的能力组件（测试中注入 Mock 与伪造的搜索 / 抓取）
    pub fn with_components(
        cfg: &AppConfig,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn EmbeddingProvider>,
        search: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        let clarifier = LlmClarifier::from_config(
            llm.clone(),
            cfg.model_or_default(&cfg.clarifier.model),
            &cfg.clarifier,
        );
        let controller = Controller::from_config(
            llm.clone(),
            cfg.model_or_default(&cfg.reasoner.model),
            &cfg.reasoner,
        );
        let summarizer = Summarizer::from_config(
            llm.clone(),
            cfg.model_or_default(&cfg.summarizer.model),
            &cfg.summarizer,
        );
        let synthesizer = Synthesizer::from_config(
            llm,
            cfg.model_or_default(&cfg.synthesizer.model),
            &cfg.synthesizer,
        );
        let consolidator =
            Consolidator::from_config(Arc::new(LexicalScorer::default()), &cfg.consolidator);
        let chunker = Chunker::new(ChunkingConfig {
            chunk_size: cfg.chunking.chunk_size,
            chunk_overlap: cfg.chunking.chunk_overlap,
            ..ChunkingConfig::default()
        });

        Self {
            clarifier: Arc::new(clarifier),
            controller,
            summarizer,
            consolidator,
            synthesizer,
            search,
            fetcher,
            embedder,
            chunker,
            corpus: None,
            prices: PriceTable::default().with_overrides(&cfg.pricing.models),
            max_iterations: cfg.reasoner.max_iterations,
            num_results: cfg.search.num_results.max(1),
            retrieval_k: cfg.retrieval.k.max(1),
            embedding_batch_size: cfg.embedding.batch_size,
            max_batch_chars: cfg.embedding.max_batch_chars,
        }
    }

    pub fn with_clarifier(mut self, clarifier: Arc<dyn Clarifier>) -> Self {
        self.clarifier = clarifier;
        self
    }

    /// 挂载已建好的本地语料库；控制器随之允许在会话索引为空时 RETRIEVE
    pub fn with_corpus(mut self, corpus: Arc<CorpusIndex>) -> Self {
        self.controller = self.controller.with_local_corpus(corpus.len());
        self.corpus = Some(corpus);
        self
    }

    /// 按 [corpus] 建立本地语料库；未配置 path 时原样返回，建立失败时警告并继续（不启用）
    pub async fn with_corpus_from_config(self, cfg: &AppConfig) -> Self {
        if cfg.corpus.path.is_none() {
            return self;
        }
        let built = CorpusIndex::build(
            &cfg.corpus,
            &self.chunker,
            self.embedder.clone(),
            self.embedding_batch_size,
            self.max_batch_chars,
        )
        .await;
        match built {
            Ok(corpus) => self.with_corpus(Arc::new(corpus)),
            Err(e) => {
                tracing::warn!(error = %e, "local corpus unavailable, continuing with web research only");
                self
            }
        }
    }

    pub fn with_price_table(mut self, prices: PriceTable) -> Self {
        self.prices = prices;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// 执行一次研究；总会返回答案（可能是降级答案）
    pub async fn run(&self, question: &str) -> ResearchOutcome {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("research_run", run_id = %run_id);
        self.run_inner(run_id, question).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, question: &str) -> ResearchOutcome {
        tracing::info!(question = %question, max_iterations = self.max_iterations, "research started");

        let clarification = match self.clarifier.clarify(question).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "clarification failed, using original question");
                Clarification::fallback(question)
            }
        };

        let index = SessionIndex::new(self.embedder.clone(), self.embedding_batch_size)
            .with_max_batch_chars(self.max_batch_chars);
        let mut state = RunState::new(
            question.trim(),
            clarification.refined_question.as_str(),
            clarification.outline.as_str(),
            self.max_iterations,
            index,
        );
        if clarification.usage.total() > 0 {
            state.charge(self.prices.cost(&clarification.model, clarification.usage));
        }
        tracing::info!(refined = %state.refined_question, "question clarified");

        let session = ResearchSession {
            controller: &self.controller,
            summarizer: &self.summarizer,
            consolidator: &self.consolidator,
            synthesizer: &self.synthesizer,
            search: self.search.as_ref(),
            fetcher: self.fetcher.as_ref(),
            chunker: &self.chunker,
            corpus: self.corpus.as_deref(),
            prices: &self.prices,
            num_results: self.num_results,
            retrieval_k: self.retrieval_k,
        };
        let report = research_loop(&session, &mut state).await;

        let elapsed_ms = (Utc::now() - state.started_at).num_milliseconds();
        tracing::info!(
            elapsed_ms,
            cost = state.accumulated_cost(),
            "research finished"
        );

        ResearchOutcome {
            run_id,
            question: state.original_question.clone(),
            refined_question: state.refined_question.clone(),
            final_answer: state.final_answer.take().unwrap_or_default(),
            references: report.references,
            accumulated_cost: state.accumulated_cost(),
            iterations: state.iteration,
            termination: report.termination,
            decisions: std::mem::take(&mut state.decisions),
            notes: std::mem::take(&mut state.notes),
            error: state.error.take(),
            elapsed_ms,
        }
    }
}
