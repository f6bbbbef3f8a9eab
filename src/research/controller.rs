//! 决策控制器（Reasoner）：每轮决定一个动作并推进 iteration
//!
//! 策略委托给一次 LLM 调用；下列情形不调用模型：
//! - iteration 已到 max_iterations - 1：强制 CONSOLIDATE（保留最后一轮用于整合）
//! - 连续失败达到上限：STOP
//!
//! 模型输出解析失败、调用失败或选择了不可执行的动作时一律降级为 CONSOLIDATE。

use std::sync::Arc;

use crate::config::ReasonerSection;
use crate::core::{DecisionRecord, RunState};
use crate::llm::{CompletionRequest, LlmClient, Message, PriceTable};
use crate::research::decision::{parse_decision, Decision};

/// 搜索结果摘要在提示中的最大字符数
const SNIPPET_PREVIEW_CHARS: usize = 200;

const SYSTEM_PROMPT: &str = "You are the research controller of an autonomous research agent. \
Each turn you choose exactly one next action to make progress on the research question.\n\
\n\
Available actions:\n\
- SEARCH: run a new web search. Requires a query.\n\
- FETCH: read one of the unseen search results. Give its URL.\n\
- RETRIEVE: query the already indexed documents (fetched pages and local documents) again. Optional query.\n\
- CONSOLIDATE: the outline is sufficiently covered by the notes; finish and write the answer.\n\
- STOP: research cannot make further progress; answer with what exists.\n\
\n\
Rules:\n\
- Never repeat a previous query verbatim or a near-duplicate of one.\n\
- Never fetch a URL that was already fetched.\n\
- Prefer fetching an unseen URL from the existing search results over issuing a new search.\n\
- Use searches to cover outline topics that have no supporting notes yet.\n\
\n\
Reply with a single JSON object and nothing else, for example:\n\
{\"action\": \"SEARCH\", \"query\": \"...\"}\n\
{\"action\": \"FETCH\", \"url\": \"https://...\"}\n\
{\"action\": \"CONSOLIDATE\"}";

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 决策控制器
pub struct Controller {
    llm: Arc<dyn LlmClient>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_consecutive_failures: usize,
    note_preview_chars: usize,
    /// 本地语料库的片段数；为 0 表示未配置
    corpus_passages: usize,
}

impl Controller {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self::from_config(llm, model, &ReasonerSection::default())
    }

    /// 从 [reasoner] 配置创建（model 由调用方解析，未配置时为 [llm].model）
    pub fn from_config(
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        config: &ReasonerSection,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            note_preview_chars: config.note_preview_chars.max(1),
            corpus_passages: 0,
        }
    }

    /// 声明可供 RETRIEVE 查询的本地语料库
    pub fn with_local_corpus(mut self, passages: usize) -> Self {
        self.corpus_passages = passages;
        self
    }

    /// 做出一次决策：写入 next_action / pending_* / 去重集合 / decisions，iteration 加 1
    pub async fn decide(&self, state: &mut RunState, prices: &PriceTable) -> Decision {
        let proposed = if state.iteration >= state.max_iterations.saturating_sub(1) {
            tracing::info!(
                iteration = state.iteration,
                max_iterations = state.max_iterations,
                "last iteration reserved, forcing consolidation"
            );
            Decision::Consolidate
        } else if state.consecutive_failures >= self.max_consecutive_failures {
            tracing::warn!(
                failures = state.consecutive_failures,
                "too many consecutive failures, stopping research"
            );
            Decision::Stop
        } else {
            self.ask_model(state, prices).await
        };

        let decision = resolve(state, proposed, self.corpus_passages > 0);
        state.iteration += 1;
        apply(state, &decision);

        tracing::info!(
            iteration = state.iteration,
            action = %decision.action(),
            argument = ?decision.argument(),
            "controller decision"
        );
        decision
    }

    async fn ask_model(&self, state: &mut RunState, prices: &PriceTable) -> Decision {
        let prompt = self.build_prompt(state);
        tracing::debug!(target: "delve::prompts", prompt = %prompt, "controller prompt");

        let request = CompletionRequest::new(
            self.model.clone(),
            vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)],
        )
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        let completion = match self.llm.complete(&request).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "controller completion failed, falling back to CONSOLIDATE");
                return Decision::Consolidate;
            }
        };
        state.charge(prices.cost(&self.model, completion.usage));
        tracing::debug!(target: "delve::prompts", output = %completion.text, "controller output");

        match parse_decision(&completion.text) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable controller decision, falling back to CONSOLIDATE");
                Decision::Consolidate
            }
        }
    }

    /// 组装控制器提示：问题、大纲、笔记摘要、进度、已用查询与未读 URL
    pub fn build_prompt(&self, state: &RunState) -> String {
        let mut prompt = format!(
            "Research question: {}\n\nOutline:\n{}\n\n",
            state.refined_question,
            state.outline()
        );

        prompt.push_str(&format!("Notes so far ({}):\n", state.notes.len()));
        if state.notes.is_empty() {
            prompt.push_str("(none)\n");
        }
        for (i, note) in state.notes.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. {}\n",
                i + 1,
                preview(&note.summary, self.note_preview_chars)
            ));
        }

        prompt.push_str(&format!(
            "\nIteration: {} of {}\n\nQueries already used (do not repeat):\n",
            state.iteration + 1,
            state.max_iterations
        ));
        if state.seen_queries.is_empty() {
            prompt.push_str("(none)\n");
        }
        for q in &state.seen_queries {
            prompt.push_str(&format!("- {}\n", q));
        }

        prompt.push_str("\nUnseen search results (prefer fetching these):\n");
        let unseen = state.unseen_hits();
        if unseen.is_empty() {
            prompt.push_str("(none)\n");
        }
        for hit in unseen {
            prompt.push_str(&format!(
                "- {} | {} | {}\n",
                hit.url,
                hit.title,
                preview(&hit.snippet, SNIPPET_PREVIEW_CHARS)
            ));
        }

        if self.corpus_passages > 0 {
            prompt.push_str(&format!(
                "\nLocal documents: {} passages indexed; RETRIEVE with a query searches them.\n",
                self.corpus_passages
            ));
        }

        prompt.push_str("\nChoose the next action.");
        prompt
    }
}

/// 将模型提议校验为可执行的决策；不可执行时降级
fn resolve(state: &RunState, proposed: Decision, has_corpus: bool) -> Decision {
    let top_unseen = || state.unseen_hits().first().map(|h| h.url.clone());
    match proposed {
        Decision::Search { query } if state.is_query_seen(&query) => match top_unseen() {
            Some(url) => {
                tracing::info!(query = %query, url = %url, "repeated query redirected to unseen result");
                Decision::Fetch { url: Some(url) }
            }
            None => {
                tracing::warn!(query = %query, "repeated query and no unseen results, consolidating");
                Decision::Consolidate
            }
        },
        Decision::Fetch { url } => {
            let chosen = url
                .filter(|u| state.hit_for_url(u).is_some() && !state.seen_urls.contains(u))
                .or_else(top_unseen);
            match chosen {
                Some(url) => Decision::Fetch { url: Some(url) },
                None => {
                    tracing::warn!("FETCH without unseen candidate, consolidating");
                    Decision::Consolidate
                }
            }
        }
        Decision::Retrieve { .. } if state.session_index.is_empty() && !has_corpus => {
            tracing::warn!("RETRIEVE on empty index, consolidating");
            Decision::Consolidate
        }
        Decision::Summarize if state.retrieved_passages.is_empty() => {
            tracing::warn!("SUMMARIZE without passages, consolidating");
            Decision::Consolidate
        }
        other => other,
    }
}

fn apply(state: &mut RunState, decision: &Decision) {
    state.next_action = Some(decision.action());
    match decision {
        Decision::Search { query } => {
            state.mark_query_seen(query);
            state.pending_query = Some(query.clone());
            state.pending_url = None;
        }
        Decision::Fetch { url } => {
            if let Some(url) = url {
                state.mark_url_seen(url);
            }
            state.pending_url = url.clone();
        }
        Decision::Retrieve { query: Some(query) } => {
            state.pending_query = Some(query.clone());
        }
        _ => {}
    }
    state.decisions.push(DecisionRecord {
        iteration: state.iteration,
        action: decision.action(),
        argument: decision.argument().map(String::from),
    });
}
