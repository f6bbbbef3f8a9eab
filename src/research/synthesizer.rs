//! 最终答案综合：基于整合上下文生成仍带引用标记的原始答案
//!
//! 标记由 citation::post_process 改写为 [ref:N] 与参考列表；这里负责调用模型并计费。

use std::sync::Arc;

use crate::config::SynthesizerSection;
use crate::core::{ResearchError, RunState};
use crate::llm::{CompletionRequest, LlmClient, Message, PriceTable};
use crate::research::consolidator::EMPTY_CONTEXT;

const SYSTEM_PROMPT: &str = "You are a careful research writer. Answer the research question using only \
the curated notes and supporting passages provided. Keep every citation marker of the form \
[Source URL='...', Title='...', Chunk=N] exactly as written, placed right after the claim it supports. \
Do not invent markers. If the notes do not contain enough information, say clearly that the \
information gathered is insufficient and answer only what is supported.";

/// 答案综合器
pub struct Synthesizer {
    llm: Arc<dyn LlmClient>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self::from_config(llm, model, &SynthesizerSection::default())
    }

    pub fn from_config(
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        config: &SynthesizerSection,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn build_prompt(&self, state: &RunState) -> String {
        let context = state.combined_context.as_deref().unwrap_or(EMPTY_CONTEXT);
        format!(
            "Research question: {}\n\nOutline:\n{}\n\nCurated notes:\n{}\n\n\
Write the final answer in markdown, covering the outline where the notes allow.",
            state.refined_question,
            state.outline(),
            context
        )
    }

    /// 生成原始答案（含引用标记）；调用完成即计费，之后才检查内容
    pub async fn synthesize(
        &self,
        state: &mut RunState,
        prices: &PriceTable,
    ) -> Result<String, ResearchError> {
        let prompt = self.build_prompt(state);
        tracing::debug!(target: "delve::prompts", prompt = %prompt, "synthesizer prompt");
        let request = CompletionRequest::new(
            self.model.clone(),
            vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)],
        )
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        let completion = self
            .llm
            .complete(&request)
            .await
            .map_err(ResearchError::Completion)?;
        state.charge(prices.cost(&self.model, completion.usage));
        if completion.text.trim().is_empty() {
            return Err(ResearchError::Completion("empty answer".to_string()));
        }
        tracing::debug!(target: "delve::prompts", output = %completion.text, "synthesizer output");
        Ok(completion.text)
    }
}

/// 综合失败时返回给用户的降级答案
pub fn apology(question: &str, error: &ResearchError) -> String {
    format!(
        "I'm sorry, I could not produce an answer to \"{}\" because the final synthesis step failed ({}).",
        question, error
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockEmbedder, MockLlmClient, ModelPrice};
    use crate::rag::SessionIndex;

    fn state() -> RunState {
        let index = SessionIndex::new(Arc::new(MockEmbedder::default()), 8);
        RunState::new("q", "What is the capital of France?", "1. Capital", 3, index)
    }

    #[tokio::test]
    async fn test_empty_context_is_announced() {
        let llm = Arc::new(MockLlmClient::new());
        let s = Synthesizer::new(llm, "test-model");
        let prompt = s.build_prompt(&state());
        assert!(prompt.contains(EMPTY_CONTEXT));
        assert!(prompt.contains("Outline:\n1. Capital"));
    }

    #[tokio::test]
    async fn test_synthesis_error_and_apology() {
        let llm = Arc::new(MockLlmClient::new().on_error("Curated notes", "rate limited"));
        let s = Synthesizer::new(llm, "test-model");
        let mut st = state();
        let err = s.synthesize(&mut st, &PriceTable::default()).await.unwrap_err();
        assert_eq!(st.accumulated_cost(), 0.0);
        assert_eq!(err.kind(), "CompletionError");
        let text = apology("What is the capital of France?", &err);
        assert!(text.starts_with("I'm sorry"));
        assert!(text.contains("rate limited"));
    }

    #[tokio::test]
    async fn test_blank_answer_is_charged_then_rejected() {
        let llm = Arc::new(MockLlmClient::new().on("Curated notes", "   "));
        let s = Synthesizer::new(llm, "test-model");
        let mut prices = PriceTable::empty();
        prices.insert("test-model", ModelPrice::new(1_000.0, 1_000.0));
        let mut st = state();
        let err = s.synthesize(&mut st, &prices).await.unwrap_err();
        assert_eq!(err, ResearchError::Completion("empty answer".to_string()));
        assert!(st.accumulated_cost() > 0.0);
    }
}
