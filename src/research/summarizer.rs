//! 笔记摘要：把 retrieved_passages 压缩为一条带引用标记的 Note
//!
//! 模型输出中来源不在输入片段里的标记会被删除，其余改写为规范形式；
//! 删除后为空则不产生笔记。

use std::sync::Arc;

use crate::config::SummarizerSection;
use crate::core::{Note, Passage, ResearchError, RunState};
use crate::llm::{CompletionRequest, LlmClient, Message, PriceTable};
use crate::research::citation::canonicalize_markers;

const SYSTEM_PROMPT: &str = "You write concise research notes strictly grounded in the provided passages. \
Never use outside knowledge and never cite a source that is not among the passages.";

/// 笔记摘要器
pub struct Summarizer {
    llm: Arc<dyn LlmClient>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    target_words: String,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self::from_config(llm, model, &SummarizerSection::default())
    }

    pub fn from_config(
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        config: &SummarizerSection,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            target_words: config.target_words.clone(),
        }
    }

    fn build_prompt(&self, question: &str, passages: &[Passage]) -> String {
        let mut prompt = format!(
            "Research question: {}\n\n\
Write a note of about {} words that answers what can be answered from the passages below.\n\
Immediately after every claim taken from a passage, insert that passage's citation marker exactly as shown, \
for example [Source URL='https://example.org', Title='Example', Chunk=0].\n\
Only use markers that appear below.\n\nPassages:\n",
            question, self.target_words
        );
        for (i, p) in passages.iter().enumerate() {
            prompt.push_str(&format!(
                "\nPassage {} {}\n{}\n",
                i + 1,
                p.citation_marker(),
                p.text.trim()
            ));
        }
        prompt
    }

    /// 消费 state.retrieved_passages（无论成败都会清空），成功时追加一条 Note
    pub async fn summarize(
        &self,
        state: &mut RunState,
        prices: &PriceTable,
    ) -> Result<(), ResearchError> {
        let passages = std::mem::take(&mut state.retrieved_passages);
        if passages.is_empty() {
            return Err(ResearchError::Parse("no passages to summarize".to_string()));
        }

        let prompt = self.build_prompt(&state.refined_question, &passages);
        tracing::debug!(target: "delve::prompts", prompt = %prompt, "summarizer prompt");

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
        tracing::debug!(target: "delve::prompts", output = %completion.text, "summarizer output");

        let (summary, removed) = canonicalize_markers(completion.text.trim(), &passages);
        if removed > 0 {
            tracing::warn!(removed, "dropped citation markers with unknown sources");
        }
        let summary = summary.trim().to_string();
        if summary.is_empty() {
            return Err(ResearchError::Parse("empty note".to_string()));
        }

        tracing::info!(passages = passages.len(), chars = summary.len(), "note added");
        state.notes.push(Note {
            summary,
            source_passages: passages,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockEmbedder, MockLlmClient};
    use crate::rag::SessionIndex;

    fn state_with_passages() -> RunState {
        let index = SessionIndex::new(Arc::new(MockEmbedder::default()), 8);
        let mut s = RunState::new("q", "What is the capital of France?", "1. Capital", 5, index);
        s.retrieved_passages = vec![Passage {
            text: "Paris is the capital and largest city of France.".to_string(),
            source_url: "https://en.wikipedia.org/wiki/France".to_string(),
            source_title: "France".to_string(),
            chunk_index: 0,
        }];
        s
    }

    #[tokio::test]
    async fn test_note_keeps_known_markers_and_drops_fabricated() {
        let llm = MockLlmClient::new().on(
            "Passage 1",
            "The capital is Paris [source url=\"https://en.wikipedia.org/wiki/France\", chunk=0]. It is big [Source URL='https://made.up', Title='X', Chunk=1].",
        );
        let summarizer = Summarizer::new(Arc::new(llm), "test-model");
        let mut s = state_with_passages();
        summarizer.summarize(&mut s, &PriceTable::default()).await.unwrap();

        assert!(s.retrieved_passages.is_empty());
        assert_eq!(s.notes.len(), 1);
        assert_eq!(
            s.notes[0].summary,
            "The capital is Paris [Source URL='https://en.wikipedia.org/wiki/France', Title='France', Chunk=0]. It is big."
        );
        assert_eq!(s.notes[0].source_passages.len(), 1);
    }

    #[tokio::test]
    async fn test_prompt_carries_canonical_markers() {
        let summarizer = Summarizer::new(Arc::new(MockLlmClient::new()), "test-model");
        let s = state_with_passages();
        let prompt = summarizer.build_prompt(&s.refined_question, &s.retrieved_passages);
        assert!(prompt.contains(
            "Passage 1 [Source URL='https://en.wikipedia.org/wiki/France', Title='France', Chunk=0]"
        ));
        assert!(prompt.contains("300-400 words"));
    }

    #[tokio::test]
    async fn test_failure_clears_passages_without_note() {
        let llm = MockLlmClient::new().on_error("Passage 1", "provider down");
        let summarizer = Summarizer::new(Arc::new(llm), "test-model");
        let mut s = state_with_passages();
        let err = summarizer.summarize(&mut s, &PriceTable::default()).await.unwrap_err();
        assert!(matches!(err, ResearchError::Completion(_)));
        assert!(s.retrieved_passages.is_empty());
        assert!(s.notes.is_empty());
    }

    #[tokio::test]
    async fn test_marker_only_output_yields_no_note() {
        let llm = MockLlmClient::new().on("Passage 1", "[Source URL='https://made.up']");
        let summarizer = Summarizer::new(Arc::new(llm), "test-model");
        let mut s = state_with_passages();
        assert!(summarizer.summarize(&mut s, &PriceTable::default()).await.is_err());
        assert!(s.notes.is_empty());
    }
}
