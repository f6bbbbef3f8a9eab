//! 问题澄清：生成精炼问题与研究大纲
//!
//! 期望模型返回 JSON：{"refined_question": "...", "outline": ["topic", ...]}（可带 ```json 围栏）。
//! 输出无法解析时退回原问题与单项大纲；已完成调用的费用照常计入。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ClarifierSection;
use crate::core::ResearchError;
use crate::llm::{CompletionRequest, LlmClient, Message, TokenUsage};

const SYSTEM_PROMPT: &str = "You prepare research plans. Rewrite the user's question into a precise, \
self-contained research question and list the topics that must be covered to answer it well. \
Reply with JSON only: {\"refined_question\": \"...\", \"outline\": [\"topic 1\", \"topic 2\"]}";

/// 大纲最多保留的主题数
const MAX_OUTLINE_TOPICS: usize = 8;

/// 澄清结果
#[derive(Debug, Clone, PartialEq)]
pub struct Clarification {
    pub refined_question: String,
    /// 编号的 markdown 列表
    pub outline: String,
    pub usage: TokenUsage,
    /// 产生 usage 的模型（用于计费）
    pub model: String,
}

impl Clarification {
    /// 退化结果：原问题 + 单项大纲
    pub fn fallback(question: &str) -> Self {
        let question = question.trim();
        Self {
            refined_question: question.to_string(),
            outline: render_outline(&[question.to_string()]),
            usage: TokenUsage::default(),
            model: String::new(),
        }
    }
}

/// 澄清能力
#[async_trait]
pub trait Clarifier: Send + Sync {
    async fn clarify(&self, question: &str) -> Result<Clarification, ResearchError>;
}

#[derive(Debug, Deserialize)]
struct ClarifyPayload {
    #[serde(default)]
    refined_question: String,
    #[serde(default)]
    outline: Vec<String>,
}

fn render_outline(topics: &[String]) -> String {
    topics
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{}. {}", i + 1, t))
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_payload(text: &str) -> Result<ClarifyPayload, ResearchError> {
    let text = text.trim();
    let json = if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else {
        match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if end > start => &text[start..=end],
            _ => return Err(ResearchError::Parse(format!("no JSON object in: {}", text))),
        }
    };
    serde_json::from_str(json).map_err(|e| ResearchError::Parse(format!("{}: {}", e, json)))
}

/// 基于 LLM 的澄清器
pub struct LlmClarifier {
    llm: Arc<dyn LlmClient>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmClarifier {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self::from_config(llm, model, &ClarifierSection::default())
    }

    pub fn from_config(
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        config: &ClarifierSection,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
impl Clarifier for LlmClarifier {
    async fn clarify(&self, question: &str) -> Result<Clarification, ResearchError> {
        if question.trim().is_empty() {
            return Err(ResearchError::Parse("empty question".to_string()));
        }
        let prompt = format!("Question: {}", question.trim());
        tracing::debug!(target: "delve::prompts", prompt = %prompt, "clarifier prompt");

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
        tracing::debug!(target: "delve::prompts", output = %completion.text, "clarifier output");

        let mut clarification = Clarification::fallback(question);
        clarification.usage = completion.usage;
        clarification.model = self.model.clone();

        match parse_payload(&completion.text) {
            Ok(payload) => {
                let refined = payload.refined_question.trim();
                if !refined.is_empty() {
                    clarification.refined_question = refined.to_string();
                }
                let topics: Vec<String> = payload
                    .outline
                    .iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .take(MAX_OUTLINE_TOPICS)
                    .collect();
                if !topics.is_empty() {
                    clarification.outline = render_outline(&topics);
                }
            }
            Err(e) => tracing::warn!(error = %e, "clarifier output unparseable, using original question"),
        }
        Ok(clarification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[tokio::test]
    async fn test_clarify_parses_fenced_json() {
        let llm = MockLlmClient::new().on(
            "Question:",
            "```json\n{\"refined_question\": \"Which city is the capital of France?\", \"outline\": [\"Capital city\", \"  \", \"History\"]}\n```",
        );
        let c = LlmClarifier::new(Arc::new(llm), "test-model");
        let out = c.clarify("capital france?").await.unwrap();
        assert_eq!(out.refined_question, "Which city is the capital of France?");
        assert_eq!(out.outline, "1. Capital city\n2. History");
        assert!(out.usage.total() > 0);
        assert_eq!(out.model, "test-model");
    }

    #[tokio::test]
    async fn test_unparseable_output_degrades() {
        let llm = MockLlmClient::new().on("Question:", "Sure! Here is a plan.");
        let c = LlmClarifier::new(Arc::new(llm), "test-model");
        let out = c.clarify("What is the capital of France?").await.unwrap();
        assert_eq!(out.refined_question, "What is the capital of France?");
        assert_eq!(out.outline, "1. What is the capital of France?");
        assert!(out.usage.total() > 0);
    }

    #[tokio::test]
    async fn test_completion_error_is_reported() {
        let llm = MockLlmClient::new().on_error("Question:", "unauthorized");
        let c = LlmClarifier::new(Arc::new(llm), "test-model");
        assert!(matches!(
            c.clarify("q").await,
            Err(ResearchError::Completion(_))
        ));
        assert!(c.clarify("  ").await.is_err());
    }
}
