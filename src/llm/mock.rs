//! Mock LLM / 嵌入客户端（用于测试与无 API Key 的离线运行）
//!
//! MockLlmClient 按「关键词 -> 回复队列」规则应答：任一消息包含关键词即命中，
//! 队列逐条弹出，最后一条保持不变；未命中时回显最后一条 User 消息。
//! MockEmbedder 用哈希词袋生成确定性向量，可指定第 N 次调用失败。

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{
    Completion, CompletionRequest, EmbeddingBatch, EmbeddingProvider, LlmClient, Role,
    TokenUsage,
};

/// 按字符数粗略估算 token（约 4 字符 / token）
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Error(String),
}

/// 规则式 Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    rules: Mutex<Vec<(String, VecDeque<Reply>)>>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 消息中包含 needle 时返回 reply；对同一 needle 多次调用则按顺序排队
    pub fn on(self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.push(needle.into(), Reply::Text(reply.into()));
        self
    }

    /// 消息中包含 needle 时返回错误
    pub fn on_error(self, needle: impl Into<String>, error: impl Into<String>) -> Self {
        self.push(needle.into(), Reply::Error(error.into()));
        self
    }

    /// 已处理的调用次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn push(&self, needle: String, reply: Reply) {
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        match rules.iter_mut().find(|(n, _)| *n == needle) {
            Some((_, queue)) => queue.push_back(reply),
            None => rules.push((needle, VecDeque::from([reply]))),
        }
    }

    fn next_reply(&self, request: &CompletionRequest) -> Option<Reply> {
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        let (_, queue) = rules.iter_mut().find(|(needle, _)| {
            request
                .messages
                .iter()
                .any(|m| m.content.contains(needle.as_str()))
        })?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt_tokens: u64 = request
            .messages
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum();

        let text = match self.next_reply(request) {
            Some(Reply::Text(text)) => text,
            Some(Reply::Error(e)) => return Err(e),
            None => {
                let last_user = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| matches!(m.role, Role::User))
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                format!(
                    "Mock response: {}",
                    last_user.chars().take(200).collect::<String>()
                )
            }
        };

        Ok(Completion {
            usage: TokenUsage::new(prompt_tokens, estimate_tokens(&text)),
            text,
        })
    }
}

/// 确定性哈希词袋嵌入
#[derive(Debug)]
pub struct MockEmbedder {
    model: String,
    dimensions: usize,
    failing_calls: HashSet<usize>,
    calls: AtomicUsize,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            model: "mock-embedding".to_string(),
            dimensions: dimensions.max(1),
            failing_calls: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// 第 n 次（从 1 开始）embed 调用返回错误
    pub fn failing_on_call(mut self, n: usize) -> Self {
        self.failing_calls.insert(n);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let slot = (hasher.finish() % self.dimensions as u64) as usize;
            v[slot] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch, String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_calls.contains(&call) {
            return Err(format!("mock embedding failure on call {}", call));
        }
        Ok(EmbeddingBatch {
            vectors: texts.iter().map(|t| self.vectorize(t)).collect(),
            usage: TokenUsage::new(texts.iter().map(|t| estimate_tokens(t)).sum(), 0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest::new("mock", vec![Message::user(text)])
    }

    #[tokio::test]
    async fn test_rules_queue_then_stick() {
        let llm = MockLlmClient::new()
            .on("decide", "first")
            .on("decide", "second");
        assert_eq!(llm.complete(&request("decide now")).await.unwrap().text, "first");
        assert_eq!(llm.complete(&request("decide now")).await.unwrap().text, "second");
        assert_eq!(llm.complete(&request("decide now")).await.unwrap().text, "second");
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_unmatched_echoes_and_errors() {
        let llm = MockLlmClient::new().on_error("boom", "provider down");
        let echo = llm.complete(&request("hello")).await.unwrap();
        assert_eq!(echo.text, "Mock response: hello");
        assert!(echo.usage.prompt_tokens > 0);
        assert_eq!(
            llm.complete(&request("boom")).await.unwrap_err(),
            "provider down"
        );
    }

    #[tokio::test]
    async fn test_mock_embedder_failing_call() {
        let embedder = MockEmbedder::new(16).failing_on_call(2);
        let texts = vec!["paris france".to_string()];
        assert!(embedder.embed(&texts).await.is_ok());
        assert!(embedder.embed(&texts).await.is_err());
        let batch = embedder.embed(&texts).await.unwrap();
        assert_eq!(batch.vectors.len(), 1);
        assert_eq!(batch.vectors[0].len(), 16);
    }
}
