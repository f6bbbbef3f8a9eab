//! 会话向量索引（SessionIndex）
//!
//! 单次运行内的临时最近邻存储：只追加、无删除 / 更新，随 RunState 一起丢弃。
//! add 按批次调用嵌入（数量与字符预算双重限制），某一批失败不影响其它批次已写入的条目。

use std::sync::Arc;

use crate::core::{Passage, ResearchError};
use crate::llm::{EmbeddingProvider, TokenUsage};

/// 单批字符预算的默认值（约 8k token）
pub const DEFAULT_MAX_BATCH_CHARS: usize = 32_000;

/// 一次 add 的结果
#[derive(Debug, Default)]
pub struct AddReport {
    /// 成功写入的条目数
    pub added: usize,
    /// 因所在批次嵌入失败而丢弃的条目数
    pub failed: usize,
    /// 所有成功批次的 token 用量
    pub usage: TokenUsage,
    pub errors: Vec<ResearchError>,
}

/// 检索命中
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}

/// 一次 query 的结果
#[derive(Debug, Default)]
pub struct Retrieval {
    pub hits: Vec<ScoredPassage>,
    pub usage: TokenUsage,
}

impl Retrieval {
    pub fn into_passages(self) -> Vec<Passage> {
        self.hits.into_iter().map(|h| h.passage).collect()
    }
}

struct IndexEntry {
    passage: Passage,
    embedding: Vec<f32>,
}

/// 会话向量索引
pub struct SessionIndex {
    entries: Vec<IndexEntry>,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_batch_chars: usize,
}

impl SessionIndex {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            embedder,
            batch_size: batch_size.max(1),
            max_batch_chars: DEFAULT_MAX_BATCH_CHARS,
        }
    }

    pub fn with_max_batch_chars(mut self, max_batch_chars: usize) -> Self {
        self.max_batch_chars = max_batch_chars.max(1);
        self
    }

    /// 嵌入模型名（用于计费）
    pub fn embedding_model(&self) -> &str {
        self.embedder.model()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按数量与字符预算切分子批次；单条超预算的 passage 独占一批
    fn split_batches(&self, passages: Vec<Passage>) -> Vec<Vec<Passage>> {
        let mut batches = Vec::new();
        let mut current: Vec<Passage> = Vec::new();
        let mut current_chars = 0;
        for passage in passages {
            let len = passage.text.chars().count();
            if !current.is_empty()
                && (current.len() >= self.batch_size || current_chars + len > self.max_batch_chars)
            {
                batches.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            current_chars += len;
            current.push(passage);
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    /// 批量嵌入并写入；失败批次记录在 AddReport 中，不中断后续批次
    pub async fn add(&mut self, passages: Vec<Passage>) -> AddReport {
        let mut report = AddReport::default();
        let passages: Vec<Passage> = passages
            .into_iter()
            .filter(|p| !p.text.trim().is_empty())
            .collect();

        for (batch_no, batch) in self.split_batches(passages).into_iter().enumerate() {
            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            let result = self.embedder.embed(&texts).await.and_then(|b| {
                if b.vectors.len() == batch.len() {
                    Ok(b)
                } else {
                    Err(format!(
                        "expected {} vectors, got {}",
                        batch.len(),
                        b.vectors.len()
                    ))
                }
            });
            match result {
                Ok(embedded) => {
                    report.usage += embedded.usage;
                    report.added += batch.len();
                    self.entries.extend(
                        batch
                            .into_iter()
                            .zip(embedded.vectors)
                            .map(|(passage, embedding)| IndexEntry { passage, embedding }),
                    );
                }
                Err(e) => {
                    tracing::warn!(batch = batch_no + 1, size = batch.len(), error = %e, "embedding sub-batch failed");
                    report.failed += batch.len();
                    report.errors.push(ResearchError::Embedding(e));
                }
            }
        }

        report
    }

    /// 返回与 text 最相似的 k 条；同分按写入顺序；空索引直接返回空结果且不调用嵌入
    pub async fn query(&self, text: &str, k: usize) -> Result<Retrieval, ResearchError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Retrieval::default());
        }
        let (embedding, usage) = self.embed_query(text).await?;
        Ok(Retrieval {
            hits: self.rank(&embedding, k, |_| true),
            usage,
        })
    }

    /// 嵌入一条查询文本
    pub(crate) async fn embed_query(
        &self,
        text: &str,
    ) -> Result<(Vec<f32>, TokenUsage), ResearchError> {
        let batch = self
            .embedder
            .embed(&[text.to_string()])
            .await
            .map_err(ResearchError::Embedding)?;
        let embedding = batch
            .vectors
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ResearchError::Embedding("empty query embedding".to_string()))?;
        Ok((embedding, batch.usage))
    }

    /// 在满足 filter 的条目中按相似度取前 k 条
    pub(crate) fn rank(
        &self,
        embedding: &[f32],
        k: usize,
        filter: impl Fn(&Passage) -> bool,
    ) -> Vec<ScoredPassage> {
        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .iter()
            .filter(|e| filter(&e.passage))
            .map(|e| (comparable(cosine_similarity(embedding, &e.embedding)), e))
            .collect();

        // 稳定排序：同分保持写入顺序
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        scored
            .into_iter()
            .take(k)
            .map(|(score, e)| ScoredPassage {
                passage: e.passage.clone(),
                score,
            })
            .collect()
    }
}

/// NaN 排在最后
pub(crate) fn comparable(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}

/// 余弦相似度
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockEmbedder;

    fn passage(url: &str, idx: usize, text: &str) -> Passage {
        Passage {
            text: text.to_string(),
            source_url: url.to_string(),
            source_title: "T".to_string(),
            chunk_index: idx,
        }
    }

    #[tokio::test]
    async fn test_empty_index_query_returns_empty() {
        let embedder = Arc::new(MockEmbedder::default());
        let index = SessionIndex::new(embedder.clone(), 4);
        let result = index.query("anything", 5).await.unwrap();
        assert!(result.hits.is_empty());
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_partial_batch_failure_keeps_earlier_batches() {
        let embedder = Arc::new(MockEmbedder::default().failing_on_call(2));
        let mut index = SessionIndex::new(embedder, 2);
        let passages = vec![
            passage("https://a", 0, "paris is the capital of france"),
            passage("https://a", 1, "the seine flows through paris"),
            passage("https://a", 2, "berlin is the capital of germany"),
            passage("https://a", 3, "the spree flows through berlin"),
            passage("https://a", 4, "rome is the capital of italy"),
            passage("https://a", 5, "the tiber flows through rome"),
        ];
        let report = index.add(passages).await;
        assert_eq!(report.added, 4);
        assert_eq!(report.failed, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(index.len(), 4);

        let hits = index.query("capital of france", 1).await.unwrap().into_passages();
        assert_eq!(hits[0].chunk_index, 0);
        let all = index.query("capital", 10).await.unwrap().into_passages();
        let indices: Vec<_> = all.iter().map(|p| p.chunk_index).collect();
        assert!(!indices.contains(&2) && !indices.contains(&3));
    }

    #[tokio::test]
    async fn test_query_returns_fewer_than_k_and_ties_by_insertion() {
        let mut index = SessionIndex::new(Arc::new(MockEmbedder::default()), 8);
        index
            .add(vec![
                passage("https://a", 0, "alpha beta"),
                passage("https://b", 0, "alpha beta"),
                passage("https://c", 0, "alpha beta"),
            ])
            .await;
        let hits = index.query("alpha beta", 10).await.unwrap().into_passages();
        let urls: Vec<_> = hits.iter().map(|p| p.source_url.as_str()).collect();
        assert_eq!(urls, vec!["https://a", "https://b", "https://c"]);
    }

    #[test]
    fn test_split_batches_respects_char_budget() {
        let index = SessionIndex::new(Arc::new(MockEmbedder::default()), 10).with_max_batch_chars(10);
        let batches = index.split_batches(vec![
            passage("u", 0, "12345"),
            passage("u", 1, "12345"),
            passage("u", 2, "123456789012"),
            passage("u", 3, "1"),
        ]);
        let sizes: Vec<_> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 1, 1]);
    }

    #[test]
    fn test_rank_puts_nan_last_without_panicking() {
        let mut index = SessionIndex::new(Arc::new(MockEmbedder::default()), 8);
        index.entries.push(IndexEntry {
            passage: passage("https://nan", 0, "broken"),
            embedding: vec![f32::NAN, 0.0],
        });
        index.entries.push(IndexEntry {
            passage: passage("https://ok", 0, "fine"),
            embedding: vec![1.0, 0.0],
        });
        let hits = index.rank(&[1.0, 0.0], 2, |_| true);
        assert_eq!(hits[0].passage.source_url, "https://ok");
        assert_eq!(hits[1].passage.source_url, "https://nan");

        let only_nan = index.rank(&[1.0, 0.0], 5, |p| p.source_url == "https://nan");
        assert_eq!(only_nan.len(), 1);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.001);
        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
    }
}
