//! 相关度打分（query, passage）-> 标量
//!
//! RelevanceScorer 是整合器使用的成对打分接口，可注入交叉编码器等本地模型；
//! 每个分数只取决于 (query, passage) 本身，与同批次的其它候选无关。
//! 默认实现 LexicalScorer 是基于分词的词频饱和打分，本地计算、不计费。

use std::collections::HashMap;

use crate::rag::tokenizer;

/// 成对相关度打分器
pub trait RelevanceScorer: Send + Sync {
    fn score_pair(&self, query: &str, passage: &str) -> Result<f32, String>;

    /// 批量打分；返回值与 passages 一一对应
    fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, String> {
        passages
            .iter()
            .map(|p| self.score_pair(query, p))
            .collect()
    }
}

/// BM25 的词频饱和与长度归一部分；参考长度固定，不从候选集合统计
#[derive(Debug, Clone)]
pub struct LexicalScorer {
    k1: f32,
    b: f32,
    /// 长度归一使用的参考词数
    reference_len: f32,
}

impl Default for LexicalScorer {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            reference_len: 120.0,
        }
    }
}

impl RelevanceScorer for LexicalScorer {
    fn score_pair(&self, query: &str, passage: &str) -> Result<f32, String> {
        let query_terms = tokenizer::tokenize_to_set(query);
        if query_terms.is_empty() {
            return Ok(0.0);
        }
        let doc = tokenizer::tokenize(passage);
        let len_norm = 1.0 - self.b + self.b * doc.len() as f32 / self.reference_len;

        let mut tf: HashMap<&str, usize> = HashMap::new();
        for term in &doc {
            *tf.entry(term.as_str()).or_insert(0) += 1;
        }

        let score = query_terms
            .iter()
            .filter_map(|term| tf.get(term.as_str()))
            .map(|&f| {
                let f = f as f32;
                f * (self.k1 + 1.0) / (f + self.k1 * len_norm)
            })
            .sum::<f32>();
        Ok(score / query_terms.len() as f32)
    }
}
