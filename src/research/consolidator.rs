//! 整合器：按与问题的相关度挑选笔记并拼出 combined_context
//!
//! 每条笔记输出摘要与其原文片段（截断到 max_passage_chars），供综合阶段直接引用原文。
//! 同分按写入顺序；打分失败或数量不符时退回写入顺序。

use std::sync::Arc;

use crate::config::ConsolidatorSection;
use crate::core::{Note, RunState};
use crate::rag::index::comparable;
use crate::rag::{LexicalScorer, RelevanceScorer};

/// 没有任何笔记时的上下文
pub const EMPTY_CONTEXT: &str = "No information gathered during research.";

fn truncate_chars(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 笔记整合器
pub struct Consolidator {
    scorer: Arc<dyn RelevanceScorer>,
    top_n: usize,
    max_passage_chars: usize,
}

impl Default for Consolidator {
    fn default() -> Self {
        Self::from_config(Arc::new(LexicalScorer::default()), &ConsolidatorSection::default())
    }
}

impl Consolidator {
    pub fn from_config(scorer: Arc<dyn RelevanceScorer>, config: &ConsolidatorSection) -> Self {
        Self {
            scorer,
            top_n: config.top_n.max(1),
            max_passage_chars: config.max_passage_chars.max(1),
        }
    }

    /// 选出最相关的 top_n 条笔记（降序，同分保持写入顺序）
    pub fn select<'a>(&self, question: &str, notes: &'a [Note]) -> Vec<&'a Note> {
        let summaries: Vec<&str> = notes.iter().map(|n| n.summary.as_str()).collect();
        let mut order: Vec<(usize, f32)> = match self.scorer.score(question, &summaries) {
            Ok(scores) if scores.len() == notes.len() => scores
                .into_iter()
                .map(comparable)
                .enumerate()
                .collect(),
            Ok(scores) => {
                tracing::warn!(expected = notes.len(), got = scores.len(), "scorer count mismatch, keeping insertion order");
                (0..notes.len()).map(|i| (i, 0.0)).collect()
            }
            Err(e) => {
                tracing::warn!(error = %e, "note scoring failed, keeping insertion order");
                (0..notes.len()).map(|i| (i, 0.0)).collect()
            }
        };
        order.sort_by(|a, b| b.1.total_cmp(&a.1));
        order
            .into_iter()
            .take(self.top_n)
            .map(|(i, _)| &notes[i])
            .collect()
    }

    /// 渲染整合上下文
    pub fn render(&self, question: &str, notes: &[&Note]) -> String {
        if notes.is_empty() {
            return EMPTY_CONTEXT.to_string();
        }
        let mut out = format!("# Curated Research Notes for: {}\n", question);
        for (i, note) in notes.iter().enumerate() {
            out.push_str(&format!("\n## Note {}\n{}\n", i + 1, note.summary.trim()));
            if !note.source_passages.is_empty() {
                out.push_str("\nSupporting passages:\n");
                for p in &note.source_passages {
                    out.push_str(&format!(
                        "{}\n{}\n",
                        p.citation_marker(),
                        truncate_chars(&p.text, self.max_passage_chars)
                    ));
                }
            }
        }
        out.push_str("---\nEnd of Notes.");
        out
    }

    /// CONSOLIDATE：重排并写入 combined_context
    pub fn consolidate(&self, state: &mut RunState) {
        let selected = self.select(&state.refined_question, &state.notes);
        tracing::info!(notes = state.notes.len(), selected = selected.len(), "consolidating notes");
        let context = self.render(&state.refined_question, &selected);
        state.combined_context = Some(context);
    }

    /// STOP：不重排，按写入顺序使用全部笔记
    pub fn collect_all(&self, state: &mut RunState) {
        let all: Vec<&Note> = state.notes.iter().collect();
        let context = self.render(&state.refined_question, &all);
        state.combined_context = Some(context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Passage;

    struct FailingScorer;

    impl RelevanceScorer for FailingScorer {
        fn score_pair(&self, _query: &str, _passage: &str) -> Result<f32, String> {
            Err("model not loaded".to_string())
        }
    }

    struct ConstantScorer;

    impl RelevanceScorer for ConstantScorer {
        fn score_pair(&self, _query: &str, _passage: &str) -> Result<f32, String> {
            Ok(1.0)
        }
    }

    /// 摘要以 "nan" 开头的笔记得到 NaN
    struct NanScorer;

    impl RelevanceScorer for NanScorer {
        fn score_pair(&self, _query: &str, passage: &str) -> Result<f32, String> {
            if passage.starts_with("nan") {
                Ok(f32::NAN)
            } else {
                Ok(passage.len() as f32)
            }
        }
    }

    fn note(summary: &str) -> Note {
        Note {
            summary: summary.to_string(),
            source_passages: vec![Passage {
                text: format!("raw {}", summary),
                source_url: "https://a".to_string(),
                source_title: "A".to_string(),
                chunk_index: 0,
            }],
        }
    }

    fn config(top_n: usize) -> ConsolidatorSection {
        ConsolidatorSection {
            top_n,
            max_passage_chars: 1000,
        }
    }

    #[test]
    fn test_selects_most_relevant() {
        let c = Consolidator::from_config(Arc::new(LexicalScorer::default()), &config(1));
        let notes = vec![note("Berlin is in Germany"), note("Paris is the capital of France")];
        let selected = c.select("capital of France", &notes);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].summary, "Paris is the capital of France");
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let c = Consolidator::from_config(Arc::new(ConstantScorer), &config(2));
        let notes = vec![note("one"), note("two"), note("three")];
        let selected: Vec<_> = c.select("q", &notes).iter().map(|n| n.summary.clone()).collect();
        assert_eq!(selected, vec!["one", "two"]);
    }

    #[test]
    fn test_scorer_failure_falls_back_to_insertion_order() {
        let c = Consolidator::from_config(Arc::new(FailingScorer), &config(5));
        let notes = vec![note("one"), note("two")];
        let selected: Vec<_> = c.select("q", &notes).iter().map(|n| n.summary.clone()).collect();
        assert_eq!(selected, vec!["one", "two"]);
    }

    #[test]
    fn test_nan_scores_rank_last() {
        let c = Consolidator::from_config(Arc::new(NanScorer), &config(3));
        let notes = vec![note("nan first"), note("short"), note("much longer")];
        let selected: Vec<_> = c.select("q", &notes).iter().map(|n| n.summary.clone()).collect();
        assert_eq!(selected, vec!["much longer", "short", "nan first"]);
    }

    #[test]
    fn test_render_format() {
        let c = Consolidator::from_config(Arc::new(ConstantScorer), &ConsolidatorSection {
            top_n: 5,
            max_passage_chars: 5,
        });
        let n = note("Paris [Source URL='https://a', Title='A', Chunk=0]");
        let out = c.render("Q?", &[&n]);
        assert_eq!(
            out,
            "# Curated Research Notes for: Q?\n\n## Note 1\nParis [Source URL='https://a', Title='A', Chunk=0]\n\nSupporting passages:\n[Source URL='https://a', Title='A', Chunk=0]\nraw P...\n---\nEnd of Notes."
        );
        assert_eq!(c.render("Q?", &[]), EMPTY_CONTEXT);
    }
}
