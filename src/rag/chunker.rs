//! 文档分块：按分隔符优先级切分抓取到的正文，每块保留来源 URL / 标题与块序号

use crate::core::Passage;

/// 分块策略
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// 目标块大小（字符数）
    pub chunk_size: usize,
    /// 块之间的重叠（字符数）
    pub chunk_overlap: usize,
    /// 分隔符优先级（从高到低）
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            separators: vec![
                "\n\n".to_string(),
                "\n".to_string(),
                "。".to_string(),
                ". ".to_string(),
                "！".to_string(),
                "？".to_string(),
                "! ".to_string(),
                "? ".to_string(),
                " ".to_string(),
            ],
        }
    }
}

/// 文档分块器
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(mut config: ChunkingConfig) -> Self {
        config.chunk_size = config.chunk_size.max(1);
        // 重叠不小于块大小时无法前进
        if config.chunk_overlap >= config.chunk_size {
            config.chunk_overlap = config.chunk_size / 2;
        }
        Self { config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// 将文档分割为 Passage（UTF-8 安全）；chunk_index 按出现顺序从 0 递增
    pub fn chunk(&self, source_url: &str, source_title: &str, text: &str) -> Vec<Passage> {
        let mut passages = Vec::new();
        let chars: Vec<char> = text.chars().collect();
        let total_chars = chars.len();

        if total_chars == 0 {
            return passages;
        }

        let chunk_size = self.config.chunk_size;
        // 分隔符位置过于靠前时会产生碎块，只接受后半段的断点
        let min_break = (chunk_size / 2).max(1);
        let mut current_idx = 0;

        while current_idx < total_chars {
            let target_end = (current_idx + chunk_size).min(total_chars);
            let mut actual_end = target_end;

            // 如果不是文档末尾，尝试在分隔符处断开
            if target_end < total_chars {
                let slice: String = chars[current_idx..target_end].iter().collect();
                for sep in &self.config.separators {
                    if let Some(pos) = slice.rfind(sep.as_str()) {
                        let chars_to_sep = slice[..pos].chars().count() + sep.chars().count();
                        if chars_to_sep >= min_break {
                            actual_end = current_idx + chars_to_sep;
                            break;
                        }
                    }
                }
            }

            // 确保至少前进一个字符
            if actual_end <= current_idx {
                actual_end = (current_idx + 1).min(total_chars);
            }

            let chunk_text: String = chars[current_idx..actual_end].iter().collect();
            let trimmed = chunk_text.trim();

            if !trimmed.is_empty() {
                passages.push(Passage {
                    text: trimmed.to_string(),
                    source_url: source_url.to_string(),
                    source_title: source_title.to_string(),
                    chunk_index: passages.len(),
                });
            }

            if actual_end >= total_chars {
                break;
            }

            let overlap = self.config.chunk_overlap.min(actual_end - current_idx);
            let next_start = actual_end.saturating_sub(overlap);
            current_idx = if next_start > current_idx {
                next_start
            } else {
                actual_end
            };
        }

        passages
    }
}
