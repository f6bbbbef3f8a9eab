//! 分词模块
//!
//! 提供中英文混合分词能力，用于笔记重排的词法打分。
//! 使用 jieba-rs 进行中文分词，英文按非字母数字字符切分。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

/// 全局 Jieba 实例（延迟初始化；只读词典，不含运行状态）
static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn get_jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "how", "in", "is", "it",
    "of", "on", "or", "that", "the", "this", "to", "was", "what", "when", "where", "which",
    "who", "why", "with",
];

/// 判断字符是否为 CJK（中日韩）字符
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |   // CJK Unified Ideographs
        '\u{3400}'..='\u{4DBF}' |   // CJK Unified Ideographs Extension A
        '\u{F900}'..='\u{FAFF}' |   // CJK Compatibility Ideographs
        '\u{3040}'..='\u{309F}' |   // Hiragana
        '\u{30A0}'..='\u{30FF}'     // Katakana
    )
}

/// 判断文本是否包含 CJK 字符
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

fn keep_token(token: &str) -> bool {
    let first = token.chars().next().unwrap_or(' ');
    if is_cjk(first) {
        return true;
    }
    token.chars().count() > 1
        && token.chars().any(char::is_alphanumeric)
        && !STOPWORDS.contains(&token)
}

/// 智能分词：包含 CJK 字符时使用 jieba（搜索引擎模式），否则按非字母数字切分
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if contains_cjk(text) {
        get_jieba()
            .cut_for_search(text, true)
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty() && keep_token(s))
            .collect()
    } else {
        text.split(|c: char| !c.is_alphanumeric())
            .map(|s| s.to_lowercase())
            .filter(|s| keep_token(s))
            .collect()
    }
}

/// 分词并去重
pub fn tokenize_to_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_english_tokenize_drops_stopwords_and_punctuation() {
        let tokens = tokenize("What is the capital of France? Paris!");
        assert_eq!(tokens, vec!["capital", "france", "paris"]);
    }

    #[test]
    fn test_cjk_tokenize() {
        let tokens = tokenize_to_set("法国的首都是巴黎");
        assert!(tokens.contains("巴黎"));
        assert!(contains_cjk("巴黎 Paris"));
    }

    #[test]
    fn test_empty() {
        assert!(tokenize("   ").is_empty());
    }
}
