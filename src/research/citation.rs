//! 引用标记：生成、解析、后处理
//!
//! 规范形式：`[Source URL='<url>', Title='<title>', Chunk=<n>]`。
//! 生成严格（标题去掉引号与方括号，URL 中的 `'` `[` `]` 百分号编码，保证可回解析）；
//! 解析宽松（字段顺序、大小写、空白、单双引号、`=`/`:` 均可，但必须含 URL 字段）。
//! 后处理把答案中的标记替换为 `[ref:N]` 并追加编号参考列表。

use std::collections::HashMap;
use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::Passage;

/// 从答案中解析出的一个引用标记
#[derive(Debug, Clone, PartialEq)]
pub struct CitationMarker {
    /// 在原文中的字节范围（含方括号）
    pub span: Range<usize>,
    pub url: String,
    pub title: Option<String>,
    pub chunk: Option<usize>,
}

/// 参考列表条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub number: usize,
    pub url: String,
    pub title: String,
}

/// 后处理结果
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedAnswer {
    pub text: String,
    pub references: Vec<Reference>,
}

fn bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\[\]\n]*)\]").expect("valid bracket regex"))
}

fn head_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:source\b\s*[:,]?\s*)?(?:url|title|chunk)\s*[=:]")
            .expect("valid marker head regex")
    })
}

fn field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(url|title|chunk)\s*[=:]\s*(?:'([^']*)'|"([^"]*)"|([^,\s]+))"#)
            .expect("valid marker field regex")
    })
}

/// 标题清洗：去掉会破坏标记语法的字符并压缩空白
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | '[' | ']'))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// URL 编码：只处理会破坏标记语法的字符
pub fn encode_marker_url(url: &str) -> String {
    url.trim()
        .replace('\'', "%27")
        .replace('[', "%5B")
        .replace(']', "%5D")
}

/// 生成规范形式的引用标记
pub fn format_marker(url: &str, title: &str, chunk_index: usize) -> String {
    format!(
        "[Source URL='{}', Title='{}', Chunk={}]",
        encode_marker_url(url),
        sanitize_title(title),
        chunk_index
    )
}

/// 解析文本中的全部引用标记（按出现顺序）
pub fn parse_markers(text: &str) -> Vec<CitationMarker> {
    let mut markers = Vec::new();
    for caps in bracket_re().captures_iter(text) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if !head_re().is_match(inner.as_str()) {
            continue;
        }
        let mut url = None;
        let mut title = None;
        let mut chunk = None;
        for field in field_re().captures_iter(inner.as_str()) {
            let key = field.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
            let value = field
                .get(2)
                .or_else(|| field.get(3))
                .or_else(|| field.get(4))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            match key.as_str() {
                "url" if url.is_none() => url = Some(value),
                "title" if title.is_none() => title = Some(value),
                "chunk" if chunk.is_none() => chunk = value.parse::<usize>().ok(),
                _ => {}
            }
        }
        if let Some(url) = url.filter(|u| !u.is_empty()) {
            markers.push(CitationMarker {
                span: whole.range(),
                url,
                title,
                chunk,
            });
        }
    }
    markers
}

/// 将答案中的标记替换为 `[ref:N]` 并追加参考列表；没有标记时原样返回
///
/// (URL, Title) 相同的标记共享编号（不区分 chunk），编号按首次出现顺序分配。
pub fn post_process(answer: &str) -> ProcessedAnswer {
    let markers = parse_markers(answer);
    if markers.is_empty() {
        return ProcessedAnswer {
            text: answer.to_string(),
            references: Vec::new(),
        };
    }

    let mut numbers: HashMap<(String, String), usize> = HashMap::new();
    let mut references: Vec<Reference> = Vec::new();
    let mut text = String::with_capacity(answer.len());
    let mut cursor = 0;

    for marker in &markers {
        let title = marker.title.clone().unwrap_or_default();
        let key = (marker.url.clone(), title.clone());
        let number = *numbers.entry(key).or_insert_with(|| {
            references.push(Reference {
                number: references.len() + 1,
                url: marker.url.clone(),
                title,
            });
            references.len()
        });
        text.push_str(&answer[cursor..marker.span.start]);
        text.push_str(&format!("[ref:{}]", number));
        cursor = marker.span.end;
    }
    text.push_str(&answer[cursor..]);

    text.push_str("\n\n---\nReferences:\n");
    let list: Vec<String> = references.iter().map(format_reference).collect();
    text.push_str(&list.join("\n"));

    ProcessedAnswer { text, references }
}

fn format_reference(r: &Reference) -> String {
    if r.title.is_empty() {
        format!("[{}] {}", r.number, r.url)
    } else {
        format!("[{}] {} ({})", r.number, r.title, r.url)
    }
}

/// 将文本中的标记改写为对应 passage 的规范形式；找不到来源的标记被删除
///
/// 返回 (改写后的文本, 删除的标记数)。同一 URL 未给出 chunk 或 chunk 不匹配时取该 URL 的第一个 passage。
pub fn canonicalize_markers(text: &str, passages: &[Passage]) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut removed = 0;

    for marker in parse_markers(text) {
        let same_url: Vec<&Passage> = passages
            .iter()
            .filter(|p| p.source_url == marker.url || encode_marker_url(&p.source_url) == marker.url)
            .collect();
        let source = same_url
            .iter()
            .find(|p| Some(p.chunk_index) == marker.chunk)
            .or_else(|| same_url.first());

        let before = &text[cursor..marker.span.start];
        match source {
            Some(p) => {
                out.push_str(before);
                out.push_str(&p.citation_marker());
            }
            None => {
                out.push_str(before.strip_suffix(' ').unwrap_or(before));
                removed += 1;
            }
        }
        cursor = marker.span.end;
    }
    out.push_str(&text[cursor..]);
    (out, removed)
}
