//! 控制器决策：封闭的动作联合体与严格解析
//!
//! 接受两种输出形式：JSON（`{"action": "SEARCH", "query": "..."}`，可带 ```json 围栏）
//! 或行格式（`Action: SEARCH` / `Argument: ...`）。解析失败返回 ParseError，由控制器降级为 CONSOLIDATE。

use serde_json::Value;

use crate::core::{NextAction, ResearchError};

/// 控制器可选择的动作及其参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Search { query: String },
    /// url 为空时由控制器选择排名最高的未抓取结果
    Fetch { url: Option<String> },
    /// query 为空时使用最近一次搜索的查询（尚未搜索过时用精炼后的问题）
    Retrieve { query: Option<String> },
    Summarize,
    Consolidate,
    Stop,
}

impl Decision {
    pub fn action(&self) -> NextAction {
        match self {
            Self::Search { .. } => NextAction::Search,
            Self::Fetch { .. } => NextAction::Fetch,
            Self::Retrieve { .. } => NextAction::Retrieve,
            Self::Summarize => NextAction::Summarize,
            Self::Consolidate => NextAction::Consolidate,
            Self::Stop => NextAction::Stop,
        }
    }

    pub fn argument(&self) -> Option<&str> {
        match self {
            Self::Search { query } => Some(query),
            Self::Fetch { url } => url.as_deref(),
            Self::Retrieve { query } => query.as_deref(),
            _ => None,
        }
    }
}

fn clean_argument(raw: &str) -> Option<String> {
    let arg = raw
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '[' | ']' | '*'))
        .trim();
    if arg.is_empty() || arg.eq_ignore_ascii_case("none") || arg.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(arg.to_string())
    }
}

fn action_name(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .to_ascii_uppercase()
}

/// 参数字段的优先顺序：FETCH 先取 url，其余先取 query
fn argument_keys(action: &str) -> &'static [&'static str] {
    if action == "FETCH" {
        &["url", "argument", "arg", "query"]
    } else {
        &["query", "argument", "arg", "url"]
    }
}

fn build(name: &str, argument: Option<String>) -> Result<Decision, ResearchError> {
    match name {
        "SEARCH" => argument
            .map(|query| Decision::Search { query })
            .ok_or_else(|| ResearchError::Parse("SEARCH requires a query".to_string())),
        "FETCH" => Ok(Decision::Fetch { url: argument }),
        "RETRIEVE" | "RETRIEVE_CHUNKS" => Ok(Decision::Retrieve { query: argument }),
        "SUMMARIZE" => Ok(Decision::Summarize),
        "CONSOLIDATE" => Ok(Decision::Consolidate),
        "STOP" => Ok(Decision::Stop),
        other => Err(ResearchError::Parse(format!("unknown action: {}", other))),
    }
}

/// 从文本中截取 JSON 对象（```json 围栏或首个 `{` 到最后一个 `}`）
fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn parse_json(text: &str) -> Option<Result<Decision, ResearchError>> {
    let value: Value = serde_json::from_str(extract_json(text)?).ok()?;
    let name = action_name(value.get("action")?.as_str()?);
    let argument = argument_keys(&name)
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str).and_then(clean_argument));
    Some(build(&name, argument))
}

fn parse_lines(text: &str) -> Option<Result<Decision, ResearchError>> {
    let mut action = None;
    let mut fields: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        let line = line.trim().trim_start_matches(['*', '-', '#']).trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().trim_matches('*').trim().to_ascii_lowercase();
        if key == "action" {
            action.get_or_insert_with(|| action_name(value));
        } else if !fields.iter().any(|(k, _)| *k == key) {
            fields.push((key, value.to_string()));
        }
    }
    let name = action?;
    let argument = argument_keys(&name).iter().find_map(|key| {
        fields
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| clean_argument(v))
    });
    Some(build(&name, argument))
}

/// 解析模型输出为 Decision
pub fn parse_decision(text: &str) -> Result<Decision, ResearchError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ResearchError::Parse("empty decision".to_string()));
    }
    parse_json(text)
        .or_else(|| parse_lines(text))
        .unwrap_or_else(|| Err(ResearchError::Parse(format!("no action found in: {}", text))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_decision() {
        let d = parse_decision(r#"{"action": "search", "query": "capital of France"}"#).unwrap();
        assert_eq!(d, Decision::Search { query: "capital of France".into() });

        let fenced = "Thinking...\n```json\n{\"action\": \"FETCH\", \"url\": \"https://a\"}\n```";
        assert_eq!(
            parse_decision(fenced).unwrap(),
            Decision::Fetch { url: Some("https://a".into()) }
        );
    }

    #[test]
    fn test_parse_line_decision() {
        let d = parse_decision("Action: SEARCH\nArgument: Paris population").unwrap();
        assert_eq!(d, Decision::Search { query: "Paris population".into() });

        let d = parse_decision("**Action:** [RETRIEVE_CHUNKS]\n**Argument:** None").unwrap();
        assert_eq!(d, Decision::Retrieve { query: None });

        let d = parse_decision("Action: CONSOLIDATE\nArgument: ignored").unwrap();
        assert_eq!(d, Decision::Consolidate);
    }

    #[test]
    fn test_parse_failures() {
        assert!(parse_decision("").is_err());
        assert!(parse_decision("I think we should look around.").is_err());
        assert!(parse_decision("Action: DANCE").is_err());
        assert!(parse_decision("Action: SEARCH\nArgument: None").is_err());
        assert!(parse_decision(r#"{"action": "SEARCH"}"#).is_err());
    }

    #[test]
    fn test_argument_key_follows_action() {
        let d = parse_decision(r#"{"action": "FETCH", "query": "x", "url": "https://b"}"#).unwrap();
        assert_eq!(d, Decision::Fetch { url: Some("https://b".into()) });

        let d = parse_decision(r#"{"action": "SEARCH", "url": "https://b", "query": "paris"}"#).unwrap();
        assert_eq!(d, Decision::Search { query: "paris".into() });

        let d = parse_decision("Action: FETCH\nQuery: x\nURL: https://c").unwrap();
        assert_eq!(d, Decision::Fetch { url: Some("https://c".into()) });

        let d = parse_decision(r#"{"action": "FETCH", "query": "x"}"#).unwrap();
        assert_eq!(d, Decision::Fetch { url: Some("x".into()) });
    }

    #[test]
    fn test_url_with_colon_in_line_format() {
        let d = parse_decision("Action: FETCH\nArgument: https://en.wikipedia.org/wiki/France").unwrap();
        assert_eq!(
            d,
            Decision::Fetch { url: Some("https://en.wikipedia.org/wiki/France".into()) }
        );
    }
}
