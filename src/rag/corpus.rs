//! 本地文档语料库（CorpusIndex）
//!
//! 启动时从 [corpus].path 读取 .md / .txt 文档（目录递归，或从单个入口文件出发），
//! 沿文档内的相对链接追加文件直到 link_follow_depth，分块、嵌入后常驻内存。
//! ResearchAgent 持有它并以引用传给每次运行；它与运行的 SessionIndex 是不同实例，
//! 内容只经控制器选择的 RETRIEVE 进入 retrieved_passages，从不写入会话索引。
//!
//! 查询先取相似度最高的 k 条，再从命中文档沿链接扩展 link_depth 跳，每个被链接文档补充 link_k 条。

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use walkdir::WalkDir;

use crate::config::CorpusSection;
use crate::core::ResearchError;
use crate::llm::EmbeddingProvider;
use crate::rag::index::{Retrieval, SessionIndex};
use crate::rag::Chunker;

const SUPPORTED_EXTENSIONS: [&str; 2] = ["md", "txt"];

fn markdown_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\[[^\]]*\]\(\s*([^)\s]+)(?:\s+"[^"]*")?\s*\)"#).expect("valid markdown link regex")
    })
}

fn wiki_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\]|]+)(?:\|[^\]]*)?\]\]").expect("valid wiki link regex"))
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)))
        .unwrap_or(false)
}

/// 语料库片段的来源 URL
pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// 提取本地链接目标：Markdown `[text](target)` 与 Wiki `[[target|text]]`。
/// 跳过网页链接、mailto 与纯锚点；去掉 `#片段`；Wiki 链接没有受支持的扩展名时补 .md
pub fn extract_links(content: &str) -> Vec<String> {
    let markdown = markdown_link_re()
        .captures_iter(content)
        .map(|c| c[1].to_string());
    let wiki = wiki_link_re().captures_iter(content).map(|c| {
        let target = c[1].trim();
        if is_supported(Path::new(target)) {
            target.to_string()
        } else {
            format!("{}.md", target)
        }
    });

    markdown
        .chain(wiki)
        .filter(|t| !t.contains("://") && !t.starts_with("mailto:"))
        .filter_map(|t| t.split('#').next().map(str::to_string))
        .filter(|t| !t.is_empty())
        .collect()
}

/// 解析链接目标：先相对 root，再相对当前文件所在目录，最后在 root 下按文件名查找。
/// 结果必须是 root 内受支持的文件
fn resolve_link(target: &str, current: &Path, root: &Path) -> Option<PathBuf> {
    let relative = [
        Some(root.join(target)),
        current.parent().map(|dir| dir.join(target)),
    ];
    let direct = relative
        .into_iter()
        .flatten()
        .filter_map(|p| p.canonicalize().ok())
        .find(|p| p.is_file() && p.starts_with(root) && is_supported(p));
    if direct.is_some() {
        return direct;
    }

    let name = Path::new(target).file_name()?;
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && e.file_name() == name)
        .and_then(|e| e.path().canonicalize().ok())
        .filter(|p| is_supported(p))
}

fn document_title(path: &Path, text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| path.display().to_string())
}

struct Document {
    path: PathBuf,
    title: String,
    text: String,
    links: Vec<PathBuf>,
}

/// 收集文档：目录时递归读取（跳过隐藏项），文件时以它为入口；
/// 之后按广度优先沿链接追加，链接深度达到 follow_depth 后不再追加（0 表示不追加）
fn load_documents(entry: &Path, follow_depth: usize) -> Result<Vec<Document>, ResearchError> {
    let entry = entry.canonicalize().map_err(|e| {
        ResearchError::Config(format!("corpus path {}: {}", entry.display(), e))
    })?;

    let (root, start) = if entry.is_dir() {
        let files: Vec<PathBuf> = WalkDir::new(&entry)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_supported(e.path()))
            .filter_map(|e| e.path().canonicalize().ok())
            .collect();
        (entry, files)
    } else if is_supported(&entry) {
        let root = entry.parent().map(Path::to_path_buf).unwrap_or_else(|| entry.clone());
        (root, vec![entry])
    } else {
        return Err(ResearchError::Config(format!(
            "corpus file must be .md or .txt: {}",
            entry.display()
        )));
    };

    let mut queue: VecDeque<(PathBuf, usize)> = start.into_iter().map(|p| (p, 0)).collect();
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut documents = Vec::new();

    while let Some((path, depth)) = queue.pop_front() {
        if !visited.insert(path.clone()) {
            continue;
        }
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable corpus file");
                continue;
            }
        };

        let mut links: Vec<PathBuf> = Vec::new();
        for target in extract_links(&text) {
            if let Some(resolved) = resolve_link(&target, &path, &root) {
                if resolved != path && !links.contains(&resolved) {
                    links.push(resolved);
                }
            }
        }
        if depth < follow_depth {
            for link in links.iter().filter(|l| !visited.contains(*l)) {
                tracing::debug!(from = %path.display(), to = %link.display(), depth = depth + 1, "following document link");
                queue.push_back((link.clone(), depth + 1));
            }
        }

        documents.push(Document {
            title: document_title(&path, &text),
            path,
            text,
            links,
        });
    }

    Ok(documents)
}

/// 常驻内存的本地文档索引
pub struct CorpusIndex {
    store: SessionIndex,
    /// 来源 URL -> 该文档链接到的文档 URL
    links: HashMap<String, Vec<String>>,
    documents: usize,
    link_depth: usize,
    link_k: usize,
}

impl CorpusIndex {
    /// 读取、分块并嵌入语料库；部分批次嵌入失败只记录警告，全部失败时返回错误
    pub async fn build(
        config: &CorpusSection,
        chunker: &Chunker,
        embedder: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        max_batch_chars: usize,
    ) -> Result<Self, ResearchError> {
        let path = config
            .path
            .as_deref()
            .ok_or_else(|| ResearchError::Config("corpus path not set".to_string()))?;
        let documents = load_documents(path, config.link_follow_depth)?;

        let mut links = HashMap::new();
        let mut passages = Vec::new();
        for doc in &documents {
            let url = file_url(&doc.path);
            passages.extend(chunker.chunk(&url, &doc.title, &doc.text));
            links.insert(url, doc.links.iter().map(|p| file_url(p)).collect());
        }

        let mut store =
            SessionIndex::new(embedder, batch_size).with_max_batch_chars(max_batch_chars);
        let report = store.add(passages).await;
        if report.failed > 0 {
            tracing::warn!(failed = report.failed, "some corpus passages could not be embedded");
        }
        if store.is_empty() {
            return Err(report.errors.into_iter().next().unwrap_or_else(|| {
                ResearchError::Config(format!("no indexable documents at {}", path.display()))
            }));
        }

        tracing::info!(
            documents = documents.len(),
            passages = store.len(),
            embedding_tokens = report.usage.total(),
            "local corpus indexed"
        );
        Ok(Self {
            store,
            links,
            documents: documents.len(),
            link_depth: config.link_depth,
            link_k: config.link_k,
        })
    }

    /// 已读取的文档数
    pub fn documents(&self) -> usize {
        self.documents
    }

    /// 已索引的片段数
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn embedding_model(&self) -> &str {
        self.store.embedding_model()
    }

    /// 相似度前 k 条，加上沿链接扩展得到的片段（排在后面）
    pub async fn query(&self, text: &str, k: usize) -> Result<Retrieval, ResearchError> {
        if self.store.is_empty() || k == 0 {
            return Ok(Retrieval::default());
        }
        let (embedding, usage) = self.store.embed_query(text).await?;
        let mut hits = self.store.rank(&embedding, k, |_| true);

        let mut expanded: HashSet<String> = HashSet::new();
        let mut frontier: Vec<String> = Vec::new();
        for hit in &hits {
            if expanded.insert(hit.passage.source_url.clone()) {
                frontier.push(hit.passage.source_url.clone());
            }
        }

        for _ in 0..self.link_depth {
            let mut next = Vec::new();
            for source in &frontier {
                for target in self.links.get(source).into_iter().flatten() {
                    if !expanded.insert(target.clone()) {
                        continue;
                    }
                    let linked = self
                        .store
                        .rank(&embedding, self.link_k, |p| p.source_url == *target);
                    tracing::debug!(from = %source, to = %target, passages = linked.len(), "expanding corpus link");
                    hits.extend(linked);
                    next.push(target.clone());
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        Ok(Retrieval { hits, usage })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::llm::MockEmbedder;

    fn section(path: &Path, link_follow_depth: usize, link_depth: usize) -> CorpusSection {
        CorpusSection {
            path: Some(path.to_path_buf()),
            link_follow_depth,
            link_depth,
            link_k: 2,
        }
    }

    async fn build(config: &CorpusSection) -> Result<CorpusIndex, ResearchError> {
        CorpusIndex::build(
            config,
            &Chunker::default(),
            Arc::new(MockEmbedder::default()),
            8,
            32_000,
        )
        .await
    }

    fn url_of(dir: &Path, name: &str) -> String {
        file_url(&dir.join(name).canonicalize().unwrap())
    }

    #[test]
    fn test_extract_links() {
        let text = "See [guide](guide.md) and [site](https://example.org).\n\
[top](#top), [part](other.md#part), [[Setup]] and [[notes.txt|Notes]].";
        assert_eq!(
            extract_links(text),
            vec!["guide.md", "other.md", "Setup.md", "notes.txt"]
        );
    }

    #[test]
    fn test_document_title() {
        assert_eq!(document_title(Path::new("/d/a.md"), "intro\n# Deploy Guide\nbody"), "Deploy Guide");
        assert_eq!(document_title(Path::new("/d/notes.txt"), "plain text"), "notes");
    }

    #[tokio::test]
    async fn test_entry_file_follows_links_up_to_depth() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.md"), "# Home\nSee [install](install.md).").unwrap();
        fs::write(dir.path().join("install.md"), "# Install\nRun the installer, then read [[advanced]].").unwrap();
        fs::write(dir.path().join("advanced.md"), "# Advanced\nTuning options.").unwrap();
        fs::write(dir.path().join("unrelated.txt"), "Never linked.").unwrap();
        let entry = dir.path().join("index.md");

        assert_eq!(build(&section(&entry, 0, 0)).await.unwrap().documents(), 1);
        assert_eq!(build(&section(&entry, 1, 0)).await.unwrap().documents(), 2);
        assert_eq!(build(&section(&entry, 3, 0)).await.unwrap().documents(), 3);
    }

    #[tokio::test]
    async fn test_directory_walk_skips_hidden_and_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".cache")).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.md"), "# A\nalpha").unwrap();
        fs::write(dir.path().join("sub").join("b.txt"), "beta").unwrap();
        fs::write(dir.path().join("c.rs"), "fn main() {}").unwrap();
        fs::write(dir.path().join(".cache").join("d.md"), "hidden").unwrap();

        let corpus = build(&section(dir.path(), 3, 1)).await.unwrap();
        assert_eq!(corpus.documents(), 2);
        assert_eq!(corpus.len(), 2);
    }

    #[tokio::test]
    async fn test_query_expands_along_links() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("deploy.md"),
            "# Deploy\nDeployment uses the blue green strategy. See [rollback](rollback.md).",
        )
        .unwrap();
        fs::write(
            dir.path().join("rollback.md"),
            "# Rollback\nRevert by switching traffic back to the previous color.",
        )
        .unwrap();
        fs::write(dir.path().join("pasta.md"), "# Cooking\nBoil pasta for ten minutes.").unwrap();

        let linked = build(&section(dir.path(), 3, 1)).await.unwrap();
        let hits = linked
            .query("blue green deployment strategy", 1)
            .await
            .unwrap()
            .into_passages();
        let urls: Vec<_> = hits.iter().map(|p| p.source_url.clone()).collect();
        assert_eq!(
            urls,
            vec![url_of(dir.path(), "deploy.md"), url_of(dir.path(), "rollback.md")]
        );
        assert_eq!(hits[0].source_title, "Deploy");

        let flat = build(&section(dir.path(), 3, 0)).await.unwrap();
        let hits = flat.query("blue green deployment strategy", 1).await.unwrap();
        assert_eq!(hits.hits.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_paths_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = build(&section(&dir.path().join("missing"), 1, 1)).await;
        assert_eq!(missing.err().map(|e| e.kind()), Some("ConfigError"));

        let unset = build(&CorpusSection::default()).await;
        assert_eq!(unset.err().map(|e| e.kind()), Some("ConfigError"));

        fs::write(dir.path().join("code.rs"), "fn main() {}").unwrap();
        let unsupported = build(&section(&dir.path().join("code.rs"), 1, 1)).await;
        assert_eq!(unsupported.err().map(|e| e.kind()), Some("ConfigError"));

        let empty = build(&section(dir.path(), 1, 1)).await;
        assert_eq!(empty.err().map(|e| e.kind()), Some("ConfigError"));
    }
}
