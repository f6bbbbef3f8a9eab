//! Delve 命令行入口
//!
//! 读取问题（参数或标准输入），执行一次研究，输出答案与累计费用（或 JSON 结果）。

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use delve::{load_config, observability, AppConfig, ResearchAgent};

#[derive(Parser, Debug)]
#[command(name = "delve", version, about = "Iterative web research agent with cited answers")]
struct Cli {
    /// 研究问题；省略时从标准输入读取
    question: Option<String>,

    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 覆盖 [reasoner].max_iterations
    #[arg(short = 'n', long)]
    max_iterations: Option<usize>,

    /// 输出 debug 日志（包括提示词）
    #[arg(short, long)]
    verbose: bool,

    /// 以 JSON 输出完整结果
    #[arg(long)]
    json: bool,
}

fn read_question() -> anyhow::Result<String> {
    print!("Research question: ");
    io::stdout().flush().ok();
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read question from stdin")?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    observability::init(cli.verbose);

    let mut cfg = load_config(cli.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    if let Some(n) = cli.max_iterations {
        cfg.reasoner.max_iterations = n;
    }

    let question = match cli.question {
        Some(q) => q.trim().to_string(),
        None => read_question()?,
    };
    if question.is_empty() {
        anyhow::bail!("No research question given");
    }

    let agent = ResearchAgent::from_config(&cfg)
        .with_corpus_from_config(&cfg)
        .await;
    let outcome = agent.run(&question).await;

    if cli.json {
        let json = serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?;
        println!("{}", json);
    } else {
        println!("{}", outcome.final_answer);
        println!();
        println!("Accumulated cost: ${:.6}", outcome.accumulated_cost);
        if let Some(err) = &outcome.error {
            eprintln!("{}: {}", err.kind, err.message);
        }
    }
    Ok(())
}
