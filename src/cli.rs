use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use diagnosis_config::AppConfig;
use diagnosis_domain::{Job, JobRequest};
use tracing::{info, warn};

use crate::app::Application;

/// 品牌AI可见度诊断 - 命令行工具
#[derive(Parser, Debug)]
#[command(name = "diagnosis")]
#[command(version = "1.0.0")]
#[command(about = "品牌AI可见度诊断系统")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 运行一次诊断任务
    Run(RunArgs),
    /// 校验配置文件并打印解析后的模型提供方
    CheckConfig(CheckConfigArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<String>,

    /// 诊断的品牌，第一个为主品牌
    #[arg(short, long = "brand", required = true)]
    pub brands: Vec<String>,

    /// 使用的模型提供方ID
    #[arg(short, long = "model", required = true)]
    pub models: Vec<String>,

    /// 问题，可使用 {brand} 占位符
    #[arg(short, long = "question", required_unless_present = "questions_file")]
    pub questions: Vec<String>,

    /// 问题文件，每行一个问题，# 开头为注释
    #[arg(long)]
    pub questions_file: Option<PathBuf>,

    /// 报告输出文件，默认输出到标准输出
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// 报告归档目录
    #[arg(long)]
    pub report_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CheckConfigArgs {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<String>,
}

impl Cli {
    pub fn config_path(&self) -> Option<&str> {
        match &self.command {
            Commands::Run(args) => args.config.as_deref(),
            Commands::CheckConfig(args) => args.config.as_deref(),
        }
    }
}

impl RunArgs {
    pub fn job_request(&self) -> Result<JobRequest> {
        let mut questions = self.questions.clone();
        if let Some(path) = &self.questions_file {
            questions.extend(read_questions(path)?);
        }
        Ok(JobRequest::new(
            self.brands.clone(),
            self.models.clone(),
            questions,
        ))
    }
}

/// One question per line; blank lines and `#` comments are skipped.
pub fn read_questions(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取问题文件失败: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

pub async fn run(config: AppConfig, args: RunArgs) -> Result<()> {
    let request = args.job_request()?;
    let app = Application::new(config, args.report_dir.clone())?;

    let mut last_progress = None;
    let snapshot = app
        .run_job(request, |job: &Job| {
            if last_progress != Some((job.progress, job.status)) {
                last_progress = Some((job.progress, job.status));
                eprintln!(
                    "[{}] {}% ({}/{}) {}",
                    job.job_id, job.progress, job.settled_cells, job.total_cells, job.status
                );
            }
        })
        .await?;

    for stats in app.latency_stats() {
        info!(
            provider = %stats.provider_id,
            calls = stats.count,
            success_rate = stats.success_rate,
            p95_ms = stats.p95_ms,
            "模型提供方延迟统计"
        );
    }
    for warning in &snapshot.report.warnings {
        warn!("{warning}");
    }

    let json = serde_json::to_string_pretty(&snapshot).context("序列化诊断报告失败")?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("写入报告文件失败: {}", path.display()))?;
            info!(path = %path.display(), "诊断报告已写入");
        }
        None => println!("{json}"),
    }
    Ok(())
}

pub fn check_config(config: &AppConfig) -> Result<()> {
    println!("配置校验通过");
    println!(
        "调度: 并发 {}, 任务时限 {}s, 无进展时限 {}s, 熔断范围 {:?}",
        config.scheduler.concurrency,
        config.scheduler.job_timeout.as_secs(),
        config.scheduler.stall_timeout.as_secs(),
        config.scheduler.breaker_scope,
    );
    for profile in config.provider_profiles() {
        println!(
            "- {} ({}): 模型 {:?}, 超时 {}s, 最多尝试 {} 次, 熔断阈值 {}",
            profile.id,
            profile.display_name,
            profile.models,
            profile.call_timeout.as_secs(),
            profile.max_attempts(),
            profile.circuit_breaker.failure_threshold,
        );
        if profile.models.is_empty() {
            println!("  警告: 未配置任何模型，选择该提供方的任务会被拒绝");
        }
    }
    Ok(())
}
