use anyhow::{Context, Result};
use brand_diagnosis::cli::{self, Cli, Commands};
use clap::Parser;
use diagnosis_config::AppConfig;
use diagnosis_infrastructure::init_observability;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置
    let config_path = cli.config_path().map(str::to_string);
    let config = AppConfig::load(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载默认配置失败".to_string(),
    })?;

    // 初始化日志和指标
    init_observability(&config.observability)?;
    info!(config = ?config_path, "启动品牌AI可见度诊断");

    match cli.command {
        Commands::Run(args) => cli::run(config, args).await,
        Commands::CheckConfig(_) => cli::check_config(&config),
    }
}
