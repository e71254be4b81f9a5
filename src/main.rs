//! # Electric Bot Cache 运维工具
//!
//! 连接机器人使用的缓存，查看统计、列出和删除键、清理过期分页。
//! 所有命令的结果以 JSON 输出到标准输出。

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use electric_bot_cache::{
    CacheError, Result,
    cache::{CacheFactory, CacheInspector},
    config::{self, AppConfig},
    lerror, linfo,
    logging::{self, LogComponent, LogStage},
};

#[derive(Parser)]
#[command(name = "electric-bot-cache")]
#[command(about = "Inspect and maintain the electric bot cache")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// 配置文件路径（默认读取 config/cache.{RUST_ENV}.toml）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 覆盖命名空间前缀
    #[arg(long)]
    prefix: Option<String>,

    /// 日志级别
    #[arg(long)]
    log_level: Option<String>,

    /// 打印日志配置说明后退出
    #[arg(long)]
    logging_help: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// 命中率、计数器和键数量
    Stats,

    /// 分批列出匹配模式的键
    Keys {
        /// 匹配模式，仅支持末尾 `*`
        #[arg(default_value = "*")]
        pattern: String,
        /// 起始游标
        #[arg(long, default_value_t = 0)]
        cursor: u64,
        /// 每批数量
        #[arg(long, default_value_t = 50)]
        count: usize,
    },

    /// 查看单个键
    Show { key: String },

    /// 删除单个键
    Delete { key: String },

    /// 按模式清理
    Clear { pattern: String },

    /// 清空整个命名空间
    Flush {
        /// 确认清空
        #[arg(long)]
        yes: bool,
    },

    /// 各键族的键数量
    Patterns {
        /// 列出的其他前缀数量
        #[arg(long, default_value_t = 10)]
        top: usize,
    },

    /// 清理即将过期的分页集合
    CleanupPagination,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if cli.logging_help {
        logging::print_logging_help();
        return;
    }

    if let Err(e) = run(cli).await {
        lerror!(
            "system",
            LogStage::Shutdown,
            LogComponent::Main,
            "command_failed",
            &format!("命令执行失败: {e}")
        );
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn load(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };
    if let Some(prefix) = &cli.prefix {
        config.cache.key_prefix.clone_from(prefix);
        config::validate_config(&config)?;
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = load(&cli)?;
    logging::init_logging(cli.log_level.as_deref().or(config.log_level.as_deref()));

    let Some(command) = cli.command else {
        return print_json(&config);
    };

    let manager = CacheFactory::create_initialized(&config.cache).await?;
    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Main,
        "cli_connected",
        "缓存已连接",
        backend = manager.backend_name(),
        prefix = manager.prefix()
    );

    let result = execute(command, &CacheInspector::new(manager.clone())).await;
    manager.close().await;
    result
}

async fn execute(command: Commands, inspector: &CacheInspector) -> Result<()> {
    let manager = inspector.manager();
    match command {
        Commands::Stats => {
            let stats = manager.get_stats().await;
            print_json(&serde_json::json!({
                "hit_rate": stats.hit_rate(),
                "stats": stats,
            }))
        }
        Commands::Keys {
            pattern,
            cursor,
            count,
        } => print_json(&inspector.list_keys(&pattern, cursor, count).await?),
        Commands::Show { key } => match inspector.key_detail(&key).await? {
            Some(detail) => print_json(&detail),
            None => Err(CacheError::invalid_argument(format!("键不存在: {key}"))),
        },
        Commands::Delete { key } => {
            let deleted = inspector.delete(&key).await;
            print_json(&serde_json::json!({ "key": key, "deleted": deleted }))
        }
        Commands::Clear { pattern } => {
            let deleted = inspector.clear_pattern(&pattern).await?;
            print_json(&serde_json::json!({ "pattern": pattern, "deleted": deleted }))
        }
        Commands::Flush { yes } => {
            let deleted = inspector.flush(yes).await?;
            print_json(&serde_json::json!({ "flushed": true, "deleted": deleted }))
        }
        Commands::Patterns { top } => print_json(&inspector.pattern_summary(top).await?),
        Commands::CleanupPagination => {
            let cleaned = manager.cleanup_expired_pagination().await;
            print_json(&serde_json::json!({ "cleaned": cleaned }))
        }
    }
}
