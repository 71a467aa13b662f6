//! gegecp 面板后端入口

use std::path::PathBuf;

use clap::Parser;
use gegecp_lib::config::DEFAULT_CONFIG_PATH;

/// Linux 管理面板后端
#[derive(Parser, Debug)]
#[command(name = "gegecp", version, about)]
struct Args {
    /// 配置文件路径
    #[arg(short, long, env = "GEGECP_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    gegecp_lib::app::run(&args.config).await
}
