//! 日志初始化
//!
//! 标准输出始终开启；配置了 `logging.dir` 时另写一份 `panel.log`（不滚动）。
//! 设置了 `RUST_LOG` 时以它为准。

use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// 日志文件名
pub const LOG_FILE_NAME: &str = "panel.log";

/// 第三方库默认压低到 warn
const QUIET_TARGETS: &[&str] = &["russh", "russh_keys", "hyper", "tungstenite"];

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("创建日志目录失败 {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("初始化日志失败: {0}")]
    Init(String),
}

/// 没有 `RUST_LOG` 时使用的过滤指令
pub fn default_directives(level: &str) -> String {
    let mut directives = vec![level.to_string()];
    directives.extend(QUIET_TARGETS.iter().map(|target| format!("{}=warn", target)));
    directives.join(",")
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// 初始化全局日志；返回的 guard 必须保留到进程退出
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>, LoggerError> {
    let filter = build_filter(&config.level);
    let stdout_layer = fmt::layer().with_target(false);

    match &config.dir {
        Some(dir) => {
            let path = PathBuf::from(dir);
            std::fs::create_dir_all(&path).map_err(|source| LoggerError::CreateDir {
                path: path.clone(),
                source,
            })?;
            let appender = tracing_appender::rolling::never(&path, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_ansi(false).with_writer(writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| LoggerError::Init(e.to_string()))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .try_init()
                .map_err(|e| LoggerError::Init(e.to_string()))?;
            Ok(None)
        }
    }
}
