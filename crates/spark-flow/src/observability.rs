//! # 日志安装入口
//!
//! ## 核心意图（Why）
//! - 执行核心只通过 `tracing` 宏记录事件，是否输出、输出到哪里由宿主决定；
//! - 对于没有自建订阅者的宿主（命令行工具、集成测试），提供一次性安装 `fmt` 订阅者的入口。
//!
//! ## 行为契约（What）
//! - 过滤规则取自 `RUST_LOG`，缺省为 `info`；
//! - 重复调用返回 [`InstallError::AlreadyInstalled`]；外部已设置全局订阅者时返回
//!   [`InstallError::SubscriberAlreadySet`]。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 缺省过滤规则。
pub const DEFAULT_FILTER: &str = "info";

/// 安装日志订阅者的失败路径。
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("spark-flow logging is already installed")]
    AlreadyInstalled,
    #[error("a global tracing subscriber has already been set")]
    SubscriberAlreadySet,
    #[error("failed to install the global tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// 安装全局 `fmt` 订阅者。
pub fn install() -> Result<(), InstallError> {
    if INSTALLED.get().is_some() {
        return Err(InstallError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(InstallError::SubscriberAlreadySet);
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    INSTALLED
        .set(())
        .map_err(|_| InstallError::AlreadyInstalled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_rejected() {
        // 同一进程内其他测试可能先装好了全局订阅者。
        let first = install();
        assert!(matches!(first, Ok(()) | Err(InstallError::SubscriberAlreadySet)));
        assert!(matches!(
            install(),
            Err(InstallError::AlreadyInstalled | InstallError::SubscriberAlreadySet)
        ));
    }
}
