// 配置加载器
// 处理配置文件加载和环境变量解析

use std::path::PathBuf;

use crate::config::AppConfig;
use config::ConfigError;
use dotenvy::dotenv;
use plugin_console_common::CommonError;
use tracing::{info, warn};

/// .env 文件加载情况
#[derive(Debug, Clone, PartialEq)]
pub enum DotenvStatus {
    Loaded(PathBuf),
    Missing(String),
}

impl DotenvStatus {
    pub fn from_result(result: Result<PathBuf, dotenvy::Error>) -> Self {
        match result {
            Ok(path) => Self::Loaded(path),
            Err(e) => Self::Missing(e.to_string()),
        }
    }
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 加载并验证配置，由进程入口持有返回值
    ///
    /// 此时日志系统尚未初始化，加载情况由 [`ConfigLoader::log_loaded`] 记录。
    pub fn init() -> Result<(AppConfig, DotenvStatus), CommonError> {
        let dotenv = DotenvStatus::from_result(dotenv());

        let config = AppConfig::load().map_err(convert_config_error)?;
        config.validate()?;

        Ok((config, dotenv))
    }

    /// 记录配置加载结果，需在日志系统初始化之后调用
    pub fn log_loaded(config: &AppConfig, dotenv: &DotenvStatus) {
        match dotenv {
            DotenvStatus::Loaded(path) => info!(path = %path.display(), "已加载 .env 文件"),
            DotenvStatus::Missing(reason) => warn!("无法加载 .env 文件: {}", reason),
        }

        info!(
            environment = %config.environment.name,
            version = %config.environment.version,
            config_path = %config.registry.config_path.display(),
            "配置加载成功"
        );
    }

    /// 打印配置摘要
    pub fn print_summary(config: &AppConfig) {
        println!("=== Plugin Console 配置摘要 ===");
        println!("环境: {}", config.environment.name);
        println!("版本: {}", config.environment.version);
        println!("插件配置: {}", config.registry.config_path.display());
        println!("最大并发执行: {}", config.registry.max_concurrent_runs);
        println!(
            "定时触发: {} (每 {} 秒检查, 每日 {})",
            if config.trigger.enabled { "启用" } else { "禁用" },
            config.trigger.tick_seconds,
            config.trigger.daily_at
        );
        println!("日志级别: {}", config.logging.level);
        println!("================================");
    }
}

/// 配置错误转换辅助函数
pub fn convert_config_error(err: ConfigError) -> CommonError {
    CommonError::configuration(format!("配置错误: {}", err))
}
