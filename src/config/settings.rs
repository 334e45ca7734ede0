// 应用程序设置和配置
// 定义配置结构体和加载逻辑

use config::{Config, ConfigError, Environment, File};
use plugin_console_common::CommonError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 应用配置文件名（不含扩展名）
pub const APP_CONFIG_FILE: &str = "plugin-console";

/// 环境变量前缀
pub const ENV_PREFIX: &str = "PLUGIN_CONSOLE";

/// 应用程序配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub registry: RegistrySettings,
    pub trigger: TriggerSettings,
    pub logging: LoggingConfig,
    pub environment: EnvironmentConfig,
}

/// 插件注册表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// 插件配置文件路径
    pub config_path: PathBuf,
    /// 同时执行的插件上限（工作池大小）
    pub max_concurrent_runs: usize,
    /// 配置文件不存在时是否写入默认插件
    pub bootstrap_if_missing: bool,
}

/// 定时触发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSettings {
    pub enabled: bool,
    /// 检查间隔（秒）
    pub tick_seconds: u64,
    /// 每日任务执行时间 (HH:MM)
    pub daily_at: String,
    /// 启动时立即执行一次所有启用的插件
    pub run_on_start: bool,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file_enabled: bool,
    pub file_path: Option<String>,
}

/// 环境配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    pub version: String,
}

impl AppConfig {
    /// 从默认值、配置文件和环境变量加载配置
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new("."))
    }

    /// 以指定目录为工作目录加载配置
    pub fn load_from(dir: &Path) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // 1. 加载默认配置
        builder = builder.add_source(Config::try_from(&AppConfig::default())?);

        // 2. 尝试加载配置文件
        let file = dir.join(format!("{}.toml", APP_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        }

        // 3. 加载环境变量（优先级最高）
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        let mut app_config: AppConfig = builder.build()?.try_deserialize()?;
        app_config.environment.version = env!("CARGO_PKG_VERSION").to_string();

        Ok(app_config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), CommonError> {
        use crate::config::ConfigValidator;

        ConfigValidator::validate_all(self).map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.message.clone()).collect();
            CommonError::configuration(format!("配置验证失败: {}", messages.join("; ")))
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment.name == "development"
    }

    pub fn is_production(&self) -> bool {
        self.environment.name == "production"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            registry: RegistrySettings {
                config_path: PathBuf::from("./config/plugin_config.json"),
                max_concurrent_runs: 4,
                bootstrap_if_missing: true,
            },
            trigger: TriggerSettings {
                enabled: true,
                tick_seconds: 60,
                daily_at: "02:00".to_string(),
                run_on_start: true,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "full".to_string(),
                file_enabled: false,
                file_path: None,
            },
            environment: EnvironmentConfig {
                name: "development".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}
