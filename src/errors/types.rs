// 统一错误类型定义

use plugin_console_common::CommonError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 插件控制台统一错误类型
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "error_type", content = "details")]
pub enum ConsoleError {
    /// 资源未找到
    #[error("资源未找到: {resource}")]
    NotFound { resource: String },

    /// 资源冲突
    #[error("资源冲突: {message}")]
    Conflict { message: String },

    /// 插件已禁用，跳过执行
    #[error("插件 {plugin} 未启用，跳过执行")]
    Disabled { plugin: String },

    /// 插件正在运行
    #[error("插件 {plugin} 正在运行")]
    AlreadyRunning { plugin: String },

    /// 无法定位处理函数
    #[error("无法解析处理函数 {module}::{entry_point}: {message}")]
    Resolution {
        module: String,
        entry_point: String,
        message: String,
    },

    /// 单次执行超时
    #[error("插件 {plugin} 执行超时 ({seconds} 秒)")]
    Timeout { plugin: String, seconds: u64 },

    /// 处理函数返回错误或崩溃
    #[error("插件 {plugin} 执行出错: {message}")]
    Handler { plugin: String, message: String },

    /// 重试耗尽后的最终失败
    #[error("插件 {plugin} 在 {attempts} 次尝试后执行失败: {last_error}")]
    ExecutionFailed {
        plugin: String,
        attempts: u32,
        #[source]
        last_error: Box<ConsoleError>,
    },

    /// 持久化配置无法读取
    #[error("插件配置格式错误: {message}")]
    MalformedConfig {
        message: String,
        entry: Option<String>,
    },

    /// 配置写入失败
    #[error("插件配置保存失败: {message}")]
    Persistence { message: String },

    /// 验证错误
    #[error("验证错误: {field} - {message}")]
    Validation { field: String, message: String },

    /// 应用配置错误
    #[error("配置错误: {message}")]
    Configuration { message: String },

    /// 内部错误
    #[error("内部错误: {message}")]
    Internal { message: String },
}

impl ConsoleError {
    /// 获取错误代码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::Disabled { .. } => "PLUGIN_DISABLED",
            Self::AlreadyRunning { .. } => "ALREADY_RUNNING",
            Self::Resolution { .. } => "RESOLUTION_ERROR",
            Self::Timeout { .. } => "TIMEOUT_ERROR",
            Self::Handler { .. } => "HANDLER_ERROR",
            Self::ExecutionFailed { .. } => "EXECUTION_FAILED",
            Self::MalformedConfig { .. } => "MALFORMED_CONFIG",
            Self::Persistence { .. } => "PERSISTENCE_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// 获取 HTTP 状态码，供外部 HTTP 层映射
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::AlreadyRunning { .. } => 409,
            Self::Disabled { .. } => 400,
            Self::Validation { .. } => 400,
            Self::MalformedConfig { .. } => 400,
            Self::Timeout { .. } => 504,
            Self::ExecutionFailed { .. } => 502,
            Self::Handler { .. } => 502,
            Self::Resolution { .. } => 500,
            Self::Persistence { .. } => 500,
            Self::Configuration { .. } => 500,
            Self::Internal { .. } => 500,
        }
    }

    /// 是否允许重试（仅超时和处理函数错误）
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Handler { .. })
    }

    /// 是否为"跳过"而非失败
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Disabled { .. })
    }

    /// 是否为客户端错误
    pub fn is_client_error(&self) -> bool {
        matches!(self.status_code(), 400..=499)
    }

    /// 是否应该记录错误日志
    pub fn should_log(&self) -> bool {
        !matches!(
            self,
            Self::NotFound { .. } | Self::Disabled { .. } | Self::Validation { .. } | Self::AlreadyRunning { .. }
        )
    }

    /// 创建资源未找到错误
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// 插件不存在
    pub fn plugin_not_found(name: &str) -> Self {
        Self::not_found(format!("插件 {}", name))
    }

    /// 创建冲突错误
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn disabled(plugin: impl Into<String>) -> Self {
        Self::Disabled {
            plugin: plugin.into(),
        }
    }

    pub fn already_running(plugin: impl Into<String>) -> Self {
        Self::AlreadyRunning {
            plugin: plugin.into(),
        }
    }

    /// 创建解析错误
    pub fn resolution(
        module: impl Into<String>,
        entry_point: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Resolution {
            module: module.into(),
            entry_point: entry_point.into(),
            message: message.into(),
        }
    }

    /// 创建超时错误
    pub fn timeout(plugin: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            plugin: plugin.into(),
            seconds,
        }
    }

    pub fn handler(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// 创建重试耗尽错误
    pub fn execution_failed(plugin: impl Into<String>, attempts: u32, last_error: ConsoleError) -> Self {
        Self::ExecutionFailed {
            plugin: plugin.into(),
            attempts,
            last_error: Box::new(last_error),
        }
    }

    /// 创建配置格式错误
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedConfig {
            message: message.into(),
            entry: None,
        }
    }

    /// 创建配置格式错误（带条目名称）
    pub fn malformed_entry(entry: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedConfig {
            message: message.into(),
            entry: Some(entry.into()),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// 创建验证错误
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建配置错误
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// 从 CommonError 转换
impl From<CommonError> for ConsoleError {
    fn from(err: CommonError) -> Self {
        if err.is_validation() {
            Self::validation("general", err.message)
        } else if err.code == "CONFIGURATION_ERROR" {
            Self::configuration(err.message)
        } else {
            Self::internal(err.to_string())
        }
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for ConsoleError {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(format!("配置加载错误: {}", err))
    }
}

/// 从 std::io::Error 转换
impl From<std::io::Error> for ConsoleError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found("文件或目录"),
            _ => Self::persistence(format!("IO 错误: {}", err)),
        }
    }
}

/// 从 serde_json::Error 转换
impl From<serde_json::Error> for ConsoleError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(format!("JSON 解析错误: {}", err))
    }
}
