// 配置验证器
// 提供详细的配置验证逻辑

use crate::config::{AppConfig, EnvironmentConfig, LoggingConfig, RegistrySettings, TriggerSettings};
use chrono::NaiveTime;
use plugin_console_common::CommonError;

/// 支持的日志格式
const LOG_FORMATS: [&str; 4] = ["json", "pretty", "compact", "full"];

/// 支持的日志级别
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// 配置验证器
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证完整配置，返回所有错误
    pub fn validate_all(config: &AppConfig) -> Result<(), Vec<CommonError>> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_registry(&config.registry) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_trigger(&config.trigger) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_logging(&config.logging) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_environment(&config.environment) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// 验证注册表配置
    pub fn validate_registry(config: &RegistrySettings) -> Result<(), CommonError> {
        if config.config_path.as_os_str().is_empty() {
            return Err(CommonError::validation("插件配置文件路径不能为空"));
        }

        if config.max_concurrent_runs == 0 {
            return Err(CommonError::validation("最大并发执行数不能为 0"));
        }

        if config.max_concurrent_runs > 256 {
            return Err(CommonError::validation("最大并发执行数不建议超过 256"));
        }

        Ok(())
    }

    /// 验证定时触发配置
    pub fn validate_trigger(config: &TriggerSettings) -> Result<(), CommonError> {
        if config.tick_seconds == 0 {
            return Err(CommonError::validation("定时检查间隔不能为 0"));
        }

        Self::parse_daily_at(&config.daily_at)?;

        Ok(())
    }

    /// 解析每日执行时间
    pub fn parse_daily_at(value: &str) -> Result<NaiveTime, CommonError> {
        NaiveTime::parse_from_str(value.trim(), "%H:%M")
            .map_err(|_| CommonError::validation(format!("每日执行时间格式无效: {}", value)))
    }

    /// 验证日志配置
    pub fn validate_logging(config: &LoggingConfig) -> Result<(), CommonError> {
        if !LOG_LEVELS.contains(&config.level.to_lowercase().as_str()) {
            return Err(CommonError::validation(format!("无效的日志级别: {}", config.level)));
        }

        if !LOG_FORMATS.contains(&config.format.as_str()) {
            return Err(CommonError::validation(format!("无效的日志格式: {}", config.format)));
        }

        if config.file_enabled && config.file_path.as_deref().map_or(true, str::is_empty) {
            return Err(CommonError::validation("启用文件日志时必须指定日志文件路径"));
        }

        Ok(())
    }

    /// 验证环境配置
    pub fn validate_environment(config: &EnvironmentConfig) -> Result<(), CommonError> {
        match config.name.as_str() {
            "development" | "production" | "test" => Ok(()),
            other => Err(CommonError::validation(format!("未知的运行环境: {}", other))),
        }
    }
}
