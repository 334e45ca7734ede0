// 配置系统测试

use crate::config::*;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_default_config() {
    let config = AppConfig::default();

    assert_eq!(config.registry.config_path, PathBuf::from("./config/plugin_config.json"));
    assert_eq!(config.registry.max_concurrent_runs, 4);
    assert!(config.registry.bootstrap_if_missing);
    assert_eq!(config.trigger.tick_seconds, 60);
    assert_eq!(config.trigger.daily_at, "02:00");
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_config_collects_all_errors() {
    let mut config = AppConfig::default();
    config.registry.max_concurrent_runs = 0;
    config.trigger.daily_at = "25:99".to_string();
    config.logging.format = "xml".to_string();

    let errors = ConfigValidator::validate_all(&config).unwrap_err();
    assert_eq!(errors.len(), 3);
    assert!(errors.iter().all(|e| e.is_validation()));

    let folded = config.validate().unwrap_err();
    assert_eq!(folded.code, "CONFIGURATION_ERROR");
    assert!(folded.message.contains("最大并发执行数"));
}

#[test]
fn test_parse_daily_at() {
    let time = ConfigValidator::parse_daily_at("02:00").unwrap();
    assert_eq!(time.to_string(), "02:00:00");
    assert!(ConfigValidator::parse_daily_at("2am").is_err());
}

#[test]
fn test_file_logging_requires_path() {
    let mut logging = AppConfig::default().logging;
    logging.file_enabled = true;
    assert!(ConfigValidator::validate_logging(&logging).is_err());

    logging.file_path = Some("./logs/plugin-console.log".to_string());
    assert!(ConfigValidator::validate_logging(&logging).is_ok());
}

#[test]
fn test_environment_methods() {
    let mut config = AppConfig::default();
    assert!(config.is_development());

    config.environment.name = "production".to_string();
    assert!(config.is_production());
    assert!(ConfigValidator::validate_environment(&config.environment).is_ok());

    config.environment.name = "staging".to_string();
    assert!(ConfigValidator::validate_environment(&config.environment).is_err());
}

#[test]
fn test_load_from_file_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(format!("{}.toml", APP_CONFIG_FILE)),
        r#"
[registry]
config_path = "/tmp/plugins.json"
max_concurrent_runs = 8

[trigger]
daily_at = "03:30"
"#,
    )
    .unwrap();

    let config = AppConfig::load_from(dir.path()).unwrap();
    assert_eq!(config.registry.config_path, PathBuf::from("/tmp/plugins.json"));
    assert_eq!(config.registry.max_concurrent_runs, 8);
    assert_eq!(config.trigger.daily_at, "03:30");
    // 未覆盖的字段保持默认值
    assert_eq!(config.trigger.tick_seconds, 60);
    assert_eq!(config.environment.version, env!("CARGO_PKG_VERSION"));
}

#[derive(Clone, Default)]
struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_dotenv_status_from_result() {
    let missing = DotenvStatus::from_result(Err(dotenvy::Error::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "no .env",
    ))));
    assert!(matches!(missing, DotenvStatus::Missing(ref reason) if reason.contains("no .env")));

    let loaded = DotenvStatus::from_result(Ok(PathBuf::from("/srv/console/.env")));
    assert_eq!(loaded, DotenvStatus::Loaded(PathBuf::from("/srv/console/.env")));
}

#[test]
fn test_log_loaded_reports_through_installed_subscriber() {
    let config = AppConfig::default();
    let status = DotenvStatus::Missing("no .env".to_string());

    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, || {
        ConfigLoader::log_loaded(&config, &status);
    });

    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("无法加载 .env 文件: no .env"));
    assert!(output.contains("配置加载成功"));
}
