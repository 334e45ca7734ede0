// 插件配置存储
// 读写插件配置 JSON 文档，兼容旧版字段名

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::errors::{ConsoleError, ConsoleResult};
use crate::plugins::plugin_interface::{
    default_description, normalize_schedule, Parameters, PluginDescriptor, DEFAULT_MAX_RETRIES,
    DEFAULT_TIMEOUT_SECONDS,
};

/// 插件配置集合，按名称排序
pub type PluginMap = BTreeMap<String, PluginDescriptor>;

/// 默认插件（名称、描述）
const SEED_PLUGINS: [(&str, &str); 7] = [
    ("fofa", "FOFA数据抓取插件"),
    ("gitforks", "GitHub Forks抓取插件"),
    ("purefast", "PureFast机场订阅插件"),
    ("tempairport", "临时机场订阅插件"),
    ("v2rayfree", "V2Ray免费节点抓取插件"),
    ("v2rayse", "V2RaySE节点抓取插件"),
    ("scaner", "网络扫描插件"),
];

/// 默认插件的模块前缀
pub const SEED_MODULE_PREFIX: &str = "subscribe.scripts";

/// 字段名（规范名, 旧别名）
const ENABLED_KEYS: (&str, &str) = ("enabled", "enable");
const SCHEDULE_KEYS: (&str, &str) = ("cron_schedule", "schedule");

/// 加载结果
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub plugins: PluginMap,
    /// 被跳过的条目及原因
    pub skipped: Vec<(String, ConsoleError)>,
}

/// 插件配置存储
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// 加载插件配置
    pub fn load(&self) -> ConsoleResult<PluginMap> {
        self.load_with_report().map(|report| report.plugins)
    }

    /// 加载插件配置并返回被跳过的条目
    pub fn load_with_report(&self) -> ConsoleResult<LoadReport> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ConsoleError::not_found(format!("插件配置文件 {}", self.path.display()))
            }
            _ => ConsoleError::persistence(format!(
                "无法读取插件配置文件 {}: {}",
                self.path.display(),
                e
            )),
        })?;

        let report = parse_document(&text)?;
        info!(
            path = %self.path.display(),
            loaded = report.plugins.len(),
            skipped = report.skipped.len(),
            "插件配置加载完成"
        );
        Ok(report)
    }

    /// 原子写入插件配置（先写临时文件再替换）
    pub fn save(&self, plugins: &PluginMap) -> ConsoleResult<()> {
        let content = serde_json::to_string_pretty(&render_document(plugins))
            .map_err(|e| ConsoleError::persistence(format!("序列化插件配置失败: {}", e)))?;

        let directory = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(directory).map_err(|e| {
            ConsoleError::persistence(format!("无法创建目录 {}: {}", directory.display(), e))
        })?;

        let mut temp = NamedTempFile::new_in(directory)
            .map_err(|e| ConsoleError::persistence(format!("无法创建临时文件: {}", e)))?;
        temp.write_all(content.as_bytes())
            .and_then(|_| temp.write_all(b"\n"))
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| ConsoleError::persistence(format!("写入临时文件失败: {}", e)))?;
        temp.persist(&self.path).map_err(|e| {
            ConsoleError::persistence(format!(
                "无法替换插件配置文件 {}: {}",
                self.path.display(),
                e.error
            ))
        })?;

        info!(path = %self.path.display(), plugins = plugins.len(), "插件配置已保存");
        Ok(())
    }

    /// 默认插件集合
    pub fn bootstrap_defaults() -> PluginMap {
        SEED_PLUGINS
            .iter()
            .map(|(name, description)| {
                let descriptor =
                    PluginDescriptor::new(*name, format!("{}.{}", SEED_MODULE_PREFIX, name))
                        .with_description(*description);
                (name.to_string(), descriptor)
            })
            .collect()
    }

    /// 加载插件配置，文件不存在时写入默认插件
    pub fn load_or_bootstrap(&self) -> ConsoleResult<PluginMap> {
        match self.load() {
            Err(ConsoleError::NotFound { .. }) => {
                let defaults = Self::bootstrap_defaults();
                self.save(&defaults)?;
                info!(
                    path = %self.path.display(),
                    plugins = defaults.len(),
                    "插件配置文件不存在，已写入默认配置"
                );
                Ok(defaults)
            }
            other => other,
        }
    }
}

/// 解析完整配置文档
pub fn parse_document(text: &str) -> ConsoleResult<LoadReport> {
    let document: Value = serde_json::from_str(text)?;
    parse_document_value(&document)
}

/// 解析已反序列化的配置文档
pub fn parse_document_value(document: &Value) -> ConsoleResult<LoadReport> {
    let root = document
        .as_object()
        .ok_or_else(|| ConsoleError::malformed("配置文档必须是 JSON 对象"))?;

    let mut report = LoadReport::default();
    let entries = match root.get("plugins") {
        Some(Value::Object(entries)) => entries,
        Some(_) => return Err(ConsoleError::malformed("plugins 字段必须是对象")),
        None => {
            warn!("配置文档缺少 plugins 字段，视为空配置");
            return Ok(report);
        }
    };

    for (name, entry) in entries {
        match descriptor_from_entry(name, entry) {
            Ok(descriptor) => {
                report.plugins.insert(name.clone(), descriptor);
            }
            Err(e) => {
                warn!(plugin = %name, error = %e, "跳过格式错误的插件配置");
                report.skipped.push((name.clone(), e));
            }
        }
    }

    Ok(report)
}

/// 从持久化条目构建插件描述
///
/// 规范字段名优先，缺失时使用旧别名。
pub fn descriptor_from_entry(name: &str, entry: &Value) -> ConsoleResult<PluginDescriptor> {
    let fields = entry
        .as_object()
        .ok_or_else(|| ConsoleError::malformed_entry(name, "插件配置必须是对象"))?;

    if name.trim().is_empty() {
        return Err(ConsoleError::malformed_entry(name, "插件名称不能为空"));
    }

    let module_reference = required_string(name, fields, "module_path")?;
    let entry_point = required_string(name, fields, "function_name")?;

    let enabled = match pick(fields, ENABLED_KEYS) {
        None => true,
        Some(Value::Bool(flag)) => *flag,
        Some(_) => return Err(ConsoleError::malformed_entry(name, "enabled 必须是布尔值")),
    };

    let schedule = match pick(fields, SCHEDULE_KEYS) {
        None => None,
        Some(Value::String(expr)) => normalize_schedule(Some(expr.clone())),
        Some(_) => return Err(ConsoleError::malformed_entry(name, "cron_schedule 必须是字符串")),
    };

    let parameters = match present(fields, "parameters") {
        None => Parameters::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(ConsoleError::malformed_entry(name, "parameters 必须是对象")),
    };

    let timeout_seconds = match present(fields, "timeout") {
        None => DEFAULT_TIMEOUT_SECONDS,
        Some(value) => match value.as_u64() {
            Some(seconds) if seconds >= 1 => seconds,
            _ => return Err(ConsoleError::malformed_entry(name, "timeout 必须是不小于 1 的整数")),
        },
    };

    let max_retries = match present(fields, "max_retries") {
        None => DEFAULT_MAX_RETRIES,
        Some(value) => value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| ConsoleError::malformed_entry(name, "max_retries 必须是非负整数"))?,
    };

    let description = match present(fields, "description") {
        Some(Value::String(text)) => text.clone(),
        _ => default_description(name),
    };

    Ok(PluginDescriptor {
        name: name.to_string(),
        module_reference,
        entry_point,
        enabled,
        schedule,
        parameters,
        timeout_seconds,
        max_retries,
        description,
    })
}

/// 渲染为规范格式的条目（不输出别名字段）
pub fn descriptor_to_entry(descriptor: &PluginDescriptor) -> Value {
    json!({
        "module_path": descriptor.module_reference,
        "function_name": descriptor.entry_point,
        "enabled": descriptor.enabled,
        "cron_schedule": descriptor.schedule.clone().unwrap_or_default(),
        "parameters": descriptor.parameters,
        "timeout": descriptor.timeout_seconds,
        "max_retries": descriptor.max_retries,
        "description": descriptor.description,
    })
}

/// 渲染完整配置文档
pub fn render_document(plugins: &PluginMap) -> Value {
    let entries: Map<String, Value> = plugins
        .iter()
        .map(|(name, descriptor)| (name.clone(), descriptor_to_entry(descriptor)))
        .collect();
    json!({ "plugins": entries })
}

fn present<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    fields.get(key).filter(|v| !v.is_null())
}

fn pick<'a>(fields: &'a Map<String, Value>, (canonical, alias): (&str, &str)) -> Option<&'a Value> {
    present(fields, canonical).or_else(|| present(fields, alias))
}

fn required_string(name: &str, fields: &Map<String, Value>, key: &str) -> ConsoleResult<String> {
    match present(fields, key) {
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(text.clone()),
        Some(Value::String(_)) => Err(ConsoleError::malformed_entry(name, format!("{} 不能为空", key))),
        Some(_) => Err(ConsoleError::malformed_entry(name, format!("{} 必须是字符串", key))),
        None => Err(ConsoleError::malformed_entry(name, format!("缺少必需字段 {}", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_plugins() -> PluginMap {
        let mut parameters = Parameters::new();
        parameters.insert("query".to_string(), json!("port=443"));
        parameters.insert("pages".to_string(), json!(2));

        let fofa = PluginDescriptor::new("fofa", "scripts.fofa")
            .with_schedule("day")
            .with_parameters(parameters)
            .with_timeout(5)
            .with_max_retries(1);
        let scaner = PluginDescriptor::new("scaner", "scripts.scaner").with_enabled(false);

        [fofa, scaner]
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect()
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("config").join("plugin_config.json"));
        let plugins = sample_plugins();

        store.save(&plugins).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, plugins);

        // 再次保存的内容完全一致
        let first = std::fs::read_to_string(store.path()).unwrap();
        store.save(&loaded).unwrap();
        let second = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_save_emits_canonical_keys_only() {
        let document = render_document(&sample_plugins());
        let fofa = document["plugins"]["fofa"].as_object().unwrap();

        assert!(fofa.contains_key("enabled"));
        assert!(fofa.contains_key("cron_schedule"));
        assert!(!fofa.contains_key("enable"));
        assert!(!fofa.contains_key("schedule"));
        assert_eq!(document["plugins"]["scaner"]["cron_schedule"], json!(""));
    }

    #[test]
    fn test_legacy_aliases_are_normalized() {
        let text = r#"{"plugins": {
            "legacy": {"module_path": "scripts.legacy", "function_name": "main",
                       "enable": false, "schedule": "hour"},
            "mixed": {"module_path": "scripts.mixed", "function_name": "run",
                      "enabled": true, "enable": false,
                      "cron_schedule": "day", "schedule": "hour"}
        }}"#;

        let report = parse_document(text).unwrap();
        let legacy = &report.plugins["legacy"];
        assert!(!legacy.enabled);
        assert_eq!(legacy.schedule.as_deref(), Some("hour"));
        assert_eq!(legacy.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(legacy.description, "legacy 插件");

        // 规范字段优先
        let mixed = &report.plugins["mixed"];
        assert!(mixed.enabled);
        assert_eq!(mixed.schedule.as_deref(), Some("day"));
        assert_eq!(mixed.entry_point, "run");
    }

    #[test]
    fn test_malformed_entry_is_skipped() {
        let text = r#"{"plugins": {
            "broken": {"function_name": "main", "enabled": true},
            "valid": {"module_path": "scripts.valid", "function_name": "main"}
        }}"#;

        let report = parse_document(text).unwrap();
        assert_eq!(report.plugins.len(), 1);
        assert!(report.plugins.contains_key("valid"));
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "broken");
        assert_eq!(report.skipped[0].1.error_code(), "MALFORMED_CONFIG");
    }

    #[test]
    fn test_mistyped_fields_are_rejected() {
        let cases = [
            json!({"module_path": "m", "function_name": "main", "enabled": "yes"}),
            json!({"module_path": "m", "function_name": "main", "timeout": 0}),
            json!({"module_path": "m", "function_name": "main", "max_retries": -1}),
            json!({"module_path": "m", "function_name": "main", "parameters": []}),
            json!({"module_path": "", "function_name": "main"}),
            json!("not an object"),
        ];

        for entry in cases {
            assert!(descriptor_from_entry("p", &entry).is_err(), "{} 应该被拒绝", entry);
        }
    }

    #[test]
    fn test_invalid_document_is_malformed() {
        assert!(matches!(
            parse_document("{ not json"),
            Err(ConsoleError::MalformedConfig { .. })
        ));
        assert!(matches!(
            parse_document(r#"{"plugins": []}"#),
            Err(ConsoleError::MalformedConfig { .. })
        ));
        assert!(parse_document("{}").unwrap().plugins.is_empty());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("absent.json"));
        assert!(matches!(store.load(), Err(ConsoleError::NotFound { .. })));
    }

    #[test]
    fn test_bootstrap_persists_defaults() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("plugin_config.json"));

        let plugins = store.load_or_bootstrap().unwrap();
        assert_eq!(plugins.len(), 7);
        assert!(store.exists());

        let fofa = &plugins["fofa"];
        assert_eq!(fofa.module_reference, "subscribe.scripts.fofa");
        assert_eq!(fofa.entry_point, crate::plugins::DEFAULT_ENTRY_POINT);
        assert_eq!(fofa.description, "FOFA数据抓取插件");
        assert!(plugins.values().all(|p| p.enabled && p.parameters.is_empty()));

        // 之后的加载结果稳定
        assert_eq!(store.load().unwrap(), plugins);
    }
}
