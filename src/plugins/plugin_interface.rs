// 插件接口规范
// 定义插件描述、处理函数接口和运行状态视图

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ConsoleError, ConsoleResult};

/// 传给处理函数的参数
pub type Parameters = serde_json::Map<String, Value>;

/// 默认入口函数名
pub const DEFAULT_ENTRY_POINT: &str = "main";

/// 默认单次执行超时（秒）
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// 默认重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 插件处理函数
///
/// 处理函数对引擎来说是不透明的：接收参数，返回结果或错误。
#[async_trait]
pub trait PluginHandler: Send + Sync {
    async fn call(&self, parameters: Parameters) -> anyhow::Result<Value>;
}

/// 闭包形式的处理函数
pub struct FnHandler<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> PluginHandler for FnHandler<F>
where
    F: Fn(Parameters) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn call(&self, parameters: Parameters) -> anyhow::Result<Value> {
        (self.func)(parameters).await
    }
}

/// 将异步闭包包装为处理函数
pub fn handler_fn<F, Fut>(func: F) -> Arc<dyn PluginHandler>
where
    F: Fn(Parameters) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler { func })
}

/// 插件描述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginDescriptor {
    /// 插件名称（唯一）
    pub name: String,
    /// 处理函数所在模块
    pub module_reference: String,
    /// 模块内的入口函数
    pub entry_point: String,
    /// 是否启用
    pub enabled: bool,
    /// 调度表达式，仅由定时触发器解释
    pub schedule: Option<String>,
    /// 原样传给处理函数的参数
    pub parameters: Parameters,
    /// 单次执行超时（秒）
    pub timeout_seconds: u64,
    /// 失败后的额外重试次数
    pub max_retries: u32,
    /// 描述
    pub description: String,
}

impl PluginDescriptor {
    /// 以默认策略创建启用的插件
    pub fn new(name: impl Into<String>, module_reference: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: default_description(&name),
            name,
            module_reference: module_reference.into(),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            enabled: true,
            schedule: None,
            parameters: Parameters::new(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = normalize_schedule(Some(schedule.into()));
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 去除名称两端空白，空白调度表达式视为未设置
    pub fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.schedule = normalize_schedule(self.schedule);
        self
    }

    /// 最多尝试次数（首次执行 + 重试）
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// 验证描述字段
    pub fn validate(&self) -> ConsoleResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConsoleError::validation("name", "插件名称不能为空"));
        }

        if self.module_reference.trim().is_empty() {
            return Err(ConsoleError::validation("module_path", "模块路径不能为空"));
        }

        if self.entry_point.trim().is_empty() {
            return Err(ConsoleError::validation("function_name", "入口函数不能为空"));
        }

        if self.timeout_seconds == 0 {
            return Err(ConsoleError::validation("timeout", "超时时间必须大于 0"));
        }

        Ok(())
    }
}

/// 默认描述
pub fn default_description(name: &str) -> String {
    format!("{} 插件", name)
}

/// 空白调度表达式视为未设置
pub fn normalize_schedule(schedule: Option<String>) -> Option<String> {
    schedule.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// 更新内容中的字段名与旧别名，前者优先
const PATCH_KEYS: [(&str, &str); 5] = [
    ("module_path", "module_reference"),
    ("function_name", "entry_point"),
    ("enabled", "enable"),
    ("cron_schedule", "schedule"),
    ("timeout", "timeout_seconds"),
];

/// 插件部分更新
///
/// 只有出现的字段会被合并，使用持久化格式中的字段名。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PluginPatch {
    #[serde(rename = "module_path")]
    pub module_reference: Option<String>,
    #[serde(rename = "function_name")]
    pub entry_point: Option<String>,
    pub enabled: Option<bool>,
    /// 空字符串表示清除调度
    #[serde(rename = "cron_schedule")]
    pub schedule: Option<String>,
    pub parameters: Option<Parameters>,
    #[serde(rename = "timeout")]
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub description: Option<String>,
}

impl PluginPatch {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    /// 从 JSON 对象解析，同时出现字段名和别名时以字段名为准
    pub fn from_json(value: Value) -> ConsoleResult<Self> {
        let Value::Object(mut fields) = value else {
            return Err(ConsoleError::validation("patch", "更新内容必须是 JSON 对象"));
        };

        for (canonical, alias) in PATCH_KEYS {
            let fallback = fields.remove(alias);
            if fields.get(canonical).is_none_or(Value::is_null) {
                if let Some(value) = fallback {
                    fields.insert(canonical.to_string(), value);
                }
            }
        }

        serde_json::from_value(Value::Object(fields))
            .map_err(|e| ConsoleError::validation("patch", format!("无效的更新内容: {}", e)))
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// 合并到现有描述
    pub fn apply_to(&self, descriptor: &mut PluginDescriptor) {
        if let Some(ref module) = self.module_reference {
            descriptor.module_reference = module.clone();
        }
        if let Some(ref entry) = self.entry_point {
            descriptor.entry_point = entry.clone();
        }
        if let Some(enabled) = self.enabled {
            descriptor.enabled = enabled;
        }
        if let Some(ref schedule) = self.schedule {
            descriptor.schedule = normalize_schedule(Some(schedule.clone()));
        }
        if let Some(ref parameters) = self.parameters {
            descriptor.parameters = parameters.clone();
        }
        if let Some(timeout) = self.timeout_seconds {
            descriptor.timeout_seconds = timeout;
        }
        if let Some(retries) = self.max_retries {
            descriptor.max_retries = retries;
        }
        if let Some(ref description) = self.description {
            descriptor.description = description.clone();
        }
    }
}

/// 单次运行的最终结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunResult {
    Success { output: Value },
    Failed { error: ConsoleError },
}

impl RunResult {
    pub fn from_outcome(outcome: &ConsoleResult<Value>) -> Self {
        match outcome {
            Ok(output) => Self::Success {
                output: output.clone(),
            },
            Err(error) => Self::Failed {
                error: error.clone(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// 执行记录（仅保存在内存中）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_result: Option<RunResult>,
}

/// 插件运行状态视图
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginStatusView {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub running: bool,
    pub schedule: Option<String>,
    pub parameters: Parameters,
    pub module_path: String,
    pub function_name: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_result: Option<RunResult>,
}

impl PluginStatusView {
    pub fn compose(
        descriptor: &PluginDescriptor,
        running: bool,
        record: Option<&ExecutionRecord>,
    ) -> Self {
        Self {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            enabled: descriptor.enabled,
            running,
            schedule: descriptor.schedule.clone(),
            parameters: descriptor.parameters.clone(),
            module_path: descriptor.module_reference.clone(),
            function_name: descriptor.entry_point.clone(),
            last_run_at: record.and_then(|r| r.last_run_at),
            last_result: record.and_then(|r| r.last_result.clone()),
        }
    }
}

/// 系统状态摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub total_plugins: usize,
    pub active_plugins: usize,
    pub running_tasks: usize,
    pub plugins: Vec<PluginStatusView>,
}

/// 变更类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Enabled,
    Disabled,
    Updated,
    Added,
    Removed,
    Synced,
    Replaced,
}

/// 变更观察者，用于失效下游响应缓存
pub trait MutationObserver: Send + Sync {
    fn on_mutation(&self, plugin: &str, kind: MutationKind);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_defaults() {
        let descriptor = PluginDescriptor::new("fofa", "subscribe.scripts.fofa");

        assert_eq!(descriptor.entry_point, "main");
        assert!(descriptor.enabled);
        assert_eq!(descriptor.timeout_seconds, 300);
        assert_eq!(descriptor.max_retries, 3);
        assert_eq!(descriptor.max_attempts(), 4);
        assert_eq!(descriptor.description, "fofa 插件");
        assert!(descriptor.parameters.is_empty());
        assert!(descriptor.validate().is_ok());
    }

    #[test]
    fn test_descriptor_validation() {
        let zero_timeout = PluginDescriptor::new("fofa", "scripts.fofa").with_timeout(0);
        assert!(matches!(
            zero_timeout.validate(),
            Err(ConsoleError::Validation { ref field, .. }) if field == "timeout"
        ));

        let empty_entry = PluginDescriptor::new("fofa", "scripts.fofa").with_entry_point(" ");
        assert!(empty_entry.validate().is_err());

        assert!(PluginDescriptor::new("", "scripts.fofa").validate().is_err());
    }

    #[test]
    fn test_blank_schedule_is_none() {
        let descriptor = PluginDescriptor::new("fofa", "scripts.fofa").with_schedule("   ");
        assert_eq!(descriptor.schedule, None);

        let descriptor = descriptor.with_schedule(" day ");
        assert_eq!(descriptor.schedule.as_deref(), Some("day"));
    }

    #[test]
    fn test_patch_only_touches_named_fields() {
        let mut parameters = Parameters::new();
        parameters.insert("pages".to_string(), json!(3));
        let original = PluginDescriptor::new("fofa", "scripts.fofa")
            .with_schedule("day")
            .with_parameters(parameters);

        let mut updated = original.clone();
        PluginPatch::enabled(false).apply_to(&mut updated);

        assert!(!updated.enabled);
        assert_eq!(updated.parameters, original.parameters);
        assert_eq!(updated.schedule, original.schedule);
        assert_eq!(updated.timeout_seconds, original.timeout_seconds);
    }

    #[test]
    fn test_patch_accepts_legacy_keys() {
        let patch = PluginPatch::from_json(json!({
            "enable": false,
            "cron_schedule": "",
            "timeout": 60
        }))
        .unwrap();

        assert_eq!(patch.enabled, Some(false));
        assert_eq!(patch.timeout_seconds, Some(60));

        let mut descriptor = PluginDescriptor::new("fofa", "scripts.fofa").with_schedule("hour");
        patch.apply_to(&mut descriptor);
        assert_eq!(descriptor.schedule, None);
        assert_eq!(descriptor.timeout_seconds, 60);

        assert!(PluginPatch::default().is_empty());
        assert!(PluginPatch::from_json(json!(["enabled"])).is_err());
        assert!(PluginPatch::from_json(json!({"enabled": "yes"})).is_err());
    }

    #[test]
    fn test_patch_canonical_key_wins_over_alias() {
        let patch = PluginPatch::from_json(json!({
            "enabled": true,
            "enable": false,
            "module_path": "scripts.fofa_v2",
            "module_reference": "scripts.legacy",
            "cron_schedule": "hour",
            "schedule": "day",
            "timeout": 30,
            "timeout_seconds": 90
        }))
        .unwrap();

        assert_eq!(patch.enabled, Some(true));
        assert_eq!(patch.module_reference.as_deref(), Some("scripts.fofa_v2"));
        assert_eq!(patch.schedule.as_deref(), Some("hour"));
        assert_eq!(patch.timeout_seconds, Some(30));

        // 字段名为 null 时回退到别名
        let patch = PluginPatch::from_json(json!({"enabled": null, "enable": false})).unwrap();
        assert_eq!(patch.enabled, Some(false));

        let patch = PluginPatch::from_json(json!({"entry_point": "run"})).unwrap();
        assert_eq!(patch.entry_point.as_deref(), Some("run"));
    }

    #[test]
    fn test_normalized_trims_name_and_blank_schedule() {
        let mut descriptor = PluginDescriptor::new(" fofa ", "scripts.fofa");
        descriptor.schedule = Some("  ".to_string());

        let descriptor = descriptor.normalized();
        assert_eq!(descriptor.name, "fofa");
        assert_eq!(descriptor.schedule, None);
    }

    #[tokio::test]
    async fn test_handler_fn_adapter() {
        let handler = handler_fn(|params: Parameters| async move {
            Ok(json!({ "echo": params.get("value").cloned() }))
        });

        let mut params = Parameters::new();
        params.insert("value".to_string(), json!(42));

        let result = handler.call(params).await.unwrap();
        assert_eq!(result, json!({ "echo": 42 }));
    }

    #[test]
    fn test_status_view_composition() {
        let descriptor = PluginDescriptor::new("gitforks", "subscribe.scripts.gitforks");
        let record = ExecutionRecord {
            name: "gitforks".to_string(),
            started_at: Utc::now(),
            last_run_at: Some(Utc::now()),
            last_result: Some(RunResult::Success { output: json!({"ok": true}) }),
        };

        let view = PluginStatusView::compose(&descriptor, true, Some(&record));
        assert!(view.running);
        assert_eq!(view.module_path, "subscribe.scripts.gitforks");
        assert_eq!(view.function_name, "main");
        assert!(view.last_result.as_ref().is_some_and(RunResult::is_success));
    }
}
