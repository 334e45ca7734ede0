// 插件执行日志上下文

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::Span;
use uuid::Uuid;

/// 单次插件执行的上下文
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: Uuid,
    pub plugin: String,
    /// 触发来源，如 console、trigger
    pub origin: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    /// 创建新的执行上下文
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            plugin: plugin.into(),
            origin: None,
            started_at: Utc::now(),
        }
    }

    /// 设置触发来源
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// 获取持续时间
    pub fn duration(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }

    /// 本次执行的 span，执行期间的所有日志挂在其下
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "plugin_run",
            run_id = %self.run_id,
            plugin = %self.plugin,
            origin = self.origin.as_deref().unwrap_or("console"),
        )
    }

    /// 转换为日志字段
    pub fn to_log_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("run_id", self.run_id.to_string()),
            ("plugin", self.plugin.clone()),
            ("started_at", self.started_at.to_rfc3339()),
        ];

        if let Some(ref origin) = self.origin {
            fields.push(("origin", origin.clone()));
        }

        fields
    }
}

/// 带执行上下文的日志宏
#[macro_export]
macro_rules! log_run {
    ($level:ident, $context:expr, $($arg:tt)*) => {
        tracing::$level!(
            run_id = %$context.run_id,
            plugin = %$context.plugin,
            $($arg)*
        );
    };
}
