// 定时触发器
// 按粗粒度调度（每日 / 每小时）周期性触发插件执行

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConfigValidator, TriggerSettings};
use crate::errors::{ConsoleError, ConsoleResult};
use crate::plugins::plugin_registry::PluginRegistry;

/// 触发来源标识
const TRIGGER_ORIGIN: &str = "trigger";

/// 调度粒度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleBucket {
    Hourly,
    Daily,
}

impl ScheduleBucket {
    /// 把调度表达式归并到每日或每小时
    pub fn from_expression(expression: &str) -> Option<Self> {
        let normalized = expression.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        // 同时出现时按每日处理
        if normalized.contains("day") {
            Some(Self::Daily)
        } else if normalized.contains("hour") {
            Some(Self::Hourly)
        } else {
            Some(Self::Daily)
        }
    }
}

/// 触发器配置
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// 检查间隔
    pub tick: Duration,
    /// 每日任务的执行时间
    pub daily_at: NaiveTime,
    /// 启动时执行所有启用的插件
    pub run_on_start: bool,
}

impl TriggerConfig {
    pub fn from_settings(settings: &TriggerSettings) -> ConsoleResult<Self> {
        let daily_at = ConfigValidator::parse_daily_at(&settings.daily_at)?;
        if settings.tick_seconds == 0 {
            return Err(ConsoleError::validation("tick_seconds", "检查间隔不能为 0"));
        }

        Ok(Self {
            tick: Duration::from_secs(settings.tick_seconds),
            daily_at,
            run_on_start: settings.run_on_start,
        })
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            daily_at: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or_default(),
            run_on_start: true,
        }
    }
}

/// 定时触发器
pub struct TriggerLoop {
    registry: PluginRegistry,
    config: TriggerConfig,
    /// 每个插件上次被触发的时间
    fired: Mutex<HashMap<String, NaiveDateTime>>,
}

impl TriggerLoop {
    pub fn new(registry: PluginRegistry, config: TriggerConfig) -> Self {
        Self {
            registry,
            config,
            fired: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    fn last_fired(&self, name: &str) -> Option<NaiveDateTime> {
        self.fired
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .copied()
    }

    fn mark_fired(&self, name: &str, at: NaiveDateTime) {
        self.fired
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), at);
    }

    /// 判断某个粒度的插件此刻是否到期
    pub fn is_due(
        &self,
        bucket: ScheduleBucket,
        last: Option<NaiveDateTime>,
        now: NaiveDateTime,
    ) -> bool {
        match bucket {
            ScheduleBucket::Hourly => last.is_none_or(|last| now - last >= TimeDelta::hours(1)),
            ScheduleBucket::Daily => {
                now.time() >= self.config.daily_at
                    && last.is_none_or(|last| last.date() < now.date())
            }
        }
    }

    /// 检查一次并启动到期的插件，返回已启动的插件名称
    pub async fn tick(&self, now: NaiveDateTime) -> Vec<String> {
        let mut started = Vec::new();

        for view in self.registry.list().await {
            if !view.enabled {
                continue;
            }
            let Some(bucket) = view.schedule.as_deref().and_then(ScheduleBucket::from_expression)
            else {
                continue;
            };
            if !self.is_due(bucket, self.last_fired(&view.name), now) {
                continue;
            }

            match self.registry.run_with_origin(&view.name, TRIGGER_ORIGIN).await {
                Ok(_) => {
                    info!(plugin = %view.name, bucket = ?bucket, "定时触发插件执行");
                    self.mark_fired(&view.name, now);
                    started.push(view.name);
                }
                Err(ConsoleError::AlreadyRunning { .. }) => {
                    debug!(plugin = %view.name, "插件仍在运行，下次检查时再触发");
                }
                Err(e) => {
                    warn!(plugin = %view.name, error = %e, "定时触发失败");
                }
            }
        }

        started
    }

    /// 启动时执行所有启用的插件，并记为已触发
    pub async fn run_on_start(&self, now: NaiveDateTime) -> Vec<String> {
        let mut started = Vec::new();
        for (name, result) in self.registry.run_enabled_with_origin(TRIGGER_ORIGIN).await {
            if result.is_ok() {
                self.mark_fired(&name, now);
                started.push(name);
            }
        }
        started
    }

    /// 在后台运行触发循环
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                tick_seconds = self.config.tick.as_secs(),
                daily_at = %self.config.daily_at,
                "定时触发器已启动"
            );

            if self.config.run_on_start {
                let started = self.run_on_start(Local::now().naive_local()).await;
                info!(count = started.len(), "启动时执行插件");
            }

            let mut interval = tokio::time::interval(self.config.tick);
            // 第一次 tick 立即返回
            interval.tick().await;

            loop {
                interval.tick().await;
                let started = self.tick(Local::now().naive_local()).await;
                if !started.is_empty() {
                    debug!(plugins = ?started, "本次检查触发的插件");
                }
            }
        })
    }
}
