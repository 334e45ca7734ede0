// 插件调度执行器
// 解析处理函数并按超时和重试策略执行

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{error, info, warn, Instrument};

use crate::errors::{ConsoleError, ConsoleResult};
use crate::log_run;
use crate::logging::RunContext;
use crate::plugins::execution_tracker::{ExecutionTracker, RunSlot};
use crate::plugins::plugin_interface::{PluginDescriptor, PluginHandler, RunResult};
use crate::plugins::plugin_loader::HandlerResolver;

/// 插件调度执行器
pub struct Dispatcher {
    resolver: Arc<dyn HandlerResolver>,
    tracker: Arc<ExecutionTracker>,
    /// 同时执行的插件数量上限
    pool: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        resolver: Arc<dyn HandlerResolver>,
        tracker: Arc<ExecutionTracker>,
        max_concurrent_runs: usize,
    ) -> Self {
        Self {
            resolver,
            tracker,
            pool: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
        }
    }

    pub fn tracker(&self) -> &Arc<ExecutionTracker> {
        &self.tracker
    }

    pub fn resolver(&self) -> &Arc<dyn HandlerResolver> {
        &self.resolver
    }

    /// 空闲的工作池许可数量
    pub fn available_workers(&self) -> usize {
        self.pool.available_permits()
    }

    /// 检查启用状态并占用运行槽位
    pub fn begin(&self, descriptor: &PluginDescriptor) -> ConsoleResult<RunSlot> {
        if !descriptor.enabled {
            info!(plugin = %descriptor.name, "插件未启用，跳过执行");
            return Err(ConsoleError::disabled(&descriptor.name));
        }

        self.tracker.acquire_slot(&descriptor.name).ok_or_else(|| {
            warn!(plugin = %descriptor.name, "插件正在运行，拒绝重复执行");
            ConsoleError::already_running(&descriptor.name)
        })
    }

    /// 执行一次插件（检查 + 占用槽位 + 执行）
    pub async fn execute(&self, descriptor: &PluginDescriptor) -> ConsoleResult<Value> {
        let slot = self.begin(descriptor)?;
        self.drive(descriptor.clone(), slot, RunContext::new(&descriptor.name))
            .await
    }

    /// 在已占用的槽位上执行插件，结束后释放槽位
    pub async fn drive(
        &self,
        descriptor: PluginDescriptor,
        slot: RunSlot,
        context: RunContext,
    ) -> ConsoleResult<Value> {
        let span = context.span();

        async move {
            self.tracker.record_start(&descriptor.name);
            log_run!(info, context, max_attempts = descriptor.max_attempts(), "开始执行插件");

            let outcome = match Arc::clone(&self.pool).acquire_owned().await {
                Ok(_permit) => self.run_attempts(&descriptor).await,
                Err(_) => Err(ConsoleError::internal("工作池已关闭")),
            };

            self.tracker
                .record_finish(&descriptor.name, RunResult::from_outcome(&outcome));
            drop(slot);

            let elapsed_ms = context.duration().num_milliseconds();
            match &outcome {
                Ok(_) => {
                    log_run!(info, context, elapsed_ms, "插件执行完成");
                }
                Err(e) => {
                    log_run!(warn, context, elapsed_ms, error = %e, "插件执行结束但未成功");
                }
            }

            outcome
        }
        .instrument(span)
        .await
    }

    async fn run_attempts(&self, descriptor: &PluginDescriptor) -> ConsoleResult<Value> {
        let max_attempts = descriptor.max_attempts();
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            // 每次尝试重新解析，处理函数可能已被替换
            let handler = self
                .resolver
                .resolve(&descriptor.module_reference, &descriptor.entry_point)
                .inspect_err(|e| error!(attempt, error = %e, "无法解析处理函数"))?;

            match self.invoke(descriptor, handler).await {
                Ok(value) => {
                    info!(attempt, "插件执行成功");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "插件执行失败");
                    last_error = Some(e);
                }
            }
        }

        let last_error =
            last_error.unwrap_or_else(|| ConsoleError::internal("没有执行任何尝试"));
        error!(attempts = max_attempts, error = %last_error, "重试次数耗尽");
        Err(ConsoleError::execution_failed(
            &descriptor.name,
            max_attempts,
            last_error,
        ))
    }

    /// 单次调用，超时只结束等待，不会中止处理函数
    async fn invoke(
        &self,
        descriptor: &PluginDescriptor,
        handler: Arc<dyn PluginHandler>,
    ) -> ConsoleResult<Value> {
        let parameters = descriptor.parameters.clone();
        let task = tokio::spawn(
            async move { handler.call(parameters).await }.in_current_span(),
        );

        let limit = Duration::from_secs(descriptor.timeout_seconds);
        match tokio::time::timeout(limit, task).await {
            Err(_) => Err(ConsoleError::timeout(
                &descriptor.name,
                descriptor.timeout_seconds,
            )),
            Ok(Err(join_error)) if join_error.is_panic() => {
                Err(ConsoleError::handler(&descriptor.name, "处理函数崩溃"))
            }
            Ok(Err(join_error)) => Err(ConsoleError::handler(
                &descriptor.name,
                format!("处理函数被取消: {}", join_error),
            )),
            Ok(Ok(Err(e))) => Err(ConsoleError::handler(&descriptor.name, format!("{:#}", e))),
            Ok(Ok(Ok(value))) => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::plugin_interface::Parameters;
    use crate::plugins::plugin_loader::HandlerTable;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    const MODULE: &str = "scripts.fofa";

    fn dispatcher_with(table: HandlerTable) -> Dispatcher {
        Dispatcher::new(Arc::new(table), Arc::new(ExecutionTracker::new()), 2)
    }

    fn descriptor() -> PluginDescriptor {
        PluginDescriptor::new("fofa", MODULE)
            .with_timeout(5)
            .with_max_retries(2)
    }

    #[tokio::test]
    async fn test_success_records_result() {
        let table = HandlerTable::new();
        table.register_fn(MODULE, "main", |_| async { Ok(json!({"ok": true})) });
        let dispatcher = dispatcher_with(table);

        let value = dispatcher.execute(&descriptor()).await.unwrap();
        assert_eq!(value, json!({"ok": true}));

        let record = dispatcher.tracker().record("fofa").unwrap();
        assert!(record.last_run_at.is_some());
        assert!(record.last_result.unwrap().is_success());
        assert!(!dispatcher.tracker().is_running("fofa"));
    }

    #[tokio::test]
    async fn test_disabled_never_invokes_handler() {
        let calls = Arc::new(AtomicU32::new(0));
        let table = HandlerTable::new();
        let counter = Arc::clone(&calls);
        table.register_fn(MODULE, "main", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Value::Null) }
        });
        let dispatcher = dispatcher_with(table);

        let result = dispatcher.execute(&descriptor().with_enabled(false)).await;
        assert!(matches!(result, Err(ConsoleError::Disabled { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(dispatcher.tracker().record("fofa").is_none());
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let table = HandlerTable::new();
        let counter = Arc::clone(&calls);
        table.register_fn(MODULE, "main", move |_| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt <= 2 {
                    anyhow::bail!("第 {} 次失败", attempt);
                }
                Ok(json!({"attempt": attempt}))
            }
        });
        let dispatcher = dispatcher_with(table);

        let value = dispatcher.execute(&descriptor()).await.unwrap();
        assert_eq!(value, json!({"attempt": 3}));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail() {
        let calls = Arc::new(AtomicU32::new(0));
        let table = HandlerTable::new();
        let counter = Arc::clone(&calls);
        table.register_fn(MODULE, "main", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("上游不可用")) }
        });
        let dispatcher = dispatcher_with(table);

        let error = dispatcher.execute(&descriptor()).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match error {
            ConsoleError::ExecutionFailed { attempts, last_error, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last_error, ConsoleError::Handler { ref message, .. } if message.contains("上游不可用")));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let record = dispatcher.tracker().record("fofa").unwrap();
        assert!(!record.last_result.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_resolution_error_is_not_retried() {
        let dispatcher = dispatcher_with(HandlerTable::new());

        let error = dispatcher.execute(&descriptor()).await.unwrap_err();
        assert!(matches!(error, ConsoleError::Resolution { .. }));
        assert!(!dispatcher.tracker().is_running("fofa"));
    }

    #[tokio::test]
    async fn test_each_attempt_resolves_current_handler() {
        let table = Arc::new(HandlerTable::new());
        let first_calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&first_calls);
        let swap = Arc::downgrade(&table);
        table.register_fn(MODULE, "main", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            // 第一次尝试失败前换上新版本
            if let Some(table) = swap.upgrade() {
                table.register_fn(MODULE, "main", |_| async { Ok(json!("v2")) });
            }
            async { Err(anyhow::anyhow!("v1 失败")) }
        });
        let dispatcher = Dispatcher::new(table.clone(), Arc::new(ExecutionTracker::new()), 2);

        let value = dispatcher.execute(&descriptor()).await.unwrap();
        assert_eq!(value, json!("v2"));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_gone_on_retry_stops_attempts() {
        let table = Arc::new(HandlerTable::new());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let owner = Arc::downgrade(&table);
        table.register_fn(MODULE, "main", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(table) = owner.upgrade() {
                table.unregister(MODULE, "main");
            }
            async { Err(anyhow::anyhow!("模块已卸载")) }
        });
        let dispatcher = Dispatcher::new(table.clone(), Arc::new(ExecutionTracker::new()), 2);

        let error = dispatcher.execute(&descriptor()).await.unwrap_err();
        assert!(matches!(error, ConsoleError::Resolution { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let record = dispatcher.tracker().record("fofa").unwrap();
        assert!(!record.last_result.unwrap().is_success());
        assert!(!dispatcher.tracker().is_running("fofa"));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_retried_and_slot_released() {
        let calls = Arc::new(AtomicU32::new(0));
        let table = HandlerTable::new();
        let counter = Arc::clone(&calls);
        table.register_fn(MODULE, "main", move |_params: Parameters| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt == 1 {
                    panic!("collector crashed");
                }
                Ok(json!("recovered"))
            }
        });
        let dispatcher = dispatcher_with(table);

        let value = dispatcher.execute(&descriptor()).await.unwrap();
        assert_eq!(value, json!("recovered"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!dispatcher.tracker().is_running("fofa"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retryable() {
        let calls = Arc::new(AtomicU32::new(0));
        let table = HandlerTable::new();
        let counter = Arc::clone(&calls);
        table.register_fn(MODULE, "main", move |_| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt == 1 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(json!({"attempt": attempt}))
            }
        });
        let dispatcher = dispatcher_with(table);

        let value = dispatcher.execute(&descriptor()).await.unwrap();
        assert_eq!(value, json!({"attempt": 2}));
    }

    #[tokio::test]
    async fn test_second_begin_is_already_running() {
        let dispatcher = dispatcher_with(HandlerTable::new());
        let descriptor = descriptor();

        let _slot = dispatcher.begin(&descriptor).unwrap();
        assert!(matches!(
            dispatcher.begin(&descriptor),
            Err(ConsoleError::AlreadyRunning { .. })
        ));
        assert_eq!(dispatcher.available_workers(), 2);
    }
}
