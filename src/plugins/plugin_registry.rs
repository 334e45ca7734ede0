// 插件注册表
// 持有插件描述集合，对外提供启用、禁用、执行、增删改查操作

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock as StdRwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RegistrySettings;
use crate::errors::{ConsoleError, ConsoleResult};
use crate::logging::RunContext;
use crate::plugins::config_store::{
    descriptor_from_entry, parse_document_value, ConfigStore, LoadReport, PluginMap,
};
use crate::plugins::dispatcher::Dispatcher;
use crate::plugins::execution_tracker::ExecutionTracker;
use crate::plugins::plugin_interface::{
    MutationKind, MutationObserver, PluginDescriptor, PluginPatch, PluginStatusView,
    SystemStatus,
};
use crate::plugins::plugin_loader::{plugin_name_for_module, HandlerResolver};

/// 插件注册表
pub struct PluginRegistry {
    /// 插件描述集合，持久化在同一把锁下进行
    plugins: Arc<Mutex<PluginMap>>,
    /// 配置存储
    store: Arc<ConfigStore>,
    /// 调度执行器
    dispatcher: Arc<Dispatcher>,
    /// 变更观察者
    observers: Arc<StdRwLock<Vec<Arc<dyn MutationObserver>>>>,
}

impl PluginRegistry {
    /// 按应用配置打开注册表
    pub fn open(
        settings: &RegistrySettings,
        resolver: Arc<dyn HandlerResolver>,
    ) -> ConsoleResult<Self> {
        let store = ConfigStore::new(&settings.config_path);
        let plugins = if settings.bootstrap_if_missing {
            store.load_or_bootstrap()?
        } else {
            store.load()?
        };

        info!(
            path = %store.path().display(),
            plugins = plugins.len(),
            "插件注册表已打开"
        );

        Ok(Self::with_plugins(
            store,
            resolver,
            plugins,
            settings.max_concurrent_runs,
        ))
    }

    /// 使用已有的插件集合创建注册表，不读取文件
    pub fn with_plugins(
        store: ConfigStore,
        resolver: Arc<dyn HandlerResolver>,
        plugins: PluginMap,
        max_concurrent_runs: usize,
    ) -> Self {
        let tracker = Arc::new(ExecutionTracker::new());
        Self {
            plugins: Arc::new(Mutex::new(plugins)),
            store: Arc::new(store),
            dispatcher: Arc::new(Dispatcher::new(resolver, tracker, max_concurrent_runs)),
            observers: Arc::new(StdRwLock::new(Vec::new())),
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<ExecutionTracker> {
        self.dispatcher.tracker()
    }

    /// 注册变更观察者
    pub fn register_observer(&self, observer: Arc<dyn MutationObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    fn notify(&self, plugin: &str, kind: MutationKind) {
        let observers = self.observers.read().unwrap_or_else(|e| e.into_inner());
        for observer in observers.iter() {
            observer.on_mutation(plugin, kind);
        }
    }

    /// 持久化当前集合，失败时内存状态仍然有效
    fn persist(&self, plugins: &PluginMap) -> ConsoleResult<()> {
        self.store.save(plugins).inspect_err(|e| {
            error!(error = %e, "插件配置持久化失败，内存状态保持不变");
        })
    }

    /// 列出所有插件及运行状态
    pub async fn list(&self) -> Vec<PluginStatusView> {
        let plugins = self.plugins.lock().await;
        let snapshot = self.tracker().snapshot();

        plugins
            .values()
            .map(|descriptor| {
                PluginStatusView::compose(
                    descriptor,
                    snapshot.running.contains(&descriptor.name),
                    snapshot.records.get(&descriptor.name),
                )
            })
            .collect()
    }

    /// 获取单个插件的运行状态
    pub async fn get(&self, name: &str) -> Option<PluginStatusView> {
        let plugins = self.plugins.lock().await;
        let descriptor = plugins.get(name)?;
        let snapshot = self.tracker().snapshot();

        Some(PluginStatusView::compose(
            descriptor,
            snapshot.running.contains(name),
            snapshot.records.get(name),
        ))
    }

    /// 获取插件描述
    pub async fn descriptor(&self, name: &str) -> Option<PluginDescriptor> {
        self.plugins.lock().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.plugins.lock().await.keys().cloned().collect()
    }

    /// 启用插件，插件不存在时返回 false
    pub async fn enable(&self, name: &str) -> ConsoleResult<bool> {
        self.set_enabled(name, true).await
    }

    /// 禁用插件，不会中断正在进行的执行
    pub async fn disable(&self, name: &str) -> ConsoleResult<bool> {
        self.set_enabled(name, false).await
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> ConsoleResult<bool> {
        let mut plugins = self.plugins.lock().await;
        let Some(descriptor) = plugins.get_mut(name) else {
            return Ok(false);
        };

        descriptor.enabled = enabled;
        info!(plugin = %name, enabled, "插件启用状态已变更");

        let kind = if enabled {
            MutationKind::Enabled
        } else {
            MutationKind::Disabled
        };
        self.notify(name, kind);
        self.persist(&plugins)?;
        Ok(true)
    }

    /// 启动一次执行并立即返回句柄
    ///
    /// 未启用、正在运行、不存在的情况直接返回错误。
    pub async fn run(&self, name: &str) -> ConsoleResult<RunHandle> {
        self.run_with_origin(name, "console").await
    }

    /// 启动一次执行并记录触发来源
    pub async fn run_with_origin(&self, name: &str, origin: &str) -> ConsoleResult<RunHandle> {
        let descriptor = self
            .descriptor(name)
            .await
            .ok_or_else(|| ConsoleError::plugin_not_found(name))?;

        let slot = self.dispatcher.begin(&descriptor)?;
        let context = RunContext::new(name).with_origin(origin);
        let (sender, receiver) = watch::channel(RunState::Running);
        let handle = RunHandle {
            run_id: context.run_id,
            plugin: name.to_string(),
            started_at: context.started_at,
            state: receiver,
        };

        let dispatcher = Arc::clone(&self.dispatcher);
        let plugins = Arc::clone(&self.plugins);
        let plugin = name.to_string();
        tokio::spawn(async move {
            let outcome = dispatcher.drive(descriptor, slot, context).await;

            // 执行期间插件被删除，结果不再归属任何插件
            if !plugins.lock().await.contains_key(&plugin) {
                dispatcher.tracker().forget(&plugin);
                warn!(plugin = %plugin, "插件已被删除，丢弃本次执行结果");
            }

            // 没有等待方时发送失败是正常的
            let _ = sender.send(RunState::from_outcome(outcome));
        });

        Ok(handle)
    }

    /// 执行并等待结果
    pub async fn run_and_wait(&self, name: &str) -> ConsoleResult<Value> {
        self.run(name).await?.wait().await
    }

    /// 启动所有启用的插件
    pub async fn run_enabled(&self) -> Vec<(String, ConsoleResult<RunHandle>)> {
        self.run_enabled_with_origin("console").await
    }

    pub(crate) async fn run_enabled_with_origin(
        &self,
        origin: &str,
    ) -> Vec<(String, ConsoleResult<RunHandle>)> {
        let enabled: Vec<String> = self
            .plugins
            .lock()
            .await
            .values()
            .filter(|d| d.enabled)
            .map(|d| d.name.clone())
            .collect();

        info!(count = enabled.len(), "启动所有启用的插件");

        let mut results = Vec::with_capacity(enabled.len());
        for name in enabled {
            let result = self.run_with_origin(&name, origin).await;
            if let Err(ref e) = result {
                warn!(plugin = %name, error = %e, "插件未能启动");
            }
            results.push((name, result));
        }
        results
    }

    /// 部分更新插件
    pub async fn update(&self, name: &str, patch: PluginPatch) -> ConsoleResult<PluginDescriptor> {
        let mut plugins = self.plugins.lock().await;
        let current = plugins
            .get(name)
            .ok_or_else(|| ConsoleError::plugin_not_found(name))?;

        let mut updated = current.clone();
        patch.apply_to(&mut updated);
        updated.validate()?;

        plugins.insert(name.to_string(), updated.clone());
        info!(plugin = %name, "插件配置已更新");

        self.notify(name, MutationKind::Updated);
        self.persist(&plugins)?;
        Ok(updated)
    }

    /// 新增插件，同名插件已存在时返回冲突
    pub async fn add(&self, descriptor: PluginDescriptor) -> ConsoleResult<()> {
        let descriptor = descriptor.normalized();
        descriptor.validate()?;

        let mut plugins = self.plugins.lock().await;
        if plugins.contains_key(&descriptor.name) {
            return Err(ConsoleError::conflict(format!(
                "插件 {} 已存在",
                descriptor.name
            )));
        }

        let name = descriptor.name.clone();
        plugins.insert(name.clone(), descriptor);
        info!(plugin = %name, "插件已添加");

        self.notify(&name, MutationKind::Added);
        self.persist(&plugins)?;
        Ok(())
    }

    /// 删除插件，不会取消正在进行的执行
    pub async fn remove(&self, name: &str) -> ConsoleResult<PluginDescriptor> {
        let mut plugins = self.plugins.lock().await;
        let removed = plugins
            .remove(name)
            .ok_or_else(|| ConsoleError::plugin_not_found(name))?;

        if self.tracker().is_running(name) {
            warn!(plugin = %name, "插件正在运行，删除后执行将继续直到结束");
        } else {
            self.tracker().forget(name);
        }
        info!(plugin = %name, "插件已删除");

        self.notify(name, MutationKind::Removed);
        self.persist(&plugins)?;
        Ok(removed)
    }

    /// 用完整配置文档替换全部插件，返回被跳过的条目
    ///
    /// 文档格式与配置文件相同，别名规则与加载时一致。
    /// 正在进行的执行不受影响。
    pub async fn replace_all(&self, document: &Value) -> ConsoleResult<LoadReport> {
        let report = parse_document_value(document)?;

        let mut plugins = self.plugins.lock().await;
        let previous = std::mem::replace(&mut *plugins, report.plugins.clone());

        let tracker = self.tracker();
        for name in previous.keys().filter(|name| !plugins.contains_key(*name)) {
            if !tracker.is_running(name) {
                tracker.forget(name);
            }
        }

        info!(
            plugins = plugins.len(),
            previous = previous.len(),
            skipped = report.skipped.len(),
            "插件配置已整体替换"
        );

        let touched: BTreeSet<&String> = previous.keys().chain(plugins.keys()).collect();
        for name in touched {
            let kind = if plugins.contains_key(name) {
                MutationKind::Replaced
            } else {
                MutationKind::Removed
            };
            self.notify(name, kind);
        }

        self.persist(&plugins)?;
        Ok(report)
    }

    /// 系统状态摘要
    pub async fn status_summary(&self) -> SystemStatus {
        let plugins = self.list().await;
        SystemStatus {
            total_plugins: plugins.len(),
            active_plugins: plugins.iter().filter(|p| p.enabled).count(),
            running_tasks: plugins.iter().filter(|p| p.running).count(),
            plugins,
        }
    }

    /// 校验持久化格式的插件条目
    pub fn validate_entry(&self, entry: &Value) -> ConsoleResult<()> {
        validate_entry(entry)
    }

    /// 为已注册但没有配置的处理模块补充插件（默认禁用）
    pub async fn sync_with_handlers(&self) -> ConsoleResult<Vec<String>> {
        let modules = self.dispatcher.resolver().available_modules();
        let mut plugins = self.plugins.lock().await;

        let referenced: BTreeSet<String> = plugins
            .values()
            .map(|d| d.module_reference.clone())
            .collect();

        let mut added = Vec::new();
        for module in modules.into_iter().filter(|m| !referenced.contains(m)) {
            let name = plugin_name_for_module(&module).to_string();
            if plugins.contains_key(&name) {
                debug!(module = %module, plugin = %name, "插件名称已被占用，跳过同步");
                continue;
            }

            let descriptor = PluginDescriptor::new(name.clone(), module).with_enabled(false);
            plugins.insert(name.clone(), descriptor);
            added.push(name);
        }

        if added.is_empty() {
            info!("插件配置与处理函数一致，无需同步");
            return Ok(added);
        }

        for name in &added {
            info!(plugin = %name, "同步新增插件（默认禁用）");
            self.notify(name, MutationKind::Synced);
        }

        self.persist(&plugins)?;
        Ok(added)
    }
}

impl Clone for PluginRegistry {
    fn clone(&self) -> Self {
        Self {
            plugins: self.plugins.clone(),
            store: self.store.clone(),
            dispatcher: self.dispatcher.clone(),
            observers: self.observers.clone(),
        }
    }
}

/// 校验持久化格式的插件条目（与加载使用同一套规则）
pub fn validate_entry(entry: &Value) -> ConsoleResult<()> {
    let name = entry
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<entry>");
    descriptor_from_entry(name, entry).map(|_| ())
}

/// 执行状态
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Running,
    Succeeded { output: Value },
    Failed { error: ConsoleError },
}

impl RunState {
    fn from_outcome(outcome: ConsoleResult<Value>) -> Self {
        match outcome {
            Ok(output) => Self::Succeeded { output },
            Err(error) => Self::Failed { error },
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// 执行句柄
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: Uuid,
    plugin: String,
    started_at: DateTime<Utc>,
    state: watch::Receiver<RunState>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// 当前状态（不阻塞）
    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    /// 等待执行结束
    pub async fn wait(mut self) -> ConsoleResult<Value> {
        let finished = self
            .state
            .wait_for(RunState::is_finished)
            .await
            .map(|state| state.clone())
            .map_err(|_| ConsoleError::internal(format!("插件 {} 的执行任务意外终止", self.plugin)))?;

        match finished {
            RunState::Succeeded { output } => Ok(output),
            RunState::Failed { error } => Err(error),
            RunState::Running => Err(ConsoleError::internal("执行状态异常")),
        }
    }
}
