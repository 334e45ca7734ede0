// 处理函数加载器
// 通过显式注册表把模块路径和入口函数解析为可调用的处理函数

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, info};

use crate::errors::{ConsoleError, ConsoleResult};
use crate::plugins::plugin_interface::{handler_fn, Parameters, PluginHandler};

/// 处理函数解析接口
///
/// 每次执行尝试都会重新解析，实现可以在两次尝试之间替换处理函数。
pub trait HandlerResolver: Send + Sync {
    fn resolve(&self, module: &str, entry_point: &str) -> ConsoleResult<Arc<dyn PluginHandler>>;

    /// 已知的模块路径，用于同步插件配置
    fn available_modules(&self) -> Vec<String> {
        Vec::new()
    }
}

type EntryMap = HashMap<String, Arc<dyn PluginHandler>>;

/// 处理函数注册表
#[derive(Default)]
pub struct HandlerTable {
    modules: RwLock<BTreeMap<String, EntryMap>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理函数，同名入口会被替换
    pub fn register(
        &self,
        module: impl Into<String>,
        entry_point: impl Into<String>,
        handler: Arc<dyn PluginHandler>,
    ) {
        let module = module.into();
        let entry_point = entry_point.into();
        debug!(module = %module, entry_point = %entry_point, "注册处理函数");

        let mut modules = self.modules.write().unwrap_or_else(|e| e.into_inner());
        let replaced = modules
            .entry(module.clone())
            .or_default()
            .insert(entry_point.clone(), handler)
            .is_some();

        if replaced {
            info!(module = %module, entry_point = %entry_point, "处理函数已替换");
        }
    }

    /// 以闭包注册处理函数
    pub fn register_fn<F, Fut>(&self, module: impl Into<String>, entry_point: impl Into<String>, func: F)
    where
        F: Fn(Parameters) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(module, entry_point, handler_fn(func));
    }

    /// 注销处理函数，模块为空时一并移除
    pub fn unregister(&self, module: &str, entry_point: &str) -> bool {
        let mut modules = self.modules.write().unwrap_or_else(|e| e.into_inner());
        let Some(entries) = modules.get_mut(module) else {
            return false;
        };

        let removed = entries.remove(entry_point).is_some();
        if entries.is_empty() {
            modules.remove(module);
        }
        removed
    }

    pub fn contains(&self, module: &str, entry_point: &str) -> bool {
        self.modules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(module)
            .is_some_and(|entries| entries.contains_key(entry_point))
    }

    pub fn len(&self) -> usize {
        self.modules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(HashMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HandlerResolver for HandlerTable {
    fn resolve(&self, module: &str, entry_point: &str) -> ConsoleResult<Arc<dyn PluginHandler>> {
        let modules = self.modules.read().unwrap_or_else(|e| e.into_inner());

        let entries = modules
            .get(module)
            .ok_or_else(|| ConsoleError::resolution(module, entry_point, "模块未注册"))?;

        entries
            .get(entry_point)
            .cloned()
            .ok_or_else(|| ConsoleError::resolution(module, entry_point, "入口函数不存在"))
    }

    fn available_modules(&self) -> Vec<String> {
        self.modules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

/// 模块路径最后一段作为插件名称
pub fn plugin_name_for_module(module: &str) -> &str {
    module
        .rsplit(|c: char| matches!(c, '.' | '/' | ':'))
        .find(|s| !s.is_empty())
        .unwrap_or(module)
}
