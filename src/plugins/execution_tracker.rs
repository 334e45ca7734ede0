// 执行跟踪器
// 保证同一插件同时最多只有一个执行，并保存内存中的执行记录

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::plugins::plugin_interface::{ExecutionRecord, RunResult};

#[derive(Debug, Default)]
struct TrackerState {
    running: HashSet<String>,
    records: HashMap<String, ExecutionRecord>,
}

/// 运行状态快照
#[derive(Debug, Clone, Default)]
pub struct TrackerSnapshot {
    pub running: BTreeSet<String>,
    pub records: HashMap<String, ExecutionRecord>,
}

/// 执行跟踪器
#[derive(Debug, Default)]
pub struct ExecutionTracker {
    state: Mutex<TrackerState>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // 持锁期间不会调用外部代码，中毒时状态仍然一致
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 尝试占用运行槽位，已在运行时返回 false 且不产生副作用
    pub fn try_acquire(&self, name: &str) -> bool {
        self.lock().running.insert(name.to_string())
    }

    /// 释放运行槽位
    pub fn release(&self, name: &str) {
        self.lock().running.remove(name);
    }

    /// 占用运行槽位并返回自动释放的守卫
    pub fn acquire_slot(self: &Arc<Self>, name: &str) -> Option<RunSlot> {
        if self.try_acquire(name) {
            Some(RunSlot {
                tracker: Arc::clone(self),
                name: name.to_string(),
            })
        } else {
            None
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.lock().running.contains(name)
    }

    pub fn running_names(&self) -> BTreeSet<String> {
        self.lock().running.iter().cloned().collect()
    }

    pub fn running_count(&self) -> usize {
        self.lock().running.len()
    }

    /// 记录一次执行开始
    pub fn record_start(&self, name: &str) {
        let now = Utc::now();
        let mut state = self.lock();
        state
            .records
            .entry(name.to_string())
            .and_modify(|record| record.started_at = now)
            .or_insert_with(|| ExecutionRecord {
                name: name.to_string(),
                started_at: now,
                last_run_at: None,
                last_result: None,
            });
    }

    /// 记录一次执行结束
    pub fn record_finish(&self, name: &str, result: RunResult) {
        let now = Utc::now();
        let mut state = self.lock();
        let record = state
            .records
            .entry(name.to_string())
            .or_insert_with(|| ExecutionRecord {
                name: name.to_string(),
                started_at: now,
                last_run_at: None,
                last_result: None,
            });
        record.last_run_at = Some(now);
        record.last_result = Some(result);
    }

    pub fn record(&self, name: &str) -> Option<ExecutionRecord> {
        self.lock().records.get(name).cloned()
    }

    /// 丢弃执行记录（插件已被删除）
    pub fn forget(&self, name: &str) {
        self.lock().records.remove(name);
    }

    /// 在同一把锁下读取运行集合和执行记录
    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.lock();
        TrackerSnapshot {
            running: state.running.iter().cloned().collect(),
            records: state.records.clone(),
        }
    }
}

/// 运行槽位守卫，离开作用域时释放
#[derive(Debug)]
pub struct RunSlot {
    tracker: Arc<ExecutionTracker>,
    name: String,
}

impl RunSlot {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.tracker.release(&self.name);
    }
}
