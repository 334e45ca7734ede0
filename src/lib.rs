// Plugin Console Library
// 插件注册表与执行引擎，导出主要模块供 CLI 和测试使用

pub mod cli;
pub mod config;
pub mod errors;
pub mod logging;
pub mod plugins;

pub use errors::{ConsoleError, ConsoleResult};
pub use plugins::{PluginDescriptor, PluginPatch, PluginRegistry, RunHandle, RunState};
