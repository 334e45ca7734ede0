// 插件系统模块
// 插件注册表、配置存储、执行跟踪、调度执行和定时触发

pub mod plugin_interface;
pub mod config_store;
pub mod execution_tracker;
pub mod plugin_loader;
pub mod dispatcher;
pub mod plugin_registry;
pub mod trigger;
pub mod builtin;

pub use plugin_interface::*;
pub use config_store::*;
pub use execution_tracker::*;
pub use plugin_loader::*;
pub use dispatcher::*;
pub use plugin_registry::*;
pub use trigger::*;
pub use builtin::*;
