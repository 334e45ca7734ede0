// 插件控制台 CLI
// 提供插件列表、启用、禁用、执行、同步、校验和常驻触发功能

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use plugin_console_common::ApiResponse;
use serde_json::Value;
use tracing::info;

use crate::config::{AppConfig, ConfigLoader};
use crate::errors::{ConsoleError, ConsoleResult};
use crate::plugins::{
    parse_document_value, validate_entry, HandlerResolver, PluginRegistry, PluginStatusView,
    RunHandle, TriggerConfig, TriggerLoop,
};

/// CLI 命令
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    /// 列出所有插件
    List,
    /// 查看系统或单个插件状态
    Status { name: Option<String> },
    /// 启用插件
    Enable { name: String },
    /// 禁用插件
    Disable { name: String },
    /// 执行插件并等待结果
    Run { name: String },
    /// 执行所有启用的插件
    RunAll,
    /// 为已注册的处理函数补充插件配置
    Sync,
    /// 校验插件配置文件
    Validate { file: PathBuf },
    /// 用配置文件整体替换插件配置
    Import { file: PathBuf },
    /// 常驻运行定时触发器
    Serve,
}

/// CLI 执行器
pub struct CliExecutor {
    registry: PluginRegistry,
    config: AppConfig,
}

impl CliExecutor {
    /// 创建新的 CLI 执行器
    pub fn new(config: AppConfig, resolver: Arc<dyn HandlerResolver>) -> ConsoleResult<Self> {
        let registry = PluginRegistry::open(&config.registry, resolver)?;
        Ok(Self { registry, config })
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// 执行 CLI 命令
    pub async fn execute(&self, command: CliCommand) -> ConsoleResult<()> {
        match command {
            CliCommand::List => {
                let plugins = self.registry.list().await;
                print_plugin_table(&plugins);
            }
            CliCommand::Status { name: None } => {
                let status = self.registry.status_summary().await;
                print_json(&ApiResponse::success(status))?;
            }
            CliCommand::Status { name: Some(name) } => {
                let view = self
                    .registry
                    .get(&name)
                    .await
                    .ok_or_else(|| ConsoleError::plugin_not_found(&name))?;
                print_json(&ApiResponse::success(view))?;
            }
            CliCommand::Enable { name } => {
                if !self.registry.enable(&name).await? {
                    return Err(ConsoleError::plugin_not_found(&name));
                }
                println!("✅ 插件 {} 已启用", name);
            }
            CliCommand::Disable { name } => {
                if !self.registry.disable(&name).await? {
                    return Err(ConsoleError::plugin_not_found(&name));
                }
                println!("✅ 插件 {} 已禁用", name);
            }
            CliCommand::Run { name } => {
                info!(plugin = %name, "手动执行插件");
                let result = self.registry.run_and_wait(&name).await;
                match result {
                    Err(ref e) if e.is_skipped() => println!("⏭️  {}", e),
                    _ => print_json(&ApiResponse::from_result(result))?,
                }
            }
            CliCommand::RunAll => {
                let mut waiting = Vec::new();
                for (name, started) in self.registry.run_enabled().await {
                    match started {
                        Ok(handle) => waiting.push((name, handle)),
                        Err(e) => println!("❌ {}: {}", name, e),
                    }
                }
                let (names, handles): (Vec<_>, Vec<_>) = waiting.into_iter().unzip();
                let results = join_all(handles.into_iter().map(RunHandle::wait)).await;
                for (name, result) in names.into_iter().zip(results) {
                    match result {
                        Ok(_) => println!("✅ {} 执行成功", name),
                        Err(e) => println!("❌ {}: {}", name, e),
                    }
                }
            }
            CliCommand::Sync => {
                let added = self.registry.sync_with_handlers().await?;
                if added.is_empty() {
                    println!("✅ 插件配置已是最新");
                } else {
                    println!("✅ 新增 {} 个插件（默认禁用）:", added.len());
                    for name in added {
                        println!("  - {}", name);
                    }
                }
            }
            CliCommand::Validate { file } => validate_file(&file)?,
            CliCommand::Import { file } => {
                let document = read_json(&file)?;
                let report = self.registry.replace_all(&document).await?;
                for (name, error) in &report.skipped {
                    println!("⏭️  {}: {}", name, error);
                }
                println!("✅ 已导入 {} 个插件", report.plugins.len());
            }
            CliCommand::Serve => self.serve().await?,
        }

        Ok(())
    }

    /// 运行定时触发器直到收到 Ctrl-C
    async fn serve(&self) -> ConsoleResult<()> {
        ConfigLoader::print_summary(&self.config);

        let trigger = if self.config.trigger.enabled {
            let config = TriggerConfig::from_settings(&self.config.trigger)?;
            Some(TriggerLoop::new(self.registry.clone(), config).spawn())
        } else {
            info!("定时触发器已禁用，仅保持进程运行");
            None
        };

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| ConsoleError::internal(format!("无法监听退出信号: {}", e)))?;
        info!("收到退出信号，停止定时触发器");

        if let Some(handle) = trigger {
            handle.abort();
        }
        Ok(())
    }
}

fn read_json(file: &Path) -> ConsoleResult<Value> {
    let text = std::fs::read_to_string(file).map_err(|e| {
        ConsoleError::validation("file", format!("无法读取 {}: {}", file.display(), e))
    })?;
    Ok(serde_json::from_str(&text)?)
}

/// 校验配置文件：完整文档或单个条目
fn validate_file(file: &Path) -> ConsoleResult<()> {
    let value = read_json(file)?;

    if value.get("plugins").is_some() {
        let report = parse_document_value(&value)?;
        for (name, error) in &report.skipped {
            println!("❌ {}: {}", name, error);
        }
        if !report.skipped.is_empty() {
            return Err(ConsoleError::malformed(format!(
                "{} 个插件配置无效",
                report.skipped.len()
            )));
        }
        println!("✅ {} 个插件配置全部有效", report.plugins.len());
    } else {
        validate_entry(&value)?;
        println!("✅ 插件配置有效");
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> ConsoleResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| ConsoleError::internal(format!("序列化输出失败: {}", e)))?;
    println!("{}", text);
    Ok(())
}

fn print_plugin_table(plugins: &[PluginStatusView]) {
    println!("📋 插件列表:");
    println!(
        "{:<16} {:<8} {:<8} {:<10} {:<26} {}",
        "名称", "启用", "运行", "调度", "最后执行", "描述"
    );
    println!("{}", "-".repeat(90));

    for plugin in plugins {
        let last_run = plugin
            .last_run_at
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<16} {:<8} {:<8} {:<10} {:<26} {}",
            plugin.name,
            if plugin.enabled { "✅" } else { "⛔" },
            if plugin.running { "🔄" } else { "-" },
            plugin.schedule.as_deref().unwrap_or("-"),
            last_run,
            plugin.description
        );
    }
}

/// 解析命令行参数
pub fn parse_args(args: Vec<String>) -> ConsoleResult<CliCommand> {
    if args.len() < 2 {
        return Err(ConsoleError::validation("args", "请提供命令"));
    }

    let name_arg = |what: &str| -> ConsoleResult<String> {
        args.get(2)
            .cloned()
            .ok_or_else(|| ConsoleError::validation("name", format!("{} 需要提供插件名称", what)))
    };

    match args[1].as_str() {
        "list" | "ls" => Ok(CliCommand::List),
        "status" => Ok(CliCommand::Status {
            name: args.get(2).cloned(),
        }),
        "enable" => Ok(CliCommand::Enable {
            name: name_arg("enable")?,
        }),
        "disable" => Ok(CliCommand::Disable {
            name: name_arg("disable")?,
        }),
        "run" => match args.get(2).map(String::as_str) {
            Some("--all") => Ok(CliCommand::RunAll),
            _ => Ok(CliCommand::Run {
                name: name_arg("run")?,
            }),
        },
        "sync" => Ok(CliCommand::Sync),
        "validate" => {
            let file = args
                .get(2)
                .ok_or_else(|| ConsoleError::validation("file", "请提供要校验的配置文件"))?;
            Ok(CliCommand::Validate {
                file: PathBuf::from(file),
            })
        }
        "import" => {
            let file = args
                .get(2)
                .ok_or_else(|| ConsoleError::validation("file", "请提供要导入的配置文件"))?;
            Ok(CliCommand::Import {
                file: PathBuf::from(file),
            })
        }
        "serve" => Ok(CliCommand::Serve),
        other => Err(ConsoleError::validation(
            "command",
            format!("未知的命令: {}", other),
        )),
    }
}

/// 打印帮助信息
pub fn print_help() {
    println!("Plugin Console 插件控制台");
    println!();
    println!("用法:");
    println!("  plugin-console <命令> [参数]");
    println!();
    println!("命令:");
    println!("  list                  列出所有插件及运行状态");
    println!("  status [name]         查看系统状态或单个插件状态");
    println!("  enable <name>         启用插件");
    println!("  disable <name>        禁用插件");
    println!("  run <name>            执行插件并等待结果");
    println!("  run --all             执行所有启用的插件");
    println!("  sync                  为已注册的处理函数补充插件配置");
    println!("  validate <file>       校验插件配置文件");
    println!("  import <file>         用配置文件整体替换插件配置");
    println!("  serve                 运行定时触发器（Ctrl-C 退出）");
    println!();
    println!("配置:");
    println!("  plugin-console.toml 或 PLUGIN_CONSOLE__<SECTION>__<KEY> 环境变量");
}
