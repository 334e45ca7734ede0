// Plugin Console 插件控制台

use std::env;
use std::sync::Arc;

use plugin_console::cli::{parse_args, print_help, CliExecutor};
use plugin_console::config::ConfigLoader;
use plugin_console::logging::LoggingSetup;
use plugin_console::plugins::{register_builtins, HandlerTable};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    // 检查是否请求帮助
    if args.len() < 2 || args.contains(&"--help".to_string()) || args.contains(&"-h".to_string()) {
        print_help();
        return;
    }

    // 加载配置
    let (config, dotenv) = match ConfigLoader::init() {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("加载配置失败: {}", e);
            std::process::exit(1);
        }
    };

    // 初始化结构化日志系统，guard 需要持有到进程退出
    let _log_guard = match LoggingSetup::init(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("初始化日志失败: {:#}", e);
            std::process::exit(1);
        }
    };

    ConfigLoader::log_loaded(&config, &dotenv);
    info!("🚀 启动 Plugin Console v{}", config.environment.version);

    // 解析命令
    let command = match parse_args(args) {
        Ok(command) => command,
        Err(e) => {
            error!("解析命令失败: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    // 注册处理函数
    let handlers = Arc::new(HandlerTable::new());
    register_builtins(&handlers);

    // 创建 CLI 执行器
    let executor = match CliExecutor::new(config, handlers) {
        Ok(executor) => executor,
        Err(e) => {
            error!("初始化插件注册表失败: {}", e);
            std::process::exit(1);
        }
    };

    // 执行命令
    if let Err(e) = executor.execute(command).await {
        error!(error_code = e.error_code(), "执行命令失败: {}", e);
        std::process::exit(1);
    }

    info!("命令执行完成");
}
