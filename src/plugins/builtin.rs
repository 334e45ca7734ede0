// 内置处理函数

use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use crate::plugins::plugin_interface::{Parameters, DEFAULT_ENTRY_POINT};
use crate::plugins::plugin_loader::HandlerTable;

/// 测试插件模块路径
pub const TEST_PLUGIN_MODULE: &str = "subscribe.scripts.test_plugin";

/// 注册内置处理函数
pub fn register_builtins(table: &HandlerTable) {
    table.register_fn(TEST_PLUGIN_MODULE, DEFAULT_ENTRY_POINT, test_plugin);
    info!(module = TEST_PLUGIN_MODULE, "内置处理函数已注册");
}

/// 不做任何采集，只回显执行信息
async fn test_plugin(parameters: Parameters) -> anyhow::Result<Value> {
    info!("测试插件执行中");
    Ok(json!({
        "status": "success",
        "message": "测试插件执行成功",
        "data": {
            "plugin_name": "test_plugin",
            "executed_at": Utc::now().to_rfc3339(),
            "parameters": parameters,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::plugin_loader::HandlerResolver;

    #[tokio::test]
    async fn test_builtin_test_plugin() {
        let table = HandlerTable::new();
        register_builtins(&table);

        let handler = table.resolve(TEST_PLUGIN_MODULE, "main").unwrap();
        let mut parameters = Parameters::new();
        parameters.insert("dry_run".to_string(), json!(true));

        let result = handler.call(parameters).await.unwrap();
        assert_eq!(result["status"], "success");
        assert_eq!(result["data"]["plugin_name"], "test_plugin");
        assert_eq!(result["data"]["parameters"]["dry_run"], json!(true));
        assert!(result["data"]["executed_at"].is_string());
    }
}
