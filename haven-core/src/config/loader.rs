use crate::config::model::GatewayConfig;

/// 解析配置文件路径，优先使用CONFIG_PATH环境变量
pub fn get_config_path() -> String {
    std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string())
}

pub fn load_config() -> Result<GatewayConfig, anyhow::Error> {
    load_config_from_path(&get_config_path())
}

pub fn load_config_from_path(config_path: &str) -> Result<GatewayConfig, anyhow::Error> {
    let config_str = std::fs::read_to_string(config_path)?;
    load_config_from_str(&config_str)
}

pub fn load_config_from_str(config_str: &str) -> Result<GatewayConfig, anyhow::Error> {
    let config: GatewayConfig = toml::from_str(config_str)?;
    Ok(config)
}
