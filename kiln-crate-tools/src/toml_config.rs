use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;

/// 从 TOML 文件读取配置
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
    parse_toml(&text).with_context(|| format!("failed to parse config {}", path.display()))
}

/// 文件存在时读取，否则使用默认值
pub fn load_toml_or_default<T: DeserializeOwned + Default>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    if !path.exists() {
        log::info!("Config {} not found, using defaults", path.display());
        return Ok(T::default());
    }
    load_toml(path)
}

pub fn parse_toml<T: DeserializeOwned>(text: &str) -> anyhow::Result<T> {
    Ok(toml::from_str(text)?)
}
