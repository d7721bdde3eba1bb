use std::path::Path;

use kiln_gfx::headless::HeadlessConfig;
use kiln_resource::config::ResourceConfig;
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// 运行的总帧数
    pub frames: u64,
    pub frame_ms: u64,
    /// 在这一帧结束时执行一次 `Exit` + `Init` 重置
    pub reset_at_frame: Option<u64>,
}
impl Default for RunConfig {
    fn default() -> Self {
        Self {
            frames: 240,
            frame_ms: 16,
            reset_at_frame: None,
        }
    }
}

/// `config/kiln.toml`
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub resource: ResourceConfig,
    pub headless: HeadlessConfig,
    pub run: RunConfig,
}
impl AppConfig {
    /// 相对的内容根目录基于 `workspace`
    pub fn resolve_content_root(mut self, workspace: &Path) -> Self {
        if self.resource.content_root.is_relative() {
            self.resource.content_root = workspace.join(&self.resource.content_root);
        }
        self
    }
}
