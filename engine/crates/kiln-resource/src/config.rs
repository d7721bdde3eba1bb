use std::path::{Path, PathBuf};

use serde::Deserialize;

/// 找不到资源文件时的处理方式
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFilePolicy {
    /// 仍然创建句柄，加载以 `ErrorFile` 结束并记录一次诊断
    #[default]
    SoftFail,
    /// `load` 直接返回 [`crate::error::ResourceError::FileNotFound`]
    Error,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// 相对资源路径的根目录
    pub content_root: PathBuf,
    /// 启动时打开的归档，相对于 `content_root`
    pub archives: Vec<String>,
    /// 没有待处理资源时，资源线程的休眠间隔
    pub worker_idle_ms: u64,
    /// 有资源仍在加载时，资源线程两轮之间的间隔
    pub worker_busy_ms: u64,
    pub missing_file: MissingFilePolicy,
    /// 退出时等待在途资源到达终态的最大轮数
    pub exit_drain_passes: u32,
    /// 退出时每次 fence 检查的有界等待时间
    pub exit_fence_timeout_ns: u64,
    /// 拼接在所有 shader 最前面的版本号
    pub shader_version: String,
    /// 拼接在版本号之后的全局代码
    pub shader_global_code: String,
}
impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            content_root: PathBuf::from("."),
            archives: Vec::new(),
            worker_idle_ms: 16,
            worker_busy_ms: 1,
            missing_file: MissingFilePolicy::SoftFail,
            exit_drain_passes: 64,
            exit_fence_timeout_ns: 100_000_000,
            shader_version: "330 core".to_string(),
            shader_global_code: String::new(),
        }
    }
}
impl ResourceConfig {
    pub fn from_toml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        kiln_crate_tools::toml_config::load_toml(path)
    }

    pub fn with_content_root(mut self, content_root: impl Into<PathBuf>) -> Self {
        self.content_root = content_root.into();
        self
    }
}
