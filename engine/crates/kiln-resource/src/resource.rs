use std::fmt;
use std::sync::{Arc, Mutex};

use kiln_gfx::backend::{FenceCheck, GfxBackend};
use kiln_gfx::fence::{FenceStatus, GfxFence};

use crate::config::ResourceConfig;
use crate::file::ResourceFile;
use crate::lock;
use crate::status::LoadStatus;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum ResourceKind {
    Texture,
    Model,
    Shader,
    Program,
    Font,
    Music,
}
impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Texture => "texture",
            Self::Model => "model",
            Self::Shader => "shader",
            Self::Program => "program",
            Self::Font => "font",
            Self::Music => "music",
        };
        f.write_str(name)
    }
}

/// 一条失败记录：一句话的结论，加上驱动或解码器给出的完整日志
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub log_title: String,
    pub entries: Vec<String>,
}
impl Diagnostic {
    /// 任意一行是否包含 `text`
    pub fn contains(&self, text: &str) -> bool {
        self.message.contains(text) || self.entries.iter().any(|e| e.contains(text))
    }
}
impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.entries.is_empty() {
            write!(f, "\n  {}:", self.log_title)?;
            for entry in &self.entries {
                for line in entry.lines() {
                    write!(f, "\n    {line}")?;
                }
            }
        }
        Ok(())
    }
}

/// 可加载的 GPU 资源
///
/// `load` 会被资源线程反复调用，每次最多推进状态机一步：
/// - 前置条件 (依赖、fence、异步编译) 未满足时返回 `Busy`，且不改变状态
/// - 产生 GPU 可见结果的最后一步创建 fence，fence 到达前保持 `Busy`
/// - 返回终态后不会再被调用，直到 `unload`
///
/// `unload` 撤销 `load` 中的所有分配，把资源恢复到可以重新 `load` 的状态；
/// 对未加载的资源返回 `InvalidCall`，没有副作用。
pub trait Resource: Send + Sync + 'static {
    const KIND: ResourceKind;

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> LoadStatus;
    fn unload(&mut self, gfx: &Arc<dyn GfxBackend>) -> LoadStatus;

    /// 找不到真实资源时使用的默认文件
    fn default_path() -> Option<&'static str>
    where
        Self: Sized,
    {
        None
    }
}

/// 一次 `load` 调用能看到的一切
pub struct LoadContext<'a> {
    gfx: &'a Arc<dyn GfxBackend>,
    config: &'a ResourceConfig,
    name: &'a str,
    requested_path: Option<&'a str>,
    file: Option<&'a ResourceFile>,
    fence_timeout_ns: u64,
    diagnostics: &'a Mutex<Vec<Diagnostic>>,
}
// new & init
impl<'a> LoadContext<'a> {
    pub fn new(
        gfx: &'a Arc<dyn GfxBackend>,
        config: &'a ResourceConfig,
        name: &'a str,
        requested_path: Option<&'a str>,
        file: Option<&'a ResourceFile>,
        diagnostics: &'a Mutex<Vec<Diagnostic>>,
    ) -> Self {
        Self {
            gfx,
            config,
            name,
            requested_path,
            file,
            fence_timeout_ns: 0,
            diagnostics,
        }
    }

    /// 允许 fence 检查有界等待，并且总是先 flush
    pub fn with_fence_timeout(mut self, timeout_ns: u64) -> Self {
        self.fence_timeout_ns = timeout_ns;
        self
    }
}
// getters
impl<'a> LoadContext<'a> {
    #[inline]
    pub fn gfx(&self) -> &'a Arc<dyn GfxBackend> {
        self.gfx
    }

    #[inline]
    pub fn config(&self) -> &'a ResourceConfig {
        self.config
    }

    /// 句柄的名字，也就是日志里出现的资源名
    #[inline]
    pub fn name(&self) -> &'a str {
        self.name
    }

    #[inline]
    pub fn file(&self) -> Option<&'a ResourceFile> {
        self.file
    }

    #[inline]
    pub fn fence_timeout(&self) -> u64 {
        self.fence_timeout_ns
    }
}
// tools
impl<'a> LoadContext<'a> {
    /// 文件内容
    ///
    /// - 没有请求文件: `InvalidInput`
    /// - 请求了文件但没有找到，或者文件为空: `ErrorFile`
    pub fn source(&self) -> Result<&'a [u8], LoadStatus> {
        match (self.file, self.requested_path) {
            (Some(file), _) => file.data().ok_or(LoadStatus::ErrorFile),
            (None, Some(path)) => {
                self.report_failure(format!("Resource file ({path}) could not be found"), "", Vec::new());
                Err(LoadStatus::ErrorFile)
            }
            (None, None) => {
                log::error!("Resource ({}) was loaded without a file", self.name);
                Err(LoadStatus::InvalidInput)
            }
        }
    }

    /// 轮询 fence；退出阶段会换成有界等待并强制 flush
    pub fn check_fence(&self, fence: &mut GfxFence, mode: FenceCheck) -> FenceStatus {
        if self.fence_timeout_ns > 0 {
            fence.check(self.fence_timeout_ns, FenceCheck::Flushed)
        } else {
            fence.check(0, mode)
        }
    }

    /// 记录一次失败，只在失败发生时调用一次
    pub fn report_failure(&self, message: impl Into<String>, log_title: &str, entries: Vec<String>) {
        let diagnostic = Diagnostic {
            message: message.into(),
            log_title: log_title.to_string(),
            entries,
        };
        log::error!("{diagnostic}");
        lock(self.diagnostics).push(diagnostic);
    }
}
