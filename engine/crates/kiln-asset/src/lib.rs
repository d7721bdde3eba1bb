//! 资源类型
//!
//! 每个类型都实现 [`kiln_resource::resource::Resource`]，把加载拆成若干步：
//! 读取文件、解码、上传，最后一步以 fence 守护。
//!
//! | 类型 | 文件 | 异步完成方式 |
//! |------|------|--------------|
//! | [`texture::Texture`] | png / jpg / ... | 上传后 fence |
//! | [`model::Model`] | obj | 上传后 fence (flush) |
//! | [`shader::Shader`] | vs / fs / ... | 同步编译 |
//! | [`program::Program`] | 无 | 依赖 shader，异步链接，绑定后 fence |
//! | [`font::Font`] | ttf / otf | 同步解析 |
//! | [`music::Music`] | ogg | 同步解析头部 |

pub mod font;
pub mod model;
pub mod music;
pub mod program;
pub mod shader;
pub mod texture;

#[cfg(test)]
pub(crate) mod test_utils {
    use std::sync::{Arc, Mutex};

    use kiln_gfx::backend::GfxBackend;
    use kiln_gfx::headless::{HeadlessBackend, HeadlessConfig};
    use kiln_resource::config::ResourceConfig;
    use kiln_resource::file::ResourceFile;
    use kiln_resource::resource::{Diagnostic, LoadContext, Resource};
    use kiln_resource::status::LoadStatus;

    pub fn headless(config: HeadlessConfig) -> (Arc<HeadlessBackend>, Arc<dyn GfxBackend>) {
        let backend = Arc::new(HeadlessBackend::new(config));
        let gfx: Arc<dyn GfxBackend> = backend.clone();
        (backend, gfx)
    }

    /// 反复调用 `load` 直到终态，返回终态和调用次数
    pub fn drive<T: Resource>(
        resource: &mut T,
        gfx: &Arc<dyn GfxBackend>,
        file: Option<&ResourceFile>,
        diagnostics: &Mutex<Vec<Diagnostic>>,
    ) -> (LoadStatus, usize) {
        let config = ResourceConfig::default();
        let name = file.map(|f| f.path().to_string()).unwrap_or_else(|| "<anonymous>".to_string());
        for calls in 1..=100 {
            let mut ctx = LoadContext::new(gfx, &config, &name, file.map(|f| f.path()), file, diagnostics);
            let status = resource.load(&mut ctx);
            if !status.is_busy() {
                return (status, calls);
            }
        }
        (LoadStatus::Busy, 100)
    }
}
