use std::sync::Arc;

use kiln_gfx::backend::{GfxBackend, ShaderStage};
use kiln_gfx::handles::ShaderId;
use kiln_resource::resource::{LoadContext, Resource, ResourceKind};
use kiln_resource::status::LoadStatus;

const VALID_EXTENSIONS: &str = "vs, vert, tcs, tesc, tes, tese, gs, geom, fs, frag, cs, comp";

/// 单个 shader 阶段
///
/// 阶段由文件扩展名决定。编译前在源码前面依次拼接：
/// 版本号、阶段宏、全局代码、这个 shader 自己的附加代码。
#[derive(Default)]
pub struct Shader {
    custom_code: String,

    stage: Option<ShaderStage>,
    shader: Option<ShaderId>,
    info_log: String,
}
// new & init
impl Shader {
    /// 只对这个 shader 生效的附加代码，例如 `#define` 开关
    pub fn with_custom_code(custom_code: impl Into<String>) -> Self {
        Self {
            custom_code: custom_code.into(),
            ..Default::default()
        }
    }
}
// getters
impl Shader {
    #[inline]
    pub fn id(&self) -> Option<ShaderId> {
        self.shader
    }

    #[inline]
    pub fn stage(&self) -> Option<ShaderStage> {
        self.stage
    }

    /// 编译器给出的 info log，编译成功时也可能包含警告
    #[inline]
    pub fn info_log(&self) -> &str {
        &self.info_log
    }

    #[inline]
    pub fn custom_code(&self) -> &str {
        &self.custom_code
    }
}
// tools
impl Shader {
    fn compose(&self, ctx: &LoadContext<'_>, stage: ShaderStage, text: &str) -> String {
        let config = ctx.config();
        format!(
            "#version {}\n#define {}\n{}\n{}\n{}",
            config.shader_version,
            stage.define(),
            config.shader_global_code,
            self.custom_code,
            text
        )
    }
}

impl Resource for Shader {
    const KIND: ResourceKind = ResourceKind::Shader;

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> LoadStatus {
        let _span = tracy_client::span!("Shader::load");
        if self.shader.is_some() {
            return LoadStatus::InvalidCall;
        }

        let data = match ctx.source() {
            Ok(data) => data,
            Err(status) => return status,
        };
        let extension = ctx.file().and_then(|f| f.extension()).unwrap_or_default();
        let Some(stage) = ShaderStage::from_extension(extension) else {
            ctx.report_failure(
                format!("Shader ({}) could not be identified (valid extensions: {VALID_EXTENSIONS})", ctx.name()),
                "",
                Vec::new(),
            );
            return LoadStatus::InvalidData;
        };
        let Ok(text) = std::str::from_utf8(data) else {
            ctx.report_failure(format!("Shader ({}) is not valid UTF-8", ctx.name()), "", Vec::new());
            return LoadStatus::InvalidData;
        };

        let source = self.compose(ctx, stage, text);
        match ctx.gfx().compile_shader(stage, &source) {
            Ok((shader, info_log)) => {
                if !info_log.is_empty() {
                    log::warn!("Shader ({}) compiled with warnings:\n{}", ctx.name(), info_log);
                }
                self.shader = Some(shader);
                self.stage = Some(stage);
                self.info_log = info_log;
                log::info!("Shader ({}) compiled as {} stage", ctx.name(), stage);
                LoadStatus::Ok
            }
            Err(info_log) => {
                ctx.report_failure(
                    format!("Shader ({}) could not be compiled", ctx.name()),
                    "Shader Error Log",
                    vec![info_log.clone()],
                );
                self.info_log = info_log;
                LoadStatus::InvalidData
            }
        }
    }

    fn unload(&mut self, gfx: &Arc<dyn GfxBackend>) -> LoadStatus {
        self.info_log.clear();
        let Some(shader) = self.shader.take() else {
            return LoadStatus::InvalidCall;
        };
        gfx.delete_shader(shader);
        self.stage = None;
        LoadStatus::Ok
    }
}
