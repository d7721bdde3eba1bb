use std::collections::HashMap;
use std::sync::Arc;

use kiln_gfx::backend::{FenceCheck, GfxBackend, LinkStatus};
use kiln_gfx::fence::{FenceStatus, GfxFence};
use kiln_gfx::handles::{ProgramId, ShaderId};
use kiln_resource::ptr::ResourcePtr;
use kiln_resource::resource::{LoadContext, Resource, ResourceKind};
use kiln_resource::status::LoadStatus;

use crate::shader::Shader;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ProgramStatus {
    /// 正在定义，可以添加 shader 和绑定
    #[default]
    New,
    /// 定义完成，等待所有 shader 可用
    Defined,
    /// 已经提交链接，等待结果
    Linking,
    /// 链接成功，正在绑定 uniform block 并查询 uniform
    Binding,
    Finished,
    Failed,
}

/// shader program
///
/// 没有文件，由使用者通过 builder 方法定义，然后 [`Self::finish`]：
/// ```ignore
/// let mut program = Program::default();
/// program
///     .attach_shader(vertex)
///     .attach_shader(fragment)
///     .bind_attribute(0, "a_position")
///     .bind_uniform_block("b_Global", 0)
///     .finish();
/// let program = manager.load_new_with(program)?;
/// ```
///
/// 加载会一直 `Busy`，直到所有 shader 可用；任何一个 shader 失败，program 也失败。
/// 卸载后回到 `Defined`，定义数据保留，可以直接重新加载。
#[derive(Default)]
pub struct Program {
    shaders: Vec<ResourcePtr<Shader>>,
    attributes: Vec<(u32, String)>,
    outputs: Vec<(u32, String)>,
    uniform_blocks: Vec<(String, u32)>,
    status: ProgramStatus,

    program: Option<ProgramId>,
    attached: Vec<ShaderId>,
    uniforms: HashMap<String, i32>,
    fence: GfxFence,
}
// builder
impl Program {
    pub fn attach_shader(&mut self, shader: ResourcePtr<Shader>) -> &mut Self {
        if self.is_definable() {
            self.shaders.push(shader);
        }
        self
    }

    pub fn bind_attribute(&mut self, location: u32, name: impl Into<String>) -> &mut Self {
        if self.is_definable() {
            self.attributes.push((location, name.into()));
        }
        self
    }

    pub fn bind_output(&mut self, location: u32, name: impl Into<String>) -> &mut Self {
        if self.is_definable() {
            self.outputs.push((location, name.into()));
        }
        self
    }

    pub fn bind_uniform_block(&mut self, name: impl Into<String>, binding: u32) -> &mut Self {
        if self.is_definable() {
            self.uniform_blocks.push((name.into(), binding));
        }
        self
    }

    /// 结束定义，之后资源线程才会开始链接
    pub fn finish(&mut self) -> &mut Self {
        if self.is_definable() {
            self.status = ProgramStatus::Defined;
        }
        self
    }

    /// 清空定义，只能在未加载时调用
    pub fn restart(&mut self) -> &mut Self {
        if self.program.is_some() {
            log::warn!("Shader-Program cannot be redefined while it is loaded");
            return self;
        }
        self.shaders.clear();
        self.attributes.clear();
        self.outputs.clear();
        self.uniform_blocks.clear();
        self.status = ProgramStatus::New;
        self
    }

    fn is_definable(&self) -> bool {
        if self.status != ProgramStatus::New {
            log::warn!("Shader-Program definition is already finished, call restart() first");
            return false;
        }
        true
    }
}
// getters
impl Program {
    #[inline]
    pub fn id(&self) -> Option<ProgramId> {
        self.program
    }

    #[inline]
    pub fn status(&self) -> ProgramStatus {
        self.status
    }

    #[inline]
    pub fn shaders(&self) -> &[ResourcePtr<Shader>] {
        &self.shaders
    }

    /// 链接后查询到的 uniform location
    pub fn uniform_location(&self, name: &str) -> Option<i32> {
        self.uniforms.get(name).copied()
    }

    pub fn uniform_names(&self) -> impl Iterator<Item = &str> {
        self.uniforms.keys().map(String::as_str)
    }
}
// 状态机的每一步
impl Program {
    fn start_link(&mut self, ctx: &LoadContext<'_>) -> LoadStatus {
        if let Some(failed) = self.shaders.iter().find(|s| s.status().is_failure()) {
            self.status = ProgramStatus::Failed;
            ctx.report_failure(
                format!("Shader-Program ({}) could not be linked", ctx.name()),
                "Shader-Program Error Log",
                vec![format!("Shader ({}) failed to load: {}", failed.name(), failed.status())],
            );
            return LoadStatus::InvalidData;
        }
        if self.shaders.iter().any(|s| !s.is_usable()) {
            return LoadStatus::Busy;
        }

        let gfx = ctx.gfx();
        let program = gfx.create_program();
        self.attached = self.shaders.iter().filter_map(|s| s.try_get().and_then(|s| s.id())).collect();
        for shader in &self.attached {
            gfx.attach_shader(program, *shader);
        }
        for (location, name) in &self.attributes {
            gfx.bind_attribute_location(program, *location, name);
        }
        for (location, name) in &self.outputs {
            gfx.bind_output_location(program, *location, name);
        }
        gfx.link_program(program);

        self.program = Some(program);
        self.status = ProgramStatus::Linking;
        LoadStatus::Busy
    }

    fn poll_link(&mut self, ctx: &LoadContext<'_>, program: ProgramId) -> LoadStatus {
        let gfx = ctx.gfx();
        match gfx.link_status(program) {
            LinkStatus::Pending => LoadStatus::Busy,
            LinkStatus::Linked => {
                self.status = ProgramStatus::Binding;
                LoadStatus::Busy
            }
            LinkStatus::Failed => {
                let mut entries = vec![gfx.program_log(program)];
                for shader in &self.shaders {
                    let info_log = shader.try_get().map(|s| s.info_log().to_string()).unwrap_or_default();
                    entries.push(format!("({})\n{}", shader.name(), info_log));
                }
                self.release(gfx);
                self.status = ProgramStatus::Failed;
                ctx.report_failure(
                    format!("Shader-Program ({}) could not be linked", ctx.name()),
                    "Shader-Program Error Log",
                    entries,
                );
                LoadStatus::InvalidData
            }
        }
    }

    fn bind(&mut self, ctx: &LoadContext<'_>, program: ProgramId) -> LoadStatus {
        let gfx = ctx.gfx();
        for (name, binding) in &self.uniform_blocks {
            if !gfx.bind_uniform_block(program, name, *binding) {
                log::warn!("Uniform block ({}) not found in Shader-Program ({})", name, ctx.name());
            }
        }
        self.uniforms = gfx
            .active_uniforms(program)
            .into_iter()
            .filter_map(|name| gfx.uniform_location(program, &name).map(|location| (name, location)))
            .collect();

        if self.fence.create(gfx) {
            return LoadStatus::Busy;
        }
        self.status = ProgramStatus::Finished;
        log::info!("Shader-Program ({}) linked", ctx.name());
        LoadStatus::Ok
    }

    fn release(&mut self, gfx: &Arc<dyn GfxBackend>) -> bool {
        let Some(program) = self.program.take() else {
            return false;
        };
        for shader in self.attached.drain(..) {
            gfx.detach_shader(program, shader);
        }
        gfx.delete_program(program);
        true
    }
}

impl Resource for Program {
    const KIND: ResourceKind = ResourceKind::Program;

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> LoadStatus {
        let _span = tracy_client::span!("Program::load");
        match ctx.check_fence(&mut self.fence, FenceCheck::Normal) {
            FenceStatus::Busy => return LoadStatus::Busy,
            FenceStatus::Satisfied => {
                self.status = ProgramStatus::Finished;
                log::info!("Shader-Program ({}) linked asynchronous", ctx.name());
                return LoadStatus::Ok;
            }
            FenceStatus::Unset => {}
        }

        match (self.status, self.program) {
            (ProgramStatus::New, _) => LoadStatus::Busy,
            (ProgramStatus::Defined, _) => self.start_link(ctx),
            (ProgramStatus::Linking, Some(program)) => self.poll_link(ctx, program),
            (ProgramStatus::Binding, Some(program)) => self.bind(ctx, program),
            _ => LoadStatus::InvalidCall,
        }
    }

    fn unload(&mut self, gfx: &Arc<dyn GfxBackend>) -> LoadStatus {
        self.fence.delete();
        self.uniforms.clear();
        let released = self.release(gfx);
        if self.status != ProgramStatus::New {
            self.status = ProgramStatus::Defined;
        }
        if released { LoadStatus::Ok } else { LoadStatus::InvalidCall }
    }
}
