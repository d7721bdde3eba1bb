use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use serde::Deserialize;
use slotmap::SlotMap;

use crate::backend::{
    BufferKind, ContextKind, GfxBackend, LinkStatus, ShaderStage, SyncWaitResult, TextureDesc, VertexAttribute,
};
use crate::capabilities::GfxCapabilities;
use crate::handles::{BufferId, ProgramId, ShaderId, SyncId, TextureId, VertexArrayId};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HeadlessConfig {
    pub capabilities: GfxCapabilities,
    /// fence 在到达前会报告多少次 busy
    pub fence_latency: u32,
    /// 异步链接在确定结果前会报告多少次 pending
    pub link_latency: u32,
}
impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            capabilities: GfxCapabilities::desktop(),
            fence_latency: 1,
            link_latency: 1,
        }
    }
}

/// 存活对象和调用次数的快照
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub live_textures: usize,
    pub live_buffers: usize,
    pub live_vertex_arrays: usize,
    pub live_shaders: usize,
    pub live_programs: usize,
    pub live_syncs: usize,
    pub uploads: usize,
    pub staged_uploads: usize,
    pub mipmaps: usize,
    pub compiles: usize,
    pub links: usize,
    pub flushes: usize,
}

struct HeadlessTexture {
    desc: TextureDesc,
    uploaded: bool,
}

struct HeadlessBuffer {
    _kind: BufferKind,
    _size: usize,
}

struct HeadlessShader {
    stage: ShaderStage,
    uniforms: Vec<String>,
    blocks: Vec<String>,
}

enum LinkProgress {
    Unlinked,
    Pending { remaining: u32, linked: bool },
    Done { linked: bool },
}

struct HeadlessProgram {
    shaders: Vec<ShaderId>,
    attributes: Vec<(u32, String)>,
    outputs: Vec<(u32, String)>,
    progress: LinkProgress,
    log: String,
    uniforms: Vec<String>,
    blocks: HashMap<String, u32>,
}

struct HeadlessSync {
    remaining: u32,
}

#[derive(Default)]
struct HeadlessState {
    textures: SlotMap<TextureId, HeadlessTexture>,
    buffers: SlotMap<BufferId, HeadlessBuffer>,
    vertex_arrays: SlotMap<VertexArrayId, (BufferId, Option<BufferId>)>,
    shaders: SlotMap<ShaderId, HeadlessShader>,
    programs: SlotMap<ProgramId, HeadlessProgram>,
    syncs: SlotMap<SyncId, HeadlessSync>,
    contexts: HashMap<ContextKind, ThreadId>,
    stats: HeadlessStats,
}

/// 纯内存的图形后端
///
/// 不产生任何像素，但完整地跟踪对象生命周期，并模拟了驱动的异步行为：
/// - fence 在若干次轮询之后到达，也可以被冻结
/// - 异步链接在若干次轮询之后给出结果
/// - shader 编译会做最基本的语法检查并给出类似驱动的 info log
pub struct HeadlessBackend {
    config: HeadlessConfig,
    fences_frozen: AtomicBool,
    state: Mutex<HeadlessState>,
}
// new & init
impl HeadlessBackend {
    pub fn new(config: HeadlessConfig) -> Self {
        log::info!(
            "Headless backend created (capabilities: {:?}, fence latency: {}, link latency: {})",
            config.capabilities,
            config.fence_latency,
            config.link_latency
        );
        Self {
            config,
            fences_frozen: AtomicBool::new(false),
            state: Mutex::new(HeadlessState::default()),
        }
    }
}
impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}
// getters
impl HeadlessBackend {
    pub fn stats(&self) -> HeadlessStats {
        let state = self.state();
        HeadlessStats {
            live_textures: state.textures.len(),
            live_buffers: state.buffers.len(),
            live_vertex_arrays: state.vertex_arrays.len(),
            live_shaders: state.shaders.len(),
            live_programs: state.programs.len(),
            live_syncs: state.syncs.len(),
            ..state.stats
        }
    }

    pub fn is_context_bound(&self, kind: ContextKind) -> bool {
        self.state().contexts.contains_key(&kind)
    }

    pub fn texture_desc(&self, texture: TextureId) -> Option<TextureDesc> {
        self.state().textures.get(texture).map(|t| t.desc)
    }

    pub fn is_texture_uploaded(&self, texture: TextureId) -> bool {
        self.state().textures.get(texture).is_some_and(|t| t.uploaded)
    }

    pub fn attribute_locations(&self, program: ProgramId) -> Vec<(u32, String)> {
        self.state().programs.get(program).map(|p| p.attributes.clone()).unwrap_or_default()
    }

    pub fn output_locations(&self, program: ProgramId) -> Vec<(u32, String)> {
        self.state().programs.get(program).map(|p| p.outputs.clone()).unwrap_or_default()
    }

    pub fn uniform_block_binding(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.state().programs.get(program).and_then(|p| p.blocks.get(name).copied())
    }
}
// tools
impl HeadlessBackend {
    /// 冻结后所有 fence 都不会到达，用于模拟卡住的 GPU
    pub fn set_fences_frozen(&self, frozen: bool) {
        self.fences_frozen.store(frozen, Ordering::SeqCst);
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn link(state: &HeadlessState, shaders: &[ShaderId]) -> Result<(Vec<String>, Vec<String>), String> {
        if shaders.is_empty() {
            return Err("ERROR: program has no shaders attached".to_string());
        }

        let mut stages = Vec::with_capacity(shaders.len());
        let mut uniforms = Vec::new();
        let mut blocks = Vec::new();
        for shader in shaders {
            let Some(shader) = state.shaders.get(*shader) else {
                return Err("ERROR: attached shader object is not valid".to_string());
            };
            stages.push(shader.stage);
            for uniform in &shader.uniforms {
                if !uniforms.contains(uniform) {
                    uniforms.push(uniform.clone());
                }
            }
            for block in &shader.blocks {
                if !blocks.contains(block) {
                    blocks.push(block.clone());
                }
            }
        }

        let has_compute = stages.contains(&ShaderStage::Compute);
        if has_compute && stages.iter().any(|s| *s != ShaderStage::Compute) {
            return Err("ERROR: compute shader cannot be linked with graphics stages".to_string());
        }
        if !has_compute && !stages.contains(&ShaderStage::Vertex) {
            return Err("ERROR: program has no vertex shader attached".to_string());
        }
        Ok((uniforms, blocks))
    }
}

impl GfxBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn capabilities(&self) -> GfxCapabilities {
        self.config.capabilities
    }

    fn bind_context(&self, kind: ContextKind) -> bool {
        if kind == ContextKind::Resource && !self.has(GfxCapabilities::DUAL_CONTEXT) {
            return false;
        }
        let current = thread::current().id();
        let mut state = self.state();
        match state.contexts.get(&kind) {
            Some(owner) if *owner != current => {
                log::error!("{:?} context is already bound to another thread", kind);
                false
            }
            _ => {
                state.contexts.insert(kind, current);
                true
            }
        }
    }

    fn unbind_context(&self, kind: ContextKind) {
        self.state().contexts.remove(&kind);
    }

    fn create_texture(&self, desc: &TextureDesc) -> TextureId {
        self.state().textures.insert(HeadlessTexture {
            desc: *desc,
            uploaded: false,
        })
    }

    fn upload_texture(&self, texture: TextureId, pixels: &[u8]) {
        let mut state = self.state();
        state.stats.uploads += 1;
        if let Some(texture) = state.textures.get_mut(texture) {
            if pixels.len() != texture.desc.byte_size() {
                log::error!(
                    "Texture upload size mismatch (expected {} bytes, got {})",
                    texture.desc.byte_size(),
                    pixels.len()
                );
                return;
            }
            texture.uploaded = true;
        }
    }

    fn upload_texture_staged(&self, texture: TextureId, pixels: &[u8]) {
        self.state().stats.staged_uploads += 1;
        self.upload_texture(texture, pixels);
    }

    fn generate_mipmaps(&self, texture: TextureId) {
        let mut state = self.state();
        state.stats.mipmaps += 1;
        if let Some(texture) = state.textures.get_mut(texture) {
            texture.desc.mip_levels = TextureDesc::full_mip_levels(texture.desc.width, texture.desc.height);
        }
    }

    fn delete_texture(&self, texture: TextureId) {
        self.state().textures.remove(texture);
    }

    fn create_buffer(&self, kind: BufferKind, data: &[u8]) -> BufferId {
        self.state().buffers.insert(HeadlessBuffer {
            _kind: kind,
            _size: data.len(),
        })
    }

    fn delete_buffer(&self, buffer: BufferId) {
        self.state().buffers.remove(buffer);
    }

    fn create_vertex_array(
        &self,
        vertex_buffer: BufferId,
        index_buffer: Option<BufferId>,
        _stride: u32,
        _attributes: &[VertexAttribute],
    ) -> VertexArrayId {
        self.state().vertex_arrays.insert((vertex_buffer, index_buffer))
    }

    fn delete_vertex_array(&self, vertex_array: VertexArrayId) {
        self.state().vertex_arrays.remove(vertex_array);
    }

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<(ShaderId, String), String> {
        let _span = tracy_client::span!("HeadlessBackend::compile_shader");
        let mut state = self.state();
        state.stats.compiles += 1;

        let parsed = glsl_check::check(source)?;
        let shader = state.shaders.insert(HeadlessShader {
            stage,
            uniforms: parsed.uniforms,
            blocks: parsed.blocks,
        });
        Ok((shader, parsed.warnings.join("\n")))
    }

    fn delete_shader(&self, shader: ShaderId) {
        self.state().shaders.remove(shader);
    }

    fn create_program(&self) -> ProgramId {
        self.state().programs.insert(HeadlessProgram {
            shaders: Vec::new(),
            attributes: Vec::new(),
            outputs: Vec::new(),
            progress: LinkProgress::Unlinked,
            log: String::new(),
            uniforms: Vec::new(),
            blocks: HashMap::new(),
        })
    }

    fn attach_shader(&self, program: ProgramId, shader: ShaderId) {
        if let Some(program) = self.state().programs.get_mut(program)
            && !program.shaders.contains(&shader)
        {
            program.shaders.push(shader);
        }
    }

    fn detach_shader(&self, program: ProgramId, shader: ShaderId) {
        if let Some(program) = self.state().programs.get_mut(program) {
            program.shaders.retain(|s| *s != shader);
        }
    }

    fn bind_attribute_location(&self, program: ProgramId, location: u32, name: &str) {
        if let Some(program) = self.state().programs.get_mut(program) {
            program.attributes.push((location, name.to_string()));
        }
    }

    fn bind_output_location(&self, program: ProgramId, location: u32, name: &str) {
        if let Some(program) = self.state().programs.get_mut(program) {
            program.outputs.push((location, name.to_string()));
        }
    }

    fn link_program(&self, program: ProgramId) {
        let _span = tracy_client::span!("HeadlessBackend::link_program");
        let mut state = self.state();
        state.stats.links += 1;

        let Some(shaders) = state.programs.get(program).map(|p| p.shaders.clone()) else {
            return;
        };
        let result = Self::link(&state, &shaders);
        let async_link = self.has(GfxCapabilities::ASYNC_LINK) && self.config.link_latency > 0;

        if let Some(program) = state.programs.get_mut(program) {
            let linked = result.is_ok();
            match result {
                Ok((uniforms, _blocks)) => {
                    program.uniforms = uniforms;
                    program.log.clear();
                }
                Err(log) => program.log = log,
            }
            program.progress = if async_link {
                LinkProgress::Pending {
                    remaining: self.config.link_latency,
                    linked,
                }
            } else {
                LinkProgress::Done { linked }
            };
        }
    }

    fn link_status(&self, program: ProgramId) -> LinkStatus {
        let mut state = self.state();
        let Some(program) = state.programs.get_mut(program) else {
            return LinkStatus::Failed;
        };
        match &mut program.progress {
            LinkProgress::Unlinked => LinkStatus::Failed,
            LinkProgress::Pending { remaining, linked } => {
                if *remaining > 0 {
                    *remaining -= 1;
                    return LinkStatus::Pending;
                }
                let linked = *linked;
                program.progress = LinkProgress::Done { linked };
                if linked { LinkStatus::Linked } else { LinkStatus::Failed }
            }
            LinkProgress::Done { linked: true } => LinkStatus::Linked,
            LinkProgress::Done { linked: false } => LinkStatus::Failed,
        }
    }

    fn program_log(&self, program: ProgramId) -> String {
        self.state().programs.get(program).map(|p| p.log.clone()).unwrap_or_default()
    }

    fn bind_uniform_block(&self, program: ProgramId, name: &str, binding: u32) -> bool {
        let mut state = self.state();
        let Some(shaders) = state.programs.get(program).map(|p| p.shaders.clone()) else {
            return false;
        };
        let declared = shaders
            .iter()
            .filter_map(|s| state.shaders.get(*s))
            .any(|s| s.blocks.iter().any(|b| b == name));
        if !declared {
            return false;
        }
        if let Some(program) = state.programs.get_mut(program) {
            program.blocks.insert(name.to_string(), binding);
        }
        true
    }

    fn active_uniforms(&self, program: ProgramId) -> Vec<String> {
        self.state().programs.get(program).map(|p| p.uniforms.clone()).unwrap_or_default()
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<i32> {
        let state = self.state();
        let program = state.programs.get(program)?;
        program.uniforms.iter().position(|u| u == name).map(|i| i as i32)
    }

    fn delete_program(&self, program: ProgramId) {
        self.state().programs.remove(program);
    }

    fn fence_sync(&self) -> Option<SyncId> {
        if !self.has(GfxCapabilities::FENCE_SYNC) {
            return None;
        }
        let remaining = self.config.fence_latency;
        Some(self.state().syncs.insert(HeadlessSync { remaining }))
    }

    fn client_wait(&self, sync: SyncId, timeout_ns: u64, flush: bool) -> SyncWaitResult {
        if flush {
            self.flush();
        }
        let frozen = self.fences_frozen.load(Ordering::SeqCst);
        let mut state = self.state();
        let Some(sync) = state.syncs.get_mut(sync) else {
            return SyncWaitResult::Failed;
        };

        if frozen {
            return SyncWaitResult::TimeoutExpired;
        }
        // 有界等待足够让模拟的命令流跑完
        if timeout_ns > 0 || sync.remaining == 0 {
            sync.remaining = 0;
            return SyncWaitResult::Signaled;
        }
        sync.remaining -= 1;
        SyncWaitResult::TimeoutExpired
    }

    fn delete_sync(&self, sync: SyncId) {
        self.state().syncs.remove(sync);
    }

    fn flush(&self) {
        self.state().stats.flushes += 1;
    }
}

/// 一个非常粗糙的 GLSL 检查器，只覆盖 headless 后端需要模拟的错误
mod glsl_check {
    pub struct Parsed {
        pub uniforms: Vec<String>,
        pub blocks: Vec<String>,
        pub warnings: Vec<String>,
    }

    pub fn check(source: &str) -> Result<Parsed, String> {
        let mut parsed = Parsed {
            uniforms: Vec::new(),
            blocks: Vec::new(),
            warnings: Vec::new(),
        };
        let mut errors = Vec::new();
        let mut seen_version = false;
        let mut stack: Vec<(char, usize)> = Vec::new();
        let mut in_block_comment = false;

        for (index, raw_line) in source.lines().enumerate() {
            let line_no = index + 1;
            let line = strip_comments(raw_line, &mut in_block_comment);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if !seen_version {
                if !trimmed.starts_with("#version") {
                    errors.push(format!("ERROR: 0:{line_no}: '' : #version required and missing"));
                }
                seen_version = true;
            }

            if let Some(text) = trimmed.strip_prefix("#error") {
                errors.push(format!("ERROR: 0:{line_no}: '#error' : {}", text.trim()));
                continue;
            }
            if let Some(text) = trimmed.strip_prefix("#warning") {
                parsed.warnings.push(format!("WARNING: 0:{line_no}: '#warning' : {}", text.trim()));
                continue;
            }
            if trimmed.starts_with('#') {
                continue;
            }

            parse_uniform(trimmed, &mut parsed);

            for c in trimmed.chars() {
                match c {
                    '{' | '(' | '[' => stack.push((c, line_no)),
                    '}' | ')' | ']' => {
                        let expected = match c {
                            '}' => '{',
                            ')' => '(',
                            _ => '[',
                        };
                        match stack.pop() {
                            Some((open, _)) if open == expected => {}
                            _ => errors.push(format!("ERROR: 0:{line_no}: '{c}' : syntax error, unexpected '{c}'")),
                        }
                    }
                    _ => {}
                }
            }
        }

        if !seen_version {
            errors.push("ERROR: 0:1: '' : #version required and missing".to_string());
        }
        if let Some((open, line_no)) = stack.last() {
            errors.push(format!(
                "ERROR: 0:{line_no}: '{open}' : syntax error, unexpected end of file, unmatched '{open}'"
            ));
        }

        if errors.is_empty() { Ok(parsed) } else { Err(errors.join("\n")) }
    }

    fn strip_comments(line: &str, in_block_comment: &mut bool) -> String {
        let mut out = String::with_capacity(line.len());
        let mut rest = line;
        loop {
            if *in_block_comment {
                match rest.find("*/") {
                    Some(end) => {
                        rest = &rest[end + 2..];
                        *in_block_comment = false;
                    }
                    None => return out,
                }
            }
            let line_comment = rest.find("//");
            let block_comment = rest.find("/*");
            match (line_comment, block_comment) {
                (Some(l), Some(b)) if l < b => {
                    out.push_str(&rest[..l]);
                    return out;
                }
                (Some(l), None) => {
                    out.push_str(&rest[..l]);
                    return out;
                }
                (_, Some(b)) => {
                    out.push_str(&rest[..b]);
                    rest = &rest[b + 2..];
                    *in_block_comment = true;
                }
                (None, None) => {
                    out.push_str(rest);
                    return out;
                }
            }
        }
    }

    /// `uniform vec4 u_v4Color;` 或 `layout(std140) uniform b_Global {`
    fn parse_uniform(line: &str, parsed: &mut Parsed) {
        let line = match line.strip_prefix("layout") {
            Some(rest) => match rest.find(')') {
                Some(end) => rest[end + 1..].trim_start(),
                None => return,
            },
            None => line,
        };
        let Some(rest) = line.strip_prefix("uniform ") else {
            return;
        };

        let tokens: Vec<&str> = rest
            .split(|c: char| c.is_whitespace() || c == ';' || c == '{')
            .filter(|t| !t.is_empty())
            .collect();
        let is_block = rest.contains('{') || (tokens.len() == 1 && !rest.contains(';'));
        if is_block {
            if let Some(name) = tokens.first() {
                parsed.blocks.push(name.to_string());
            }
            return;
        }

        // 跳过精度修饰符
        let tokens: Vec<&str> = tokens
            .into_iter()
            .filter(|t| !matches!(*t, "highp" | "mediump" | "lowp"))
            .collect();
        if let Some(name) = tokens.get(1) {
            let name = name.split('[').next().unwrap_or(name);
            parsed.uniforms.push(name.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = "#version 330\nuniform mat4 u_m4Transform;\nlayout(std140) uniform b_Global {\n  mat4 u_m4ViewProj;\n};\nvoid main() { gl_Position = vec4(0.0); }\n";
    const FRAGMENT: &str = "#version 330\nuniform sampler2D u_as2Texture[2];\nuniform lowp vec4 u_v4Color; // tint\nvoid main() {}\n";

    #[test]
    fn test_compile_collects_uniforms() {
        let backend = HeadlessBackend::default();
        let (vs, log) = backend.compile_shader(ShaderStage::Vertex, VERTEX).unwrap();
        assert!(log.is_empty());
        let (fs, _) = backend.compile_shader(ShaderStage::Fragment, FRAGMENT).unwrap();

        let program = backend.create_program();
        backend.attach_shader(program, vs);
        backend.attach_shader(program, fs);
        backend.link_program(program);
        assert_eq!(backend.link_status(program), LinkStatus::Pending);
        assert_eq!(backend.link_status(program), LinkStatus::Linked);

        assert_eq!(
            backend.active_uniforms(program),
            vec!["u_m4Transform".to_string(), "u_as2Texture".to_string(), "u_v4Color".to_string()]
        );
        assert_eq!(backend.uniform_location(program, "u_v4Color"), Some(2));
        assert!(backend.bind_uniform_block(program, "b_Global", 3));
        assert!(!backend.bind_uniform_block(program, "b_Missing", 0));
        assert_eq!(backend.uniform_block_binding(program, "b_Global"), Some(3));
    }

    #[test]
    fn test_compile_errors() {
        let backend = HeadlessBackend::default();

        let err = backend.compile_shader(ShaderStage::Fragment, "void main() {}").unwrap_err();
        assert!(err.contains("#version required"));

        let err = backend
            .compile_shader(ShaderStage::Fragment, "#version 330\nvoid main() {\n")
            .unwrap_err();
        assert!(err.contains("unexpected end of file"));

        let err = backend
            .compile_shader(ShaderStage::Fragment, "#version 330\n#error broken on purpose\n")
            .unwrap_err();
        assert_eq!(err, "ERROR: 0:2: '#error' : broken on purpose");

        // 注释里的括号不参与匹配
        assert!(
            backend
                .compile_shader(ShaderStage::Vertex, "#version 330\n/* { */ void main() {} // (\n")
                .is_ok()
        );
        assert_eq!(backend.stats().live_shaders, 1);
    }

    #[test]
    fn test_link_failures() {
        let backend = HeadlessBackend::new(HeadlessConfig {
            capabilities: GfxCapabilities::desktop() - GfxCapabilities::ASYNC_LINK,
            ..Default::default()
        });

        let empty = backend.create_program();
        backend.link_program(empty);
        assert_eq!(backend.link_status(empty), LinkStatus::Failed);
        assert!(backend.program_log(empty).contains("no shaders"));

        let (fs, _) = backend.compile_shader(ShaderStage::Fragment, FRAGMENT).unwrap();
        let fragment_only = backend.create_program();
        backend.attach_shader(fragment_only, fs);
        backend.link_program(fragment_only);
        assert_eq!(backend.link_status(fragment_only), LinkStatus::Failed);
        assert!(backend.program_log(fragment_only).contains("no vertex shader"));
    }

    #[test]
    fn test_resource_context_requires_dual_context() {
        let backend = HeadlessBackend::new(HeadlessConfig {
            capabilities: GfxCapabilities::minimal(),
            ..Default::default()
        });
        assert!(!backend.bind_context(ContextKind::Resource));
        assert!(backend.bind_context(ContextKind::Render));
        assert!(backend.is_context_bound(ContextKind::Render));
        backend.unbind_context(ContextKind::Render);
        assert!(!backend.is_context_bound(ContextKind::Render));
    }

    #[test]
    fn test_texture_lifecycle() {
        let backend = HeadlessBackend::default();
        let desc = TextureDesc::new_2d(4, 2, crate::backend::PixelFormat::Rgba8);
        let texture = backend.create_texture(&desc);
        backend.upload_texture_staged(texture, &[0u8; 4 * 2 * 4]);
        backend.generate_mipmaps(texture);

        assert!(backend.is_texture_uploaded(texture));
        assert_eq!(backend.texture_desc(texture).map(|d| d.mip_levels), Some(3));
        let stats = backend.stats();
        assert_eq!((stats.uploads, stats.staged_uploads, stats.mipmaps), (1, 1, 1));

        backend.delete_texture(texture);
        assert_eq!(backend.stats().live_textures, 0);
    }
}
