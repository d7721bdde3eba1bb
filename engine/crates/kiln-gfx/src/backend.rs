use std::fmt;

use crate::capabilities::GfxCapabilities;
use crate::handles::{BufferId, ProgramId, ShaderId, SyncId, TextureId, VertexArrayId};

/// 两个长期存在的上下文
///
/// Render 属于主线程，Resource 属于资源线程，二者共享对象命名空间
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum ContextKind {
    Render,
    Resource,
}

/// Fence 的检查方式
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum FenceCheck {
    #[default]
    Normal,
    /// 检查前先 flush 命令流，保证 fence 能够前进
    Flushed,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SyncWaitResult {
    Signaled,
    TimeoutExpired,
    Failed,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LinkStatus {
    Pending,
    Linked,
    Failed,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum ShaderStage {
    Vertex,
    TessControl,
    TessEvaluation,
    Geometry,
    Fragment,
    Compute,
}
impl ShaderStage {
    /// 根据文件扩展名识别 shader 阶段
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "vs" | "vert" => Some(Self::Vertex),
            "tcs" | "tesc" => Some(Self::TessControl),
            "tes" | "tese" => Some(Self::TessEvaluation),
            "gs" | "geom" => Some(Self::Geometry),
            "fs" | "frag" => Some(Self::Fragment),
            "cs" | "comp" => Some(Self::Compute),
            _ => None,
        }
    }

    /// 注入到源码里的阶段宏
    pub fn define(&self) -> &'static str {
        match self {
            Self::Vertex => "_KILN_VERTEX_SHADER_",
            Self::TessControl => "_KILN_TESS_CONTROL_SHADER_",
            Self::TessEvaluation => "_KILN_TESS_EVALUATION_SHADER_",
            Self::Geometry => "_KILN_GEOMETRY_SHADER_",
            Self::Fragment => "_KILN_FRAGMENT_SHADER_",
            Self::Compute => "_KILN_COMPUTE_SHADER_",
        }
    }
}
impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Vertex => "vertex",
            Self::TessControl => "tess-control",
            Self::TessEvaluation => "tess-evaluation",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PixelFormat {
    R8,
    Rg8,
    Rgb8,
    Rgba8,
}
impl PixelFormat {
    pub fn from_components(components: u8) -> Option<Self> {
        match components {
            1 => Some(Self::R8),
            2 => Some(Self::Rg8),
            3 => Some(Self::Rgb8),
            4 => Some(Self::Rgba8),
            _ => None,
        }
    }

    #[inline]
    pub fn components(&self) -> u8 {
        match self {
            Self::R8 => 1,
            Self::Rg8 => 2,
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub mip_levels: u32,
}
impl TextureDesc {
    pub fn new_2d(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            mip_levels: 1,
        }
    }

    /// 完整 mip 链的层数
    pub fn full_mip_levels(width: u32, height: u32) -> u32 {
        32 - width.max(height).max(1).leading_zeros()
    }

    #[inline]
    pub fn byte_size(&self) -> usize {
        self.width as usize * self.height as usize * self.format.components() as usize
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
}

/// 顶点属性在交错顶点里的位置
#[derive(Clone, Copy, Debug)]
pub struct VertexAttribute {
    pub location: u32,
    pub components: u8,
    pub offset: u32,
}

/// 图形上下文提供者
///
/// 所有方法都只能由绑定了对应上下文的线程调用。
/// 这里不存在同步的 GPU 等待，唯一允许阻塞的是 `client_wait` 的有界超时。
pub trait GfxBackend: Send + Sync {
    fn name(&self) -> &str;
    fn capabilities(&self) -> GfxCapabilities;
    fn has(&self, caps: GfxCapabilities) -> bool {
        self.capabilities().contains(caps)
    }

    // context
    /// 把上下文绑定到调用线程，失败时返回 false
    fn bind_context(&self, kind: ContextKind) -> bool;
    fn unbind_context(&self, kind: ContextKind);

    // texture
    fn create_texture(&self, desc: &TextureDesc) -> TextureId;
    fn upload_texture(&self, texture: TextureId, pixels: &[u8]);
    /// 经由 pixel buffer 上传，调用返回时数据可能仍在传输
    fn upload_texture_staged(&self, texture: TextureId, pixels: &[u8]);
    fn generate_mipmaps(&self, texture: TextureId);
    fn delete_texture(&self, texture: TextureId);

    // buffer
    fn create_buffer(&self, kind: BufferKind, data: &[u8]) -> BufferId;
    fn delete_buffer(&self, buffer: BufferId);
    fn create_vertex_array(
        &self,
        vertex_buffer: BufferId,
        index_buffer: Option<BufferId>,
        stride: u32,
        attributes: &[VertexAttribute],
    ) -> VertexArrayId;
    fn delete_vertex_array(&self, vertex_array: VertexArrayId);

    // shader
    /// 编译成功返回 shader id 和 info log (可能包含警告)，失败返回 info log
    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<(ShaderId, String), String>;
    fn delete_shader(&self, shader: ShaderId);

    // program
    fn create_program(&self) -> ProgramId;
    fn attach_shader(&self, program: ProgramId, shader: ShaderId);
    fn detach_shader(&self, program: ProgramId, shader: ShaderId);
    fn bind_attribute_location(&self, program: ProgramId, location: u32, name: &str);
    fn bind_output_location(&self, program: ProgramId, location: u32, name: &str);
    fn link_program(&self, program: ProgramId);
    /// 没有 ASYNC_LINK 能力时，`link_program` 返回后状态已确定
    fn link_status(&self, program: ProgramId) -> LinkStatus;
    fn program_log(&self, program: ProgramId) -> String;
    fn bind_uniform_block(&self, program: ProgramId, name: &str, binding: u32) -> bool;
    fn active_uniforms(&self, program: ProgramId) -> Vec<String>;
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<i32>;
    fn delete_program(&self, program: ProgramId);

    // sync
    /// 在命令流中插入 fence；不支持时返回 None
    fn fence_sync(&self) -> Option<SyncId>;
    fn client_wait(&self, sync: SyncId, timeout_ns: u64, flush: bool) -> SyncWaitResult;
    fn delete_sync(&self, sync: SyncId);
    fn flush(&self);
}
