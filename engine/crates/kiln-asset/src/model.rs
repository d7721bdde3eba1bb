use std::io::Cursor;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use kiln_gfx::backend::{BufferKind, FenceCheck, GfxBackend, VertexAttribute};
use kiln_gfx::capabilities::GfxCapabilities;
use kiln_gfx::fence::{FenceStatus, GfxFence};
use kiln_gfx::handles::{BufferId, VertexArrayId};
use kiln_resource::resource::{LoadContext, Resource, ResourceKind};
use kiln_resource::status::LoadStatus;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub texcoord: [f32; 2],
    pub normal: [f32; 3],
}
impl ModelVertex {
    pub const STRIDE: u32 = size_of::<Self>() as u32;

    pub fn attributes() -> [VertexAttribute; 3] {
        [
            VertexAttribute {
                location: 0,
                components: 3,
                offset: 0,
            },
            VertexAttribute {
                location: 1,
                components: 2,
                offset: 12,
            },
            VertexAttribute {
                location: 2,
                components: 3,
                offset: 20,
            },
        ]
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IndexFormat {
    U16,
    U32,
}

/// 包围盒与包围球
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct ModelBounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
    /// 以包围盒中心为球心
    pub radius: f32,
}
impl ModelBounds {
    fn from_vertices(vertices: &[ModelVertex]) -> Self {
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for v in vertices {
            for axis in 0..3 {
                min[axis] = min[axis].min(v.position[axis]);
                max[axis] = max[axis].max(v.position[axis]);
            }
        }
        let center: [f32; 3] = std::array::from_fn(|axis| (min[axis] + max[axis]) * 0.5);
        let radius = vertices
            .iter()
            .map(|v| (0..3).map(|axis| (v.position[axis] - center[axis]).powi(2)).sum::<f32>().sqrt())
            .fold(0.0, f32::max);
        Self { min, max, radius }
    }

    pub fn center(&self) -> [f32; 3] {
        std::array::from_fn(|axis| (self.min[axis] + self.max[axis]) * 0.5)
    }
}

/// 解析后的几何数据，obj 中的所有对象合并为一个网格
struct ModelGeometry {
    vertices: Vec<ModelVertex>,
    indices: Vec<u32>,
}

/// obj 模型
///
/// 所有对象合并为一个交错顶点缓冲和一个索引缓冲；顶点数允许时使用 16 位索引。
/// 上传完成后以 fence 守护，检查 fence 时总是先 flush。
#[derive(Default)]
pub struct Model {
    vertex_buffer: Option<BufferId>,
    index_buffer: Option<BufferId>,
    vertex_array: Option<VertexArrayId>,
    index_format: Option<IndexFormat>,
    index_count: usize,
    vertex_count: usize,
    bounds: Option<ModelBounds>,
    fence: GfxFence,
}
// getters
impl Model {
    #[inline]
    pub fn vertex_buffer(&self) -> Option<BufferId> {
        self.vertex_buffer
    }

    #[inline]
    pub fn index_buffer(&self) -> Option<BufferId> {
        self.index_buffer
    }

    /// 设备不支持 vertex array 时为 None
    #[inline]
    pub fn vertex_array(&self) -> Option<VertexArrayId> {
        self.vertex_array
    }

    #[inline]
    pub fn index_format(&self) -> Option<IndexFormat> {
        self.index_format
    }

    #[inline]
    pub fn index_count(&self) -> usize {
        self.index_count
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    #[inline]
    pub fn bounds(&self) -> Option<ModelBounds> {
        self.bounds
    }
}
// tools
impl Model {
    fn parse(ctx: &LoadContext<'_>, data: &[u8]) -> Result<ModelGeometry, String> {
        let _span = tracy_client::span!("Model::parse");
        let (models, _materials) = tobj::load_obj_buf(
            &mut Cursor::new(data),
            &tobj::LoadOptions {
                single_index: true,
                triangulate: true,
                ignore_lines: true,
                ignore_points: true,
                ..Default::default()
            },
            // 只加载几何，材质由使用者单独管理
            |_| Err(tobj::LoadError::OpenFileFailed),
        )
        .map_err(|e| e.to_string())?;

        let mut geometry = ModelGeometry {
            vertices: Vec::new(),
            indices: Vec::new(),
        };
        for model in models {
            let mesh = model.mesh;
            let base = geometry.vertices.len() as u32;
            let count = mesh.positions.len() / 3;
            geometry.vertices.extend((0..count).map(|i| ModelVertex {
                position: [mesh.positions[i * 3], mesh.positions[i * 3 + 1], mesh.positions[i * 3 + 2]],
                texcoord: if mesh.texcoords.len() >= (i + 1) * 2 {
                    [mesh.texcoords[i * 2], mesh.texcoords[i * 2 + 1]]
                } else {
                    [0.0; 2]
                },
                normal: if mesh.normals.len() >= (i + 1) * 3 {
                    [mesh.normals[i * 3], mesh.normals[i * 3 + 1], mesh.normals[i * 3 + 2]]
                } else {
                    [0.0; 3]
                },
            }));
            geometry.indices.extend(mesh.indices.iter().map(|i| base + i));
        }

        if geometry.vertices.is_empty() || geometry.indices.is_empty() {
            return Err(format!("{} contains no triangles", ctx.name()));
        }
        Ok(geometry)
    }

    fn upload(&mut self, gfx: &Arc<dyn GfxBackend>, geometry: &ModelGeometry) {
        let vertex_buffer = gfx.create_buffer(BufferKind::Vertex, bytemuck::cast_slice(&geometry.vertices));
        let (index_format, index_buffer) = if geometry.vertices.len() <= u16::MAX as usize + 1 {
            let indices: Vec<u16> = geometry.indices.iter().map(|i| *i as u16).collect();
            (IndexFormat::U16, gfx.create_buffer(BufferKind::Index, bytemuck::cast_slice(&indices)))
        } else {
            (IndexFormat::U32, gfx.create_buffer(BufferKind::Index, bytemuck::cast_slice(&geometry.indices)))
        };

        if gfx.has(GfxCapabilities::VERTEX_ARRAY) {
            self.vertex_array = Some(gfx.create_vertex_array(
                vertex_buffer,
                Some(index_buffer),
                ModelVertex::STRIDE,
                &ModelVertex::attributes(),
            ));
        }
        self.vertex_buffer = Some(vertex_buffer);
        self.index_buffer = Some(index_buffer);
        self.index_format = Some(index_format);
        self.index_count = geometry.indices.len();
        self.vertex_count = geometry.vertices.len();
        self.bounds = Some(ModelBounds::from_vertices(&geometry.vertices));
    }
}

impl Resource for Model {
    const KIND: ResourceKind = ResourceKind::Model;

    fn load(&mut self, ctx: &mut LoadContext<'_>) -> LoadStatus {
        match ctx.check_fence(&mut self.fence, FenceCheck::Flushed) {
            FenceStatus::Busy => return LoadStatus::Busy,
            FenceStatus::Satisfied => {
                log::info!("Model ({}) loaded asynchronous", ctx.name());
                return LoadStatus::Ok;
            }
            FenceStatus::Unset => {}
        }
        if self.vertex_buffer.is_some() {
            return LoadStatus::InvalidCall;
        }

        let data = match ctx.source() {
            Ok(data) => data,
            Err(status) => return status,
        };
        let extension = ctx.file().and_then(|f| f.extension()).unwrap_or_default();
        if !extension.eq_ignore_ascii_case("obj") {
            ctx.report_failure(
                format!("Model ({}) could not be identified (valid extensions: obj)", ctx.name()),
                "",
                Vec::new(),
            );
            return LoadStatus::InvalidData;
        }

        let geometry = match Self::parse(ctx, data) {
            Ok(geometry) => geometry,
            Err(e) => {
                ctx.report_failure(format!("Model ({}) could not be parsed", ctx.name()), "Model Error Log", vec![e]);
                return LoadStatus::InvalidData;
            }
        };
        self.upload(ctx.gfx(), &geometry);

        if self.fence.create(ctx.gfx()) {
            return LoadStatus::Busy;
        }
        log::info!("Model ({}) loaded", ctx.name());
        LoadStatus::Ok
    }

    fn unload(&mut self, gfx: &Arc<dyn GfxBackend>) -> LoadStatus {
        let Some(vertex_buffer) = self.vertex_buffer.take() else {
            return LoadStatus::InvalidCall;
        };
        self.fence.delete();
        if let Some(vertex_array) = self.vertex_array.take() {
            gfx.delete_vertex_array(vertex_array);
        }
        if let Some(index_buffer) = self.index_buffer.take() {
            gfx.delete_buffer(index_buffer);
        }
        gfx.delete_buffer(vertex_buffer);

        self.index_format = None;
        self.index_count = 0;
        self.vertex_count = 0;
        self.bounds = None;
        LoadStatus::Ok
    }

    fn default_path() -> Option<&'static str> {
        Some("models/cube.obj")
    }
}
