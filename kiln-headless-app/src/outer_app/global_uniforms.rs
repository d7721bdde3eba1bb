use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use kiln_gfx::backend::{BufferKind, GfxBackend};
use kiln_gfx::handles::BufferId;
use kiln_resource::relation::Relation;
use kiln_resource::status::ResetMode;

/// 所有 shader 共享的 `b_Global` uniform block：view-projection 矩阵和时间
///
/// 不是缓存里的资源，但持有 GPU 对象，所以作为 relation 随设备重置一起销毁和重建
pub struct GlobalUniforms {
    gfx: Arc<dyn GfxBackend>,
    buffer: Mutex<Option<BufferId>>,
    generation: AtomicU32,
}
// new & init
impl GlobalUniforms {
    /// mat4 + vec4
    pub const SIZE: usize = 80;
    pub const BINDING: u32 = 0;

    pub fn new(gfx: Arc<dyn GfxBackend>) -> Arc<Self> {
        let uniforms = Arc::new(Self {
            gfx,
            buffer: Mutex::new(None),
            generation: AtomicU32::new(0),
        });
        uniforms.create();
        uniforms
    }

    fn create(&self) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if buffer.is_none() {
            *buffer = Some(self.gfx.create_buffer(BufferKind::Uniform, &[0; Self::SIZE]));
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
    }
}
// destroy
impl GlobalUniforms {
    fn destroy(&self) {
        if let Some(buffer) = self.buffer.lock().unwrap_or_else(PoisonError::into_inner).take() {
            self.gfx.delete_buffer(buffer);
        }
    }
}
impl Drop for GlobalUniforms {
    fn drop(&mut self) {
        self.destroy();
    }
}
// getters
impl GlobalUniforms {
    pub fn buffer(&self) -> Option<BufferId> {
        *self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// buffer 被创建过的次数
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl Relation for GlobalUniforms {
    fn reset(&self, mode: ResetMode) {
        match mode {
            ResetMode::Exit => self.destroy(),
            ResetMode::Init => self.create(),
        }
        log::info!("Global uniforms reset ({:?}), generation {}", mode, self.generation());
    }
}
