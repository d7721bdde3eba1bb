use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// 设备能力
    ///
    /// 由上下文提供者报告，资源在 `load` 时据此选择同步或异步路径
    ///
    /// 配置文件中写作 `"DUAL_CONTEXT | FENCE_SYNC"`
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct GfxCapabilities: u32 {
        /// 存在与主上下文共享对象的资源上下文，可以启动资源线程
        const DUAL_CONTEXT = 1 << 0;
        /// 支持 fence sync，不支持时所有上传视为同步完成
        const FENCE_SYNC = 1 << 1;
        /// 纹理可以经由 pixel buffer 暂存上传
        const PIXEL_BUFFER = 1 << 2;
        /// program 链接是异步的，需要轮询完成状态
        const ASYNC_LINK = 1 << 3;
        const VERTEX_ARRAY = 1 << 4;
        const TEXTURE_STORAGE = 1 << 5;
        const MIPMAP_GENERATION = 1 << 6;
    }
}

impl GfxCapabilities {
    /// 一个现代桌面驱动通常具备的能力集合
    pub fn desktop() -> Self {
        Self::all()
    }

    /// 没有第二个上下文，也没有任何异步设施
    pub fn minimal() -> Self {
        Self::VERTEX_ARRAY
    }
}

impl Default for GfxCapabilities {
    fn default() -> Self {
        Self::desktop()
    }
}
