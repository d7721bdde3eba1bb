//! 图形上下文的边界
//!
//! 资源加载子系统只通过 [`backend::GfxBackend`] 与图形 API 交互：
//! 主上下文 (Render) 和资源上下文 (Resource) 共享对象命名空间，
//! 各自只能被绑定它的线程使用。
//!
//! # 模块
//! - `capabilities`: 设备能力标志，资源据此选择上传策略
//! - `handles`: 原生 GPU 对象 id
//! - `fence`: 非阻塞的 GPU 完成标记
//! - `headless`: 纯内存实现，用于测试和无窗口运行
//!
//! # 使用示例
//! ```ignore
//! let gfx: Arc<dyn GfxBackend> = Arc::new(HeadlessBackend::new(HeadlessConfig::default()));
//! let mut fence = GfxFence::default();
//! if fence.create(&gfx) {
//!     while fence.check(0, FenceCheck::Normal) == FenceStatus::Busy {}
//! }
//! ```

pub mod backend;
pub mod capabilities;
pub mod fence;
pub mod handles;
pub mod headless;
