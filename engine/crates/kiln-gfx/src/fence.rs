use std::sync::Arc;

use crate::backend::{FenceCheck, GfxBackend, SyncWaitResult};
use crate::capabilities::GfxCapabilities;
use crate::handles::SyncId;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FenceStatus {
    /// 没有创建过 fence，或者已经被删除
    Unset,
    Busy,
    /// fence 已经到达，并且已经自行删除
    Satisfied,
}

struct FenceSync {
    gfx: Arc<dyn GfxBackend>,
    sync: SyncId,
}

/// GPU 时间线上的一次性标记
///
/// 要么未设置，要么恰好持有一个未删除的原生 sync 对象。
/// 不能 Clone；Drop 时自动删除，所以提前返回的路径也不会泄漏。
#[derive(Default)]
pub struct GfxFence {
    inner: Option<FenceSync>,
}
// 创建与销毁
impl GfxFence {
    /// 标记 "到目前为止提交的所有命令"
    ///
    /// 返回 false 表示不需要 fence (后端不支持)，调用者应当把操作视为已经同步完成
    pub fn create(&mut self, gfx: &Arc<dyn GfxBackend>) -> bool {
        let _span = tracy_client::span!("GfxFence::create");
        self.delete();

        if !gfx.has(GfxCapabilities::FENCE_SYNC) {
            return false;
        }
        match gfx.fence_sync() {
            Some(sync) => {
                self.inner = Some(FenceSync { gfx: gfx.clone(), sync });
                true
            }
            None => false,
        }
    }

    /// 释放原生对象，可以重复调用
    pub fn delete(&mut self) {
        if let Some(FenceSync { gfx, sync }) = self.inner.take() {
            gfx.delete_sync(sync);
        }
    }
}
impl Drop for GfxFence {
    fn drop(&mut self) {
        self.delete();
    }
}
// getters
impl GfxFence {
    #[inline]
    pub fn is_set(&self) -> bool {
        self.inner.is_some()
    }
}
// tools
impl GfxFence {
    /// 轮询 fence
    ///
    /// `timeout_ns` 为 0 时是纯粹的轮询；到达后 fence 自行删除
    pub fn check(&mut self, timeout_ns: u64, mode: FenceCheck) -> FenceStatus {
        let Some(inner) = &self.inner else {
            return FenceStatus::Unset;
        };

        match inner.gfx.client_wait(inner.sync, timeout_ns, mode == FenceCheck::Flushed) {
            SyncWaitResult::TimeoutExpired => FenceStatus::Busy,
            SyncWaitResult::Signaled => {
                self.delete();
                FenceStatus::Satisfied
            }
            SyncWaitResult::Failed => {
                log::error!("Fence could not be waited on, treating it as retired");
                self.delete();
                FenceStatus::Satisfied
            }
        }
    }
}
