use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crossbeam_utils::atomic::AtomicCell;
use kiln_gfx::backend::GfxBackend;
use slotmap::new_key_type;

use crate::config::ResourceConfig;
use crate::file::ResourceFile;
use crate::lock;
use crate::resource::{Diagnostic, LoadContext, Resource, ResourceKind};
use crate::status::{LoadStatus, UpdatePolicy};

new_key_type! { pub struct HandleKey; }

pub type UsableCallback = Box<dyn FnOnce() + Send + 'static>;

/// 资源线程每一轮传给句柄的参数
pub(crate) struct UpdateContext<'a> {
    pub gfx: &'a Arc<dyn GfxBackend>,
    pub config: &'a ResourceConfig,
    pub fence_timeout_ns: u64,
}

/// 持有一个资源实例以及它的加载元数据
///
/// 由管理器持有，地址在整个生命周期内稳定。
/// 资源线程通过 `update` 推进加载；渲染线程只读取已经 usable 的资源。
pub struct ResourceHandle<T: Resource> {
    key: HandleKey,
    name: String,
    policy: UpdatePolicy,
    requested_path: Option<String>,
    file: Option<Arc<ResourceFile>>,

    resource: RwLock<T>,
    status: AtomicCell<LoadStatus>,
    usable: AtomicBool,
    /// 自上次重置以来是否调用过 `load`
    attempted: AtomicBool,
    retired: AtomicBool,
    reload_requested: AtomicBool,
    in_sweep: AtomicBool,
    ref_count: AtomicUsize,

    callbacks: Mutex<Vec<UsableCallback>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}
// new & init
impl<T: Resource> ResourceHandle<T> {
    pub(crate) fn new(
        key: HandleKey,
        name: String,
        policy: UpdatePolicy,
        resource: T,
        requested_path: Option<String>,
        file: Option<Arc<ResourceFile>>,
    ) -> Self {
        Self {
            key,
            name,
            policy,
            requested_path,
            file,
            resource: RwLock::new(resource),
            status: AtomicCell::new(LoadStatus::Busy),
            usable: AtomicBool::new(false),
            attempted: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            reload_requested: AtomicBool::new(false),
            in_sweep: AtomicBool::new(false),
            ref_count: AtomicUsize::new(0),
            callbacks: Mutex::new(Vec::new()),
            diagnostics: Mutex::new(Vec::new()),
        }
    }
}
// getters
impl<T: Resource> ResourceHandle<T> {
    #[inline]
    pub fn key(&self) -> HandleKey {
        self.key
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn policy(&self) -> UpdatePolicy {
        self.policy
    }

    #[inline]
    pub fn status(&self) -> LoadStatus {
        self.status.load()
    }

    #[inline]
    pub fn is_usable(&self) -> bool {
        self.usable.load(Ordering::Acquire)
    }

    #[inline]
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn file(&self) -> Option<&Arc<ResourceFile>> {
        self.file.as_ref()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        lock(&self.diagnostics).clone()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, T> {
        self.resource.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.resource.write().unwrap_or_else(PoisonError::into_inner)
    }
}
// ref count
impl<T: Resource> ResourceHandle<T> {
    pub(crate) fn acquire(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// 返回释放后的引用计数
    pub(crate) fn release(&self) -> usize {
        self.ref_count.fetch_sub(1, Ordering::AcqRel) - 1
    }
}
// update
impl<T: Resource> ResourceHandle<T> {
    /// 调用一次 `load`，返回句柄是否在这一次从不可用变为可用
    ///
    /// 结果为 `Busy` 时不会在同一次调用里重试
    pub(crate) fn update(&self, ctx: &UpdateContext<'_>) -> bool {
        if self.retired.load(Ordering::Acquire) {
            return false;
        }
        if self.reload_requested.load(Ordering::Acquire) && self.status().is_terminal() {
            self.reload_requested.store(false, Ordering::Release);
            log::info!("Resource ({}) reloading", self.name);
            self.nullify(ctx.gfx);
        }
        if self.status().is_terminal() {
            return false;
        }

        let _span = tracy_client::span!("ResourceHandle::update");
        let mut resource = self.write();
        if self.retired.load(Ordering::Acquire) {
            return false;
        }

        let mut load_ctx = LoadContext::new(
            ctx.gfx,
            ctx.config,
            &self.name,
            self.requested_path.as_deref(),
            self.file.as_deref(),
            &self.diagnostics,
        )
        .with_fence_timeout(ctx.fence_timeout_ns);
        let status = resource.load(&mut load_ctx);
        drop(resource);

        self.attempted.store(true, Ordering::Release);
        self.status.store(status);
        if status.is_ok() {
            self.usable.store(true, Ordering::Release);
            return true;
        }
        false
    }

    /// 卸载资源并回到待加载状态，定义数据保留
    pub(crate) fn nullify(&self, gfx: &Arc<dyn GfxBackend>) {
        let mut resource = self.write();
        self.usable.store(false, Ordering::Release);
        resource.unload(gfx);
        self.attempted.store(false, Ordering::Release);
        self.status.store(LoadStatus::Busy);
        lock(&self.diagnostics).clear();
    }

    /// 从管理器移除时调用，之后不会再被加载
    pub(crate) fn retire(&self, gfx: &Arc<dyn GfxBackend>) {
        let mut resource = self.write();
        self.retired.store(true, Ordering::Release);
        self.usable.store(false, Ordering::Release);
        resource.unload(gfx);
        drop(resource);
        lock(&self.callbacks).clear();
    }

    /// 直接修改资源的定义数据
    pub(crate) fn modify<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.write())
    }

    pub(crate) fn on_usable_once(&self, callback: UsableCallback) {
        let mut callbacks = lock(&self.callbacks);
        if self.is_usable() {
            drop(callbacks);
            callback();
        } else {
            callbacks.push(callback);
        }
    }
}

/// 管理器看到的句柄，擦除了具体的资源类型
pub(crate) trait ErasedHandle: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> ResourceKind;
    fn policy(&self) -> UpdatePolicy;
    fn status(&self) -> LoadStatus;
    fn ref_count(&self) -> usize;

    fn update(&self, ctx: &UpdateContext<'_>) -> bool;
    fn nullify(&self, gfx: &Arc<dyn GfxBackend>);
    fn retire(&self, gfx: &Arc<dyn GfxBackend>);
    fn request_reload(&self);

    /// 到达终态并且没有等待中的 reload
    fn is_settled(&self) -> bool;
    /// 已经开始加载但还没有到达终态
    fn is_in_flight(&self) -> bool;
    fn is_retired(&self) -> bool;

    /// 标记进入更新队列，已经在队列里时返回 false
    fn enter_sweep(&self) -> bool;
    fn leave_sweep(&self);
    fn take_usable_callbacks(&self) -> Vec<UsableCallback>;
}

impl<T: Resource> ErasedHandle for ResourceHandle<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        T::KIND
    }

    fn policy(&self) -> UpdatePolicy {
        self.policy
    }

    fn status(&self) -> LoadStatus {
        self.status.load()
    }

    fn ref_count(&self) -> usize {
        ResourceHandle::ref_count(self)
    }

    fn update(&self, ctx: &UpdateContext<'_>) -> bool {
        ResourceHandle::update(self, ctx)
    }

    fn nullify(&self, gfx: &Arc<dyn GfxBackend>) {
        ResourceHandle::nullify(self, gfx)
    }

    fn retire(&self, gfx: &Arc<dyn GfxBackend>) {
        ResourceHandle::retire(self, gfx)
    }

    fn request_reload(&self) {
        self.reload_requested.store(true, Ordering::SeqCst);
    }

    fn is_settled(&self) -> bool {
        self.status.load().is_terminal() && !self.reload_requested.load(Ordering::SeqCst)
    }

    fn is_in_flight(&self) -> bool {
        self.attempted.load(Ordering::Acquire) && self.status.load().is_busy()
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    fn enter_sweep(&self) -> bool {
        self.in_sweep
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn leave_sweep(&self) {
        self.in_sweep.store(false, Ordering::SeqCst);
    }

    fn take_usable_callbacks(&self) -> Vec<UsableCallback> {
        std::mem::take(&mut *lock(&self.callbacks))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use kiln_gfx::backend::{BufferKind, FenceCheck};
    use kiln_gfx::fence::{FenceStatus, GfxFence};
    use kiln_gfx::handles::BufferId;
    use kiln_gfx::headless::{HeadlessBackend, HeadlessConfig};

    /// 测试用的资源：把文件内容上传成一个 buffer，上传之后用 fence 守护
    #[derive(Default)]
    pub(crate) struct Blob {
        pub buffer: Option<BufferId>,
        pub fence: GfxFence,
        pub load_calls: usize,
    }
    impl Resource for Blob {
        const KIND: ResourceKind = ResourceKind::Model;

        fn load(&mut self, ctx: &mut LoadContext<'_>) -> LoadStatus {
            self.load_calls += 1;
            match ctx.check_fence(&mut self.fence, FenceCheck::Normal) {
                FenceStatus::Busy => return LoadStatus::Busy,
                FenceStatus::Satisfied => return LoadStatus::Ok,
                FenceStatus::Unset => {}
            }
            if self.buffer.is_some() {
                return LoadStatus::InvalidCall;
            }

            let data = match ctx.source() {
                Ok(data) => data,
                Err(status) => return status,
            };
            if data.starts_with(b"bad") {
                ctx.report_failure(
                    format!("Blob ({}) could not be decoded", ctx.name()),
                    "Blob Error Log",
                    vec![String::from_utf8_lossy(data).into_owned()],
                );
                return LoadStatus::InvalidData;
            }

            self.buffer = Some(ctx.gfx().create_buffer(BufferKind::Vertex, data));
            if self.fence.create(ctx.gfx()) { LoadStatus::Busy } else { LoadStatus::Ok }
        }

        fn unload(&mut self, gfx: &Arc<dyn GfxBackend>) -> LoadStatus {
            let Some(buffer) = self.buffer.take() else {
                return LoadStatus::InvalidCall;
            };
            gfx.delete_buffer(buffer);
            self.fence.delete();
            LoadStatus::Ok
        }
    }

    pub(crate) fn headless(config: HeadlessConfig) -> (Arc<HeadlessBackend>, Arc<dyn GfxBackend>) {
        let backend = Arc::new(HeadlessBackend::new(config));
        let gfx: Arc<dyn GfxBackend> = backend.clone();
        (backend, gfx)
    }

    fn blob_handle(data: &[u8]) -> ResourceHandle<Blob> {
        ResourceHandle::new(
            HandleKey::default(),
            "data/blob.bin".to_string(),
            UpdatePolicy::Manual,
            Blob::default(),
            Some("data/blob.bin".to_string()),
            Some(Arc::new(ResourceFile::new("data/blob.bin", data.to_vec()))),
        )
    }

    #[test]
    fn test_update_is_gated_by_fence() {
        let (backend, gfx) = headless(HeadlessConfig {
            fence_latency: 2,
            ..Default::default()
        });
        let config = ResourceConfig::default();
        let ctx = UpdateContext {
            gfx: &gfx,
            config: &config,
            fence_timeout_ns: 0,
        };
        let handle = blob_handle(b"payload");

        // 上传 + 创建 fence
        assert!(!handle.update(&ctx));
        assert_eq!(handle.status(), LoadStatus::Busy);
        assert_eq!(backend.stats().live_buffers, 1);
        // fence 两次 busy
        assert!(!handle.update(&ctx));
        assert!(!handle.update(&ctx));
        assert!(!handle.is_usable());
        // fence 到达
        assert!(handle.update(&ctx));
        assert!(handle.is_usable());
        // 终态之后不再调用 load
        assert!(!handle.update(&ctx));
        assert_eq!(handle.read().load_calls, 4);
    }

    #[test]
    fn test_frozen_fence_stays_busy_without_leaking() {
        let (backend, gfx) = headless(HeadlessConfig::default());
        backend.set_fences_frozen(true);
        let config = ResourceConfig::default();
        let ctx = UpdateContext {
            gfx: &gfx,
            config: &config,
            fence_timeout_ns: 0,
        };
        let handle = blob_handle(b"payload");

        for _ in 0..500 {
            assert!(!handle.update(&ctx));
            assert_eq!(handle.status(), LoadStatus::Busy);
        }
        let stats = backend.stats();
        assert_eq!((stats.live_buffers, stats.live_syncs), (1, 1));

        handle.nullify(&gfx);
        let stats = backend.stats();
        assert_eq!((stats.live_buffers, stats.live_syncs), (0, 0));
    }

    #[test]
    fn test_failure_is_terminal() {
        let (_backend, gfx) = headless(HeadlessConfig::default());
        let config = ResourceConfig::default();
        let ctx = UpdateContext {
            gfx: &gfx,
            config: &config,
            fence_timeout_ns: 0,
        };
        let handle = blob_handle(b"bad bytes");

        assert!(!handle.update(&ctx));
        assert_eq!(handle.status(), LoadStatus::InvalidData);
        for _ in 0..3 {
            assert!(!handle.update(&ctx));
        }
        assert_eq!(handle.read().load_calls, 1);
        assert_eq!(handle.diagnostics().len(), 1);
        assert!(handle.diagnostics()[0].contains("bad bytes"));
    }

    #[test]
    fn test_unload_twice_is_invalid_call() {
        let (backend, gfx) = headless(HeadlessConfig::default());
        let config = ResourceConfig::default();
        let ctx = UpdateContext {
            gfx: &gfx,
            config: &config,
            fence_timeout_ns: 1,
        };
        let handle = blob_handle(b"payload");
        while !handle.update(&ctx) {}

        let mut blob = handle.write();
        assert_eq!(blob.unload(&gfx), LoadStatus::Ok);
        let stats = backend.stats();
        assert_eq!(blob.unload(&gfx), LoadStatus::InvalidCall);
        assert_eq!(backend.stats(), stats);
    }

    #[test]
    fn test_callback_runs_immediately_when_usable() {
        let (_backend, gfx) = headless(HeadlessConfig::default());
        let config = ResourceConfig::default();
        let ctx = UpdateContext {
            gfx: &gfx,
            config: &config,
            fence_timeout_ns: 1,
        };
        let handle = blob_handle(b"payload");
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        handle.on_usable_once(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        while !handle.update(&ctx) {}
        let pending = ErasedHandle::take_usable_callbacks(&handle);
        assert_eq!(pending.len(), 1);
        pending.into_iter().for_each(|callback| callback());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let counter = fired.clone();
        handle.on_usable_once(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(ErasedHandle::take_usable_callbacks(&handle).is_empty());
    }
}
