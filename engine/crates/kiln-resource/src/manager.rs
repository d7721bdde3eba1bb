use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use indexmap::IndexMap;
use kiln_gfx::backend::GfxBackend;
use kiln_gfx::capabilities::GfxCapabilities;
use slotmap::SlotMap;

use crate::config::{MissingFilePolicy, ResourceConfig};
use crate::error::ResourceError;
use crate::file::{ResourceArchive, ResourceFile, normalize_path};
use crate::handle::{ErasedHandle, HandleKey, ResourceHandle, UpdateContext, UsableCallback};
use crate::lock;
use crate::ptr::ResourcePtr;
use crate::relation::{Relation, RelationGuard, RelationRegistry};
use crate::resource::Resource;
use crate::status::{LoadStatus, ResetMode, UpdatePolicy};
use crate::worker::{ResourceWorker, WorkerSignal};

struct HandleEntry {
    erased: Arc<dyn ErasedHandle>,
    typed: Arc<dyn Any + Send + Sync>,
}
impl HandleEntry {
    fn new<T: Resource>(handle: Arc<ResourceHandle<T>>) -> Self {
        Self {
            erased: handle.clone(),
            typed: handle,
        }
    }

    fn downcast<T: Resource>(&self) -> Result<Arc<ResourceHandle<T>>, ResourceError> {
        self.typed
            .clone()
            .downcast::<ResourceHandle<T>>()
            .map_err(|_| ResourceError::KindMismatch {
                key: self.erased.name().to_string(),
                existing: self.erased.kind(),
                requested: T::KIND,
            })
    }
}

/// 句柄注册表，只在修改指针表时加锁，从不跨越 GPU 调用
#[derive(Default)]
struct Registry {
    handles: SlotMap<HandleKey, HandleEntry>,
    by_name: HashMap<String, HandleKey>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum PassMode {
    /// 常规轮次：更新队列里的所有句柄，fence 只做纯轮询
    Sweep,
    /// 退出阶段：只推进已经开始加载的句柄，fence 做有界等待
    Drain,
    /// 强制完成：推进所有句柄，fence 做有界等待并先 flush
    Force,
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct PassReport {
    pub became_usable: usize,
    /// 队列里尚未到达终态的句柄
    pub pending: usize,
    /// 已经开始加载但尚未到达终态的句柄
    pub in_flight: usize,
}

/// 主线程和资源线程共享的状态
pub(crate) struct Shared {
    pub gfx: Arc<dyn GfxBackend>,
    pub config: ResourceConfig,
    pub worker_alive: AtomicBool,
    pub waker: Mutex<Option<Sender<WorkerSignal>>>,

    active: AtomicBool,
    /// `wait_idle` 请求资源线程下一轮使用 `PassMode::Force`
    force_requested: AtomicBool,
    registry: Mutex<Registry>,
    /// 新入队的句柄，在下一轮开始时并入 `sweep`
    enqueue_sender: Sender<Arc<dyn ErasedHandle>>,
    enqueue_receiver: Receiver<Arc<dyn ErasedHandle>>,
    /// 更新队列，同一时间只有一个线程在执行轮次
    sweep: Mutex<Vec<Arc<dyn ErasedHandle>>>,
    callback_sender: Sender<UsableCallback>,
    callback_receiver: Receiver<UsableCallback>,
}
impl Shared {
    fn new(gfx: Arc<dyn GfxBackend>, config: ResourceConfig) -> Self {
        let (enqueue_sender, enqueue_receiver) = crossbeam_channel::unbounded();
        let (callback_sender, callback_receiver) = crossbeam_channel::unbounded();
        Self {
            gfx,
            config,
            worker_alive: AtomicBool::new(false),
            waker: Mutex::new(None),
            active: AtomicBool::new(false),
            force_requested: AtomicBool::new(false),
            registry: Mutex::new(Registry::default()),
            enqueue_sender,
            enqueue_receiver,
            sweep: Mutex::new(Vec::new()),
            callback_sender,
            callback_receiver,
        }
    }

    /// 对更新队列执行一轮
    ///
    /// 轮次开始时并入新入队的句柄；轮次中创建的句柄在下一轮可见
    pub fn run_pass(&self, mode: PassMode) -> PassReport {
        let _span = tracy_client::span!("ResourceManager::run_pass");
        let mut sweep = lock(&self.sweep);
        sweep.extend(self.enqueue_receiver.try_iter());

        let ctx = UpdateContext {
            gfx: &self.gfx,
            config: &self.config,
            fence_timeout_ns: match mode {
                PassMode::Sweep => 0,
                PassMode::Drain | PassMode::Force => self.config.exit_fence_timeout_ns,
            },
        };

        let mut report = PassReport::default();
        for handle in sweep.iter() {
            if mode == PassMode::Drain && !handle.is_in_flight() {
                continue;
            }
            if handle.update(&ctx) {
                report.became_usable += 1;
                for callback in handle.take_usable_callbacks() {
                    let _ = self.callback_sender.send(callback);
                }
            }
        }

        sweep.retain(Self::keep_in_sweep);
        report.pending = sweep.iter().filter(|h| !h.is_settled()).count();
        report.in_flight = sweep.iter().filter(|h| h.is_in_flight()).count();
        report
    }

    /// 轮次结束时决定句柄是否留在更新队列
    ///
    /// 先清除队列标记再检查一次：在两者之间到达的 reload 要么自己入队成功，要么在这里被留下
    fn keep_in_sweep(handle: &Arc<dyn ErasedHandle>) -> bool {
        if handle.is_retired() {
            handle.leave_sweep();
            return false;
        }
        if handle.policy() == UpdatePolicy::Automatic || !handle.is_settled() {
            return true;
        }
        handle.leave_sweep();
        !handle.is_settled() && handle.enter_sweep()
    }

    /// 在更新队列的锁下把一个已经开始加载的句柄推进到终态，次数有界
    fn settle(&self, handle: &Arc<dyn ErasedHandle>) -> bool {
        let _sweep = lock(&self.sweep);
        let ctx = UpdateContext {
            gfx: &self.gfx,
            config: &self.config,
            fence_timeout_ns: self.config.exit_fence_timeout_ns,
        };
        for _ in 0..self.config.exit_drain_passes {
            if !handle.is_in_flight() {
                return true;
            }
            handle.update(&ctx);
        }
        !handle.is_in_flight()
    }

    pub fn request_force(&self) {
        self.force_requested.store(true, Ordering::SeqCst);
        self.wake();
    }

    pub fn take_force_request(&self) -> bool {
        self.force_requested.swap(false, Ordering::SeqCst)
    }

    fn enqueue(&self, handle: Arc<dyn ErasedHandle>) {
        if handle.enter_sweep() {
            let _ = self.enqueue_sender.send(handle);
            self.wake();
        }
    }

    fn wake(&self) {
        if let Some(waker) = lock(&self.waker).as_ref() {
            let _ = waker.send(WorkerSignal::Wake);
        }
    }

    fn handles(&self) -> Vec<Arc<dyn ErasedHandle>> {
        lock(&self.registry).handles.values().map(|e| e.erased.clone()).collect()
    }

    fn clear_sweep(&self) {
        let mut sweep = lock(&self.sweep);
        sweep.extend(self.enqueue_receiver.try_iter());
        for handle in sweep.drain(..) {
            handle.leave_sweep();
        }
    }
}

/// 资源管理器
///
/// 所有资源句柄、归档和直接文件的注册表；拥有资源线程，驱动加载轮次，并广播设备重置。
/// 没有全局单例，由使用者显式持有并传递。
///
/// # 线程
/// - 有 `DUAL_CONTEXT` 时，加载在名为 `resource-thread` 的线程上进行
/// - 否则在主线程的 [`Self::update`] 中同步进行
///
/// # 使用示例
/// ```ignore
/// let manager = ResourceManager::new(gfx, ResourceConfig::default())?;
/// let texture = manager.load::<Texture>("data/textures/a.png", UpdatePolicy::Manual, Some("data/textures/a.png"))?;
/// loop {
///     manager.update();
///     if let Some(texture) = texture.try_get() { /* draw */ }
/// }
/// ```
pub struct ResourceManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<ResourceWorker>>,
    relations: Arc<RelationRegistry>,

    direct_files: Mutex<HashMap<String, Arc<ResourceFile>>>,
    archives: Mutex<IndexMap<String, Arc<ResourceArchive>>>,
    file_fetches: AtomicUsize,
    anonymous_count: AtomicU64,
}
// new & init
impl ResourceManager {
    pub fn new(gfx: Arc<dyn GfxBackend>, config: ResourceConfig) -> Result<Self, ResourceError> {
        let archives = config.archives.clone();
        let manager = Self {
            shared: Arc::new(Shared::new(gfx, config)),
            worker: Mutex::new(None),
            relations: Arc::new(RelationRegistry::default()),
            direct_files: Mutex::new(HashMap::new()),
            archives: Mutex::new(IndexMap::new()),
            file_fetches: AtomicUsize::new(0),
            anonymous_count: AtomicU64::new(0),
        };

        for archive in &archives {
            manager.retrieve_archive(archive)?;
        }
        manager.reset(ResetMode::Init)?;

        log::info!("Resource Manager created (backend: {})", manager.shared.gfx.name());
        Ok(manager)
    }
}
// destroy
impl Drop for ResourceManager {
    fn drop(&mut self) {
        let remaining = self.relations.len();
        if remaining > 0 {
            log::warn!("Resource Manager destroyed with {} relations still bound", remaining);
        }
        let _ = self.reset(ResetMode::Exit);
        log::info!("Resource Manager destroyed");
    }
}
// getters
impl ResourceManager {
    #[inline]
    pub fn gfx(&self) -> &Arc<dyn GfxBackend> {
        &self.shared.gfx
    }

    #[inline]
    pub fn config(&self) -> &ResourceConfig {
        &self.shared.config
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// 资源线程是否在运行
    #[inline]
    pub fn is_threaded(&self) -> bool {
        self.shared.worker_alive.load(Ordering::SeqCst)
    }

    pub fn handle_count(&self) -> usize {
        lock(&self.shared.registry).handles.len()
    }

    /// 尚未到达终态的句柄数
    pub fn pending_count(&self) -> usize {
        self.shared.handles().iter().filter(|h| !h.is_settled()).count()
    }

    /// 从磁盘读取文件或打开归档的次数
    pub fn file_fetch_count(&self) -> usize {
        self.file_fetches.load(Ordering::SeqCst)
    }

    pub fn status(&self, key: &str) -> Option<LoadStatus> {
        let registry = lock(&self.shared.registry);
        let handle_key = registry.by_name.get(key)?;
        registry.handles.get(*handle_key).map(|e| e.erased.status())
    }
}
// files
impl ResourceManager {
    /// 获取资源文件
    ///
    /// 先查找 `content_root` 下的直接文件，再依次查找已经打开的归档
    pub fn retrieve_file(&self, path: &str) -> Result<Arc<ResourceFile>, ResourceError> {
        let path = normalize_path(path);
        if let Some(file) = lock(&self.direct_files).get(&path) {
            return Ok(file.clone());
        }

        let full_path = self.shared.config.content_root.join(&path);
        if full_path.is_file() {
            let file = Arc::new(ResourceFile::read(&path, &full_path)?);
            self.file_fetches.fetch_add(1, Ordering::SeqCst);
            return Ok(lock(&self.direct_files).entry(path).or_insert(file).clone());
        }

        for archive in lock(&self.archives).values() {
            if let Some(file) = archive.file(&path) {
                return Ok(file);
            }
        }
        Err(ResourceError::FileNotFound(path))
    }

    /// 获取归档，第一次请求时打开并缓存
    pub fn retrieve_archive(&self, path: &str) -> Result<Arc<ResourceArchive>, ResourceError> {
        let path = normalize_path(path);
        if let Some(archive) = lock(&self.archives).get(&path) {
            return Ok(archive.clone());
        }

        let full_path = self.shared.config.content_root.join(&path);
        let archive = Arc::new(ResourceArchive::open(&path, &full_path)?);
        self.file_fetches.fetch_add(1, Ordering::SeqCst);
        if archive.num_files() == 0 {
            log::warn!("Archive ({}) contains no files", path);
        } else {
            log::info!("Archive ({}) opened with {} files", path, archive.num_files());
        }
        Ok(lock(&self.archives).entry(path).or_insert(archive).clone())
    }
}
// Load API
impl ResourceManager {
    /// 按 key 获取资源，不存在时创建句柄并交给资源线程
    ///
    /// 同一个 key 总是返回同一个句柄。`path` 为 None 表示资源不需要文件 (例如 program)
    pub fn load<T: Resource + Default>(
        &self,
        key: &str,
        policy: UpdatePolicy,
        path: Option<&str>,
    ) -> Result<ResourcePtr<T>, ResourceError> {
        self.load_with(key, policy, path, T::default)
    }

    /// 同 [`Self::load`]，但由调用者提供带定义数据的资源实例；key 已存在时不会调用 `create`
    ///
    /// `create` 在注册表的锁内调用，不能再调用管理器
    pub fn load_with<T: Resource>(
        &self,
        key: &str,
        policy: UpdatePolicy,
        path: Option<&str>,
        create: impl FnOnce() -> T,
    ) -> Result<ResourcePtr<T>, ResourceError> {
        let _span = tracy_client::span!("ResourceManager::load");
        if let Some(existing) = self.find::<T>(key)? {
            return Ok(existing);
        }

        // 文件读取不持有注册表的锁
        let (requested_path, file) = match path {
            None => (None, None),
            Some(path) => match self.retrieve_file(path) {
                Ok(file) => (Some(normalize_path(path)), Some(file)),
                Err(e) => match self.shared.config.missing_file {
                    MissingFilePolicy::Error => return Err(e),
                    MissingFilePolicy::SoftFail => {
                        log::warn!("{}", e);
                        (Some(normalize_path(path)), None)
                    }
                },
            },
        };

        let handle = {
            let mut registry = lock(&self.shared.registry);
            if let Some(handle_key) = registry.by_name.get(key) {
                let existing = registry.handles[*handle_key].downcast::<T>()?;
                return Ok(ResourcePtr::new(existing));
            }

            let handle_key = registry.handles.insert_with_key(|handle_key| {
                HandleEntry::new(Arc::new(ResourceHandle::new(
                    handle_key,
                    key.to_string(),
                    policy,
                    create(),
                    requested_path,
                    file,
                )))
            });
            registry.by_name.insert(key.to_string(), handle_key);
            registry.handles[handle_key].downcast::<T>()?
        };

        if self.is_active() {
            self.shared.enqueue(handle.clone());
        }
        Ok(ResourcePtr::new(handle))
    }

    /// 加载类型的默认资源 (以默认路径为 key)
    pub fn load_default<T: Resource + Default>(&self) -> Result<Option<ResourcePtr<T>>, ResourceError> {
        match T::default_path() {
            Some(path) => self.load::<T>(path, UpdatePolicy::Automatic, Some(path)).map(Some),
            None => Ok(None),
        }
    }

    /// 创建匿名句柄，不参与按 key 去重
    pub fn load_new<T: Resource + Default>(&self) -> Result<ResourcePtr<T>, ResourceError> {
        self.load_new_with(T::default())
    }

    pub fn load_new_with<T: Resource>(&self, resource: T) -> Result<ResourcePtr<T>, ResourceError> {
        let index = self.anonymous_count.fetch_add(1, Ordering::Relaxed);
        let name = format!("<{} #{}>", T::KIND, index);

        let handle = {
            let mut registry = lock(&self.shared.registry);
            let handle_key = registry.handles.insert_with_key(|handle_key| {
                HandleEntry::new(Arc::new(ResourceHandle::new(
                    handle_key,
                    name,
                    UpdatePolicy::Manual,
                    resource,
                    None,
                    None,
                )))
            });
            registry.handles[handle_key].downcast::<T>()?
        };

        if self.is_active() {
            self.shared.enqueue(handle.clone());
        }
        Ok(ResourcePtr::new(handle))
    }

    fn find<T: Resource>(&self, key: &str) -> Result<Option<ResourcePtr<T>>, ResourceError> {
        let registry = lock(&self.shared.registry);
        match registry.by_name.get(key) {
            Some(handle_key) => Ok(Some(ResourcePtr::new(registry.handles[*handle_key].downcast::<T>()?))),
            None => Ok(None),
        }
    }
}
// Lifetime API
impl ResourceManager {
    /// 立即移除并卸载句柄；其它仍然持有的指针将永远不可用
    ///
    /// 已经开始的加载会先被推进到终态再卸载
    pub fn free<T: Resource>(&self, ptr: ResourcePtr<T>) {
        let handle_key = ptr.key();
        let removed = {
            let mut registry = lock(&self.shared.registry);
            let removed = registry.handles.remove(handle_key);
            if removed.is_some() && registry.by_name.get(ptr.name()) == Some(&handle_key) {
                registry.by_name.remove(ptr.name());
            }
            removed
        };

        if let Some(entry) = removed {
            if !self.shared.settle(&entry.erased) {
                log::warn!("Resource ({}) was still loading when it was freed", entry.erased.name());
            }
            entry.erased.retire(&self.shared.gfx);
            log::info!("Resource ({}) freed", entry.erased.name());
        }
    }

    /// 回收所有不再被引用的句柄，返回回收的数量
    ///
    /// 正在加载的句柄留到加载结束之后的某次调用
    pub fn free_unreferenced(&self) -> usize {
        let removed: Vec<HandleEntry> = {
            let mut registry = lock(&self.shared.registry);
            let keys: Vec<HandleKey> = registry
                .handles
                .iter()
                .filter(|(_, entry)| entry.erased.ref_count() == 0 && !entry.erased.is_in_flight())
                .map(|(key, _)| key)
                .collect();
            let removed: Vec<HandleEntry> = keys.iter().filter_map(|key| registry.handles.remove(*key)).collect();
            registry.by_name.retain(|_, key| !keys.contains(key));
            removed
        };

        for entry in &removed {
            entry.erased.retire(&self.shared.gfx);
        }
        if !removed.is_empty() {
            log::info!("{} unreferenced resources freed", removed.len());
        }
        removed.len()
    }

    /// 卸载并重新加载一个资源，返回 key 是否存在
    ///
    /// 正在加载的资源会先完成当前的加载
    pub fn reload(&self, key: &str) -> bool {
        let handle = {
            let registry = lock(&self.shared.registry);
            registry.by_name.get(key).and_then(|k| registry.handles.get(*k)).map(|e| e.erased.clone())
        };
        let Some(handle) = handle else {
            return false;
        };

        handle.request_reload();
        if self.is_active() {
            self.shared.enqueue(handle);
        }
        true
    }

    /// 注册 relation，返回的 guard 被 drop 时解除注册
    pub fn bind_relation(&self, relation: Arc<dyn Relation>) -> RelationGuard {
        self.relations.bind(relation)
    }
}
// update
impl ResourceManager {
    /// 每帧在主线程调用
    ///
    /// 没有资源线程时在这里执行一轮加载；然后调用本帧变为可用的资源的回调
    pub fn update(&self) {
        let _span = tracy_client::span!("ResourceManager::update");
        if self.is_active() && !self.is_threaded() {
            self.shared.run_pass(PassMode::Sweep);
        }
        for callback in self.shared.callback_receiver.try_iter() {
            callback();
        }
    }

    /// 等待所有资源到达终态，用于 "必须在此刻完成" 的场合
    ///
    /// 轮次使用 `PassMode::Force`：fence 检查先 flush 再有界等待。返回超时前是否全部完成
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let _span = tracy_client::span!("ResourceManager::wait_idle");
        if !self.is_active() {
            return self.pending_count() == 0;
        }

        let deadline = Instant::now() + timeout;
        loop {
            if self.pending_count() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            if self.is_threaded() {
                self.shared.request_force();
                thread::sleep(Duration::from_millis(1));
            } else {
                self.shared.run_pass(PassMode::Force);
            }
        }
    }

    /// 设备重置
    ///
    /// - `Exit`: 先通知 relation，再停止资源线程，等待在途资源到达终态，最后卸载所有资源
    /// - `Init`: 先通知 relation，再启动资源线程，然后把所有句柄重新入队
    ///
    /// 重复进入当前模式不做任何事。只有启动资源线程失败会返回错误
    pub fn reset(&self, mode: ResetMode) -> Result<(), ResourceError> {
        let _span = tracy_client::span!("ResourceManager::reset");
        match mode {
            ResetMode::Init => {
                if self.shared.active.swap(true, Ordering::SeqCst) {
                    return Ok(());
                }
                self.relations.notify(ResetMode::Init);

                if self.shared.gfx.has(GfxCapabilities::DUAL_CONTEXT) {
                    match ResourceWorker::spawn(self.shared.clone()) {
                        Ok(worker) => *lock(&self.worker) = Some(worker),
                        Err(e) => {
                            self.shared.active.store(false, Ordering::SeqCst);
                            return Err(e);
                        }
                    }
                    log::info!("Resource thread started");
                } else {
                    log::info!("No resource context available, resources are loaded on the render thread");
                }

                for handle in self.shared.handles() {
                    self.shared.enqueue(handle);
                }
            }
            ResetMode::Exit => {
                if !self.shared.active.swap(false, Ordering::SeqCst) {
                    return Ok(());
                }
                self.relations.notify(ResetMode::Exit);

                *lock(&self.shared.waker) = None;
                if let Some(worker) = lock(&self.worker).take() {
                    worker.stop();
                }

                self.drain_in_flight();
                self.shared.clear_sweep();

                let handles = self.shared.handles();
                for handle in &handles {
                    handle.nullify(&self.shared.gfx);
                }
                log::info!("Resource Manager reset, {} resources unloaded", handles.len());
            }
        }
        Ok(())
    }

    /// 已经开始的加载不能取消，只能等它到达终态
    fn drain_in_flight(&self) {
        for _ in 0..self.shared.config.exit_drain_passes {
            if self.shared.run_pass(PassMode::Drain).in_flight == 0 {
                return;
            }
        }
        let in_flight = self.shared.handles().iter().filter(|h| h.is_in_flight()).count();
        if in_flight > 0 {
            log::warn!("{} resources were still loading when the resource manager was reset", in_flight);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::tests::zip_bytes;
    use crate::handle::tests::{Blob, headless};
    use crate::resource::{LoadContext, ResourceKind};
    use kiln_gfx::headless::{HeadlessBackend, HeadlessConfig};
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    /// 每个测试一个独立的内容目录
    fn content_dir(name: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kiln-resource-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        for (path, data) in files {
            let full = dir.join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, data).unwrap();
        }
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// 同步模式：没有资源上下文，加载在 update 中进行，结果完全确定
    fn sync_manager(name: &str, files: &[(&str, &[u8])]) -> (Arc<HeadlessBackend>, ResourceManager) {
        let (backend, gfx) = headless(HeadlessConfig {
            capabilities: GfxCapabilities::all() - GfxCapabilities::DUAL_CONTEXT,
            ..Default::default()
        });
        let config = ResourceConfig::default().with_content_root(content_dir(name, files));
        (backend, ResourceManager::new(gfx, config).unwrap())
    }

    /// 依赖另一个资源的资源，依赖可用之前保持 Busy
    #[derive(Default)]
    struct Dependent {
        dependency: Option<ResourcePtr<Blob>>,
        loaded: bool,
    }
    impl Resource for Dependent {
        const KIND: ResourceKind = ResourceKind::Program;

        fn load(&mut self, _ctx: &mut LoadContext<'_>) -> LoadStatus {
            match &self.dependency {
                None => LoadStatus::InvalidInput,
                Some(dependency) if !dependency.is_usable() => LoadStatus::Busy,
                Some(_) => {
                    self.loaded = true;
                    LoadStatus::Ok
                }
            }
        }

        fn unload(&mut self, _gfx: &Arc<dyn GfxBackend>) -> LoadStatus {
            if !std::mem::take(&mut self.loaded) {
                return LoadStatus::InvalidCall;
            }
            LoadStatus::Ok
        }
    }

    #[test]
    fn test_same_key_shares_handle() {
        let (_backend, manager) = sync_manager("dedup", &[("a.bin", b"same"), ("b.bin", b"same")]);

        let a1 = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();
        let a2 = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();
        let b = manager.load::<Blob>("b.bin", UpdatePolicy::Manual, Some("b.bin")).unwrap();
        assert!(a1.ptr_eq(&a2));
        assert!(!a1.ptr_eq(&b));
        assert_eq!(manager.handle_count(), 2);

        assert!(manager.wait_idle(Duration::from_secs(1)));
        assert_eq!(a1.get().buffer, a2.get().buffer);
        assert_ne!(a1.get().buffer, b.get().buffer);
    }

    #[test]
    fn test_kind_mismatch() {
        let (_backend, manager) = sync_manager("mismatch", &[("a.bin", b"data")]);
        let _blob = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();
        let result = manager.load::<Dependent>("a.bin", UpdatePolicy::Manual, None);
        assert!(matches!(result, Err(ResourceError::KindMismatch { .. })));
    }

    #[test]
    fn test_update_drives_loading_without_resource_thread() {
        let (_backend, manager) = sync_manager("sync", &[("a.bin", b"data")]);
        assert!(!manager.is_threaded());

        let blob = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();
        manager.update();
        assert_eq!(blob.status(), LoadStatus::Busy);
        // 默认 fence 延迟一次
        manager.update();
        assert!(!blob.is_usable());
        manager.update();
        assert!(blob.is_usable());
    }

    #[test]
    fn test_dependency_ordering() {
        let (backend, manager) = sync_manager("dependency", &[("a.bin", b"data")]);
        backend.set_fences_frozen(true);

        let blob = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();
        let dependent = manager.load_with("dependent", UpdatePolicy::Manual, None, || Dependent {
            dependency: Some(blob.clone()),
            loaded: false,
        });
        let dependent = dependent.unwrap();

        for _ in 0..10 {
            manager.update();
        }
        assert_eq!(dependent.status(), LoadStatus::Busy);
        assert!(!dependent.is_usable());

        backend.set_fences_frozen(false);
        for _ in 0..10 {
            manager.update();
            assert!(blob.is_usable() || !dependent.is_usable());
        }
        assert!(blob.is_usable());
        assert!(dependent.is_usable());
    }

    #[test]
    fn test_usable_callback_dispatched_on_update() {
        let (_backend, manager) = sync_manager("callback", &[("a.bin", b"data")]);
        let blob = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        blob.on_usable_once(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..5 {
            manager.update();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_file_soft_fails() {
        let (_backend, manager) = sync_manager("missing", &[]);
        let blob = manager.load::<Blob>("nope.bin", UpdatePolicy::Manual, Some("nope.bin")).unwrap();

        assert!(manager.wait_idle(Duration::from_secs(1)));
        assert_eq!(blob.status(), LoadStatus::ErrorFile);
        assert_eq!(blob.diagnostics().len(), 1);
        assert!(blob.diagnostics()[0].contains("nope.bin"));
    }

    #[test]
    fn test_missing_file_error_policy() {
        let (_backend, gfx) = headless(HeadlessConfig::default());
        let config = ResourceConfig {
            missing_file: MissingFilePolicy::Error,
            ..ResourceConfig::default().with_content_root(content_dir("missing-error", &[]))
        };
        let manager = ResourceManager::new(gfx, config).unwrap();

        let result = manager.load::<Blob>("nope.bin", UpdatePolicy::Manual, Some("nope.bin"));
        assert!(matches!(result, Err(ResourceError::FileNotFound(path)) if path == "nope.bin"));
        assert_eq!(manager.handle_count(), 0);
    }

    #[test]
    fn test_retrieve_file_prefers_direct_file_and_caches() {
        let archive = zip_bytes(&[("a.bin", b"from archive"), ("only/packed.bin", b"packed")]);
        let (_backend, manager) = sync_manager("retrieve", &[("a.bin", b"direct"), ("pack.zip", &archive)]);
        manager.retrieve_archive("pack.zip").unwrap();
        manager.retrieve_archive("./pack.zip").unwrap();
        assert_eq!(manager.file_fetch_count(), 1);

        let direct = manager.retrieve_file("a.bin").unwrap();
        assert_eq!(direct.data(), Some(&b"direct"[..]));
        let again = manager.retrieve_file("./a.bin").unwrap();
        assert!(Arc::ptr_eq(&direct, &again));
        assert_eq!(manager.file_fetch_count(), 2);

        let packed = manager.retrieve_file("only/packed.bin").unwrap();
        assert_eq!(packed.data(), Some(&b"packed"[..]));
        assert!(matches!(manager.retrieve_file("none.bin"), Err(ResourceError::FileNotFound(_))));
    }

    #[test]
    fn test_archives_from_config() {
        let archive = zip_bytes(&[("packed.bin", b"packed")]);
        let (_backend, gfx) = headless(HeadlessConfig::default());
        let config = ResourceConfig {
            archives: vec!["pack.zip".to_string()],
            ..ResourceConfig::default().with_content_root(content_dir("config-archive", &[("pack.zip", &archive)]))
        };
        let manager = ResourceManager::new(gfx, config).unwrap();

        let blob = manager.load::<Blob>("packed", UpdatePolicy::Manual, Some("packed.bin")).unwrap();
        assert!(manager.wait_idle(Duration::from_secs(5)));
        assert!(blob.is_usable());
    }

    #[test]
    fn test_device_reset_reloads_without_refetch() {
        let (backend, manager) = sync_manager("reset", &[("a.bin", b"a"), ("b.bin", b"b")]);
        let a = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();
        let b = manager.load::<Blob>("b.bin", UpdatePolicy::Automatic, Some("b.bin")).unwrap();
        assert!(manager.wait_idle(Duration::from_secs(1)));
        assert_eq!(backend.stats().live_buffers, 2);
        let fetches = manager.file_fetch_count();
        let first_calls = a.get().load_calls;

        manager.reset(ResetMode::Exit).unwrap();
        assert!(!manager.is_active());
        assert!(!a.is_usable() && !b.is_usable());
        assert_eq!(a.status(), LoadStatus::Busy);
        assert_eq!(backend.stats().live_buffers, 0);
        // 重复 Exit 没有效果
        manager.reset(ResetMode::Exit).unwrap();

        manager.reset(ResetMode::Init).unwrap();
        assert_eq!(manager.pending_count(), 2);
        manager.update();
        assert_eq!(a.status(), LoadStatus::Busy);
        assert!(manager.wait_idle(Duration::from_secs(1)));
        assert!(a.is_usable() && b.is_usable());
        assert_eq!(backend.stats().live_buffers, 2);
        assert_eq!(manager.file_fetch_count(), fetches);
        // 重新加载与首次加载的步数相同：上传、强制的 fence 检查
        assert_eq!(first_calls, 2);
        assert_eq!(a.get().load_calls, 2 * first_calls);
    }

    #[test]
    fn test_exit_drains_in_flight_loads() {
        let (backend, manager) = sync_manager("drain", &[("a.bin", b"a")]);
        let a = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();
        manager.update();
        assert_eq!(backend.stats().live_syncs, 1);

        manager.reset(ResetMode::Exit).unwrap();
        let stats = backend.stats();
        assert_eq!((stats.live_buffers, stats.live_syncs), (0, 0));
        assert!(!a.is_usable());
    }

    #[test]
    fn test_relations_notified_around_handles() {
        struct ResetRecorder {
            log: Arc<Mutex<Vec<String>>>,
            blob: ResourcePtr<Blob>,
        }
        impl Relation for ResetRecorder {
            fn reset(&self, mode: ResetMode) {
                lock(&self.log).push(format!("{:?} usable={}", mode, self.blob.is_usable()));
            }
        }

        let (_backend, manager) = sync_manager("relation", &[("a.bin", b"a")]);
        let blob = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();
        assert!(manager.wait_idle(Duration::from_secs(1)));

        let log = Arc::new(Mutex::new(Vec::new()));
        let guard = manager.bind_relation(Arc::new(ResetRecorder {
            log: log.clone(),
            blob: blob.clone(),
        }));

        manager.reset(ResetMode::Exit).unwrap();
        manager.reset(ResetMode::Init).unwrap();
        assert_eq!(*lock(&log), vec!["Exit usable=true", "Init usable=false"]);

        drop(guard);
        manager.reset(ResetMode::Exit).unwrap();
        assert_eq!(lock(&log).len(), 2);
    }

    #[test]
    fn test_load_new_is_never_shared() {
        let (_backend, manager) = sync_manager("anonymous", &[]);
        let a = manager.load_new::<Dependent>().unwrap();
        let b = manager.load_new::<Dependent>().unwrap();
        assert!(!a.ptr_eq(&b));
        assert_ne!(a.name(), b.name());
        assert_eq!(manager.handle_count(), 2);

        manager.update();
        assert_eq!(a.status(), LoadStatus::InvalidInput);
    }

    #[test]
    fn test_free_and_free_unreferenced() {
        let (backend, manager) = sync_manager("free", &[("a.bin", b"a"), ("b.bin", b"b")]);
        let a = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();
        let b = manager.load::<Blob>("b.bin", UpdatePolicy::Manual, Some("b.bin")).unwrap();
        assert!(manager.wait_idle(Duration::from_secs(1)));

        let a_observer = a.clone();
        manager.free(a);
        assert!(!a_observer.is_usable());
        assert_eq!(manager.handle_count(), 1);
        assert_eq!(backend.stats().live_buffers, 1);
        assert!(manager.status("a.bin").is_none());

        // 仍被引用的句柄不会被回收
        assert_eq!(manager.free_unreferenced(), 0);
        drop(b);
        assert_eq!(manager.free_unreferenced(), 1);
        assert_eq!(manager.handle_count(), 0);
        assert_eq!(backend.stats().live_buffers, 0);

        // 回收后同一个 key 会重新创建
        let again = manager.load::<Blob>("b.bin", UpdatePolicy::Manual, Some("b.bin")).unwrap();
        assert!(manager.wait_idle(Duration::from_secs(1)));
        assert!(again.is_usable());
    }

    #[test]
    fn test_reload_manual_handle() {
        let (backend, manager) = sync_manager("reload", &[("a.bin", b"a")]);
        let a = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();
        assert!(manager.wait_idle(Duration::from_secs(1)));
        let first = a.get().buffer;

        assert!(manager.reload("a.bin"));
        assert!(!manager.reload("missing.bin"));
        assert!(manager.wait_idle(Duration::from_secs(1)));
        assert!(a.is_usable());
        assert_ne!(a.get().buffer, first);
        assert_eq!(backend.stats().live_buffers, 1);
    }

    #[test]
    fn test_resource_thread_loads() {
        let (backend, gfx) = headless(HeadlessConfig::default());
        let config = ResourceConfig::default().with_content_root(content_dir("threaded", &[("a.bin", b"a")]));
        let manager = ResourceManager::new(gfx, config).unwrap();
        assert!(manager.is_threaded());

        let a = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        a.on_usable_once(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(manager.wait_idle(Duration::from_secs(5)));
        assert!(a.is_usable());
        manager.update();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        manager.reset(ResetMode::Exit).unwrap();
        assert!(!manager.is_threaded());
        assert!(!backend.is_context_bound(kiln_gfx::backend::ContextKind::Resource));
        manager.reset(ResetMode::Init).unwrap();
        assert!(manager.wait_idle(Duration::from_secs(5)));
        assert!(a.is_usable());
    }

    #[test]
    fn test_wait_idle_flushes_fences() {
        let (backend, manager) = sync_manager("force", &[("a.bin", b"a")]);
        let a = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();
        let flushes = backend.stats().flushes;

        assert!(manager.wait_idle(Duration::from_secs(1)));
        assert!(a.is_usable());
        assert!(backend.stats().flushes > flushes);
        assert_eq!(a.get().load_calls, 2);
    }

    #[test]
    fn test_wait_idle_forces_resource_thread() {
        // 纯轮询永远等不到这个 fence，只有强制的有界检查能完成
        let (backend, gfx) = headless(HeadlessConfig {
            fence_latency: u32::MAX,
            ..Default::default()
        });
        let config = ResourceConfig::default().with_content_root(content_dir("force-threaded", &[("a.bin", b"a")]));
        let manager = ResourceManager::new(gfx, config).unwrap();
        assert!(manager.is_threaded());

        let a = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();
        assert!(manager.wait_idle(Duration::from_secs(5)));
        assert!(a.is_usable());
        assert!(backend.stats().flushes > 0);
    }

    #[test]
    fn test_free_finishes_in_flight_load() {
        let (backend, gfx) = headless(HeadlessConfig {
            capabilities: GfxCapabilities::all() - GfxCapabilities::DUAL_CONTEXT,
            fence_latency: 100,
            ..Default::default()
        });
        let config = ResourceConfig::default().with_content_root(content_dir("free-in-flight", &[("a.bin", b"a")]));
        let manager = ResourceManager::new(gfx, config).unwrap();

        let a = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();
        manager.update();
        assert_eq!(a.status(), LoadStatus::Busy);
        assert_eq!(backend.stats().live_syncs, 1);

        let observer = a.clone();
        manager.free(a);
        assert_eq!(observer.status(), LoadStatus::Ok);
        assert!(!observer.is_usable());
        let stats = backend.stats();
        assert_eq!((stats.live_buffers, stats.live_syncs), (0, 0));
        assert!(stats.flushes > 0);
        assert_eq!(manager.handle_count(), 0);
    }

    #[test]
    fn test_free_unreferenced_waits_for_in_flight_load() {
        let (backend, manager) = sync_manager("unreferenced-in-flight", &[("a.bin", b"a")]);
        backend.set_fences_frozen(true);

        let a = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();
        manager.update();
        assert_eq!(a.status(), LoadStatus::Busy);
        drop(a);

        assert_eq!(manager.free_unreferenced(), 0);
        assert_eq!(manager.handle_count(), 1);
        assert_eq!(backend.stats().live_syncs, 1);

        backend.set_fences_frozen(false);
        for _ in 0..5 {
            manager.update();
        }
        assert_eq!(manager.status("a.bin"), Some(LoadStatus::Ok));
        assert_eq!(manager.free_unreferenced(), 1);
        let stats = backend.stats();
        assert_eq!((stats.live_buffers, stats.live_syncs), (0, 0));
    }

    #[test]
    fn test_reload_while_leaving_sweep_is_kept() {
        let (backend, manager) = sync_manager("reload-race", &[("a.bin", b"a")]);
        let a = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();
        assert!(manager.wait_idle(Duration::from_secs(1)));
        let first = a.get().buffer;

        let handle = lock(&manager.shared.registry).handles.values().next().unwrap().erased.clone();
        // 轮次仍然持有队列标记时到达的 reload，自己入队会失败
        assert!(handle.enter_sweep());
        handle.request_reload();
        assert!(!handle.enter_sweep());

        assert!(Shared::keep_in_sweep(&handle));
        lock(&manager.shared.sweep).push(handle);
        assert_eq!(manager.pending_count(), 1);

        assert!(manager.wait_idle(Duration::from_secs(1)));
        assert_eq!(manager.pending_count(), 0);
        assert!(a.is_usable());
        assert_ne!(a.get().buffer, first);
        assert_eq!(backend.stats().live_buffers, 1);
    }

    #[test]
    fn test_settled_manual_handle_leaves_sweep() {
        let (_backend, manager) = sync_manager("leave-sweep", &[("a.bin", b"a")]);
        let _a = manager.load::<Blob>("a.bin", UpdatePolicy::Manual, Some("a.bin")).unwrap();
        assert!(manager.wait_idle(Duration::from_secs(1)));
        assert!(lock(&manager.shared.sweep).is_empty());

        let handle = lock(&manager.shared.registry).handles.values().next().unwrap().erased.clone();
        assert!(handle.enter_sweep());
        assert!(!Shared::keep_in_sweep(&handle));
        assert!(handle.enter_sweep());
    }
}
