use std::fmt;
use std::sync::{Arc, RwLockReadGuard};

use crate::handle::{HandleKey, ResourceHandle};
use crate::resource::{Diagnostic, Resource, ResourceKind};
use crate::status::LoadStatus;

/// 指向资源句柄的带类型引用
///
/// Clone 增加句柄的引用计数，Drop 减少。
/// 计数归零不会释放句柄，只是让它可以被 `ResourceManager::free_unreferenced` 回收。
pub struct ResourcePtr<T: Resource> {
    handle: Arc<ResourceHandle<T>>,
}
// new & init
impl<T: Resource> ResourcePtr<T> {
    pub(crate) fn new(handle: Arc<ResourceHandle<T>>) -> Self {
        handle.acquire();
        Self { handle }
    }
}
impl<T: Resource> Clone for ResourcePtr<T> {
    fn clone(&self) -> Self {
        Self::new(self.handle.clone())
    }
}
impl<T: Resource> Drop for ResourcePtr<T> {
    fn drop(&mut self) {
        if self.handle.release() == 0 {
            log::debug!("Resource ({}) is no longer referenced", self.handle.name());
        }
    }
}
impl<T: Resource> fmt::Debug for ResourcePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePtr")
            .field("kind", &T::KIND)
            .field("name", &self.handle.name())
            .field("status", &self.handle.status())
            .finish()
    }
}
// getters
impl<T: Resource> ResourcePtr<T> {
    /// 读取资源
    ///
    /// # Panics
    /// 资源还不可用时调用是编程错误。先检查 [`Self::is_usable`]，或者使用 [`Self::on_usable_once`]
    pub fn get(&self) -> RwLockReadGuard<'_, T> {
        assert!(
            self.is_usable(),
            "{} ({}) used before it became usable",
            T::KIND,
            self.handle.name()
        );
        self.handle.read()
    }

    /// 可用时读取资源
    pub fn try_get(&self) -> Option<RwLockReadGuard<'_, T>> {
        self.is_usable().then(|| self.handle.read())
    }

    #[inline]
    pub fn is_usable(&self) -> bool {
        self.handle.is_usable()
    }

    #[inline]
    pub fn status(&self) -> LoadStatus {
        self.handle.status()
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    #[inline]
    pub fn kind(&self) -> ResourceKind {
        T::KIND
    }

    #[inline]
    pub fn key(&self) -> HandleKey {
        self.handle.key()
    }

    #[inline]
    pub fn ref_count(&self) -> usize {
        self.handle.ref_count()
    }

    /// 最近一次加载记录下的失败
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.handle.diagnostics()
    }

    /// 两个指针是否指向同一个句柄
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}
// tools
impl<T: Resource> ResourcePtr<T> {
    /// 注册一个一次性回调，在句柄变为可用的那一帧由 `ResourceManager::update` 调用
    ///
    /// 已经可用时立即在当前线程调用
    pub fn on_usable_once(&self, callback: impl FnOnce() + Send + 'static) {
        self.handle.on_usable_once(Box::new(callback));
    }

    /// 修改资源的定义数据 (例如 program 的 shader 列表)
    ///
    /// 会与资源线程的加载互斥，只应该在资源尚未加载时使用
    pub fn modify<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.handle.modify(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::tests::Blob;
    use crate::status::UpdatePolicy;

    fn ptr() -> ResourcePtr<Blob> {
        ResourcePtr::new(Arc::new(ResourceHandle::new(
            HandleKey::default(),
            "blob".to_string(),
            UpdatePolicy::Manual,
            Blob::default(),
            None,
            None,
        )))
    }

    #[test]
    fn test_ref_counting() {
        let a = ptr();
        assert_eq!(a.ref_count(), 1);
        let b = a.clone();
        assert_eq!(a.ref_count(), 2);
        assert!(a.ptr_eq(&b));
        drop(b);
        assert_eq!(a.ref_count(), 1);
    }

    #[test]
    fn test_try_get_before_usable() {
        let a = ptr();
        assert!(!a.is_usable());
        assert!(a.try_get().is_none());
        assert_eq!(a.status(), LoadStatus::Busy);
    }

    #[test]
    #[should_panic(expected = "used before it became usable")]
    fn test_get_before_usable_panics() {
        let a = ptr();
        drop(a.get());
    }
}
