use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use indexmap::IndexMap;

use crate::lock;
use crate::status::ResetMode;

/// 需要响应设备重置的对象，独立于资源缓存 (例如全局 uniform buffer)
///
/// `Exit` 时释放自己的 GPU 对象，`Init` 时重新创建
pub trait Relation: Send + Sync {
    fn reset(&self, mode: ResetMode);
}

/// 按注册顺序保存所有 relation
#[derive(Default)]
pub(crate) struct RelationRegistry {
    next_id: AtomicU64,
    relations: Mutex<IndexMap<u64, Arc<dyn Relation>>>,
}
impl RelationRegistry {
    pub fn bind(self: &Arc<Self>, relation: Arc<dyn Relation>) -> RelationGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.relations).insert(id, relation);
        RelationGuard {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// 拷贝一份快照，通知时不持有锁
    pub fn snapshot(&self) -> Vec<Arc<dyn Relation>> {
        lock(&self.relations).values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.relations).len()
    }

    pub fn notify(&self, mode: ResetMode) {
        for relation in self.snapshot() {
            relation.reset(mode);
        }
    }
}

/// 绑定关系的生命周期，Drop 时解除绑定
#[must_use = "the relation is unbound as soon as the guard is dropped"]
pub struct RelationGuard {
    id: u64,
    registry: Weak<RelationRegistry>,
}
impl Drop for RelationGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry.relations).shift_remove(&self.id);
        }
    }
}
