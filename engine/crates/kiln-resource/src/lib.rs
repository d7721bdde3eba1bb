//! 异步 GPU 资源加载
//!
//! 使用者通过 [`manager::ResourceManager`] 按 key 请求资源，立即得到一个 [`ptr::ResourcePtr`]；
//! 实际的读取、解码和上传在资源线程上分多步完成，每一步都以 fence 守护，
//! 只有 GPU 确认完成之后资源才会变为可用。
//!
//! # 模块
//! - `status`: 加载结果、更新策略和重置模式
//! - `resource`: 资源 trait 和一次加载调用的上下文
//! - `handle`: 资源句柄，保存资源实例与加载元数据
//! - `ptr`: 带引用计数的资源指针
//! - `file`: 直接文件与 zip 归档
//! - `relation`: 需要响应设备重置的外部对象
//! - `manager`: 注册表、资源线程与设备重置

pub mod config;
pub mod error;
pub mod file;
pub mod handle;
pub mod manager;
pub mod ptr;
pub mod relation;
pub mod resource;
pub mod status;

mod worker;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// 加锁，忽略锁中毒
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
