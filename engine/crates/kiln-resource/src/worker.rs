use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use kiln_gfx::backend::ContextKind;

use crate::error::ResourceError;
use crate::manager::{PassMode, Shared};

pub(crate) enum WorkerSignal {
    /// 有新的句柄入队
    Wake,
    Stop,
}

/// 资源线程
///
/// 线程启动时绑定资源上下文，退出时解绑；
/// 之后反复执行更新轮次，没有待处理资源时在 channel 上休眠。
pub(crate) struct ResourceWorker {
    signal_sender: Sender<WorkerSignal>,
    thread: Option<thread::JoinHandle<()>>,
}
// new & init
impl ResourceWorker {
    pub fn spawn(shared: Arc<Shared>) -> Result<Self, ResourceError> {
        let (signal_sender, signal_receiver) = crossbeam_channel::unbounded::<WorkerSignal>();

        shared.worker_alive.store(true, Ordering::SeqCst);
        *crate::lock(&shared.waker) = Some(signal_sender.clone());

        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("resource-thread".to_string())
            .spawn(move || Self::run(thread_shared, signal_receiver))
            .map_err(|e| {
                shared.worker_alive.store(false, Ordering::SeqCst);
                *crate::lock(&shared.waker) = None;
                ResourceError::WorkerSpawn(e)
            })?;

        Ok(Self {
            signal_sender,
            thread: Some(thread),
        })
    }

    fn run(shared: Arc<Shared>, signal_receiver: Receiver<WorkerSignal>) {
        let gfx = shared.gfx.clone();
        let _alive = scopeguard::guard((), |_| {
            shared.worker_alive.store(false, Ordering::SeqCst);
        });

        if !gfx.bind_context(ContextKind::Resource) {
            log::error!("Resource context could not be assigned to resource thread, loading on render thread instead");
            return;
        }
        log::info!("Resource context assigned to resource thread");
        scopeguard::defer! {
            gfx.unbind_context(ContextKind::Resource);
            log::info!("Resource context released from resource thread");
        }

        let idle = Duration::from_millis(shared.config.worker_idle_ms);
        let busy = Duration::from_millis(shared.config.worker_busy_ms);
        let mut pending = 0;
        loop {
            let wait = if pending > 0 { busy } else { idle };
            match signal_receiver.recv_timeout(wait) {
                Ok(WorkerSignal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(WorkerSignal::Wake) | Err(RecvTimeoutError::Timeout) => {}
            }
            let mode = if shared.take_force_request() { PassMode::Force } else { PassMode::Sweep };
            pending = shared.run_pass(mode).pending;
        }
    }
}
// destroy
impl ResourceWorker {
    /// 通知线程退出并等待；当前这一轮会先完成
    pub fn stop(self) {
        drop(self);
    }
}
impl Drop for ResourceWorker {
    fn drop(&mut self) {
        let _ = self.signal_sender.send(WorkerSignal::Stop);

        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            log::error!("Failed to join resource thread");
        }
        log::info!("Resource thread stopped");
    }
}
