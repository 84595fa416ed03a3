//! 可取消长任务协议。
//!
//! 并发模型刻意保持最小：每次调用占用一个专属后台线程，控制线程只负责
//! 取消与读进度。取消是协作式、粗粒度的——工作线程只在单元边界
//! （每个filter/空间位置/分组的开头）轮询标志，绝不在一步梯度上升中途检查；
//! 进行中的单元总会完整结束，之后的单元被跳过。被取消的任务在内存中的
//! 部分结果整体作废（全有或全无），取消本身不是错误。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::{self, JoinHandle};


/// 协作式取消令牌：控制线程置位，工作线程在单元边界轮询
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 工作线程侧的任务上下文：取消令牌 + 进度通道。
/// 进度是单调递增的提示信号，不用于同步。
pub struct TaskContext {
    token: CancelToken,
    progress: Sender<usize>,
}

impl TaskContext {
    /// 构造独立上下文（同步调用或测试用），返回配套的进度接收端
    pub fn new(token: CancelToken) -> (Self, Receiver<usize>) {
        let (tx, rx) = channel();
        (
            Self {
                token,
                progress: tx,
            },
            rx,
        )
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// 上报已完成的单元数。接收端不在也无妨。
    pub fn progress(&self, done: usize) {
        let _ = self.progress.send(done);
    }
}

/// 后台任务句柄：持有取消令牌、进度接收端与线程句柄
pub struct Task<T> {
    token: CancelToken,
    progress: Receiver<usize>,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> Task<T> {
    /// 在专属后台线程上运行`f`；控制线程保持可响应
    pub fn spawn<F>(f: F) -> Self
    where
        F: FnOnce(&TaskContext) -> T + Send + 'static,
    {
        let token = CancelToken::new();
        let (ctx, progress) = TaskContext::new(token.clone());
        let handle = thread::spawn(move || f(&ctx));
        Self {
            token,
            progress,
            handle,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// 取走目前收到的最新进度值（没有则为None）
    pub fn latest_progress(&self) -> Option<usize> {
        self.progress.try_iter().last()
    }

    /// 等待任务结束。工作线程panic时向上传播。
    pub fn join(self) -> thread::Result<T> {
        self.handle.join()
    }
}
