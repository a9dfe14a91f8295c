use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crossbeam_channel::Sender;
use crossbeam_utils::sync::WaitGroup;

/// 后台任务：拥有捕获的全部状态，执行一次后自动销毁
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// 尚未执行完的任务数量
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn increase(&self) {
        *self.count.lock().unwrap() += 1;
    }

    fn decrease(&self) {
        let mut count = self.count.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// 任务结束（包括 panic）时减少计数
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.decrease();
    }
}

/// 后台任务调度器
///
/// crossbeam 提供消息队列，rayon 提供线程池：
/// 1. `submit` 通过 channel 发送任务，立即返回，不会阻塞提交者。
/// 2. "Asset-Dispatcher" 线程不断接收任务，并派发给专用的 rayon 线程池 ("Asset-Worker-{i}")。
/// 3. 任务内部可以继续 `submit` 新的任务。
/// 4. worker 空闲时在 rayon 内部休眠，不会空转。
///
/// 任务之间没有顺序保证；任务自己负责处理错误，panic 只会被记录，不会重试。
///
/// # 线程生命周期
/// 当 `TaskScheduler` 被 Drop 时：
/// 1. `job_sender` 被销毁，导致 channel 断开。
/// 2. dispatcher 线程退出接收循环，通过 `WaitGroup` 等待所有已派发的任务完成。
/// 3. `drop` 调用 `join()` 等待 dispatcher 线程退出。
///    如果 Drop 发生在 worker 线程上（任务持有最后一个引用），则不 join，dispatcher 会在该任务结束后自行退出。
pub struct TaskScheduler {
    job_sender: Option<Sender<Job>>,
    dispatch_thread: Option<thread::JoinHandle<()>>,

    in_flight: Arc<InFlight>,
    worker_count: usize,
}

// new & init
impl TaskScheduler {
    pub fn new(worker_count: usize) -> anyhow::Result<Self> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|index| format!("Asset-Worker-{}", index))
            .panic_handler(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "<unknown>".to_string());
                log::error!("asset job panicked: {}", message);
            })
            .build()?;

        let dispatch_thread = thread::Builder::new()
            .name("Asset-Dispatcher".to_string())
            .spawn(move || {
                let wg = WaitGroup::new();

                while let Ok(job) = job_rx.recv() {
                    let _span = tracy_client::span!("TaskScheduler::dispatch");

                    // 任务结束时闭包销毁，wg_task 也会被 drop
                    let wg_task = wg.clone();
                    pool.spawn(move || {
                        job();
                        drop(wg_task);
                    });
                }

                wg.wait();
                log::info!("asset dispatcher exit");
            })?;

        log::info!("TaskScheduler started with {} workers", worker_count);
        Ok(Self {
            job_sender: Some(job_tx),
            dispatch_thread: Some(dispatch_thread),
            in_flight: Arc::new(InFlight::default()),
            worker_count,
        })
    }
}

// getters
impl TaskScheduler {
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// 已提交但尚未执行完的任务数量
    pub fn in_flight(&self) -> usize {
        *self.in_flight.count.lock().unwrap()
    }
}

// tools
impl TaskScheduler {
    /// 提交一个 fire-and-forget 的任务，立即返回
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = &self.job_sender else {
            log::error!("TaskScheduler is shut down, job dropped");
            return;
        };

        self.in_flight.increase();
        let guard = InFlightGuard(self.in_flight.clone());
        let job: Job = Box::new(move || {
            let _guard = guard;
            job();
        });
        if sender.send(job).is_err() {
            // 发送失败时 job 随错误一起被销毁，guard 会归还计数
            log::error!("asset dispatcher is gone, job dropped");
        }
    }

    /// 阻塞等待所有已提交的任务（包括任务中继续提交的任务）执行完
    ///
    /// 不能在 worker 线程中调用
    pub fn wait_idle(&self) {
        let _span = tracy_client::span!("TaskScheduler::wait_idle");
        debug_assert!(rayon::current_thread_index().is_none(), "wait_idle called from a worker thread");

        let mut count = self.in_flight.count.lock().unwrap();
        while *count > 0 {
            count = self.in_flight.idle.wait(count).unwrap();
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.job_sender = None;

        if let Some(thread) = self.dispatch_thread.take() {
            if rayon::current_thread_index().is_some() {
                log::warn!("TaskScheduler dropped on a worker thread, dispatcher is detached");
                return;
            }
            if thread.join().is_err() {
                log::error!("asset dispatcher panicked");
            }
        }
    }
}
