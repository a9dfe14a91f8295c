use std::sync::Mutex;

/// `poll` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Pending,
    Done,
}

/// 延迟到 GPU 完成之后执行的 CPU 侧收尾工作
///
/// - `poll` 必须是非阻塞的状态查询（例如查询 fence），不能等待
/// - `cleanup` 只会在 `poll` 第一次返回 `Done` 之后，由调用 `tick` 的线程执行一次
pub struct CompletionStub {
    name: String,
    poll: Box<dyn FnMut() -> CompletionStatus + Send>,
    cleanup: Box<dyn FnOnce() + Send>,
}

impl CompletionStub {
    pub fn new(
        name: impl Into<String>,
        poll: impl FnMut() -> CompletionStatus + Send + 'static,
        cleanup: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            poll: Box::new(poll),
            cleanup: Box::new(cleanup),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 完成登记表
///
/// 任意线程都可以 `insert`；`tick` 由帧循环所在的线程每帧调用一次。
///
/// `tick` 在锁内取出当前所有条目，在锁外执行 poll / cleanup，最后把仍然 pending 的条目放回去。
/// 因此 cleanup 中可以再次 insert，tick 期间 insert 的条目会在之后的 tick 中处理，
/// 不会被跳过，也不会被处理两次。
#[derive(Default)]
pub struct CompletionRegistry {
    pending: Mutex<Vec<CompletionStub>>,
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, stub: CompletionStub) {
        log::debug!("completion registered: {}", stub.name);
        self.pending.lock().unwrap().push(stub);
    }

    /// 返回本次执行了 cleanup 的数量
    pub fn tick(&self) -> usize {
        let _span = tracy_client::span!("CompletionRegistry::tick");

        let entries = std::mem::take(&mut *self.pending.lock().unwrap());
        if entries.is_empty() {
            return 0;
        }

        let mut still_pending = Vec::with_capacity(entries.len());
        let mut finished = 0;
        for mut stub in entries {
            match (stub.poll)() {
                CompletionStatus::Pending => still_pending.push(stub),
                CompletionStatus::Done => {
                    log::debug!("completion done: {}", stub.name);
                    (stub.cleanup)();
                    finished += 1;
                }
            }
        }

        // 新插入的条目排在旧条目之后
        let mut pending = self.pending.lock().unwrap();
        let inserted_during_tick = std::mem::replace(&mut *pending, still_pending);
        pending.extend(inserted_during_tick);

        finished
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 第 `done_at` 次 poll 时返回 Done
    fn counting_stub(
        name: &str,
        done_at: usize,
        polls: Arc<AtomicUsize>,
        cleanups: Arc<AtomicUsize>,
    ) -> CompletionStub {
        let cleanup_polls = polls.clone();
        CompletionStub::new(
            name,
            move || {
                let n = polls.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= done_at { CompletionStatus::Done } else { CompletionStatus::Pending }
            },
            move || {
                assert!(cleanup_polls.load(Ordering::SeqCst) >= done_at, "cleanup before poll reported done");
                cleanups.fetch_add(1, Ordering::SeqCst);
            },
        )
    }

    #[test]
    fn test_each_stub_cleaned_up_once() {
        let registry = CompletionRegistry::new();
        let cleanups = (0..10).map(|_| Arc::new(AtomicUsize::new(0))).collect::<Vec<_>>();
        for (i, cleanup) in cleanups.iter().enumerate() {
            registry.insert(counting_stub(
                &format!("stub-{i}"),
                i + 1,
                Arc::new(AtomicUsize::new(0)),
                cleanup.clone(),
            ));
        }

        let mut total = 0;
        for _ in 0..20 {
            total += registry.tick();
        }

        assert_eq!(total, 10);
        assert!(registry.is_empty());
        assert!(cleanups.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_pending_stub_not_cleaned() {
        let registry = CompletionRegistry::new();
        let cleanups = Arc::new(AtomicUsize::new(0));
        registry.insert(counting_stub("slow", 3, Arc::new(AtomicUsize::new(0)), cleanups.clone()));

        assert_eq!(registry.tick(), 0);
        assert_eq!(registry.tick(), 0);
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);
        assert_eq!(registry.tick(), 1);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(registry.tick(), 0);
    }

    #[test]
    fn test_insert_from_cleanup_runs_on_later_tick() {
        let registry = Arc::new(CompletionRegistry::new());
        let second_cleanups = Arc::new(AtomicUsize::new(0));

        let registry_inner = registry.clone();
        let second = second_cleanups.clone();
        registry.insert(CompletionStub::new(
            "first",
            || CompletionStatus::Done,
            move || {
                let second = second.clone();
                registry_inner.insert(CompletionStub::new("second", || CompletionStatus::Done, move || {
                    second.fetch_add(1, Ordering::SeqCst);
                }));
            },
        ));

        assert_eq!(registry.tick(), 1);
        assert_eq!(second_cleanups.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.tick(), 1);
        assert_eq!(second_cleanups.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_insert() {
        let registry = Arc::new(CompletionRegistry::new());
        let cleanups = Arc::new(AtomicUsize::new(0));

        let producers = (0..4)
            .map(|t| {
                let registry = registry.clone();
                let cleanups = cleanups.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let cleanups = cleanups.clone();
                        registry.insert(CompletionStub::new(
                            format!("stub-{t}-{i}"),
                            || CompletionStatus::Done,
                            move || {
                                cleanups.fetch_add(1, Ordering::SeqCst);
                            },
                        ));
                    }
                })
            })
            .collect::<Vec<_>>();

        let mut total = 0;
        while producers.iter().any(|p| !p.is_finished()) {
            total += registry.tick();
        }
        for producer in producers {
            producer.join().unwrap();
        }
        total += registry.tick();

        assert_eq!(total, 100);
        assert_eq!(cleanups.load(Ordering::SeqCst), 100);
    }
}
