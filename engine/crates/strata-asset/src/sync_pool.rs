use std::sync::{Arc, Mutex};

use strata_gfx::backend::GfxBackend;
use strata_gfx::commands::{fence::GfxFence, semaphore::GfxSemaphore};

/// 可复用的同步对象池
///
/// 每个上传任务借出一个 semaphore（transfer -> graphics）和一个 fence（graphics -> CPU），
/// 在 cleanup 中归还。归还的 fence 会被 reset；超过容量的对象直接销毁。
///
/// 只有确认 GPU 不再使用时才能归还，提交失败的对象不应归还。
pub struct SyncPool {
    backend: Arc<dyn GfxBackend>,
    capacity: usize,

    semaphores: Mutex<Vec<GfxSemaphore>>,
    fences: Mutex<Vec<GfxFence>>,
}

// new & init
impl SyncPool {
    pub fn new(backend: Arc<dyn GfxBackend>, capacity: usize) -> anyhow::Result<Self> {
        let pool = Self {
            backend,
            capacity,
            semaphores: Mutex::new(Vec::with_capacity(capacity)),
            fences: Mutex::new(Vec::with_capacity(capacity)),
        };
        for i in 0..capacity {
            let semaphore = pool.backend.create_semaphore(&format!("upload-semaphore-{i}"))?;
            pool.semaphores.lock().unwrap().push(semaphore);
            let fence = pool.backend.create_fence(&format!("upload-fence-{i}"))?;
            pool.fences.lock().unwrap().push(fence);
        }
        Ok(pool)
    }

    /// 销毁池中所有对象，借出未归还的对象不在此列
    pub fn destroy(&self) {
        for semaphore in self.semaphores.lock().unwrap().drain(..) {
            self.backend.destroy_semaphore(semaphore);
        }
        for fence in self.fences.lock().unwrap().drain(..) {
            self.backend.destroy_fence(fence);
        }
    }
}

// getters
impl SyncPool {
    pub fn available(&self) -> (usize, usize) {
        (self.semaphores.lock().unwrap().len(), self.fences.lock().unwrap().len())
    }
}

// tools
impl SyncPool {
    pub fn acquire_semaphore(&self) -> anyhow::Result<GfxSemaphore> {
        let pooled = self.semaphores.lock().unwrap().pop();
        match pooled {
            Some(semaphore) => Ok(semaphore),
            None => self.backend.create_semaphore("upload-semaphore"),
        }
    }

    pub fn release_semaphore(&self, semaphore: GfxSemaphore) {
        let mut semaphores = self.semaphores.lock().unwrap();
        if semaphores.len() < self.capacity {
            semaphores.push(semaphore);
        } else {
            drop(semaphores);
            self.backend.destroy_semaphore(semaphore);
        }
    }

    /// 借出的 fence 一定处于 unsignaled 状态
    pub fn acquire_fence(&self) -> anyhow::Result<GfxFence> {
        let pooled = self.fences.lock().unwrap().pop();
        match pooled {
            Some(fence) => Ok(fence),
            None => self.backend.create_fence("upload-fence"),
        }
    }

    pub fn release_fence(&self, fence: GfxFence) {
        if let Err(e) = self.backend.reset_fence(&fence) {
            log::error!("reset fence failed, fence destroyed: {:#}", e);
            self.backend.destroy_fence(fence);
            return;
        }

        let mut fences = self.fences.lock().unwrap();
        if fences.len() < self.capacity {
            fences.push(fence);
        } else {
            drop(fences);
            self.backend.destroy_fence(fence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeBackend;

    #[test]
    fn test_reuse_and_capacity() {
        let backend = FakeBackend::new();
        let pool = SyncPool::new(backend.clone(), 2).unwrap();
        assert_eq!(pool.available(), (2, 2));

        let s0 = pool.acquire_semaphore().unwrap();
        let s1 = pool.acquire_semaphore().unwrap();
        let s2 = pool.acquire_semaphore().unwrap();
        assert_eq!(pool.available().0, 0);
        assert_eq!(backend.live_semaphores(), 3);

        pool.release_semaphore(s0);
        pool.release_semaphore(s1);
        pool.release_semaphore(s2);
        assert_eq!(pool.available().0, 2);
        assert_eq!(backend.live_semaphores(), 2);

        // 复用的是同一个对象
        let again = pool.acquire_semaphore().unwrap();
        assert!(again == s0 || again == s1);
        pool.release_semaphore(again);

        pool.destroy();
        assert_eq!(backend.live_semaphores(), 0);
        assert_eq!(backend.live_fences(), 0);
    }

    #[test]
    fn test_released_fence_is_reset() {
        let backend = FakeBackend::new();
        let pool = SyncPool::new(backend.clone(), 1).unwrap();

        let fence = pool.acquire_fence().unwrap();
        backend.signal_fence(&fence);
        assert!(backend.fence_signaled(&fence).unwrap());

        pool.release_fence(fence);
        let fence = pool.acquire_fence().unwrap();
        assert!(!backend.fence_signaled(&fence).unwrap());
        pool.release_fence(fence);
        pool.destroy();
    }
}
