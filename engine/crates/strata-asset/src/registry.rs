use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use strata_gfx::backend::GfxBackend;

/// 可以放入 registry 的资源
///
/// registry 不做引用计数，GPU 资源只在 `free_all` 时统一释放
pub trait Asset: Send + Sync + 'static {
    fn destroy(self, backend: &dyn GfxBackend);
}

/// 强类型句柄
///
/// 只是某个类型的 slot 数组中的下标；在 registry 的生命周期内保持稳定，不会被复用，也不带代际检查。
pub struct Handle<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    #[inline]
    fn new(index: usize) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}
impl<T> Eq for Handle<T> {}
impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}
impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let type_name = std::any::type_name::<T>().rsplit("::").next().unwrap_or("?");
        write!(f, "Handle<{}>({})", type_name, self.index)
    }
}

/// slot 的生命周期
///
/// 状态流转: Reserved -> Ready
///                   \-> Failed
pub enum SlotState<T> {
    /// `emplace_empty` 之后，内容尚未就绪
    Reserved,
    /// `finalize` 之后，永久 ready
    Ready(T),
    /// 加载失败：文件不存在、解码失败或者 GPU 提交失败
    Failed(String),
}

/// 不包含内容的 slot 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Reserved,
    Ready,
    Failed,
}

impl<T> SlotState<T> {
    #[inline]
    pub fn status(&self) -> SlotStatus {
        match self {
            SlotState::Reserved => SlotStatus::Reserved,
            SlotState::Ready(_) => SlotStatus::Ready,
            SlotState::Failed(_) => SlotStatus::Failed,
        }
    }
}

/// 组合锁：持有一个类型的锁期间，就绪状态与内容总是一致的
///
/// 渲染线程应当在一次锁定中完成 `is_ready` + `from_handle`
pub struct AssetGuard<'a, T> {
    slots: MutexGuard<'a, Vec<SlotState<T>>>,
}

impl<T> AssetGuard<'_, T> {
    #[inline]
    fn slot(&self, handle: Handle<T>) -> &SlotState<T> {
        debug_assert!(handle.index < self.slots.len(), "invalid handle: {:?}", handle);
        &self.slots[handle.index]
    }

    #[inline]
    pub fn is_ready(&self, handle: Handle<T>) -> bool {
        matches!(self.slot(handle), SlotState::Ready(_))
    }

    #[inline]
    pub fn status(&self, handle: Handle<T>) -> SlotStatus {
        self.slot(handle).status()
    }

    /// 只有 ready 之后才有内容
    #[inline]
    pub fn from_handle(&self, handle: Handle<T>) -> Option<&T> {
        match self.slot(handle) {
            SlotState::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// 未就绪或失败时返回 fallback
    #[inline]
    pub fn get_or<'a>(&'a self, handle: Handle<T>, fallback: &'a T) -> &'a T {
        self.from_handle(handle).unwrap_or(fallback)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 按 handle 顺序遍历所有 slot
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &SlotState<T>)> {
        self.slots.iter().enumerate().map(|(index, slot)| (Handle::new(index), slot))
    }
}

/// 某一个类型的 slot 数组以及它的锁
pub struct AssetStorage<T> {
    slots: Mutex<Vec<SlotState<T>>>,
}

impl<T> Default for AssetStorage<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Asset> AssetStorage<T> {
    pub fn emplace_empty(&self) -> Handle<T> {
        let mut slots = self.slots.lock().unwrap();
        slots.push(SlotState::Reserved);
        Handle::new(slots.len() - 1)
    }

    #[inline]
    pub fn lock(&self) -> AssetGuard<'_, T> {
        AssetGuard {
            slots: self.slots.lock().unwrap(),
        }
    }

    /// 将内容移入 slot 并标记为 ready；每个 handle 只能调用一次
    pub fn finalize(&self, handle: Handle<T>, value: T) {
        let mut slots = self.slots.lock().unwrap();
        debug_assert!(handle.index < slots.len(), "invalid handle: {:?}", handle);
        let slot = &mut slots[handle.index];
        debug_assert!(
            matches!(slot, SlotState::Reserved),
            "finalize called twice or after failure: {:?} ({:?})",
            handle,
            slot.status()
        );
        *slot = SlotState::Ready(value);
    }

    /// `finalize` 的失败版本；每个 handle 只能在两者之中调用一次
    pub fn fail(&self, handle: Handle<T>, reason: String) {
        let mut slots = self.slots.lock().unwrap();
        debug_assert!(handle.index < slots.len(), "invalid handle: {:?}", handle);
        let slot = &mut slots[handle.index];
        debug_assert!(
            matches!(slot, SlotState::Reserved),
            "fail called on a settled slot: {:?} ({:?})",
            handle,
            slot.status()
        );
        log::warn!("asset failed: {:?}, {}", handle, reason);
        *slot = SlotState::Failed(reason);
    }

    /// 返回释放的资源数量
    fn release_all(&self, backend: &dyn GfxBackend) -> usize {
        let mut slots = self.slots.lock().unwrap();
        let mut freed = 0;
        for slot in slots.iter_mut() {
            match std::mem::replace(slot, SlotState::Failed("released by free_all".to_string())) {
                SlotState::Ready(value) => {
                    value.destroy(backend);
                    freed += 1;
                }
                SlotState::Reserved => {
                    log::warn!("free_all: {} slot still reserved", std::any::type_name::<T>());
                    *slot = SlotState::Reserved;
                }
                failed @ SlotState::Failed(_) => *slot = failed,
            }
        }
        freed
    }
}

/// 类型擦除之后的 storage，用于统一 `free_all`
trait ErasedStorage: Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn free_all(&self, backend: &dyn GfxBackend) -> usize;
    fn type_name(&self) -> &'static str;
}

impl<T: Asset> ErasedStorage for AssetStorage<T> {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn free_all(&self, backend: &dyn GfxBackend) -> usize {
        self.release_all(backend)
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// 以类型为索引的资源表
///
/// 每个类型一个 slot 数组 + 一把锁。两阶段生命周期：
/// `emplace_empty` 立即返回稳定的 handle，内容在 GPU 完成之后由 `finalize` 填入。
#[derive(Default)]
pub struct AssetRegistry {
    storages: RwLock<HashMap<TypeId, Arc<dyn ErasedStorage>>>,
}

// storage
impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取（必要时创建）某个类型的 storage
    ///
    /// 渲染线程可以缓存返回的 `Arc`，避免每帧查表
    pub fn storage<T: Asset>(&self) -> Arc<AssetStorage<T>> {
        let type_id = TypeId::of::<T>();
        let erased = self.storages.read().unwrap().get(&type_id).cloned();
        let erased = match erased {
            Some(erased) => erased,
            None => self
                .storages
                .write()
                .unwrap()
                .entry(type_id)
                .or_insert_with(|| Arc::new(AssetStorage::<T>::default()) as Arc<dyn ErasedStorage>)
                .clone(),
        };

        match erased.into_any().downcast::<AssetStorage<T>>() {
            Ok(storage) => storage,
            Err(_) => unreachable!("storage type mismatch for {}", std::any::type_name::<T>()),
        }
    }
}

// slot 操作
impl AssetRegistry {
    pub fn emplace_empty<T: Asset>(&self) -> Handle<T> {
        self.storage::<T>().emplace_empty()
    }

    pub fn is_ready<T: Asset>(&self, handle: Handle<T>) -> bool {
        self.storage::<T>().lock().is_ready(handle)
    }

    pub fn status<T: Asset>(&self, handle: Handle<T>) -> SlotStatus {
        self.storage::<T>().lock().status(handle)
    }

    /// ready 或 failed，不会再发生变化
    pub fn is_settled<T: Asset>(&self, handle: Handle<T>) -> bool {
        self.status(handle) != SlotStatus::Reserved
    }

    pub fn finalize<T: Asset>(&self, handle: Handle<T>, value: T) {
        log::info!("asset ready: {:?}", handle);
        self.storage::<T>().finalize(handle, value);
    }

    pub fn fail<T: Asset>(&self, handle: Handle<T>, reason: String) {
        self.storage::<T>().fail(handle, reason);
    }

    /// 在同一把锁内检查就绪状态并读取内容
    pub fn with_ready<T: Asset, R>(&self, handle: Handle<T>, f: impl FnOnce(&T) -> R) -> Option<R> {
        let storage = self.storage::<T>();
        let guard = storage.lock();
        guard.from_handle(handle).map(f)
    }

    /// 批量释放所有 ready slot 中的 GPU 资源，返回释放的数量
    pub fn free_all(&self, backend: &dyn GfxBackend) -> usize {
        let _span = tracy_client::span!("AssetRegistry::free_all");
        let storages = self.storages.read().unwrap().values().cloned().collect::<Vec<_>>();
        storages
            .iter()
            .map(|storage| {
                let freed = storage.free_all(backend);
                log::info!("free_all: {} x {}", freed, storage.type_name());
                freed
            })
            .sum()
    }
}
