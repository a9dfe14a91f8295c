use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex, RwLock};

use ash::vk;
use strata_gfx::backend::GfxBackend;
use strata_gfx::descriptors::write_descriptor_set::GfxWriteDescriptorSet;

use crate::context::StreamContext;
use crate::registry::Handle;
use crate::upload::texture::StaticTexture;

/// 绑定到某个 binding 上的内容
#[derive(Debug, Clone)]
pub enum DescriptorValue {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
    /// 整个数组一次写入
    ImageArray(Vec<vk::DescriptorImageInfo>),
}

/// 上一次写入的内容
///
/// buffer 与单个 image 按值比较，image 数组只保存长度与内容的 hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CachedDescriptor {
    Buffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    Image {
        sampler: vk::Sampler,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    },
    ImageArray {
        len: usize,
        hash: u64,
    },
}

impl CachedDescriptor {
    fn from_value(value: &DescriptorValue) -> Self {
        match value {
            DescriptorValue::Buffer(info) => CachedDescriptor::Buffer {
                buffer: info.buffer,
                offset: info.offset,
                range: info.range,
            },
            DescriptorValue::Image(info) => CachedDescriptor::Image {
                sampler: info.sampler,
                view: info.image_view,
                layout: info.image_layout,
            },
            DescriptorValue::ImageArray(infos) => {
                let mut hasher = DefaultHasher::new();
                for info in infos {
                    (info.sampler, info.image_view, info.image_layout).hash(&mut hasher);
                }
                CachedDescriptor::ImageArray {
                    len: infos.len(),
                    hash: hasher.finish(),
                }
            }
        }
    }
}

type SetBindings = HashMap<u32, (vk::DescriptorType, CachedDescriptor)>;

/// 以 (set, binding) 为键的 descriptor 写入缓存
///
/// 内容相同的重复绑定不会产生任何 GPU 可见的写入。每个 set 一把锁，不同 set 之间互不阻塞。
pub struct DescriptorBindingCache {
    backend: Arc<dyn GfxBackend>,
    sets: RwLock<HashMap<vk::DescriptorSet, Arc<Mutex<SetBindings>>>>,
}

// new & init
impl DescriptorBindingCache {
    pub fn new(backend: Arc<dyn GfxBackend>) -> Self {
        Self {
            backend,
            sets: RwLock::new(HashMap::new()),
        }
    }
}

// tools
impl DescriptorBindingCache {
    /// 与上次写入的内容不同时写入 descriptor，返回是否发生了写入
    ///
    /// descriptor 类型或内容种类发生变化时总是写入
    pub fn bind(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        value: DescriptorValue,
    ) -> bool {
        let _span = tracy_client::span!("DescriptorBindingCache::bind");
        let cached = (descriptor_type, CachedDescriptor::from_value(&value));

        let bindings = self.bindings(set);
        let mut bindings = bindings.lock().unwrap();
        if bindings.get(&binding) == Some(&cached) {
            return false;
        }

        let write = match value {
            DescriptorValue::Buffer(info) => GfxWriteDescriptorSet::buffer(set, binding, descriptor_type, info),
            DescriptorValue::Image(info) => GfxWriteDescriptorSet::images(set, binding, descriptor_type, vec![info]),
            DescriptorValue::ImageArray(infos) => GfxWriteDescriptorSet::images(set, binding, descriptor_type, infos),
        };
        self.backend.write_descriptor_sets(std::slice::from_ref(&write));
        bindings.insert(binding, cached);
        true
    }

    /// 绑定一个 texture；未就绪或失败时绑定 fallback texture
    ///
    /// 读取状态与内容在同一把锁中完成。texture ready 之后的下一次调用会检测到变化并重新写入
    pub fn bind_texture(
        &self,
        ctx: &StreamContext,
        set: vk::DescriptorSet,
        binding: u32,
        texture: Handle<StaticTexture>,
        sampler: vk::Sampler,
    ) -> bool {
        let (info, is_fallback) = {
            let storage = ctx.registry().storage::<StaticTexture>();
            let guard = storage.lock();
            match (guard.from_handle(texture), guard.from_handle(ctx.fallback_texture())) {
                (Some(texture), _) => (texture.descriptor_info(sampler), false),
                (None, Some(fallback)) => (fallback.descriptor_info(sampler), true),
                (None, None) => {
                    log::error!("fallback texture is not ready, {:?} not bound", texture);
                    return false;
                }
            }
        };

        let written = self.bind(set, binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, DescriptorValue::Image(info));
        if written && is_fallback {
            log::warn!("{:?} is not ready, fallback bound to binding {}", texture, binding);
        }
        written
    }

    /// 绑定所有 texture 组成的数组，按 handle 顺序
    pub fn bind_all_textures(
        &self,
        ctx: &StreamContext,
        set: vk::DescriptorSet,
        binding: u32,
        sampler: vk::Sampler,
    ) -> bool {
        let infos = StaticTexture::descriptor_infos(ctx, sampler);
        self.bind(set, binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, DescriptorValue::ImageArray(infos))
    }

    /// descriptor set 被释放或者在外部被改写之后调用
    pub fn invalidate(&self, set: vk::DescriptorSet) {
        self.sets.write().unwrap().remove(&set);
    }

    fn bindings(&self, set: vk::DescriptorSet) -> Arc<Mutex<SetBindings>> {
        if let Some(bindings) = self.sets.read().unwrap().get(&set) {
            return bindings.clone();
        }
        self.sets.write().unwrap().entry(set).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeBackend, pump_until, test_context};
    use crate::upload::texture::{TextureColorSpace, TextureData};
    use ash::vk::Handle as _;

    fn set(raw: u64) -> vk::DescriptorSet {
        vk::DescriptorSet::from_raw(raw)
    }

    fn buffer_info(raw: u64, range: vk::DeviceSize) -> DescriptorValue {
        DescriptorValue::Buffer(vk::DescriptorBufferInfo {
            buffer: vk::Buffer::from_raw(raw),
            offset: 0,
            range,
        })
    }

    fn image_info(raw: u64) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: vk::ImageView::from_raw(raw),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    #[test]
    fn test_identical_binds_write_once() {
        let backend = FakeBackend::new();
        let cache = DescriptorBindingCache::new(backend.clone());
        let ty = vk::DescriptorType::UNIFORM_BUFFER;

        assert!(cache.bind(set(1), 0, ty, buffer_info(10, 64)));
        assert!(!cache.bind(set(1), 0, ty, buffer_info(10, 64)));
        assert!(!cache.bind(set(1), 0, ty, buffer_info(10, 64)));
        assert_eq!(backend.descriptor_writes().len(), 1);

        // range 不同
        assert!(cache.bind(set(1), 0, ty, buffer_info(10, 128)));
        // 其他 binding 与其他 set 互不影响
        assert!(cache.bind(set(1), 1, ty, buffer_info(10, 128)));
        assert!(cache.bind(set(2), 0, ty, buffer_info(10, 128)));
        assert_eq!(backend.descriptor_writes().len(), 4);

        let last = backend.descriptor_writes().pop().unwrap();
        assert_eq!(last.dst_set, set(2));
        assert_eq!(last.buffer_infos[0].range, 128);
    }

    #[test]
    fn test_kind_switch_always_writes() {
        let backend = FakeBackend::new();
        let cache = DescriptorBindingCache::new(backend.clone());

        assert!(cache.bind(set(1), 0, vk::DescriptorType::STORAGE_BUFFER, buffer_info(5, 16)));
        assert!(cache.bind(set(1), 0, vk::DescriptorType::SAMPLED_IMAGE, DescriptorValue::Image(image_info(5))));
        assert!(cache.bind(set(1), 0, vk::DescriptorType::STORAGE_BUFFER, buffer_info(5, 16)));
        // 内容相同但 descriptor 类型不同
        assert!(cache.bind(set(1), 0, vk::DescriptorType::UNIFORM_BUFFER, buffer_info(5, 16)));
        assert_eq!(backend.descriptor_writes().len(), 4);
    }

    #[test]
    fn test_image_array_compared_by_content() {
        let backend = FakeBackend::new();
        let cache = DescriptorBindingCache::new(backend.clone());
        let ty = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
        let array = |raws: &[u64]| DescriptorValue::ImageArray(raws.iter().map(|r| image_info(*r)).collect());

        assert!(cache.bind(set(1), 3, ty, array(&[1, 2, 3])));
        assert!(!cache.bind(set(1), 3, ty, array(&[1, 2, 3])));
        assert!(cache.bind(set(1), 3, ty, array(&[1, 4, 3])));
        assert!(cache.bind(set(1), 3, ty, array(&[1, 4, 3, 3])));
        assert_eq!(backend.descriptor_writes().len(), 3);
        assert_eq!(backend.descriptor_writes()[2].image_infos.len(), 4);
    }

    #[test]
    fn test_invalidate_forces_write() {
        let backend = FakeBackend::new();
        let cache = DescriptorBindingCache::new(backend.clone());
        let ty = vk::DescriptorType::UNIFORM_BUFFER;

        assert!(cache.bind(set(1), 0, ty, buffer_info(1, 4)));
        cache.invalidate(set(1));
        assert!(cache.bind(set(1), 0, ty, buffer_info(1, 4)));
        assert_eq!(backend.descriptor_writes().len(), 2);
    }

    #[test]
    fn test_texture_fallback_then_rebind() {
        let (backend, ctx) = test_context(false);
        let cache = DescriptorBindingCache::new(backend.clone());
        let texture = ctx.registry().emplace_empty::<StaticTexture>();
        let h = StaticTexture::request_pixels(
            &ctx,
            TextureData::new("late", 2, 2, vec![255; 16]),
            TextureColorSpace::Srgb,
        );
        let view_of = |h: Handle<StaticTexture>| ctx.registry().with_ready(h, |t: &StaticTexture| t.image().view()).unwrap();
        let fallback_view = view_of(ctx.fallback_texture());

        // 未就绪：写入 fallback，之后的帧不再写入
        assert!(cache.bind_texture(&ctx, set(7), 0, h, vk::Sampler::null()));
        assert!(!cache.bind_texture(&ctx, set(7), 0, h, vk::Sampler::null()));
        assert_eq!(backend.descriptor_writes()[0].image_infos[0].image_view, fallback_view);

        ctx.scheduler().wait_idle();
        backend.signal_all();
        pump_until(&ctx, || ctx.registry().is_ready(h));

        assert!(cache.bind_texture(&ctx, set(7), 0, h, vk::Sampler::null()));
        assert!(!cache.bind_texture(&ctx, set(7), 0, h, vk::Sampler::null()));
        let writes = backend.descriptor_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].image_infos[0].image_view, view_of(h));

        // 从未 finalize 的 slot 一直使用 fallback
        assert!(cache.bind_texture(&ctx, set(7), 1, texture, vk::Sampler::null()));
        assert_eq!(backend.descriptor_writes()[2].image_infos[0].image_view, fallback_view);
        ctx.registry().fail(texture, "never loaded".to_string());
        ctx.shutdown();
    }

    #[test]
    fn test_bind_all_textures() {
        let (backend, ctx) = test_context(true);
        let cache = DescriptorBindingCache::new(backend.clone());
        let sampler = vk::Sampler::null();

        assert!(cache.bind_all_textures(&ctx, set(9), 2, sampler));
        assert!(!cache.bind_all_textures(&ctx, set(9), 2, sampler));

        let h = StaticTexture::request_pixels(&ctx, TextureData::new("more", 1, 1, vec![0; 4]), TextureColorSpace::Linear);
        pump_until(&ctx, || ctx.registry().is_ready(h));
        assert!(cache.bind_all_textures(&ctx, set(9), 2, sampler));

        let writes = backend.descriptor_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].image_infos.len(), 1);
        assert_eq!(writes[1].image_infos.len(), 2);
        ctx.shutdown();
    }
}
