use ash::vk;

/// 一次 descriptor 写入的描述，包含 buffer info 或 image info
///
/// 与 `vk::WriteDescriptorSet` 不同，这里持有 info 的所有权，可以跨线程传递
#[derive(Clone, Debug)]
pub struct GfxWriteDescriptorSet {
    pub dst_set: vk::DescriptorSet,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_type: vk::DescriptorType,

    pub buffer_infos: Vec<vk::DescriptorBufferInfo>,
    pub image_infos: Vec<vk::DescriptorImageInfo>,
}

impl GfxWriteDescriptorSet {
    pub fn buffer(
        dst_set: vk::DescriptorSet,
        dst_binding: u32,
        descriptor_type: vk::DescriptorType,
        buffer_info: vk::DescriptorBufferInfo,
    ) -> Self {
        Self {
            dst_set,
            dst_binding,
            dst_array_element: 0,
            descriptor_type,
            buffer_infos: vec![buffer_info],
            image_infos: vec![],
        }
    }

    pub fn images(
        dst_set: vk::DescriptorSet,
        dst_binding: u32,
        descriptor_type: vk::DescriptorType,
        image_infos: Vec<vk::DescriptorImageInfo>,
    ) -> Self {
        Self {
            dst_set,
            dst_binding,
            dst_array_element: 0,
            descriptor_type,
            buffer_infos: vec![],
            image_infos,
        }
    }

    /// 生成的 `vk::WriteDescriptorSet` 引用 self 中的 info
    pub fn to_vk(&self) -> vk::WriteDescriptorSet<'_> {
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.dst_set)
            .dst_binding(self.dst_binding)
            .dst_array_element(self.dst_array_element)
            .descriptor_type(self.descriptor_type);
        if self.buffer_infos.is_empty() {
            write.image_info(&self.image_infos)
        } else {
            write.buffer_info(&self.buffer_infos)
        }
    }
}
