/// 资源流送使用的两类硬件队列
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GfxQueueKind {
    /// 专用的 transfer queue，负责 staging -> device local 的复制
    Transfer,
    /// graphics queue，负责 acquire 以及 mip 生成
    Graphics,
}

#[derive(Clone, Debug)]
pub struct GfxQueueFamily {
    pub name: String,
    pub queue_family_index: u32,
}
