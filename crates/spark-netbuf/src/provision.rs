//! 描述符存储供给钩子。
//!
//! # 模块定位（Why）
//! - 缓冲存储从哪里来是硬件相关的：有的网卡要求 DMA 可达的连续区域，有的只需普通堆内存。
//!   池本身不关心这一点，只在初始化时调用一次 [`StorageProvisioner`]，让宿主为每个描述符挂载存储。
//!
//! # 契约说明（What）
//! - 钩子在池的生命周期内恰好被调用一次，发生在任何描述符进入空闲链表之前；
//! - 钩子的失败不在池的处理范围内：要么成功，要么由宿主在启动期终止系统。
//!   未挂载存储的槽位以零长度存储进入池，并记录一条告警。

use bytes::BytesMut;

/// 传给供给钩子的单个槽位视图。
#[derive(Debug)]
pub struct DescriptorStorage {
    index: usize,
    buffer: Option<BytesMut>,
}

impl DescriptorStorage {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            buffer: None,
        }
    }

    /// 槽位索引，与最终句柄的 [`index`](crate::BufferDescriptor::index) 一致。
    pub fn index(&self) -> usize {
        self.index
    }

    /// 挂载存储；重复调用以最后一次为准。
    pub fn attach(&mut self, buffer: BytesMut) {
        self.buffer = Some(buffer);
    }

    pub fn is_attached(&self) -> bool {
        self.buffer.is_some()
    }

    pub(crate) fn into_buffer(self) -> Option<BytesMut> {
        self.buffer
    }
}

/// 初始化期的存储供给钩子。
pub trait StorageProvisioner {
    /// 为每个槽位挂载 `buffer_size` 字节的存储。
    fn provision(&mut self, slots: &mut [DescriptorStorage], buffer_size: usize);
}

impl<F> StorageProvisioner for F
where
    F: FnMut(&mut [DescriptorStorage], usize),
{
    fn provision(&mut self, slots: &mut [DescriptorStorage], buffer_size: usize) {
        self(slots, buffer_size)
    }
}

/// 为每个槽位单独分配一块清零的堆内存。
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapProvisioner;

impl StorageProvisioner for HeapProvisioner {
    fn provision(&mut self, slots: &mut [DescriptorStorage], buffer_size: usize) {
        for slot in slots {
            slot.attach(BytesMut::zeroed(buffer_size));
        }
    }
}

/// 从一整块连续区域中按槽位顺序切分存储。
///
/// # 教案式说明
/// - **意图 (Why)**：模拟驱动把一段静态 DMA 区域等分给所有描述符的常见做法，
///   相邻槽位在内存中也相邻。
/// - **契约 (What)**：区域长度不足时，剩余槽位保持未挂载状态。
#[derive(Debug)]
pub struct ContiguousProvisioner {
    region: BytesMut,
}

impl ContiguousProvisioner {
    pub fn new(region: BytesMut) -> Self {
        Self { region }
    }

    /// 为 `slots` 个 `buffer_size` 字节的槽位准备一整块清零区域。
    pub fn zeroed(slots: usize, buffer_size: usize) -> Self {
        Self::new(BytesMut::zeroed(slots.saturating_mul(buffer_size)))
    }
}

impl StorageProvisioner for ContiguousProvisioner {
    fn provision(&mut self, slots: &mut [DescriptorStorage], buffer_size: usize) {
        for slot in slots {
            if self.region.len() < buffer_size {
                break;
            }
            slot.attach(self.region.split_to(buffer_size));
        }
    }
}
