use core::ops::Deref;

use bytes::BytesMut;
use spin::MutexGuard;

use crate::{
    descriptor::BufferDescriptor,
    pool::{NetworkBufferPool, ReleaseOutcome},
};

/// `NetworkBuffer` 是描述符的 RAII 租约：离开作用域时经任务上下文释放路径归还。
///
/// # 角色定位（Why）
/// - 裸句柄适合放进硬件描述符环，但在普通任务代码中容易遗漏释放；
///   租约把归还绑定到 `Drop`，与 spark 缓冲池“生命周期结束即回收”的约定一致。
///
/// # 契约说明（What）
/// - 租约持有池的克隆，池在所有租约释放前不会被销毁；
/// - [`into_descriptor`](Self::into_descriptor) 放弃自动归还，调用方接手释放责任；
/// - `Drop` 只能用于任务上下文：中断处理程序应直接使用裸句柄与
///   [`release_from_interrupt`](NetworkBufferPool::release_from_interrupt)。
#[derive(Debug)]
pub struct NetworkBuffer {
    pool: NetworkBufferPool,
    descriptor: Option<BufferDescriptor>,
}

impl NetworkBuffer {
    pub(crate) fn new(pool: NetworkBufferPool, descriptor: BufferDescriptor) -> Self {
        Self {
            pool,
            descriptor: Some(descriptor),
        }
    }

    pub fn pool(&self) -> &NetworkBufferPool {
        &self.pool
    }

    pub fn data_length(&self) -> usize {
        self.pool.data_length(self).unwrap_or_default()
    }

    pub fn set_data_length(&self, length: usize) {
        self.pool.set_data_length(self, length);
    }

    /// 独占访问存储。
    pub fn payload(&self) -> Option<MutexGuard<'_, BytesMut>> {
        self.pool.payload(self)
    }

    /// 放弃自动归还，交出裸句柄。
    pub fn into_descriptor(mut self) -> BufferDescriptor {
        self.take()
    }

    /// 立即归还并返回结果。
    pub fn release(mut self) -> ReleaseOutcome {
        let descriptor = self.take();
        self.pool.release(descriptor)
    }

    fn take(&mut self) -> BufferDescriptor {
        // 只有消费 `self` 的方法会调用，调用前字段必然为 `Some`。
        match self.descriptor.take() {
            Some(descriptor) => descriptor,
            None => unreachable!("lease descriptor taken twice"),
        }
    }
}

impl Deref for NetworkBuffer {
    type Target = BufferDescriptor;

    fn deref(&self) -> &BufferDescriptor {
        match &self.descriptor {
            Some(descriptor) => descriptor,
            None => unreachable!("lease used after its descriptor was taken"),
        }
    }
}

impl Drop for NetworkBuffer {
    fn drop(&mut self) {
        if let Some(descriptor) = self.descriptor.take() {
            self.pool.release(descriptor);
        }
    }
}
