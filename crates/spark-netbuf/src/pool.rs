use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::{
    fmt,
    sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering},
};

use bytes::BytesMut;
use spin::{Mutex, MutexGuard};

use crate::{
    config::PoolConfig,
    counter::{AvailabilityCounter, IsrTake, WaitTimeout},
    descriptor::{BufferDescriptor, DescriptorSlot, PoolTag},
    error::PoolInitError,
    free_list::{FreeList, FreeListFault},
    lease::NetworkBuffer,
    observability::{DiagnosticSink, PoolDiagnostic, TracingSink},
    provision::{DescriptorStorage, HeapProvisioner, StorageProvisioner},
    telemetry::WatermarkMonitor,
};

/// 进程内池标签分配器，0 保留给“从未签发”。
static NEXT_POOL_TAG: AtomicU32 = AtomicU32::new(1);

/// 释放操作的结果。
///
/// 调用方可以忽略该值；所有非 `Released` 的情况都已经记录了诊断事件。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// 描述符回到空闲链表，计数器已加一。
    Released,
    /// 描述符早已空闲，本次调用是空操作。
    AlreadyFree,
    /// 句柄未通过完整性检查，共享状态未被触碰。
    Rejected,
}

/// 中断上下文释放后的调度提示。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WakeHint {
    /// 没有任务因本次释放而就绪。
    Idle,
    /// 有任务在等待描述符，中断返回后应触发一次调度。
    Reschedule,
}

impl WakeHint {
    pub fn should_reschedule(self) -> bool {
        matches!(self, WakeHint::Reschedule)
    }
}

/// 池的统计快照。
///
/// # 契约说明（What）
/// - `free + in_use == capacity` 在快照读取的瞬间成立（两者由同一个原子镜像推导）；
/// - 计数类字段单调递增，使用 `Relaxed` 读取，只保证最终一致。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub buffer_size: usize,
    pub free: usize,
    pub in_use: usize,
    pub successful_acquisitions: u64,
    pub failed_acquisitions: u64,
    pub interrupt_refusals: u64,
    pub double_releases: u64,
    pub rejected_releases: u64,
    pub corruption_events: u64,
    /// 水位监视器当前是否处于低水位状态；`Trusting` 模式下恒为 `false`。
    pub running_low: bool,
}

/// `NetworkBufferPool` 是定长网络缓冲描述符池，供任务与中断处理程序并发获取、归还缓冲。
///
/// # 模块角色（Why）
/// - 协议栈在收发路径上需要可预测的缓冲来源：数量固定、尺寸固定、不在热路径上分配；
/// - 中断处理程序与普通任务同时争用同一批描述符，必须保证任何时刻一个描述符只有一个持有者，
///   且中断风暴不能把任务饿死。
///
/// # 核心机制（How）
/// - 描述符数组在构建时一次性建立，永不扩容；空闲状态由侵入式 [`FreeList`] 表达，
///   用 `spin::Mutex` 保护，临界区内只做索引改写；
/// - [`AvailabilityCounter`] 镜像空闲链表长度，提供阻塞等待与超时；
/// - 获取：先扣减计数器，再进入链表临界区弹出表头；释放：先在临界区插回链表，出锁后再给计数器加一。
///   “先改链表、后发信号”的顺序保证被唤醒的任务一定能看到可弹出的表项；
/// - 两把锁从不嵌套，诊断与日志全部发生在临界区之外。
///
/// # 契约说明（What）
/// - **不变量**：任一获取/释放完成前后，`free_count() + in_use_count() == capacity()`；
///   同一描述符不会同时出现在空闲链表两次，也不会同时交给两个持有者；
/// - **耗尽**：以 `None` 返回，由调用方决定是否重试；
/// - **损坏**：记录诊断并放弃本次操作，损坏的描述符既不重新入表也不交出；
/// - **重复释放**：记录诊断，空操作，不会多计可用数。
///
/// # 设计权衡（Trade-offs）
/// - 句柄是 `Copy` 的值而非 RAII 守卫，以便驱动把它放进硬件描述符环；需要自动归还时使用
///   [`NetworkBufferPool::acquire_lease`]；
/// - 中断获取路径遇到锁争用时直接放弃而不自旋，避免在被抢占的持有者之上空转。
#[derive(Clone)]
pub struct NetworkBufferPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for NetworkBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkBufferPool")
            .field("tag", &self.inner.tag)
            .field("capacity", &self.capacity())
            .field("free", &self.free_count())
            .field("integrity", &self.inner.config.integrity)
            .finish()
    }
}

/// 组装池的构建器：配置、诊断出口与存储供给钩子。
pub struct PoolBuilder {
    config: PoolConfig,
    sink: Arc<dyn DiagnosticSink>,
}

impl PoolBuilder {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            sink: Arc::new(TracingSink),
        }
    }

    /// 替换默认的 `tracing` 诊断出口。
    pub fn diagnostics(mut self, sink: impl DiagnosticSink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// 以堆内存为每个描述符挂载存储并建立池。
    pub fn build(self) -> Result<NetworkBufferPool, PoolInitError> {
        self.build_with(&mut HeapProvisioner)
    }

    /// 以宿主提供的供给钩子建立池；钩子恰好被调用一次。
    pub fn build_with<P>(self, provisioner: &mut P) -> Result<NetworkBufferPool, PoolInitError>
    where
        P: StorageProvisioner + ?Sized,
    {
        let PoolBuilder { config, sink } = self;
        config.validate()?;
        let capacity = config.capacity;

        let counter = AvailabilityCounter::new(capacity, capacity);

        let mut storages: Vec<DescriptorStorage> =
            (0..capacity).map(DescriptorStorage::new).collect();
        provisioner.provision(&mut storages, config.buffer_size);

        let mut unattached = 0usize;
        let slots: Box<[DescriptorSlot]> = storages
            .into_iter()
            .enumerate()
            .map(|(index, storage)| {
                let buffer = storage.into_buffer().unwrap_or_else(|| {
                    unattached += 1;
                    BytesMut::new()
                });
                DescriptorSlot::new(index as u32, buffer)
            })
            .collect();

        let mut free_list = FreeList::with_slots(capacity);
        for slot in slots.iter() {
            free_list.push_back(slot.index());
        }

        let tag = NEXT_POOL_TAG.fetch_add(1, Ordering::Relaxed);
        if unattached > 0 {
            tracing::warn!(
                target: "spark_netbuf",
                pool = tag,
                unattached,
                "storage provisioner left descriptors without backing storage"
            );
        }
        tracing::debug!(
            target: "spark_netbuf",
            pool = tag,
            capacity,
            buffer_size = config.buffer_size,
            integrity = ?config.integrity,
            "network buffer pool initialised"
        );

        let watermarks = config
            .integrity
            .is_checked()
            .then(|| WatermarkMonitor::new(config.resolved_watermarks()));

        Ok(NetworkBufferPool {
            inner: Arc::new(PoolInner {
                tag,
                free_len: AtomicUsize::new(free_list.len()),
                free_list: Mutex::new(free_list),
                counter,
                slots,
                watermarks,
                metrics: PoolMetrics::default(),
                sink,
                config,
            }),
        })
    }
}

impl NetworkBufferPool {
    /// 以默认诊断出口与堆存储建立池。
    pub fn new(config: PoolConfig) -> Result<Self, PoolInitError> {
        PoolBuilder::new(config).build()
    }

    pub fn builder(config: PoolConfig) -> PoolBuilder {
        PoolBuilder::new(config)
    }

    pub fn tag(&self) -> PoolTag {
        self.inner.tag
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    /// 当前空闲描述符数量，即空闲链表长度。
    pub fn free_count(&self) -> usize {
        self.inner.free_len.load(Ordering::Acquire)
    }

    pub fn in_use_count(&self) -> usize {
        self.capacity() - self.free_count()
    }

    /// 任务上下文获取。
    ///
    /// # 契约说明
    /// - `requested_size`：写入描述符的负载长度；池为单一尺寸，该值只被记录，不参与挑选；
    /// - `timeout`：`WaitTimeout::Poll`/`Duration::ZERO` 立即返回，`Forever`/`None` 无限等待；
    /// - 返回 `None` 表示等待超时，或计数器放行后发现空闲链表损坏（已记录诊断）。
    pub fn acquire(
        &self,
        requested_size: usize,
        timeout: impl Into<WaitTimeout>,
    ) -> Option<BufferDescriptor> {
        let inner = &*self.inner;
        if !inner.counter.take(timeout.into()) {
            inner.metrics.failed_acquisitions.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(target: "spark_netbuf", pool = inner.tag, "BUF_GET timed out");
            return None;
        }

        let popped = {
            let mut list = inner.free_list.lock();
            inner.pop_locked(&mut list)
        };

        match popped {
            Ok(index) => Some(inner.hand_out(index, requested_size, true)),
            Err(fault) => {
                inner.report_corruption("acquire", fault);
                None
            }
        }
    }

    /// 中断上下文获取，从不等待。
    ///
    /// # 契约说明
    /// - 仅当计数器当前值**严格大于** `interrupt_reserve` 时才尝试扣减，为任务保留最低数量的描述符；
    /// - 计数器扣减无锁；空闲链表正被其它上下文持有时立即放弃（归还已扣减的许可），返回 `None`。
    pub fn acquire_from_interrupt(&self, requested_size: usize) -> Option<BufferDescriptor> {
        let inner = &*self.inner;
        if inner.counter.try_take_above(inner.config.interrupt_reserve) == IsrTake::BelowReserve {
            inner.metrics.interrupt_refusals.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let popped = match inner.free_list.try_lock() {
            Some(mut list) => inner.pop_locked(&mut list),
            None => {
                inner.counter.give_from_isr();
                inner.metrics.failed_acquisitions.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match popped {
            Ok(index) => Some(inner.hand_out(index, requested_size, false)),
            Err(fault) => {
                inner.report_corruption("acquire_from_interrupt", fault);
                None
            }
        }
    }

    /// 任务上下文释放。
    ///
    /// 句柄无效时记录诊断并返回 [`ReleaseOutcome::Rejected`]；已经空闲时记录重复释放并返回
    /// [`ReleaseOutcome::AlreadyFree`]，两者都不修改任何共享状态。
    pub fn release(&self, descriptor: BufferDescriptor) -> ReleaseOutcome {
        let inner = &*self.inner;
        let Some(index) = inner.validate(&descriptor, "release") else {
            return ReleaseOutcome::Rejected;
        };

        let inserted = {
            let mut list = inner.free_list.lock();
            inner.push_locked(&mut list, index)
        };
        if !inserted {
            inner.report_double_release(descriptor);
            return ReleaseOutcome::AlreadyFree;
        }

        inner.signal_released(inner.counter.give().accepted);
        // 出锁后的快照，并发释放时事件顺序可能交错。
        if let Some(monitor) = &inner.watermarks {
            inner.emit(monitor.observe(self.free_count()));
        }
        tracing::trace!(
            target: "spark_netbuf",
            pool = inner.tag,
            slot = index,
            free = self.free_count(),
            "BUF_PUT"
        );
        ReleaseOutcome::Released
    }

    /// 中断上下文释放，返回调度提示。
    ///
    /// 与任务释放相同的“先入表、后发信号”顺序；链表锁以自旋方式获取，描述符不会因争用而丢失。
    /// 计数器一侧从不停车，即使有任务正持有计数器的停车锁。
    pub fn release_from_interrupt(&self, descriptor: BufferDescriptor) -> WakeHint {
        let inner = &*self.inner;
        let Some(index) = inner.validate(&descriptor, "release_from_interrupt") else {
            return WakeHint::Idle;
        };

        let inserted = {
            let mut list = inner.free_list.lock();
            inner.push_locked(&mut list, index)
        };
        if !inserted {
            inner.report_double_release(descriptor);
            return WakeHint::Idle;
        }

        let signal = inner.counter.give_from_isr();
        inner.signal_released(signal.accepted);
        if signal.waiter_pending {
            WakeHint::Reschedule
        } else {
            WakeHint::Idle
        }
    }

    /// 完整性检查：句柄是否指向本池的某个槽位。
    ///
    /// `Checked` 模式同时核对池标签；`Trusting` 模式只核对索引边界。
    pub fn is_valid(&self, descriptor: &BufferDescriptor) -> bool {
        self.inner.accepts(descriptor)
    }

    /// 描述符是否处于使用中。无效句柄返回 `false`。
    pub fn is_in_use(&self, descriptor: &BufferDescriptor) -> bool {
        self.inner.owned_slot(descriptor).is_some()
    }

    /// 读取持有者设置的负载长度；描述符空闲或句柄无效时返回 `None`。
    pub fn data_length(&self, descriptor: &BufferDescriptor) -> Option<usize> {
        self.inner
            .owned_slot(descriptor)
            .map(DescriptorSlot::data_length)
    }

    /// 更新负载长度，超过存储容量的部分被截断。返回是否写入成功。
    pub fn set_data_length(&self, descriptor: &BufferDescriptor, length: usize) -> bool {
        match self.inner.owned_slot(descriptor) {
            Some(slot) => {
                slot.set_data_length(length.min(slot.storage_capacity()));
                true
            }
            None => false,
        }
    }

    /// 独占访问描述符的存储。
    ///
    /// 持有期间不得再对同一描述符调用 [`set_data_length`](Self::set_data_length)，否则会在存储锁上自旋。
    pub fn payload(&self, descriptor: &BufferDescriptor) -> Option<MutexGuard<'_, BytesMut>> {
        self.inner.owned_slot(descriptor).map(DescriptorSlot::storage)
    }

    /// 把 `next` 串到 `descriptor` 之后，构成接收报文链；两者都必须处于使用中。
    pub fn set_next(
        &self,
        descriptor: &BufferDescriptor,
        next: Option<&BufferDescriptor>,
    ) -> bool {
        let Some(slot) = self.inner.owned_slot(descriptor) else {
            return false;
        };
        let next_index = match next {
            Some(next) => match self.inner.owned_slot(next) {
                Some(next_slot) => Some(next_slot.index()),
                None => return false,
            },
            None => None,
        };
        slot.set_next(next_index);
        true
    }

    /// 报文链中的后继描述符。
    pub fn next(&self, descriptor: &BufferDescriptor) -> Option<BufferDescriptor> {
        let slot = self.inner.owned_slot(descriptor)?;
        slot.next()
            .map(|index| BufferDescriptor::new(self.inner.tag, index))
    }

    /// 获取一个在 `Drop` 时自动归还的租约。
    pub fn acquire_lease(
        &self,
        requested_size: usize,
        timeout: impl Into<WaitTimeout>,
    ) -> Option<NetworkBuffer> {
        self.acquire(requested_size, timeout)
            .map(|descriptor| NetworkBuffer::new(self.clone(), descriptor))
    }

    pub fn statistics(&self) -> PoolStats {
        let inner = &*self.inner;
        let free = self.free_count();
        let metrics = &inner.metrics;
        PoolStats {
            capacity: self.capacity(),
            buffer_size: inner.config.buffer_size,
            free,
            in_use: self.capacity() - free,
            successful_acquisitions: metrics.successful_acquisitions.load(Ordering::Relaxed),
            failed_acquisitions: metrics.failed_acquisitions.load(Ordering::Relaxed),
            interrupt_refusals: metrics.interrupt_refusals.load(Ordering::Relaxed),
            double_releases: metrics.double_releases.load(Ordering::Relaxed),
            rejected_releases: metrics.rejected_releases.load(Ordering::Relaxed),
            corruption_events: metrics.corruption_events.load(Ordering::Relaxed),
            running_low: inner
                .watermarks
                .as_ref()
                .is_some_and(WatermarkMonitor::is_low),
        }
    }

    /// 计数器当前值，正常情况下等于 [`free_count`](Self::free_count)。
    pub fn available_permits(&self) -> usize {
        self.inner.counter.available()
    }
}

struct PoolInner {
    tag: PoolTag,
    config: PoolConfig,
    slots: Box<[DescriptorSlot]>,
    free_list: Mutex<FreeList>,
    /// 空闲链表长度的镜像，只在链表锁内写入。
    free_len: AtomicUsize,
    counter: AvailabilityCounter,
    watermarks: Option<WatermarkMonitor>,
    metrics: PoolMetrics,
    sink: Arc<dyn DiagnosticSink>,
}

impl PoolInner {
    fn accepts(&self, descriptor: &BufferDescriptor) -> bool {
        let in_range = descriptor.index() < self.slots.len();
        if self.config.integrity.is_checked() {
            in_range && descriptor.pool_tag() == self.tag
        } else {
            in_range
        }
    }

    fn validate(&self, descriptor: &BufferDescriptor, operation: &'static str) -> Option<u32> {
        if self.accepts(descriptor) {
            return Some(descriptor.raw_index());
        }
        self.metrics.rejected_releases.fetch_add(1, Ordering::Relaxed);
        self.sink.record(&PoolDiagnostic::InvalidDescriptor {
            operation,
            descriptor: *descriptor,
            pool: self.tag,
        });
        None
    }

    fn owned_slot(&self, descriptor: &BufferDescriptor) -> Option<&DescriptorSlot> {
        if !self.accepts(descriptor) {
            return None;
        }
        let slot = &self.slots[descriptor.index()];
        slot.is_in_use().then_some(slot)
    }

    /// 链表临界区内的弹出；只做索引改写与状态镜像。
    fn pop_locked(&self, list: &mut FreeList) -> Result<u32, FreeListFault> {
        let index = list.pop_front()?;
        self.slots[index as usize].mark_in_use(true);
        self.free_len.store(list.len(), Ordering::Release);
        Ok(index)
    }

    /// 链表临界区内的插入；已在表中时返回 `false`。
    fn push_locked(&self, list: &mut FreeList, index: u32) -> bool {
        if list.contains(index) || !list.push_back(index) {
            return false;
        }
        self.slots[index as usize].mark_in_use(false);
        self.free_len.store(list.len(), Ordering::Release);
        true
    }

    fn hand_out(&self, index: u32, requested_size: usize, observe: bool) -> BufferDescriptor {
        let slot = &self.slots[index as usize];
        slot.reset_for_owner(requested_size);
        self.metrics
            .successful_acquisitions
            .fetch_add(1, Ordering::Relaxed);
        let free = self.free_len.load(Ordering::Acquire);
        if observe {
            if let Some(monitor) = &self.watermarks {
                self.emit(monitor.observe(free));
            }
            tracing::trace!(target: "spark_netbuf", pool = self.tag, slot = index, free, "BUF_GET");
        }
        BufferDescriptor::new(self.tag, index)
    }

    fn signal_released(&self, accepted: bool) {
        if !accepted {
            // 计数器已到上限却仍有描述符入表，两者已经失步。
            self.metrics.corruption_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn report_corruption(&self, operation: &'static str, fault: FreeListFault) {
        self.metrics.corruption_events.fetch_add(1, Ordering::Relaxed);
        self.metrics.failed_acquisitions.fetch_add(1, Ordering::Relaxed);
        let slot = match fault {
            FreeListFault::Empty => None,
            FreeListFault::Corrupted { index } => Some(index),
        };
        self.sink.record(&PoolDiagnostic::FreeListCorrupted {
            operation,
            slot,
            free: self.free_len.load(Ordering::Acquire),
        });
    }

    fn report_double_release(&self, descriptor: BufferDescriptor) {
        self.metrics.double_releases.fetch_add(1, Ordering::Relaxed);
        self.sink.record(&PoolDiagnostic::DoubleRelease {
            descriptor,
            free: self.free_len.load(Ordering::Acquire),
        });
    }

    fn emit(&self, diagnostic: Option<PoolDiagnostic>) {
        if let Some(diagnostic) = diagnostic {
            self.sink.record(&diagnostic);
        }
    }
}

#[derive(Default)]
struct PoolMetrics {
    successful_acquisitions: AtomicU64,
    failed_acquisitions: AtomicU64,
    interrupt_refusals: AtomicU64,
    double_releases: AtomicU64,
    rejected_releases: AtomicU64,
    corruption_events: AtomicU64,
}
