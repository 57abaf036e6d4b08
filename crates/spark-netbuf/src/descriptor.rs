use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use bytes::BytesMut;
use spin::{Mutex, MutexGuard};

/// 池标签类型：每个池实例在构建时获得一个进程内唯一的标签。
pub type PoolTag = u32;

/// “无后继”链接哨兵。
pub(crate) const NO_LINK: u32 = u32::MAX;

/// `BufferDescriptor` 是一个定长网络缓冲槽位的句柄。
///
/// # 设计初衷（Why）
/// - 传统实现以描述符数组中的地址充当句柄，归属校验依赖指针算术；
///   这里改用“池标签 + 槽位索引”的竞技场式句柄，校验退化为一次标签比较加一次边界检查。
/// - 句柄本身是 `Copy` 的纯值：它不携带所有权，和原始指针一样可能被误用（重复释放、跨池释放），
///   这些误用由池在运行期检测并记录诊断事件。
///
/// # 契约定义（What）
/// - 同一池内，索引在池的整个生命周期内稳定对应同一槽位；
/// - 处于“使用中”状态时，句柄只应由一个调用方持有，池不提供跨任务共享的并发访问保证。
///
/// # 风险提示（Trade-offs）
/// - `from_raw_parts` 允许驱动把句柄存放进硬件描述符环后再还原，也因此可以伪造句柄；
///   `Checked` 模式会拒绝伪造的标签，`Trusting` 模式只保证索引不越界。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferDescriptor {
    pool: PoolTag,
    index: u32,
}

impl BufferDescriptor {
    pub(crate) const fn new(pool: PoolTag, index: u32) -> Self {
        Self { pool, index }
    }

    /// 由原始部件重建句柄。
    pub const fn from_raw_parts(pool: PoolTag, index: u32) -> Self {
        Self { pool, index }
    }

    /// 拆解为 `(池标签, 槽位索引)`。
    pub const fn into_raw_parts(self) -> (PoolTag, u32) {
        (self.pool, self.index)
    }

    /// 槽位索引。
    pub const fn index(&self) -> usize {
        self.index as usize
    }

    /// 签发该句柄的池标签。
    pub const fn pool_tag(&self) -> PoolTag {
        self.pool
    }

    pub(crate) const fn raw_index(&self) -> u32 {
        self.index
    }
}

impl core::fmt::Display for BufferDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "netbuf#{}:{}", self.pool, self.index)
    }
}

/// 描述符数组中的单个槽位。
///
/// # 结构设计（How）
/// - `index`：槽位自身的索引，只用于诊断输出，不隐含所有权；
/// - `in_use`：只在空闲链表临界区内写入，临界区外的读取用于访问器的快速判定；
/// - `data_length`：持有者设置的负载长度，只在使用中有意义；
/// - `next`：接收链表的后继索引（`NO_LINK` 表示无），获取时清空；
/// - `storage`：供给钩子挂载的存储。持有者独占访问，锁只是为了让 `&self` 下的可变借用合法，正常路径上不会争用。
pub(crate) struct DescriptorSlot {
    index: u32,
    in_use: AtomicBool,
    data_length: AtomicUsize,
    next: AtomicU32,
    storage: Mutex<BytesMut>,
}

impl DescriptorSlot {
    pub(crate) fn new(index: u32, storage: BytesMut) -> Self {
        Self {
            index,
            in_use: AtomicBool::new(false),
            data_length: AtomicUsize::new(0),
            next: AtomicU32::new(NO_LINK),
            storage: Mutex::new(storage),
        }
    }

    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    pub(crate) fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// 仅在空闲链表锁内调用。
    pub(crate) fn mark_in_use(&self, in_use: bool) {
        self.in_use.store(in_use, Ordering::Release);
    }

    pub(crate) fn data_length(&self) -> usize {
        self.data_length.load(Ordering::Relaxed)
    }

    pub(crate) fn set_data_length(&self, length: usize) {
        self.data_length.store(length, Ordering::Relaxed);
    }

    pub(crate) fn next(&self) -> Option<u32> {
        match self.next.load(Ordering::Relaxed) {
            NO_LINK => None,
            index => Some(index),
        }
    }

    pub(crate) fn set_next(&self, next: Option<u32>) {
        self.next.store(next.unwrap_or(NO_LINK), Ordering::Relaxed);
    }

    /// 获取后的复位：写入请求长度并清除残留链接。
    pub(crate) fn reset_for_owner(&self, requested: usize) {
        self.set_data_length(requested);
        self.set_next(None);
    }

    pub(crate) fn storage_capacity(&self) -> usize {
        self.storage.lock().len()
    }

    pub(crate) fn storage(&self) -> MutexGuard<'_, BytesMut> {
        self.storage.lock()
    }
}
