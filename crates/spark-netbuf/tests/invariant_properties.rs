//! 池不变量的性质测试。
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：以随机操作序列驱动真实的 `NetworkBufferPool`，并与一个影子模型逐步对账，
//!   验证计数守恒、唯一持有者、重复释放幂等、伪造句柄无副作用等性质在任意交错下都成立。
//! - **设计手法 (How)**：影子模型只记录“当前持有的句柄集合”与“曾经归还过的旧句柄”，
//!   每一步先计算期望结果，再调用生产代码并比较；不预测具体签发哪个槽位。
//!
//! # 合同与边界 (What)
//!
//! - **输入**：`PoolOp` 序列；索引型参数对当前集合长度取模，空集合时该步退化为空操作；
//! - **断言**：
//!   - `free_count() + in_use_count() == capacity()`；
//!   - 计数器许可数始终等于空闲链表长度；
//!   - 同一槽位不会同时出现在持有集合中两次；
//!   - 重复释放与伪造句柄不改变任何计数。
//! - **前置条件**：单线程执行，因此中断路径不会遇到锁争用，成功与否完全由预留阈值决定。

use std::collections::HashSet;

use proptest::prelude::*;
use spark_netbuf::{
    BufferDescriptor, IntegrityMode, NetworkBufferPool, PoolConfig, RecordingSink,
    ReleaseOutcome, WaitTimeout,
};

#[derive(Clone, Debug)]
enum PoolOp {
    Acquire(usize),
    AcquireFromInterrupt,
    Release(usize),
    ReleaseFromInterrupt(usize),
    ReleaseStale(usize),
    ReleaseForged(u32),
}

fn pool_op() -> impl Strategy<Value = PoolOp> {
    prop_oneof![
        3 => (0usize..2048).prop_map(PoolOp::Acquire),
        2 => Just(PoolOp::AcquireFromInterrupt),
        3 => any::<usize>().prop_map(PoolOp::Release),
        1 => any::<usize>().prop_map(PoolOp::ReleaseFromInterrupt),
        1 => any::<usize>().prop_map(PoolOp::ReleaseStale),
        1 => (0u32..4).prop_map(PoolOp::ReleaseForged),
    ]
}

/// 影子模型：真实池应有的可观测状态。
struct ShadowPool {
    capacity: usize,
    reserve: usize,
    held: Vec<BufferDescriptor>,
    stale: Vec<BufferDescriptor>,
}

impl ShadowPool {
    fn free(&self) -> usize {
        self.capacity - self.held.len()
    }

    fn take_held(&mut self, pick: usize) -> Option<BufferDescriptor> {
        if self.held.is_empty() {
            return None;
        }
        let descriptor = self.held.swap_remove(pick % self.held.len());
        self.stale.push(descriptor);
        Some(descriptor)
    }

    fn record_acquired(&mut self, descriptor: BufferDescriptor) -> Result<(), TestCaseError> {
        prop_assert!(
            !self.held.contains(&descriptor),
            "槽位 {} 被重复签发",
            descriptor
        );
        self.held.push(descriptor);
        Ok(())
    }
}

fn check_accounting(pool: &NetworkBufferPool, shadow: &ShadowPool) -> Result<(), TestCaseError> {
    prop_assert_eq!(pool.free_count() + pool.in_use_count(), pool.capacity());
    prop_assert_eq!(pool.available_permits(), pool.free_count());
    prop_assert_eq!(pool.free_count(), shadow.free());
    let unique: HashSet<_> = shadow.held.iter().map(BufferDescriptor::index).collect();
    prop_assert_eq!(unique.len(), shadow.held.len());
    for descriptor in &shadow.held {
        prop_assert!(pool.is_in_use(descriptor));
    }
    Ok(())
}

fn run_sequence(
    capacity: usize,
    reserve: usize,
    integrity: IntegrityMode,
    ops: &[PoolOp],
) -> Result<(), TestCaseError> {
    let sink = std::sync::Arc::new(RecordingSink::new());
    let pool = NetworkBufferPool::builder(
        PoolConfig::with_capacity(capacity)
            .interrupt_reserve(reserve)
            .integrity(integrity),
    )
    .diagnostics(std::sync::Arc::clone(&sink))
    .build()
    .expect("合法配置应建池成功");
    let mut shadow = ShadowPool {
        capacity,
        reserve,
        held: Vec::new(),
        stale: Vec::new(),
    };

    for op in ops {
        match *op {
            PoolOp::Acquire(size) => {
                let expected = shadow.free() > 0;
                let granted = pool.acquire(size, WaitTimeout::Poll);
                prop_assert_eq!(granted.is_some(), expected);
                if let Some(descriptor) = granted {
                    prop_assert_eq!(pool.data_length(&descriptor), Some(size));
                    shadow.record_acquired(descriptor)?;
                }
            }
            PoolOp::AcquireFromInterrupt => {
                let expected = shadow.free() > shadow.reserve;
                let granted = pool.acquire_from_interrupt(0);
                prop_assert_eq!(granted.is_some(), expected);
                if let Some(descriptor) = granted {
                    shadow.record_acquired(descriptor)?;
                }
            }
            PoolOp::Release(pick) => {
                if let Some(descriptor) = shadow.take_held(pick) {
                    prop_assert_eq!(pool.release(descriptor), ReleaseOutcome::Released);
                }
            }
            PoolOp::ReleaseFromInterrupt(pick) => {
                if let Some(descriptor) = shadow.take_held(pick) {
                    pool.release_from_interrupt(descriptor);
                    prop_assert!(!pool.is_in_use(&descriptor));
                }
            }
            PoolOp::ReleaseStale(pick) => {
                if shadow.stale.is_empty() {
                    continue;
                }
                let descriptor = shadow.stale[pick % shadow.stale.len()];
                // 旧句柄的槽位可能已被重新签发，此时释放是合法的所有权转移，不属于重复释放。
                if shadow.held.contains(&descriptor) {
                    continue;
                }
                let before = pool.statistics().double_releases;
                prop_assert_eq!(pool.release(descriptor), ReleaseOutcome::AlreadyFree);
                prop_assert_eq!(pool.statistics().double_releases, before + 1);
            }
            PoolOp::ReleaseForged(offset) => {
                let forged = BufferDescriptor::from_raw_parts(pool.tag(), capacity as u32 + offset);
                prop_assert_eq!(pool.release(forged), ReleaseOutcome::Rejected);
            }
        }
        check_accounting(&pool, &shadow)?;
    }

    prop_assert_eq!(pool.statistics().corruption_events, 0);
    prop_assert_eq!(sink.count("netbuf.free_list_corrupted"), 0);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_checked_pool_preserves_invariants(
        capacity in 1usize..12,
        reserve in 0usize..5,
        ops in prop::collection::vec(pool_op(), 1..64),
    ) {
        run_sequence(capacity, reserve, IntegrityMode::Checked, &ops)?;
    }

    #[test]
    fn prop_trusting_pool_preserves_invariants(
        capacity in 1usize..12,
        reserve in 0usize..5,
        ops in prop::collection::vec(pool_op(), 1..64),
    ) {
        run_sequence(capacity, reserve, IntegrityMode::Trusting, &ops)?;
    }
}
