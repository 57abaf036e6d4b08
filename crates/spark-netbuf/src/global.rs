//! 进程级单例入口。
//!
//! # 模块定位（Why）
//! - 协议栈、驱动与中断处理程序通常不方便层层传递池句柄，传统做法是一个全局缓冲池；
//!   本模块以 `OnceLock` 提供惰性、幂等、只初始化一次的全局池，并在其上暴露与实例方法同名的操作。
//!
//! # 契约说明（What）
//! - 第一次 [`initialize`]/[`initialize_with`] 决定全局池的命运：成功后后续调用均为空操作；
//!   失败结果同样被永久保存，之后的获取确定性地返回 `None`，释放返回 [`ReleaseOutcome::Rejected`]；
//! - 初始化之前调用任何操作，行为与初始化失败相同；
//! - 全局池在进程生命周期内不会被销毁。

use std::sync::OnceLock;

use crate::{
    config::PoolConfig,
    counter::WaitTimeout,
    descriptor::BufferDescriptor,
    error::PoolInitError,
    pool::{NetworkBufferPool, PoolBuilder, ReleaseOutcome, WakeHint},
    provision::{HeapProvisioner, StorageProvisioner},
};

static GLOBAL_POOL: OnceLock<Result<NetworkBufferPool, PoolInitError>> = OnceLock::new();

/// 以堆存储和默认诊断出口初始化全局池。
pub fn initialize(config: PoolConfig) -> Result<(), PoolInitError> {
    initialize_with(PoolBuilder::new(config), &mut HeapProvisioner)
}

/// 以自定义构建器与供给钩子初始化全局池。
///
/// 只有第一次调用会执行构建（也只有那一次会调用供给钩子）；之后的调用返回第一次的结果。
pub fn initialize_with<P>(builder: PoolBuilder, provisioner: &mut P) -> Result<(), PoolInitError>
where
    P: StorageProvisioner + ?Sized,
{
    GLOBAL_POOL
        .get_or_init(|| builder.build_with(provisioner))
        .as_ref()
        .map(|_| ())
        .map_err(Clone::clone)
}

/// 已成功初始化的全局池。
pub fn pool() -> Option<&'static NetworkBufferPool> {
    GLOBAL_POOL.get().and_then(|result| result.as_ref().ok())
}

pub fn acquire(requested_size: usize, timeout: impl Into<WaitTimeout>) -> Option<BufferDescriptor> {
    pool()?.acquire(requested_size, timeout)
}

pub fn acquire_from_interrupt(requested_size: usize) -> Option<BufferDescriptor> {
    pool()?.acquire_from_interrupt(requested_size)
}

pub fn release(descriptor: BufferDescriptor) -> ReleaseOutcome {
    match pool() {
        Some(pool) => pool.release(descriptor),
        None => ReleaseOutcome::Rejected,
    }
}

pub fn release_from_interrupt(descriptor: BufferDescriptor) -> WakeHint {
    match pool() {
        Some(pool) => pool.release_from_interrupt(descriptor),
        None => WakeHint::Idle,
    }
}

/// 全局池的空闲数量；未初始化或初始化失败时为 0。
pub fn free_count() -> usize {
    pool().map_or(0, NetworkBufferPool::free_count)
}
