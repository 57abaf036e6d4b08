//! 诊断事件与日志出口。
//!
//! # 模块定位（Why）
//! - 池只产生诊断，从不依据日志做控制决策；把诊断建模为结构化事件 [`PoolDiagnostic`]，
//!   再交给宿主提供的 [`DiagnosticSink`]，使池与具体日志后端解耦。
//! - 默认出口 [`TracingSink`] 桥接到 `tracing`，宿主只需安装自己的 Subscriber 即可看到诊断。
//!
//! # 契约说明（What）
//! - 出口在空闲链表锁之外被调用，实现可以自由分配或做 I/O，但应尽量非阻塞；
//! - 出口必须 `Send + Sync + 'static`，因为池会被任意任务与中断路径共享。

use core::fmt;

use crate::descriptor::{BufferDescriptor, PoolTag};

/// 池发出的诊断事件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolDiagnostic {
    /// 释放或访问时遇到不属于本池的句柄。
    InvalidDescriptor {
        operation: &'static str,
        descriptor: BufferDescriptor,
        pool: PoolTag,
    },
    /// 对已在空闲链表中的描述符再次释放。
    DoubleRelease {
        descriptor: BufferDescriptor,
        free: usize,
    },
    /// 计数器放行了获取，空闲链表却为空或表头已损坏。
    FreeListCorrupted {
        operation: &'static str,
        slot: Option<u32>,
        free: usize,
    },
    /// 空闲数量降到低水位及以下。
    RunningLow { free: usize, low: usize },
    /// 空闲数量回升到高水位及以上。
    Recovered { free: usize, high: usize },
}

impl PoolDiagnostic {
    /// 事件的稳定名称，可作为日志字段或指标标签。
    pub fn name(&self) -> &'static str {
        match self {
            PoolDiagnostic::InvalidDescriptor { .. } => "netbuf.invalid_descriptor",
            PoolDiagnostic::DoubleRelease { .. } => "netbuf.double_release",
            PoolDiagnostic::FreeListCorrupted { .. } => "netbuf.free_list_corrupted",
            PoolDiagnostic::RunningLow { .. } => "netbuf.running_low",
            PoolDiagnostic::Recovered { .. } => "netbuf.recovered",
        }
    }
}

impl fmt::Display for PoolDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolDiagnostic::InvalidDescriptor {
                operation,
                descriptor,
                pool,
            } => write!(
                f,
                "{operation}: invalid buffer {descriptor} (pool netbuf#{pool})"
            ),
            PoolDiagnostic::DoubleRelease { descriptor, free } => {
                write!(f, "release: {descriptor} ALREADY RELEASED (now {free})")
            }
            PoolDiagnostic::FreeListCorrupted {
                operation,
                slot: Some(slot),
                free,
            } => write!(
                f,
                "{operation}: free list head {slot} is not a linked slot (free {free})"
            ),
            PoolDiagnostic::FreeListCorrupted {
                operation,
                slot: None,
                free,
            } => write!(
                f,
                "{operation}: availability signalled but free list is empty (free {free})"
            ),
            PoolDiagnostic::RunningLow { free, .. } => {
                write!(f, "*** Warning *** only {free} buffers left")
            }
            PoolDiagnostic::Recovered { free, .. } => {
                write!(f, "*** Warning *** now {free} buffers left")
            }
        }
    }
}

/// 诊断出口。
///
/// # 教案式说明
/// - **意图 (Why)**：对齐 spark 框架“宿主注入日志实现”的做法，允许对接 `tracing`、环形缓冲或自研后端。
/// - **契约 (What)**：`record` 不得 panic；实现可在内部做缓冲或异步投递。
pub trait DiagnosticSink: Send + Sync + 'static {
    fn record(&self, diagnostic: &PoolDiagnostic);
}

/// 将诊断转发到 `tracing` 的默认出口。
///
/// 损坏与非法句柄记为 `error`，重复释放与低水位记为 `warn`，恢复记为 `info`。
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, diagnostic: &PoolDiagnostic) {
        let event = diagnostic.name();
        match diagnostic {
            PoolDiagnostic::InvalidDescriptor { .. } | PoolDiagnostic::FreeListCorrupted { .. } => {
                tracing::error!(target: "spark_netbuf", event, "{diagnostic}");
            }
            PoolDiagnostic::DoubleRelease { .. } | PoolDiagnostic::RunningLow { .. } => {
                tracing::warn!(target: "spark_netbuf", event, "{diagnostic}");
            }
            PoolDiagnostic::Recovered { .. } => {
                tracing::info!(target: "spark_netbuf", event, "{diagnostic}");
            }
        }
    }
}

/// 记录所有诊断的记录器出口，便于测试断言。
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: parking_lot::Mutex<alloc::vec::Vec<PoolDiagnostic>>,
}

#[cfg(any(test, feature = "test-util"))]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出并清空已记录的事件。
    pub fn take(&self) -> alloc::vec::Vec<PoolDiagnostic> {
        core::mem::take(&mut *self.events.lock())
    }

    /// 按名称统计事件数量。
    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.name() == name)
            .count()
    }
}

#[cfg(any(test, feature = "test-util"))]
impl DiagnosticSink for RecordingSink {
    fn record(&self, diagnostic: &PoolDiagnostic) {
        self.events.lock().push(diagnostic.clone());
    }
}

impl<S: DiagnosticSink> DiagnosticSink for alloc::sync::Arc<S> {
    fn record(&self, diagnostic: &PoolDiagnostic) {
        (**self).record(diagnostic);
    }
}
