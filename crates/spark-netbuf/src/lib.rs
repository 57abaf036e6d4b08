#![deny(unsafe_code)]

//! `spark-netbuf` 提供面向网络协议栈的定长缓冲描述符池。
//!
//! # 模块定位（Why）
//! - 收发路径需要数量固定、尺寸固定、不在热路径上分配的报文缓冲；
//!   任务与中断处理程序并发获取、归还同一批描述符，且中断风暴不能饿死普通任务。
//! - 与 spark 缓冲池同样以“空闲链表 + 统计快照”组织，但池容量在建立后不可变，
//!   并额外提供阻塞等待、中断预留阈值与重复释放检测。
//!
//! # 设计概要（How）
//! - `descriptor`：以“池标签 + 槽位索引”作为描述符句柄，取代地址句柄；
//! - `free_list`：以索引串联的侵入式空闲链表，O(1) 插入、弹出与成员判定；
//! - `counter`：可用性计数器，承担阻塞、超时与中断路径的非阻塞扣减；
//! - `pool`：获取/释放引擎，维持“先改链表、后发信号”的顺序与两把锁互不嵌套的纪律；
//! - `telemetry`/`observability`：迟滞水位告警与诊断出口（默认桥接 `tracing`）；
//! - `global`：进程级惰性单例。
//!
//! # 命名约定（Consistency）
//! - 任务上下文操作使用普通名称（`acquire`/`release`），中断上下文操作统一加 `_from_interrupt` 后缀。

extern crate alloc;

mod config;
mod counter;
mod descriptor;
mod error;
mod free_list;
pub mod global;
mod lease;
pub mod observability;
mod pool;
mod provision;
mod telemetry;

pub use config::{
    DEFAULT_BUFFER_SIZE, DEFAULT_CAPACITY, DEFAULT_INTERRUPT_RESERVE, DEFAULT_LOW_WATERMARK,
    IntegrityMode, MAX_CAPACITY, PoolConfig, Watermarks,
};
pub use counter::WaitTimeout;
pub use descriptor::{BufferDescriptor, PoolTag};
pub use error::PoolInitError;
pub use lease::NetworkBuffer;
pub use observability::{DiagnosticSink, PoolDiagnostic, TracingSink};
pub use pool::{NetworkBufferPool, PoolBuilder, PoolStats, ReleaseOutcome, WakeHint};
pub use provision::{ContiguousProvisioner, DescriptorStorage, HeapProvisioner, StorageProvisioner};

#[cfg(any(test, feature = "test-util"))]
pub use observability::RecordingSink;
