//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 缓冲池在运行期的失败（耗尽、损坏、重复释放）全部以 `None` 或 [`ReleaseOutcome`](crate::ReleaseOutcome)
//!   呈现，从不走错误通道；唯一需要向宿主报告的错误是**初始化失败**。
//! - 因此本模块只定义 [`PoolInitError`]，集中描述“计数原语无法以该配置建立”的所有情形。
//!
//! ## 设计要求（What）
//! - 错误类型派生 `thiserror::Error`，与 `std::error::Error` 生态兼容；
//! - 需要 `Clone + PartialEq`：全局单例会把首次初始化的失败结果永久保存，并在后续调用中原样回放。

use thiserror::Error;

/// 缓冲池初始化失败的原因。
///
/// # 教案式说明
/// - **意图 (Why)**：初始化失败是永久性的，宿主通常将其视为启动期致命错误；
///   细分枚举便于在启动日志中直接定位是容量、水位还是配置文本的问题。
/// - **契约 (What)**：返回该错误时不会保留任何半成品状态；对全局单例而言，此后的所有获取操作都确定性地返回 `None`。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PoolInitError {
    /// 描述符数量为 0，计数器无法以正初值建立。
    #[error("buffer pool capacity must be at least one descriptor")]
    EmptyPool,

    /// 描述符数量超出句柄索引可表达的范围。
    #[error("buffer pool capacity {requested} exceeds the addressable descriptor range")]
    CapacityOverflow { requested: usize },

    /// 低水位必须严格小于高水位，否则迟滞区间不存在；高水位不得超过容量，否则“恢复”不可达。
    #[error("telemetry watermarks require low < high <= capacity (low = {low}, high = {high})")]
    InvalidWatermarks { low: usize, high: usize },

    /// 配置文本无法解析。
    #[error("invalid buffer pool configuration: {reason}")]
    InvalidConfig { reason: String },
}
