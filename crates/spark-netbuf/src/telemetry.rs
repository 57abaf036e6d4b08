use core::sync::atomic::{AtomicBool, Ordering};

use crate::{config::Watermarks, observability::PoolDiagnostic};

/// 带迟滞的空闲水位监视器。
///
/// # 教案式说明
/// - **意图 (Why)**：空闲数量在单一阈值附近来回波动时，简单阈值比较会让告警不停翻转；
///   两个分离的水位把“进入低状态”和“离开低状态”拆开判定，消除抖动。
/// - **逻辑 (How)**：`is_low` 以 `compare_exchange` 翻转，保证并发观察者对同一次跨越只产生一个事件。
/// - **契约 (What)**：纯观察者，返回值只用于记录诊断，不影响获取/释放的结果。
/// - **注意 (Gotchas)**：池在释放链表锁之后才调用 `observe`，传入的空闲数是出锁后的快照。
///   两个调用方并发时，各自的快照与事件可能交错，例如在空闲数已回升之后才记录一条过时的
///   `RunningLow`；`Recovered` 则要等下一次越过高水位的观察。事件只用于告警，不作为精确计数依据。
#[derive(Debug)]
pub(crate) struct WatermarkMonitor {
    marks: Watermarks,
    is_low: AtomicBool,
}

impl WatermarkMonitor {
    pub(crate) fn new(marks: Watermarks) -> Self {
        Self {
            marks,
            is_low: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_low(&self) -> bool {
        self.is_low.load(Ordering::Acquire)
    }

    /// 根据最新空闲数量判断是否跨越水位。
    pub(crate) fn observe(&self, free: usize) -> Option<PoolDiagnostic> {
        if free <= self.marks.low {
            self.is_low
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .ok()
                .map(|_| PoolDiagnostic::RunningLow {
                    free,
                    low: self.marks.low,
                })
        } else if free >= self.marks.high {
            self.is_low
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .ok()
                .map(|_| PoolDiagnostic::Recovered {
                    free,
                    high: self.marks.high,
                })
        } else {
            None
        }
    }
}
