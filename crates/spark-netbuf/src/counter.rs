//! 可用性计数器：镜像空闲链表长度的计数信号量。
//!
//! # 模块定位（Why）
//! - 空闲链表只负责结构，本身不能让任务“等到有缓冲为止”；计数器承担阻塞等待与超时语义。
//! - 计数器的内部同步与空闲链表锁相互独立，调用方**绝不能**在持有链表锁时调用本模块，
//!   从而杜绝两把锁之间的加锁顺序反转。
//!
//! # 核心机制（How）
//! - 可用数与等待者数都是原子量，扣减与归还本身无锁；`parking_lot::Mutex<()>` + `Condvar`
//!   只用于任务的停车/唤醒握手；
//! - 等待者在互斥锁内登记自己，再复查可用数后停车；归还方先加可用数，再读等待者数，
//!   两步都用 `SeqCst`，保证“归还方看不到等待者”与“等待者看不到新许可”不会同时发生；
//! - 任务路径归还时持锁唤醒；中断路径只 `try_lock`，拿不到锁时退化为不持锁的唤醒，
//!   此时可能错过一个尚未停车的等待者，由等待者每 [`RECHECK_INTERVAL`] 一次的自查兜底。

use std::time::{Duration, Instant};

use core::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

/// 等待者在未收到唤醒时自行复查可用数的周期。
const RECHECK_INTERVAL: Duration = Duration::from_millis(10);

/// 阻塞获取的等待方式。
///
/// - `Poll`：立即返回，不等待；
/// - `For`：最多等待给定时长；
/// - `Forever`：一直等到有描述符可用。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitTimeout {
    Poll,
    For(Duration),
    Forever,
}

impl From<Duration> for WaitTimeout {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            WaitTimeout::Poll
        } else {
            WaitTimeout::For(duration)
        }
    }
}

impl From<Option<Duration>> for WaitTimeout {
    /// `None` 表示无限等待。
    fn from(duration: Option<Duration>) -> Self {
        duration.map_or(WaitTimeout::Forever, WaitTimeout::from)
    }
}

/// 中断路径的非阻塞扣减结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum IsrTake {
    Granted,
    /// 当前值未高于预留阈值。
    BelowReserve,
}

/// 一次归还的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Signal {
    /// 计数是否真的增加；已达上限时为 `false`。
    pub(crate) accepted: bool,
    /// 归还时是否有任务在等待，即中断返回后是否需要调度。
    pub(crate) waiter_pending: bool,
}

pub(crate) struct AvailabilityCounter {
    available: AtomicUsize,
    waiters: AtomicUsize,
    parking: Mutex<()>,
    signal: Condvar,
    ceiling: usize,
}

impl AvailabilityCounter {
    /// 以 `initial` 为初值、`ceiling` 为上限建立计数器。
    pub(crate) fn new(initial: usize, ceiling: usize) -> Self {
        Self {
            available: AtomicUsize::new(initial.min(ceiling)),
            waiters: AtomicUsize::new(0),
            parking: Mutex::new(()),
            signal: Condvar::new(),
            ceiling,
        }
    }

    pub(crate) fn available(&self) -> usize {
        self.available.load(Ordering::SeqCst)
    }

    /// 任务上下文扣减，必要时阻塞至多 `timeout`。
    pub(crate) fn take(&self, timeout: WaitTimeout) -> bool {
        if self.try_take_above_inner(0) {
            return true;
        }

        let deadline = match timeout {
            WaitTimeout::Poll => return false,
            WaitTimeout::Forever => None,
            // 超出 `Instant` 表示范围的时长按无限等待处理。
            WaitTimeout::For(duration) => Instant::now().checked_add(duration),
        };

        let mut parked = self.parking.lock();
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let granted = loop {
            if self.try_take_above_inner(0) {
                break true;
            }
            let now = Instant::now();
            let wake_at = match deadline {
                None => now + RECHECK_INTERVAL,
                Some(deadline) if now >= deadline => break false,
                Some(deadline) => deadline.min(now + RECHECK_INTERVAL),
            };
            self.signal.wait_until(&mut parked, wake_at);
        };
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        granted
    }

    /// 中断上下文扣减：仅当当前值严格大于 `reserve` 时成功；无锁，从不停车。
    pub(crate) fn try_take_above(&self, reserve: usize) -> IsrTake {
        if self.try_take_above_inner(reserve) {
            IsrTake::Granted
        } else {
            IsrTake::BelowReserve
        }
    }

    /// 任务上下文归还：有等待者时持锁唤醒一个。
    pub(crate) fn give(&self) -> Signal {
        let signal = self.increment();
        if signal.accepted && signal.waiter_pending {
            let _parked = self.parking.lock();
            self.signal.notify_one();
        }
        signal
    }

    /// 中断上下文归还，从不停车。
    ///
    /// 停车锁空闲时与任务路径相同；锁被占用时直接唤醒，漏掉的等待者由周期自查接手。
    /// `waiter_pending` 作为“中断返回后需要调度”的提示交给调用方。
    pub(crate) fn give_from_isr(&self) -> Signal {
        let signal = self.increment();
        if signal.accepted && signal.waiter_pending {
            let parked = self.parking.try_lock();
            self.signal.notify_one();
            drop(parked);
        }
        signal
    }

    fn try_take_above_inner(&self, reserve: usize) -> bool {
        self.available
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current > reserve).then(|| current - 1)
            })
            .is_ok()
    }

    fn increment(&self) -> Signal {
        let accepted = self
            .available
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < self.ceiling).then(|| current + 1)
            })
            .is_ok();
        Signal {
            accepted,
            waiter_pending: self.waiters.load(Ordering::SeqCst) > 0,
        }
    }

    /// 占住停车锁，模拟任务正处于登记/停车临界区。
    #[cfg(test)]
    pub(crate) fn hold_parking(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.parking.lock()
    }
}
