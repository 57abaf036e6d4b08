//! 并发语义测试：阻塞等待、唤醒与多线程争用下的唯一持有者约束。
//!
//! # 测试目标（Why）
//! - 验证“先入表、后发信号”的释放顺序能唤醒无限期等待的任务，且被唤醒者必然拿到描述符；
//! - 在任务线程与模拟中断线程混合争用时，确认同一描述符不会同时交给两个持有者。
//!
//! # 实现策略（How）
//! - 共享的 `HashSet` 由 `parking_lot::Mutex` 保护，记录当前持有的槽位；插入失败即说明重复签发；
//! - 线程数与轮次取适中数值，保证在 CI 上数秒内完成。

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use parking_lot::Mutex;
use spark_netbuf::{NetworkBufferPool, PoolConfig, ReleaseOutcome, WaitTimeout, WakeHint};

/// 无限期等待的任务在一次释放后被唤醒并拿到刚归还的描述符。
#[test]
fn unbounded_waiter_is_woken_by_release() {
    let pool = NetworkBufferPool::new(PoolConfig::with_capacity(1)).expect("建池应成功");
    let held = pool.acquire(1, WaitTimeout::Poll).expect("首次获取应成功");

    let waiter_pool = pool.clone();
    let waiter = thread::spawn(move || waiter_pool.acquire(2, WaitTimeout::Forever));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(pool.release(held), ReleaseOutcome::Released);

    let granted = waiter
        .join()
        .expect("等待线程不应 panic")
        .expect("释放后等待者必须拿到描述符");
    assert_eq!(granted, held, "容量为 1 时只能是同一个槽位");
    assert_eq!(pool.data_length(&granted), Some(2));
    assert_eq!(pool.free_count(), 0);
}

/// 有任务等待时，中断释放返回重新调度提示。
#[test]
fn interrupt_release_requests_reschedule_for_waiters() {
    let pool = NetworkBufferPool::new(PoolConfig::with_capacity(1)).expect("建池应成功");
    let held = pool.acquire(1, WaitTimeout::Poll).expect("首次获取应成功");

    let waiter_pool = pool.clone();
    let waiter = thread::spawn(move || waiter_pool.acquire(1, Duration::from_secs(5)));

    // 给等待线程足够时间进入阻塞，再从“中断”释放。
    thread::sleep(Duration::from_millis(100));
    let hint = pool.release_from_interrupt(held);

    let granted = waiter.join().expect("等待线程不应 panic");
    assert!(granted.is_some(), "释放后等待者必须拿到描述符");
    assert!(hint.should_reschedule());
    assert_eq!(hint, WakeHint::Reschedule);
}

/// 多线程混合任务/中断路径争用，任何时刻每个槽位至多一个持有者。
#[test]
fn contended_acquire_release_never_duplicates_owners() {
    const CAPACITY: usize = 8;
    const TASK_THREADS: usize = 4;
    const ROUNDS: usize = 2_000;

    let pool = NetworkBufferPool::new(PoolConfig::with_capacity(CAPACITY).interrupt_reserve(2))
        .expect("建池应成功");
    let owners = Arc::new(Mutex::new(HashSet::new()));
    let stop = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::new();
    for worker in 0..TASK_THREADS {
        let pool = pool.clone();
        let owners = Arc::clone(&owners);
        handles.push(thread::spawn(move || {
            for round in 0..ROUNDS {
                let Some(descriptor) = pool.acquire(worker + round, Duration::from_millis(100))
                else {
                    continue;
                };
                assert!(
                    owners.lock().insert(descriptor.index()),
                    "槽位 {descriptor} 被重复签发"
                );
                assert_eq!(pool.data_length(&descriptor), Some(worker + round));
                owners.lock().remove(&descriptor.index());
                assert_eq!(pool.release(descriptor), ReleaseOutcome::Released);
            }
        }));
    }

    let isr_pool = pool.clone();
    let isr_owners = Arc::clone(&owners);
    let isr_stop = Arc::clone(&stop);
    let isr = thread::spawn(move || {
        while !isr_stop.load(Ordering::Acquire) {
            if let Some(descriptor) = isr_pool.acquire_from_interrupt(64) {
                assert!(
                    isr_owners.lock().insert(descriptor.index()),
                    "中断路径拿到了已被持有的槽位 {descriptor}"
                );
                isr_owners.lock().remove(&descriptor.index());
                isr_pool.release_from_interrupt(descriptor);
            }
            thread::yield_now();
        }
    });

    for handle in handles {
        handle.join().expect("任务线程不应 panic");
    }
    stop.store(true, Ordering::Release);
    isr.join().expect("中断线程不应 panic");

    let stats = pool.statistics();
    assert_eq!(stats.free, CAPACITY, "所有描述符最终都应回到空闲链表");
    assert_eq!(pool.available_permits(), CAPACITY);
    assert_eq!(stats.double_releases, 0);
    assert_eq!(stats.corruption_events, 0);
    assert!(owners.lock().is_empty());
}

/// 等待者数量多于容量时，每次释放恰好放行一个等待者。
#[test]
fn each_release_admits_one_waiter() {
    const CAPACITY: usize = 2;
    const WAITERS: usize = 6;

    let pool = NetworkBufferPool::new(PoolConfig::with_capacity(CAPACITY)).expect("建池应成功");
    let mut held: Vec<_> = (0..CAPACITY)
        .map(|_| pool.acquire(0, WaitTimeout::Poll).expect("获取应成功"))
        .collect();

    let waiters: Vec<_> = (0..WAITERS)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || {
                let descriptor = pool.acquire(0, WaitTimeout::Forever)?;
                thread::sleep(Duration::from_millis(5));
                (pool.release(descriptor) == ReleaseOutcome::Released).then_some(())
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(30));
    for descriptor in held.drain(..) {
        pool.release(descriptor);
    }

    for waiter in waiters {
        assert_eq!(waiter.join().expect("等待线程不应 panic"), Some(()));
    }
    assert_eq!(pool.free_count(), CAPACITY);
    assert_eq!(pool.statistics().successful_acquisitions as usize, CAPACITY + WAITERS);
}
