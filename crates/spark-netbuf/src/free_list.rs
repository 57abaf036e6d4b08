//! 以槽位索引串联的侵入式空闲链表。
//!
//! # 模块定位（Why）
//! - 空闲链表的成员必须**恰好**等于空闲描述符集合：重复插入会让两个持有者拿到同一槽位，
//!   遗漏则造成永久泄漏。侵入式链接配合 `linked` 标志让“是否已在表中”成为 O(1) 查询，
//!   正是重复释放检测所需的能力。
//! - 链接数组与描述符数组一一对应、一次分配、永不扩容，临界区内只做索引改写，不分配、不记日志。
//!
//! # 契约说明（What）
//! - 顺序为 FIFO：从表头弹出、在表尾插入；调用方不应依赖具体返回哪一个槽位。
//! - 所有方法都要求调用方已持有保护本结构的锁。

use alloc::{boxed::Box, vec};

use crate::descriptor::NO_LINK;

#[derive(Clone, Copy, Debug)]
struct Link {
    prev: u32,
    next: u32,
    linked: bool,
}

impl Link {
    const UNLINKED: Link = Link {
        prev: NO_LINK,
        next: NO_LINK,
        linked: false,
    };
}

/// 弹出表头时发现的结构性异常。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FreeListFault {
    /// 表为空。
    Empty,
    /// 表头指向的槽位越界或未被标记为在表中，说明链接已被破坏。
    Corrupted { index: u32 },
}

pub(crate) struct FreeList {
    links: Box<[Link]>,
    head: u32,
    tail: u32,
    len: usize,
}

impl FreeList {
    /// 创建可容纳 `slots` 个槽位的空表。
    pub(crate) fn with_slots(slots: usize) -> Self {
        Self {
            links: vec![Link::UNLINKED; slots].into_boxed_slice(),
            head: NO_LINK,
            tail: NO_LINK,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn contains(&self, index: u32) -> bool {
        self.links
            .get(index as usize)
            .is_some_and(|link| link.linked)
    }

    /// 在表尾插入；索引越界或已在表中时返回 `false` 且不做任何修改。
    pub(crate) fn push_back(&mut self, index: u32) -> bool {
        let Some(link) = self.links.get(index as usize) else {
            return false;
        };
        if link.linked {
            return false;
        }
        let previous_tail = self.tail;
        self.links[index as usize] = Link {
            prev: previous_tail,
            next: NO_LINK,
            linked: true,
        };
        if previous_tail == NO_LINK {
            self.head = index;
        } else {
            self.links[previous_tail as usize].next = index;
        }
        self.tail = index;
        self.len += 1;
        true
    }

    /// 弹出表头，并在摘除前核对表头确实是一个在表中的合法槽位。
    pub(crate) fn pop_front(&mut self) -> Result<u32, FreeListFault> {
        let index = self.head;
        if index == NO_LINK {
            return Err(FreeListFault::Empty);
        }
        if !self.contains(index) {
            return Err(FreeListFault::Corrupted { index });
        }
        self.unlink(index);
        Ok(index)
    }

    fn unlink(&mut self, index: u32) {
        let Link { prev, next, .. } = self.links[index as usize];
        if prev == NO_LINK {
            self.head = next;
        } else {
            self.links[prev as usize].next = next;
        }
        if next == NO_LINK {
            self.tail = prev;
        } else {
            self.links[next as usize].prev = prev;
        }
        self.links[index as usize] = Link::UNLINKED;
        self.len -= 1;
    }

    /// 让表头指向任意索引而不修正链接，用于构造损坏场景。
    #[cfg(test)]
    pub(crate) fn corrupt_head(&mut self, index: u32) {
        self.head = index;
    }
}
