//! 以文件头扇区为键的同步状态。
//!
//! 同一文件的所有打开实例共享一份 [`FileSync`]：
//! 读者计数由读闸门保护，第一个读者关上写闸门，最后一个读者打开它；
//! 写者在一次写入期间独占写闸门。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::hint;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use spin::{Mutex, MutexGuard};

/// 可以在不同线程上锁与解锁的自旋闸门
#[derive(Debug, Default)]
pub struct Gate {
    locked: AtomicBool,
}

impl Gate {
    pub fn lock(&self) {
        while self.locked.swap(true, Ordering::Acquire) {
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    pub fn unlock(&self) {
        debug_assert!(self.is_locked(), "gate unlocked twice");
        self.locked.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct FileSync {
    open_count: AtomicUsize,
    /// 读闸门，同时也是读者计数
    readers: Mutex<usize>,
    write_gate: Gate,
    /// 文件扩展期间持有
    extend: Mutex<()>,
    /// 每次扩展后递增，打开实例据此刷新缓存的文件头
    generation: AtomicU32,
}

impl FileSync {
    #[inline]
    pub fn open(&self) {
        self.open_count.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub fn close(&self) {
        self.open_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
            .expect("file closed more times than opened");
    }

    #[inline]
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::Acquire)
    }

    pub fn begin_read(&self) -> ReadGuard<'_> {
        let mut readers = self.readers.lock();
        *readers += 1;
        if *readers == 1 {
            self.write_gate.lock();
        }
        ReadGuard(self)
    }

    fn end_read(&self) {
        let mut readers = self.readers.lock();
        *readers -= 1;
        if *readers == 0 {
            self.write_gate.unlock();
        }
    }

    pub fn begin_write(&self) -> WriteGuard<'_> {
        self.write_gate.lock();
        WriteGuard(self)
    }

    #[inline]
    pub fn extension(&self) -> MutexGuard<'_, ()> {
        self.extend.lock()
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// 文件头已被改写
    #[inline]
    pub fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

#[must_use]
pub struct ReadGuard<'a>(&'a FileSync);

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.0.end_read();
    }
}

#[must_use]
pub struct WriteGuard<'a>(&'a FileSync);

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.0.write_gate.unlock();
    }
}

/// 文件头扇区 -> 同步状态，首次打开时创建，此后一直保留
#[derive(Debug, Default)]
pub struct FileLocks {
    files: Mutex<BTreeMap<usize, Arc<FileSync>>>,
}

impl FileLocks {
    pub fn get_or_create(&self, sector: usize) -> Arc<FileSync> {
        self.files.lock().entry(sector).or_default().clone()
    }

    /// 文件头被目录操作改写过，仅对打开过的文件有意义
    pub fn bump_generation(&self, sector: usize) {
        if let Some(sync) = self.files.lock().get(&sector) {
            sync.bump_generation();
        }
    }

    pub fn open_count(&self, sector: usize) -> usize {
        self.files
            .lock()
            .get(&sector)
            .map_or(0, |sync| sync.open_count())
    }
}
