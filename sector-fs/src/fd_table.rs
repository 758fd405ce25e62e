//! # 打开文件表
//!
//! 全局的 [`FileTable`] 以引用计数管理打开的文件，最后一个引用释放时关闭文件；
//! 每个进程的 [`FileVector`] 将进程内的文件描述符映射到全局编号。

use alloc::sync::Arc;
use alloc::vec::Vec;

use enumflags2::{BitFlags, bitflags};
use spin::Mutex;

use crate::OpenFile;

/// 两张表的容量
pub const MAX_OPEN_FILE_ID: usize = 100;
/// 控制台输入
pub const CONSOLE_INPUT: usize = 0;
/// 控制台输出
pub const CONSOLE_OUTPUT: usize = 1;

pub type SharedFile = Arc<Mutex<OpenFile>>;

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    READ = 0b01,
    WRITE = 0b10,
}

struct FileTableEntry {
    file: SharedFile,
    references: usize,
}

pub struct FileTable {
    entries: Mutex<Vec<Option<FileTableEntry>>>,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new((0..MAX_OPEN_FILE_ID).map(|_| None).collect()),
        }
    }

    /// 放入空槽位，引用计数为 1；表满时返回空，文件随之关闭
    pub fn insert(&self, file: OpenFile) -> Option<usize> {
        let mut entries = self.entries.lock();
        let id = entries.iter().position(Option::is_none)?;
        entries[id] = Some(FileTableEntry {
            file: Arc::new(Mutex::new(file)),
            references: 1,
        });
        Some(id)
    }

    pub fn resolve(&self, id: usize) -> Option<SharedFile> {
        self.entries
            .lock()
            .get(id)?
            .as_ref()
            .map(|entry| entry.file.clone())
    }

    pub fn add_reference(&self, id: usize) -> Option<()> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(id)?.as_mut()?;
        entry.references += 1;
        Some(())
    }

    /// 释放一个引用，引用归零时移出表
    pub fn remove(&self, id: usize) -> Option<()> {
        let mut entries = self.entries.lock();
        let slot = entries.get_mut(id)?;
        let entry = slot.as_mut()?;
        entry.references -= 1;
        if entry.references == 0 {
            log::trace!("file table: close global id {id}");
            *slot = None;
        }
        Some(())
    }

    /// 当前的引用计数，空槽位为 0
    pub fn references(&self, id: usize) -> usize {
        self.entries
            .lock()
            .get(id)
            .and_then(Option::as_ref)
            .map_or(0, |entry| entry.references)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Descriptor {
    global: usize,
    access: BitFlags<Access>,
}

/// 进程的文件描述符表，0 与 1 号描述符留给控制台
pub struct FileVector {
    table: Arc<FileTable>,
    ids: Vec<Option<Descriptor>>,
}

impl FileVector {
    pub fn new(table: Arc<FileTable>) -> Self {
        Self {
            table,
            ids: (0..MAX_OPEN_FILE_ID).map(|_| None).collect(),
        }
    }

    #[inline]
    pub fn is_console(id: usize) -> bool {
        id == CONSOLE_INPUT || id == CONSOLE_OUTPUT
    }

    /// 登记新打开的文件，返回进程内的描述符
    pub fn insert(&mut self, file: OpenFile, access: BitFlags<Access>) -> Option<usize> {
        let global = self.table.insert(file)?;
        let Some(local) = self.free_id() else {
            self.table.remove(global);
            return None;
        };

        self.ids[local] = Some(Descriptor { global, access });
        Some(local)
    }

    pub fn resolve(&self, id: usize) -> Option<SharedFile> {
        let descriptor = self.ids.get(id)?.as_ref()?;
        self.table.resolve(descriptor.global)
    }

    pub fn access(&self, id: usize) -> Option<BitFlags<Access>> {
        self.ids.get(id)?.as_ref().map(|descriptor| descriptor.access)
    }

    /// 关闭描述符，控制台描述符不能关闭
    pub fn remove(&mut self, id: usize) -> Option<()> {
        if Self::is_console(id) {
            return None;
        }
        let descriptor = self.ids.get_mut(id)?.take()?;
        self.table.remove(descriptor.global)
    }

    /// 复制描述符，新描述符与原描述符共享同一个打开文件
    pub fn duplicate(&mut self, id: usize) -> Option<usize> {
        let descriptor = *self.ids.get(id)?.as_ref()?;
        let local = self.free_id()?;
        self.table.add_reference(descriptor.global)?;
        self.ids[local] = Some(descriptor);
        Some(local)
    }

    /// 子进程继承全部描述符
    pub fn fork(&self) -> Self {
        for descriptor in self.ids.iter().flatten() {
            self.table.add_reference(descriptor.global);
        }
        Self {
            table: self.table.clone(),
            ids: self.ids.clone(),
        }
    }

    fn free_id(&self) -> Option<usize> {
        self.ids
            .iter()
            .enumerate()
            .skip(CONSOLE_OUTPUT + 1)
            .find_map(|(id, descriptor)| descriptor.is_none().then_some(id))
    }
}

impl Drop for FileVector {
    fn drop(&mut self) {
        for descriptor in self.ids.iter_mut().filter_map(Option::take) {
            self.table.remove(descriptor.global);
        }
    }
}
