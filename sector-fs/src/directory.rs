//! 目录：目录文件的内容是一张定长的目录项表。
//!
//! 表满时容量翻倍，调用者需要同步扩大目录文件，见 [`Directory::file_size`]。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use block_dev::BlockDevice;

use crate::layout::{DirEntry, FileHeader, OnDisk, Reclaimed};
use crate::{FILE_NAME_MAX_LEN, FsError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    table: Vec<DirEntry>,
}

impl Directory {
    /// 容量为 `size` 的空目录
    pub fn new(size: usize) -> Self {
        Self {
            table: vec![DirEntry::default(); size],
        }
    }

    /// 从目录文件读出整张表，容量由文件长度决定
    pub fn fetch_from(header: &FileHeader, block_device: &Arc<dyn BlockDevice>) -> Self {
        let size = header.file_length() / DirEntry::SIZE;
        let mut bytes = vec![0; size * DirEntry::SIZE];
        header.read_at(block_device, &mut bytes, 0);

        Self {
            table: bytes.chunks_exact(DirEntry::SIZE).map(DirEntry::from_bytes).collect(),
        }
    }

    /// 将整张表写回目录文件，目录文件须不短于 [`Directory::file_size`]
    pub fn write_back(&self, header: &FileHeader, block_device: &Arc<dyn BlockDevice>) {
        assert!(
            header.file_length() >= self.file_size(),
            "directory file is shorter than its table"
        );
        let bytes: Vec<u8> = self
            .table
            .iter()
            .flat_map(|entry| entry.as_bytes())
            .copied()
            .collect();
        header.write_at(block_device, &bytes, 0);
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.table.len()
    }

    /// 存放整张表所需的字节数
    #[inline]
    pub fn file_size(&self) -> usize {
        self.capacity() * DirEntry::SIZE
    }

    pub fn find_index(&self, name: &str) -> Option<usize> {
        self.table
            .iter()
            .position(|entry| entry.in_use() && entry.name() == name)
    }

    pub fn find_entry(&self, name: &str) -> Option<&DirEntry> {
        self.find_index(name).map(|index| &self.table[index])
    }

    /// 按名字查找文件头所在扇区
    pub fn find(&self, name: &str) -> Option<usize> {
        self.find_entry(name).map(DirEntry::sector)
    }

    #[inline]
    pub fn add(&mut self, name: &str, sector: usize) -> Result<()> {
        self.insert(name, sector, false)
    }

    #[inline]
    pub fn add_directory(&mut self, name: &str, sector: usize) -> Result<()> {
        self.insert(name, sector, true)
    }

    fn insert(&mut self, name: &str, sector: usize, is_dir: bool) -> Result<()> {
        if !is_valid_name(name) {
            return Err(FsError::InvalidName);
        }
        if self.find_index(name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let slot = match self.free_slot() {
            Some(slot) => slot,
            None => {
                self.expand(2 * self.capacity().max(1));
                self.free_slot()
                    .unwrap_or_else(|| panic!("directory still full after expansion"))
            }
        };

        self.table[slot] = DirEntry::new(name, sector, is_dir);
        log::debug!("directory: add {name:?} -> sector {sector}, slot {slot}");
        Ok(())
    }

    fn free_slot(&self) -> Option<usize> {
        self.table.iter().position(|entry| !entry.in_use())
    }

    /// 删除目录项，须先以 [`FileHeader::release`] 回收其存储。
    ///
    /// 名字不存在时返回 `false`。
    pub fn remove(&mut self, name: &str, reclaimed: Reclaimed) -> bool {
        let Some(index) = self.find_index(name) else {
            return false;
        };

        let entry = &mut self.table[index];
        assert_eq!(
            entry.sector(),
            reclaimed.sector(),
            "{name:?} removed with storage of another file"
        );
        entry.free();
        true
    }

    pub fn is_directory(&self, name: &str) -> bool {
        self.find_entry(name).is_some_and(DirEntry::is_dir)
    }

    /// 扩大表的容量，新增的目录项均空闲
    pub fn expand(&mut self, new_size: usize) {
        assert!(new_size >= self.capacity(), "directory cannot shrink");
        self.table.resize(new_size, DirEntry::default());
        log::debug!("directory expanded to {new_size} entries");
    }

    /// 所有在用的目录项
    pub fn entries(&self) -> impl Iterator<Item = &DirEntry> + '_ {
        self.table.iter().filter(|entry| entry.in_use())
    }

    pub fn print(&self, block_device: &Arc<dyn BlockDevice>, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "Directory contents:")?;
        for entry in self.entries() {
            writeln!(
                out,
                "Name: {}, Sector: {}, Dir: {}",
                entry.name(),
                entry.sector(),
                entry.is_dir()
            )?;
            FileHeader::fetch_from(block_device, entry.sector()).print(block_device, out)?;
        }
        writeln!(out)
    }

    fn into_entries(self) -> vec::IntoIter<DirEntry> {
        self.table
            .into_iter()
            .filter(DirEntry::in_use)
            .collect::<Vec<_>>()
            .into_iter()
    }
}

/// 目录项名字：非空、不超长、不含分隔符
fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= FILE_NAME_MAX_LEN && !name.contains(['/', '\0'])
}

/// 目录树中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// 根目录下的项深度为 0
    pub depth: usize,
    pub name: String,
    pub is_dir: bool,
}

/// 目录树的深度优先遍历。
///
/// 子目录在遍历到它时才读出，`fetch` 按文件头扇区读出目录；
/// `.` 与 `..` 会被列出，但不会进入。
pub struct Walk<F> {
    root: usize,
    fetch: F,
    started: bool,
    stack: Vec<(usize, vec::IntoIter<DirEntry>)>,
}

impl<F> Walk<F>
where
    F: FnMut(usize) -> Directory,
{
    pub fn new(root: usize, fetch: F) -> Self {
        Self {
            root,
            fetch,
            started: false,
            stack: Vec::new(),
        }
    }

    /// 回到起点，下次迭代重新读出根目录
    pub fn restart(&mut self) {
        self.started = false;
        self.stack.clear();
    }
}

impl<F> Iterator for Walk<F>
where
    F: FnMut(usize) -> Directory,
{
    type Item = ListEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            let root = (self.fetch)(self.root);
            self.stack.push((0, root.into_entries()));
        }

        loop {
            let (depth, entries) = self.stack.last_mut()?;
            let depth = *depth;
            let Some(entry) = entries.next() else {
                self.stack.pop();
                continue;
            };

            let name = entry.name();
            if entry.is_dir() && name != "." && name != ".." {
                let child = (self.fetch)(entry.sector());
                self.stack.push((depth + 1, child.into_entries()));
            }

            return Some(ListEntry {
                depth,
                name: name.into(),
                is_dir: entry.is_dir(),
            });
        }
    }
}
