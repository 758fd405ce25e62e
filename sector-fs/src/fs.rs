//! # 文件系统层
//!
//! 对外提供格式化、挂载与按路径的文件操作。
//!
//! 修改目录树的操作都持有目录树锁，并在位图、目录与文件头的副本上进行，
//! 全部成功后才按 文件头 -> 目录 -> 位图 的顺序写回磁盘；
//! 中途失败则直接丢弃副本，磁盘保持原样。
//!
//! 加锁顺序：文件扩展锁 -> 目录树锁 -> 位图锁。
//! 目录也能作为文件打开并扩展，所以扩展同样要持有目录树锁。

use alloc::sync::Arc;
use core::fmt;

use block_dev::BlockDevice;
use spin::Mutex;

use crate::directory::Walk;
use crate::file::OpenFile;
use crate::layout::{Bitmap, DirEntry, FileHeader, MAX_FILE_SIZE, OnDisk};
use crate::sync::FileLocks;
use crate::{BITS_IN_BYTE, DIRECTORY_SECTOR, Directory, FREE_MAP_SECTOR, FsError, Result, path};

/// 格式化参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    /// 磁盘扇区数，须为 8 的倍数
    pub num_sectors: usize,
    /// 根目录的初始容量
    pub dir_entries: usize,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            num_sectors: 1024,
            dir_entries: 10,
        }
    }
}

impl FormatOptions {
    fn validate(&self) -> Result<()> {
        let Self {
            num_sectors,
            dir_entries,
        } = *self;
        if num_sectors < 8
            || num_sectors >= i32::MAX as usize
            || num_sectors % BITS_IN_BYTE != 0
            || dir_entries == 0
            || dir_entries
                .checked_mul(DirEntry::SIZE)
                .is_none_or(|bytes| bytes > MAX_FILE_SIZE)
        {
            return Err(FsError::InvalidGeometry);
        }
        Ok(())
    }
}

pub struct FileSystem {
    block_device: Arc<dyn BlockDevice>,
    /// 目录树锁，保护所有目录
    tree: Mutex<()>,
    /// 内存中的位图，与位图文件保持一致
    free_map: Mutex<Bitmap>,
    /// 位图文件的文件头，长度在格式化后不再改变
    free_map_header: FileHeader,
    locks: FileLocks,
}

impl FileSystem {
    /// 在 `block_device` 上建立空的文件系统
    pub fn format(block_device: Arc<dyn BlockDevice>, options: FormatOptions) -> Result<Arc<Self>> {
        options.validate()?;

        let mut free_map = Bitmap::new(options.num_sectors);
        free_map.mark(FREE_MAP_SECTOR);
        free_map.mark(DIRECTORY_SECTOR);

        let mut map_header = FileHeader::new();
        map_header.allocate(
            &mut free_map,
            &block_device,
            Bitmap::file_size(options.num_sectors),
        )?;

        let directory = Directory::new(options.dir_entries);
        let mut dir_header = FileHeader::new();
        dir_header.allocate(&mut free_map, &block_device, directory.file_size())?;

        map_header.write_back(&block_device, FREE_MAP_SECTOR);
        dir_header.write_back(&block_device, DIRECTORY_SECTOR);
        directory.write_back(&dir_header, &block_device);
        free_map.write_back(&map_header, &block_device);

        log::debug!(
            "formatted {} sectors, {} free, root directory holds {} entries",
            options.num_sectors,
            free_map.num_clear(),
            options.dir_entries
        );

        Ok(Arc::new(Self::new(block_device, free_map, map_header)))
    }

    /// 挂载已格式化的磁盘，扇区数由位图文件长度得出
    pub fn mount(block_device: Arc<dyn BlockDevice>) -> Arc<Self> {
        let map_header = FileHeader::fetch_from(&block_device, FREE_MAP_SECTOR);
        let num_sectors = map_header.file_length() * BITS_IN_BYTE;
        let free_map = Bitmap::load(&map_header, &block_device, num_sectors);
        log::debug!("mounted {num_sectors} sectors, {} free", free_map.num_clear());

        Arc::new(Self::new(block_device, free_map, map_header))
    }

    fn new(block_device: Arc<dyn BlockDevice>, free_map: Bitmap, free_map_header: FileHeader) -> Self {
        Self {
            block_device,
            tree: Mutex::new(()),
            free_map: Mutex::new(free_map),
            free_map_header,
            locks: FileLocks::default(),
        }
    }

    /// 在 `path` 处创建长度为 `size` 的文件
    pub fn create(&self, path: &str, size: usize, working_dir: usize) -> Result<()> {
        log::debug!("create {path:?}, {size} bytes");
        self.make_entry(path, size, working_dir, false)
    }

    /// 创建子目录，其中预置 `.` 与 `..`
    pub fn make_dir(&self, path: &str, size: usize, working_dir: usize) -> Result<()> {
        log::debug!("make dir {path:?}, {size} bytes");
        self.make_entry(path, size, working_dir, true)
    }

    fn make_entry(&self, path: &str, size: usize, working_dir: usize, is_dir: bool) -> Result<()> {
        let _tree = self.tree.lock();
        let (dir_sector, name) = self.resolve(path, working_dir)?;
        let (mut dir_header, mut directory) = self.load_directory(dir_sector);
        if directory.find(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        if size > MAX_FILE_SIZE {
            return Err(FsError::NoSpace);
        }

        let mut free_map = self.free_map.lock();
        let mut proposed = free_map.clone();
        let sector = proposed.find_and_set().ok_or(FsError::NoSpace)?;

        let mut header = FileHeader::new();
        let child = if is_dir {
            directory.add_directory(name, sector)?;
            // 新目录至少要放得下 `.` 与 `..`
            let mut child = Directory::new((size / DirEntry::SIZE).max(2));
            child.add_directory(".", sector)?;
            child.add_directory("..", dir_sector)?;
            header.allocate(&mut proposed, &self.block_device, size.max(child.file_size()))?;
            Some(child)
        } else {
            directory.add(name, sector)?;
            header.allocate(&mut proposed, &self.block_device, size)?;
            None
        };
        self.grow_directory(&mut dir_header, &directory, &mut proposed)?;

        header.write_back(&self.block_device, sector);
        if let Some(child) = child {
            child.write_back(&header, &self.block_device);
        }
        self.commit_directory(dir_sector, &dir_header, &directory);
        self.commit_free_map(&mut free_map, proposed);
        Ok(())
    }

    /// 打开 `path` 处的文件
    pub fn open(self: &Arc<Self>, path: &str, working_dir: usize) -> Result<OpenFile> {
        let _tree = self.tree.lock();
        let (dir_sector, name) = self.resolve(path, working_dir)?;
        let (_, directory) = self.load_directory(dir_sector);
        let sector = directory.find(name).ok_or(FsError::NotFound)?;

        log::debug!("open {path:?} at sector {sector}");
        Ok(OpenFile::new(self.clone(), sector))
    }

    /// 删除文件，正被打开的文件与目录不能删除
    pub fn remove(&self, path: &str, working_dir: usize) -> Result<()> {
        let _tree = self.tree.lock();
        let (dir_sector, name) = self.resolve(path, working_dir)?;
        let (dir_header, mut directory) = self.load_directory(dir_sector);
        let entry = directory.find_entry(name).ok_or(FsError::NotFound)?;

        if entry.is_dir() {
            log::warn!("remove {path:?}: is a directory");
            return Err(FsError::IsADirectory);
        }
        let sector = entry.sector();
        if self.is_open(sector) {
            log::warn!("remove {path:?}: still open");
            return Err(FsError::Busy);
        }

        let mut free_map = self.free_map.lock();
        let mut proposed = free_map.clone();
        let reclaimed = FileHeader::fetch_from(&self.block_device, sector).release(
            sector,
            &mut proposed,
            &self.block_device,
        );
        let removed = directory.remove(name, reclaimed);
        debug_assert!(removed);

        self.commit_directory(dir_sector, &dir_header, &directory);
        self.commit_free_map(&mut free_map, proposed);
        log::debug!("removed {path:?}, sector {sector}");
        Ok(())
    }

    /// 返回 `path` 所指目录的文件头扇区
    pub fn change_dir(&self, path: &str, working_dir: usize) -> Result<usize> {
        let _tree = self.tree.lock();
        let (dir_sector, name) = self.resolve(path, working_dir)?;
        let (_, directory) = self.load_directory(dir_sector);
        let entry = directory.find_entry(name).ok_or(FsError::NotFound)?;
        if !entry.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(entry.sector())
    }

    /// 列出 `sector` 处目录下的整棵子树
    pub fn list(&self, sector: usize) -> Walk<impl FnMut(usize) -> Directory + '_> {
        Walk::new(sector, move |sector| {
            let _tree = self.tree.lock();
            self.load_directory(sector).1
        })
    }

    /// 打印位图、根目录以及各文件的文件头与内容
    pub fn print(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let _tree = self.tree.lock();
        let (dir_header, directory) = self.load_directory(DIRECTORY_SECTOR);

        writeln!(out, "Bit map file header:")?;
        self.free_map_header.print(&self.block_device, out)?;
        writeln!(out, "Directory file header:")?;
        dir_header.print(&self.block_device, out)?;
        self.free_map.lock().print(out)?;
        directory.print(&self.block_device, out)
    }

    #[inline]
    pub fn num_clear(&self) -> usize {
        self.free_map.lock().num_clear()
    }

    #[inline]
    pub fn open_count(&self, sector: usize) -> usize {
        self.locks.open_count(sector)
    }

    #[inline]
    pub fn is_open(&self, sector: usize) -> bool {
        self.open_count(sector) > 0
    }

    #[inline]
    pub fn block_device(&self) -> &Arc<dyn BlockDevice> {
        &self.block_device
    }

    pub(crate) fn locks(&self) -> &FileLocks {
        &self.locks
    }

    /// 将文件扩展到至少 `end` 字节，并写回文件头与位图。
    ///
    /// 返回磁盘上最新的文件头，以及这次是否真的扩展了。
    /// 调用者须持有该文件的扩展锁。
    pub(crate) fn extend(&self, sector: usize, end: usize) -> Result<(FileHeader, bool)> {
        let _tree = self.tree.lock();
        let mut header = FileHeader::fetch_from(&self.block_device, sector);
        let length = header.file_length();
        if end <= length {
            return Ok((header, false));
        }

        let mut free_map = self.free_map.lock();
        let mut proposed = free_map.clone();
        header.allocate(&mut proposed, &self.block_device, end - length)?;

        header.write_back(&self.block_device, sector);
        self.commit_free_map(&mut free_map, proposed);
        Ok((header, true))
    }

    fn resolve<'a>(&self, path: &'a str, working_dir: usize) -> Result<(usize, &'a str)> {
        path::resolve(path, working_dir, |sector| self.load_directory(sector).1)
    }

    fn load_directory(&self, sector: usize) -> (FileHeader, Directory) {
        let header = FileHeader::fetch_from(&self.block_device, sector);
        let directory = Directory::fetch_from(&header, &self.block_device);
        (header, directory)
    }

    /// 目录表扩容后，目录文件也要随之变长
    fn grow_directory(
        &self,
        dir_header: &mut FileHeader,
        directory: &Directory,
        free_map: &mut Bitmap,
    ) -> Result<()> {
        let shortfall = directory.file_size().saturating_sub(dir_header.file_length());
        if shortfall > 0 {
            dir_header.allocate(free_map, &self.block_device, shortfall)?;
        }
        Ok(())
    }

    fn commit_directory(&self, sector: usize, dir_header: &FileHeader, directory: &Directory) {
        dir_header.write_back(&self.block_device, sector);
        directory.write_back(dir_header, &self.block_device);
        // 目录可能正作为文件被打开着
        self.locks.bump_generation(sector);
    }

    fn commit_free_map(&self, free_map: &mut Bitmap, proposed: Bitmap) {
        proposed.write_back(&self.free_map_header, &self.block_device);
        *free_map = proposed;
    }
}
