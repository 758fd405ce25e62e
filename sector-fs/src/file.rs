//! # 打开文件层
//!
//! [`OpenFile`] 缓存文件头并维护读写位置。
//! 读写经由该文件共享的读写闸门，写入越过文件末尾时先扩展文件。

use alloc::sync::Arc;

use crate::layout::{FileHeader, OnDisk};
use crate::sync::FileSync;
use crate::{FileSystem, FsError, Result};

pub struct OpenFile {
    fs: Arc<FileSystem>,
    header: FileHeader,
    /// 文件头所在扇区，同时是同步状态的键
    sector: usize,
    seek_position: usize,
    sync: Arc<FileSync>,
    /// 缓存的文件头对应的版本
    seen_generation: u32,
}

impl OpenFile {
    pub(crate) fn new(fs: Arc<FileSystem>, sector: usize) -> Self {
        let sync = fs.locks().get_or_create(sector);
        sync.open();
        // 先取版本再读文件头，其间发生的扩展会在下次访问时刷新
        let seen_generation = sync.generation();
        let header = FileHeader::fetch_from(fs.block_device(), sector);

        Self {
            fs,
            header,
            sector,
            seek_position: 0,
            sync,
            seen_generation,
        }
    }

    /// 文件头所在扇区
    #[inline]
    pub fn sector(&self) -> usize {
        self.sector
    }

    /// 设置读写位置，不做检查
    #[inline]
    pub fn seek(&mut self, position: usize) {
        self.seek_position = position;
    }

    #[inline]
    pub fn tell(&self) -> usize {
        self.seek_position
    }

    /// 缓存的文件长度
    #[inline]
    pub fn length(&self) -> usize {
        self.header.file_length()
    }

    /// 从读写位置读出数据，读写位置随之前进
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let read = self.read_at(buf, self.seek_position);
        self.seek_position += read;
        read
    }

    /// 在读写位置写入数据，必要时先扩展文件
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.refresh();
        let end = self
            .seek_position
            .checked_add(buf.len())
            .ok_or(FsError::NoSpace)?;
        if end > self.length() {
            self.extend_to(end)?;
        }

        let written = self.write_at(buf, self.seek_position);
        self.seek_position += written;
        Ok(written)
    }

    /// 从 `position` 读出数据，不超过文件末尾
    pub fn read_at(&mut self, buf: &mut [u8], position: usize) -> usize {
        self.refresh();
        let _reader = self.sync.begin_read();
        self.header.read_at(self.fs.block_device(), buf, position)
    }

    /// 向 `position` 写入数据，不超过文件末尾
    pub fn write_at(&mut self, buf: &[u8], position: usize) -> usize {
        self.refresh();
        let _writer = self.sync.begin_write();
        self.header.write_at(self.fs.block_device(), buf, position)
    }

    fn extend_to(&mut self, end: usize) -> Result<()> {
        let sync = self.sync.clone();
        let _extending = sync.extension();

        // 其他打开实例可能刚刚扩展过
        let (header, grown) = self.fs.extend(self.sector, end)?;
        self.header = header;
        if grown {
            sync.bump_generation();
            log::debug!("file at sector {} extended to {end} bytes", self.sector);
        }
        self.seen_generation = sync.generation();
        Ok(())
    }

    /// 其他打开实例扩展过文件时，重新读出文件头
    fn refresh(&mut self) {
        let generation = self.sync.generation();
        if generation != self.seen_generation {
            self.header = FileHeader::fetch_from(self.fs.block_device(), self.sector);
            self.seen_generation = generation;
        }
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        self.sync.close();
    }
}
