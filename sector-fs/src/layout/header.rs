//! 文件头（索引节点）
//!
//! 文件头恰好占一个扇区，记录文件长度与一组间接索引块的扇区号。
//! 数据块紧密排列：第 `b` 个数据块位于第 `b / MAX_SECTOR` 个索引块的
//! 第 `b % MAX_SECTOR` 个槽位，因此在用的索引块总是索引表的前缀。

use alloc::sync::Arc;
use core::fmt;

use block_dev::BlockDevice;

use super::{Bitmap, EMPTY_SECTOR, IndirectBlock, MAX_SECTOR, OnDisk};
use crate::{DataBlock, FsError, Result, SECTOR_SIZE};

/// 文件头内索引块编号的个数，使文件头恰好占满一个扇区
pub const NUM_HEADER_POINTERS: usize = (SECTOR_SIZE - 2 * 4) / 4;
/// 单个文件的最大字节数
pub const MAX_FILE_SIZE: usize = NUM_HEADER_POINTERS * MAX_SECTOR * SECTOR_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct FileHeader {
    // 不用usize是为了严控布局
    num_bytes: i32,
    /// 在用的间接索引块个数
    num_sectors: i32,
    /// 间接索引块所在扇区
    data_sectors: [i32; NUM_HEADER_POINTERS],
}

unsafe impl OnDisk for FileHeader {}

/// 文件的全部存储（包括文件头扇区）都已归还位图的凭证，
/// 只有持有它才能从目录中删除对应的目录项。
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub struct Reclaimed {
    sector: usize,
}

impl Default for FileHeader {
    fn default() -> Self {
        Self {
            num_bytes: 0,
            num_sectors: 0,
            data_sectors: [EMPTY_SECTOR; NUM_HEADER_POINTERS],
        }
    }
}

impl FileHeader {
    /// 长度为零的新文件头
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn file_length(&self) -> usize {
        self.num_bytes as usize
    }

    #[inline]
    pub fn num_indirect(&self) -> usize {
        self.num_sectors as usize
    }

    /// 在用的间接索引块所在扇区
    pub fn indirect_sectors(&self) -> impl Iterator<Item = usize> + '_ {
        self.data_sectors[..self.num_indirect()]
            .iter()
            .map(|&sector| sector as usize)
    }

    /// 计算容纳指定数据量需要多少个**数据块**
    #[inline]
    pub fn count_data_block(size: usize) -> usize {
        size.div_ceil(SECTOR_SIZE)
    }

    /// 将文件再扩大 `additional` 字节。
    ///
    /// 先核算所需的数据块与新索引块，空间不足时不做任何修改；
    /// 文件头本身不会写回，由调用者决定何时提交。
    pub fn allocate(
        &mut self,
        free_map: &mut Bitmap,
        block_device: &Arc<dyn BlockDevice>,
        additional: usize,
    ) -> Result<()> {
        let old_len = self.file_length();
        let new_len = old_len
            .checked_add(additional)
            .filter(|&len| len <= MAX_FILE_SIZE)
            .ok_or(FsError::NoSpace)?;

        let need_sectors =
            Self::count_data_block(new_len) - Self::count_data_block(old_len);
        let need_blocks = Self::count_data_block(new_len)
            .div_ceil(MAX_SECTOR)
            .saturating_sub(self.num_indirect());
        if free_map.num_clear() < need_sectors + need_blocks {
            log::debug!(
                "allocate {additional} bytes: need {} sectors, {} free",
                need_sectors + need_blocks,
                free_map.num_clear()
            );
            return Err(FsError::NoSpace);
        }

        let mut allocated = 0;
        // 最后一个在用的索引块可能还有空槽位，从它开始
        for slot in self.num_indirect().saturating_sub(1)..NUM_HEADER_POINTERS {
            if allocated == need_sectors {
                break;
            }

            let current = self.data_sectors[slot];
            let (sector, mut block) = match current {
                EMPTY_SECTOR => {
                    let sector = free_map
                        .find()
                        .expect("free map ran out after the count check");
                    self.data_sectors[slot] = sector as i32;
                    self.num_sectors += 1;
                    (sector, IndirectBlock::default())
                }
                sector => (
                    sector as usize,
                    IndirectBlock::fetch_from(block_device, sector as usize),
                ),
            };

            allocated += block.allocate(free_map, block_device, need_sectors - allocated)?;
            block.write_back(block_device, sector);
        }
        assert_eq!(allocated, need_sectors, "file header ran out of indirect slots");

        self.num_bytes = new_len as i32;
        log::debug!("file header grown to {new_len} bytes, {allocated} new data sectors");
        Ok(())
    }

    /// 释放全部索引块与数据块，文件长度归零
    pub fn deallocate(&mut self, free_map: &mut Bitmap, block_device: &Arc<dyn BlockDevice>) {
        for slot in self
            .data_sectors
            .iter_mut()
            .filter(|sector| **sector != EMPTY_SECTOR)
        {
            let sector = *slot as usize;
            assert!(free_map.test(sector), "indirect block {sector} is not allocated");

            let mut block = IndirectBlock::fetch_from(block_device, sector);
            block.deallocate(free_map);
            free_map.clear(sector);
            *slot = EMPTY_SECTOR;
        }

        self.num_sectors = 0;
        self.num_bytes = 0;
    }

    /// 释放文件的全部存储以及文件头所在的 `sector`
    pub fn release(
        mut self,
        sector: usize,
        free_map: &mut Bitmap,
        block_device: &Arc<dyn BlockDevice>,
    ) -> Reclaimed {
        self.deallocate(free_map, block_device);
        free_map.clear(sector);
        Reclaimed { sector }
    }

    /// 文件内字节偏移 -> (所属索引块的扇区, 索引块内的字节偏移)
    pub fn locate(&self, offset: usize) -> (usize, usize) {
        let block_index = offset / SECTOR_SIZE;
        let slot = block_index / MAX_SECTOR;
        assert!(slot < self.num_indirect(), "offset {offset} beyond allocated blocks");

        let sector = self.data_sectors[slot];
        debug_assert_ne!(sector, EMPTY_SECTOR);
        (sector as usize, block_index % MAX_SECTOR * SECTOR_SIZE)
    }

    /// 文件内字节偏移 -> 存放该字节的数据扇区
    pub fn byte_to_sector(&self, block_device: &Arc<dyn BlockDevice>, offset: usize) -> usize {
        let (block_sector, inner) = self.locate(offset);
        IndirectBlock::fetch_from(block_device, block_sector).byte_to_sector(inner)
    }

    /// 从指定位置(字节偏移)读出数据填充`buf`，超出文件长度的部分不读
    pub fn read_at(
        &self,
        block_device: &Arc<dyn BlockDevice>,
        buf: &mut [u8],
        position: usize,
    ) -> usize {
        let file_length = self.file_length();
        if buf.is_empty() || position >= file_length {
            return 0;
        }
        let end = (position + buf.len()).min(file_length);

        let mut data: DataBlock = [0; SECTOR_SIZE];
        let mut start = position;
        let mut read_size = 0;
        while start < end {
            // 当前块的末地址(字节)
            let block_end = ((start / SECTOR_SIZE + 1) * SECTOR_SIZE).min(end);
            let block_read_size = block_end - start;
            let inner = start % SECTOR_SIZE;

            block_device.read_block(self.byte_to_sector(block_device, start), &mut data);
            buf[read_size..read_size + block_read_size]
                .copy_from_slice(&data[inner..inner + block_read_size]);

            read_size += block_read_size;
            start = block_end;
        }

        read_size
    }

    /// 向指定位置写入`buf`，超出文件长度的部分不写。
    ///
    /// 只覆盖部分内容的扇区先读出再写回，以免破坏未涉及的字节。
    pub fn write_at(
        &self,
        block_device: &Arc<dyn BlockDevice>,
        buf: &[u8],
        position: usize,
    ) -> usize {
        let file_length = self.file_length();
        if buf.is_empty() || position >= file_length {
            return 0;
        }
        let end = (position + buf.len()).min(file_length);

        let mut data: DataBlock = [0; SECTOR_SIZE];
        let mut start = position;
        let mut written_size = 0;
        while start < end {
            let block_end = ((start / SECTOR_SIZE + 1) * SECTOR_SIZE).min(end);
            let block_write_size = block_end - start;
            let inner = start % SECTOR_SIZE;
            let sector = self.byte_to_sector(block_device, start);

            if block_write_size < SECTOR_SIZE {
                block_device.read_block(sector, &mut data);
            }
            data[inner..inner + block_write_size]
                .copy_from_slice(&buf[written_size..written_size + block_write_size]);
            block_device.write_block(sector, &data);

            written_size += block_write_size;
            start = block_end;
        }

        written_size
    }

    /// 打印文件头及其数据，不可见字符以 `\xx` 表示
    pub fn print(
        &self,
        block_device: &Arc<dyn BlockDevice>,
        out: &mut dyn fmt::Write,
    ) -> fmt::Result {
        write!(
            out,
            "FileHeader contents.  File size: {}.  Indirect blocks: ",
            self.num_bytes
        )?;
        for sector in self.indirect_sectors() {
            write!(out, "{sector} ")?;
        }
        write!(out, "\nData blocks: ")?;
        for sector in self.indirect_sectors() {
            IndirectBlock::fetch_from(block_device, sector).print(out)?;
        }

        writeln!(out, "\nFile contents:")?;
        let mut data: DataBlock = [0; SECTOR_SIZE];
        let mut remaining = self.file_length();
        for sector in self.indirect_sectors() {
            let block = IndirectBlock::fetch_from(block_device, sector);
            for data_sector in block.sectors() {
                if remaining == 0 {
                    break;
                }
                block_device.read_block(data_sector, &mut data);
                for &byte in data.iter().take(remaining) {
                    if byte.is_ascii_graphic() || byte == b' ' {
                        write!(out, "{}", byte as char)?;
                    } else {
                        write!(out, "\\{byte:x}")?;
                    }
                }
                remaining = remaining.saturating_sub(SECTOR_SIZE);
                writeln!(out)?;
            }
        }
        Ok(())
    }
}

impl Reclaimed {
    /// 被释放的文件头扇区
    #[inline]
    pub fn sector(&self) -> usize {
        self.sector
    }
}
