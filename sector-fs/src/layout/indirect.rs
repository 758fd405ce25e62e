//! 间接索引块：整个扇区连续存储**扇区号**，每个编号都指向一个**数据块**。
//!
//! 索引块只由文件头创建、分配与销毁。

use alloc::sync::Arc;
use core::fmt;

use block_dev::BlockDevice;

use super::{Bitmap, EMPTY_SECTOR, OnDisk};
use crate::{FsError, Result, SECTOR_SIZE};

/// 间接索引块的编号容量
pub const MAX_SECTOR: usize = SECTOR_SIZE / 4;

#[derive(Debug, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct IndirectBlock {
    data_sectors: [i32; MAX_SECTOR],
}

unsafe impl OnDisk for IndirectBlock {}

impl Default for IndirectBlock {
    fn default() -> Self {
        Self {
            data_sectors: [EMPTY_SECTOR; MAX_SECTOR],
        }
    }
}

impl IndirectBlock {
    /// 已指向数据块的槽位数
    pub fn num_used(&self) -> usize {
        self.data_sectors
            .iter()
            .filter(|&&sector| sector != EMPTY_SECTOR)
            .count()
    }

    /// 为至多 `num_sectors` 个空槽位分配数据块，新数据块在磁盘上清零。
    ///
    /// 返回实际分配的个数，槽位用尽时可能少于请求数。
    pub fn allocate(
        &mut self,
        free_map: &mut Bitmap,
        block_device: &Arc<dyn BlockDevice>,
        num_sectors: usize,
    ) -> Result<usize> {
        let wanted = num_sectors.min(MAX_SECTOR - self.num_used());
        if free_map.num_clear() < wanted {
            return Err(FsError::NoSpace);
        }

        let zero = [0; SECTOR_SIZE];
        for slot in self
            .data_sectors
            .iter_mut()
            .filter(|sector| **sector == EMPTY_SECTOR)
            .take(wanted)
        {
            let sector = free_map
                .find()
                .expect("free map ran out after the count check");
            block_device.write_block(sector, &zero);
            *slot = sector as i32;
        }

        log::trace!("indirect block allocated {wanted} data sectors");
        Ok(wanted)
    }

    /// 将所有数据块归还位图，并清空槽位
    pub fn deallocate(&mut self, free_map: &mut Bitmap) {
        for slot in self
            .data_sectors
            .iter_mut()
            .filter(|sector| **sector != EMPTY_SECTOR)
        {
            free_map.clear(*slot as usize);
            *slot = EMPTY_SECTOR;
        }
    }

    /// 块内字节偏移 -> 数据块所在扇区
    pub fn byte_to_sector(&self, offset: usize) -> usize {
        let index = offset / SECTOR_SIZE;
        assert!(index < MAX_SECTOR, "offset {offset} beyond indirect block");
        let sector = self.data_sectors[index];
        assert_ne!(sector, EMPTY_SECTOR, "offset {offset} maps to no sector");
        sector as usize
    }

    /// 按顺序遍历已分配的数据块
    pub fn sectors(&self) -> impl Iterator<Item = usize> + '_ {
        self.data_sectors
            .iter()
            .filter(|&&sector| sector != EMPTY_SECTOR)
            .map(|&sector| sector as usize)
    }

    pub fn print(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for sector in self.sectors() {
            write!(out, "{sector} ")?;
        }
        Ok(())
    }
}
