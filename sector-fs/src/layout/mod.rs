//! # 磁盘数据结构层
//!
//! sector-fs 的磁盘布局：
//! 位图文件头(0号扇区) | 根目录文件头(1号扇区) | 其余扇区按需分配
//!
//! 位图与目录本身都是普通文件，其数据经由文件头与间接索引块定位。

use alloc::sync::Arc;
use core::{mem, ptr, slice};

use block_dev::BlockDevice;

use crate::SECTOR_SIZE;

mod bitmap;
pub use bitmap::Bitmap;

mod indirect;
pub use indirect::{IndirectBlock, MAX_SECTOR};

mod header;
pub use header::{FileHeader, MAX_FILE_SIZE, NUM_HEADER_POINTERS, Reclaimed};

/// 目录项，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::DirEntry;

/// 空索引的标记
pub const EMPTY_SECTOR: i32 = -1;

/// 与磁盘字节一一对应的数据结构。
///
/// # Safety
///
/// 实现者必须是 `#[repr(C)]` 且只含整数字段，任意字节序列都是它的合法值。
pub unsafe trait OnDisk: Default {
    #[inline]
    fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), mem::size_of::<Self>()) }
    }

    #[inline]
    fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), mem::size_of::<Self>()) }
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut value = Self::default();
        value.as_bytes_mut().copy_from_slice(bytes);
        value
    }

    /// 从整个扇区读出，只适用于恰好占一个扇区的结构
    fn fetch_from(block_device: &Arc<dyn BlockDevice>, sector: usize) -> Self {
        let mut value = Self::default();
        block_device.read_block(sector, value.as_bytes_mut());
        log::trace!("fetch sector {sector}");
        value
    }

    fn write_back(&self, block_device: &Arc<dyn BlockDevice>, sector: usize) {
        block_device.write_block(sector, self.as_bytes());
        log::trace!("write back sector {sector}");
    }
}

const _: () = assert!(mem::size_of::<FileHeader>() == SECTOR_SIZE);
const _: () = assert!(mem::size_of::<IndirectBlock>() == SECTOR_SIZE);
const _: () = assert!(mem::size_of::<DirEntry>() == DirEntry::SIZE);
