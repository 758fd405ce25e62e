use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use block_dev::BlockDevice;

use super::FileHeader;
use crate::BITS_IN_BYTE;

/// 空闲扇区位图，每个扇区对应一位，置位表示已分配。
///
/// 位图在内存中整体持有，通过位图文件持久化。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    map: Vec<u8>,
    num_bits: usize,
    /// 缓存的空闲位数
    num_clear: usize,
}

impl Bitmap {
    pub fn new(num_bits: usize) -> Self {
        Self {
            map: vec![0; Self::file_size(num_bits)],
            num_bits,
            num_clear: num_bits,
        }
    }

    /// 持久化 `num_bits` 位所需的字节数
    #[inline]
    pub fn file_size(num_bits: usize) -> usize {
        num_bits.div_ceil(BITS_IN_BYTE)
    }

    /// 从位图文件读出位图
    pub fn load(header: &FileHeader, block_device: &Arc<dyn BlockDevice>, num_bits: usize) -> Self {
        let mut bitmap = Self::new(num_bits);
        bitmap.fetch_from(header, block_device);
        bitmap
    }

    #[inline]
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    #[inline]
    pub fn num_clear(&self) -> usize {
        self.num_clear
    }

    pub fn test(&self, which: usize) -> bool {
        assert!(which < self.num_bits, "sector {which} out of bitmap");
        self.map[which / BITS_IN_BYTE] & (1 << (which % BITS_IN_BYTE)) != 0
    }

    /// 将扇区标记为已分配，该扇区必须空闲
    pub fn mark(&mut self, which: usize) {
        assert!(!self.test(which), "sector {which} is already allocated");
        self.map[which / BITS_IN_BYTE] |= 1 << (which % BITS_IN_BYTE);
        self.num_clear -= 1;
    }

    /// 释放扇区，重复释放说明分配器自身的记账出错
    pub fn clear(&mut self, which: usize) {
        assert!(self.test(which), "sector {which} is already free");
        self.map[which / BITS_IN_BYTE] &= !(1 << (which % BITS_IN_BYTE));
        self.num_clear += 1;
    }

    /// 寻找一个空闲扇区并标记为已分配。
    /// 若位图已满，则返回空。
    pub fn find(&mut self) -> Option<usize> {
        let which = self
            .map
            .iter()
            .enumerate()
            .find_map(|(index, &bits)| {
                (bits != u8::MAX).then_some(index * BITS_IN_BYTE + bits.trailing_ones() as usize)
            })
            .filter(|&which| which < self.num_bits)?;

        self.mark(which);
        Some(which)
    }

    /// 为文件头分配扇区，与 [`Bitmap::find`] 相同
    #[inline]
    pub fn find_and_set(&mut self) -> Option<usize> {
        self.find()
    }

    pub fn fetch_from(&mut self, header: &FileHeader, block_device: &Arc<dyn BlockDevice>) {
        let read = header.read_at(block_device, &mut self.map, 0);
        assert_eq!(read, self.map.len(), "bitmap file is too short");

        let used: usize = self.map.iter().map(|bits| bits.count_ones() as usize).sum();
        self.num_clear = self.num_bits - used;
    }

    /// 写回位图文件，文件长度在格式化时已经确定
    pub fn write_back(&self, header: &FileHeader, block_device: &Arc<dyn BlockDevice>) {
        let written = header.write_at(block_device, &self.map, 0);
        assert_eq!(written, self.map.len(), "bitmap file is too short");
    }

    pub fn print(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "Bitmap set:")?;
        for which in (0..self.num_bits).filter(|&which| self.test(which)) {
            write!(out, "{which}, ")?;
        }
        writeln!(out)
    }
}
