use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::BlockDevice;

/// 内存模拟的磁盘，测试与临时文件系统使用
#[derive(Debug)]
pub struct RamDisk {
    sector_size: usize,
    data: Mutex<Vec<u8>>,
}

impl RamDisk {
    pub fn new(num_sectors: usize, sector_size: usize) -> Self {
        Self {
            sector_size,
            data: Mutex::new(vec![0; num_sectors * sector_size]),
        }
    }

    #[inline]
    pub fn num_sectors(&self) -> usize {
        self.data.lock().len() / self.sector_size
    }

    /// 整盘快照
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn range(&self, block_id: usize, len: usize) -> core::ops::Range<usize> {
        assert_eq!(len, self.sector_size, "not a complete block!");
        let start = block_id * self.sector_size;
        start..start + len
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let range = self.range(block_id, buf.len());
        let data = self.data.lock();
        assert!(range.end <= data.len(), "block {block_id} out of range");
        buf.copy_from_slice(&data[range]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let range = self.range(block_id, buf.len());
        let mut data = self.data.lock();
        assert!(range.end <= data.len(), "block {block_id} out of range");
        data[range].copy_from_slice(buf);
    }
}
