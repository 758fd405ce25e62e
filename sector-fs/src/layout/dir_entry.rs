use super::{EMPTY_SECTOR, OnDisk};
use crate::FILE_NAME_MAX_LEN;

/// 目录表中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct DirEntry {
    in_use: u8,
    is_dir: u8,
    // 最后一字节留给 \0
    name: [u8; FILE_NAME_MAX_LEN + 1],
    /// 文件头所在扇区
    sector: i32,
}

unsafe impl OnDisk for DirEntry {}

impl Default for DirEntry {
    fn default() -> Self {
        Self {
            in_use: 0,
            is_dir: 0,
            name: [0; FILE_NAME_MAX_LEN + 1],
            sector: EMPTY_SECTOR,
        }
    }
}

impl DirEntry {
    /// 目录项大小恒为16字节
    pub const SIZE: usize = 16;

    /// `name` 须已通过长度检查
    pub fn new(name: &str, sector: usize, is_dir: bool) -> Self {
        let bytes = name.as_bytes();
        debug_assert!(bytes.len() <= FILE_NAME_MAX_LEN);
        let mut raw = [0; FILE_NAME_MAX_LEN + 1];
        raw[..bytes.len()].copy_from_slice(bytes);

        Self {
            in_use: 1,
            is_dir: u8::from(is_dir),
            name: raw,
            sector: sector as i32,
        }
    }

    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(FILE_NAME_MAX_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or_default()
    }

    #[inline]
    pub fn sector(&self) -> usize {
        self.sector as usize
    }

    #[inline]
    pub fn in_use(&self) -> bool {
        self.in_use != 0
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }

    #[inline]
    pub fn free(&mut self) {
        self.in_use = 0;
    }
}
