#![cfg_attr(not(test), no_std)]

extern crate alloc;

/* sector-fs 的整体架构，自上而下 */

// 打开文件表：内核为进程维护的文件描述符
pub mod fd_table;

// 文件系统层：格式化、创建、打开、删除等操作的入口
mod fs;

// 打开文件层：带读写同步的文件会话
mod file;

// 同步层：以文件头扇区为键的读写闸门
mod sync;

// 路径解析
mod path;

// 目录：名字到文件头扇区的映射表
mod directory;

// 磁盘数据结构层：位图、文件头与间接索引块
pub mod layout;

mod error;

pub use self::{
    directory::{Directory, ListEntry, Walk},
    error::{FsError, Result},
    file::OpenFile,
    fs::{FileSystem, FormatOptions},
    path::resolve,
};
pub use block_dev::BlockDevice;

/// 扇区大小，也是磁盘读写的最小单位
pub const SECTOR_SIZE: usize = 128;
pub const BITS_IN_BYTE: usize = 8;

/// 位图文件的文件头所在扇区
pub const FREE_MAP_SECTOR: usize = 0;
/// 根目录文件的文件头所在扇区
pub const DIRECTORY_SECTOR: usize = 1;

/// 文件名的最大长度，不含结尾的 `\0`
pub const FILE_NAME_MAX_LEN: usize = 9;

type DataBlock = [u8; SECTOR_SIZE];
