/// 文件系统对调用者报告的错误。
///
/// 返回这些错误的操作不会在磁盘上留下任何修改；
/// 内部一致性被破坏时直接 panic，不经由此类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("name already exists in the directory")]
    AlreadyExists,
    /// 空闲扇区不足，或文件头的索引表已满
    #[error("no space left on device")]
    NoSpace,
    #[error("file is still open")]
    Busy,
    #[error("is a directory")]
    IsADirectory,
    #[error("not a directory")]
    NotADirectory,
    #[error("invalid file name")]
    InvalidName,
    #[error("invalid disk geometry")]
    InvalidGeometry,
}

pub type Result<T> = core::result::Result<T, FsError>;
