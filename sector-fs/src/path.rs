use crate::{Directory, FsError, Result};

/// 解析以 `/` 分隔的相对路径。
///
/// 从 `working_dir` 出发逐级进入目录，返回最后一级目录的文件头扇区与叶子名。
/// `fetch` 按文件头扇区读出目录。
pub fn resolve<F>(path: &str, working_dir: usize, mut fetch: F) -> Result<(usize, &str)>
where
    F: FnMut(usize) -> Directory,
{
    let mut sector = working_dir;
    let mut rest = path;
    while let Some((component, remainder)) = rest.split_once('/') {
        let directory = fetch(sector);
        let Some(entry) = directory.find_entry(component) else {
            log::debug!("resolve {path:?}: {component:?} not found");
            return Err(FsError::NotFound);
        };
        if !entry.is_dir() {
            log::debug!("resolve {path:?}: {component:?} is not a directory");
            return Err(FsError::NotADirectory);
        }

        sector = entry.sector();
        rest = remainder;
    }

    Ok((sector, rest))
}
