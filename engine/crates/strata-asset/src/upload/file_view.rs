use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};

/// 以 mmap 方式打开的只读文件
///
/// 文件内容整体交给外部的解码器，这里不做任何格式解析
pub struct FileView {
    path: PathBuf,
    mmap: memmap2::Mmap,
}

impl FileView {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("打开文件失败: {:?}", path))?;
        let len = file.metadata().with_context(|| format!("读取文件信息失败: {:?}", path))?.len();
        if len == 0 {
            bail!("文件为空: {:?}", path);
        }

        // 文件在映射期间不应被其他进程修改
        let mmap = unsafe { memmap2::Mmap::map(&file) }.with_context(|| format!("mmap 失败: {:?}", path))?;
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Deref for FileView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.mmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::temp_path;

    #[test]
    fn test_open() {
        let path = temp_path("bytes.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let view = FileView::open(&path).unwrap();
        assert_eq!(&*view, &[1, 2, 3]);
        assert_eq!(view.path(), path.as_path());
    }

    #[test]
    fn test_missing_and_empty() {
        assert!(FileView::open(temp_path("missing.bin")).is_err());

        let empty = temp_path("empty.bin");
        std::fs::write(&empty, []).unwrap();
        assert!(FileView::open(&empty).is_err());
    }
}
