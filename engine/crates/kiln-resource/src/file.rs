use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::ResourceError;

/// 统一资源路径: 正斜杠，没有前导 `./`
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut path = path.as_str();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path.to_string()
}

/// 一个资源文件的完整内容
///
/// 读取在创建时一次性完成；之后只读，可以跨线程共享
pub struct ResourceFile {
    path: String,
    data: Vec<u8>,
}
// new & init
impl ResourceFile {
    pub fn new(path: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            data,
        }
    }

    /// 从磁盘读取，`path` 是资源路径，`full_path` 是实际位置
    pub fn read(path: &str, full_path: &Path) -> Result<Self, ResourceError> {
        let _span = tracy_client::span!("ResourceFile::read");
        let data = std::fs::read(full_path).map_err(|source| ResourceError::Io {
            path: path.to_string(),
            source,
        })?;
        Ok(Self::new(path, data))
    }
}
// getters
impl ResourceFile {
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 文件为空时返回 None
    #[inline]
    pub fn data(&self) -> Option<&[u8]> {
        if self.data.is_empty() { None } else { Some(&self.data) }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.path).extension().and_then(OsStr::to_str)
    }
}

/// 打开的 zip 归档，所有条目在打开时读入内存
pub struct ResourceArchive {
    path: String,
    files: IndexMap<String, Arc<ResourceFile>>,
}
// new & init
impl ResourceArchive {
    pub fn open(path: &str, full_path: &Path) -> Result<Self, ResourceError> {
        let file = File::open(full_path).map_err(|source| ResourceError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_reader(path, BufReader::new(file))
    }

    pub fn from_reader<R: Read + Seek>(path: &str, reader: R) -> Result<Self, ResourceError> {
        let _span = tracy_client::span!("ResourceArchive::from_reader");
        let archive_error = |source| ResourceError::Archive {
            path: path.to_string(),
            source,
        };

        let mut archive = zip::ZipArchive::new(reader).map_err(archive_error)?;
        let mut files = IndexMap::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index).map_err(archive_error)?;
            if entry.is_dir() {
                continue;
            }

            let name = normalize_path(entry.name());
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data).map_err(|source| ResourceError::Io {
                path: format!("{path}/{name}"),
                source,
            })?;
            files.insert(name.clone(), Arc::new(ResourceFile::new(name, data)));
        }

        Ok(Self {
            path: path.to_string(),
            files,
        })
    }
}
// getters
impl ResourceArchive {
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    pub fn file(&self, path: &str) -> Option<Arc<ResourceFile>> {
        self.files.get(path).cloned()
    }

    pub fn file_paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}
