use thiserror::Error;

use crate::resource::ResourceKind;

/// 管理器层面的错误
///
/// 单个资源的内容错误不走这里，而是记录在 [`crate::status::LoadStatus`] 里
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource file ({0}) was found neither in the content root nor in any archive")]
    FileNotFound(String),
    #[error("failed to read resource file ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open archive ({path}): {source}")]
    Archive {
        path: String,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("resource ({key}) is registered as {existing}, but was requested as {requested}")]
    KindMismatch {
        key: String,
        existing: ResourceKind,
        requested: ResourceKind,
    },
    #[error("failed to spawn the resource thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}
