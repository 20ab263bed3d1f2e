use std::path::PathBuf;

use thiserror::Error;

/// 聚类流程中可能出现的错误
#[derive(Debug, Error)]
pub enum Error {
    /// 参数或输入不合法，例如目录不存在、合并方式未知、数组长度不一致
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 文件系统操作失败，不会重试，也不会回滚已完成的部分
    #[error("文件操作失败 {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    OpenCv(#[from] opencv::Error),

    /// 图片无法处理：解码失败、通道数不支持、尺寸过小等
    #[error("图片错误: {0}")]
    Image(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Npy(#[from] ndarray_npy::WriteNpyError),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// 给 `std::io::Result` 附加出错路径
pub trait IoContext<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}
