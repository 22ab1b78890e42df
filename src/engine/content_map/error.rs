use thiserror::Error;

/// 内容映射错误类型
#[derive(Error, Debug)]
pub enum ContentMapError {
    #[error("溢出文件读写失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("溢出值编解码失败: {0}")]
    Codec(String),
}

/// Result 类型别名
pub type ContentMapResult<T> = Result<T, ContentMapError>;
