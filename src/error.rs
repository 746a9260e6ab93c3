//! 搜索错误分类

use thiserror::Error;

/// 配置错误与引擎级致命错误
///
/// 单个设备的构建/调度失败不会出现在这里，它们在设备循环边界内被记录并隔离。
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("no usable match target in {0}")]
    EmptyPatternSet(String),

    #[error("prefix count must be in 0..=10, got {0}")]
    PrefixCountOutOfRange(usize),

    #[error("suffix count must be in 0..=10, got {0}")]
    SuffixCountOutOfRange(usize),

    #[error("either a matching target or a generate count must be specified")]
    MissingTarget,

    #[error("cannot use matching and generate at the same time")]
    ConflictingTarget,

    #[error("generate count must be in 1..={max}, got {count}")]
    GenerateCountOutOfRange { count: u64, max: u64 },

    #[error("invalid batch sizing: {0}")]
    InvalidSizing(String),

    #[error("no usable compute device")]
    NoDevices,

    #[error("all compute devices failed")]
    AllDevicesFailed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SearchError>;
