//! 统一错误类型定义.
//!
//! 所有 Liu crate 共用的错误类型, 并按恢复范围分级.

use thiserror::Error;

/// 错误的恢复范围
///
/// 决定调用方在遇到错误后应丢弃多少状态.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSeverity {
    /// 仅丢弃当前帧, 从下一个帧边界继续
    RecoverableFrame,
    /// 忽略当前头部, 序列继续
    RecoverableSequence,
    /// 当前流不可播放, 直到出现新的有效序列头
    FatalStream,
    /// 组件本身无法继续工作
    FatalComponent,
}

/// Liu 统一错误类型
#[derive(Debug, Error)]
pub enum LiuError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 无效数据 (损坏的码流等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// PES 头部格式错误
    #[error("PES 头部格式错误: {0}")]
    MalformedPesHeader(String),

    /// 声明的私有帧长大于实际收集的数据
    #[error("丢包: 声明长度 {expected}, 实际 {actual}")]
    LostPacket { expected: usize, actual: usize },

    /// 帧超过最大编码帧尺寸
    #[error("帧过大: {size} 字节, 上限 {limit} 字节")]
    FrameTooLarge { size: usize, limit: usize },

    /// 参考帧不足
    #[error("参考帧不足: 需要 {needed}, 可用 {available}")]
    InsufficientReferences { needed: usize, available: usize },

    /// 缺少流参数 (尚未解析序列头)
    #[error("缺少流参数")]
    NoStreamParameters,

    /// 缺少帧参数 (尚未解析图像头)
    #[error("缺少帧参数")]
    NoFrameParameters,

    /// 头部语法错误
    #[error("头部语法错误: {0}")]
    HeaderSyntax(String),

    /// 头部出现顺序错误
    #[error("头部顺序错误: {0}")]
    HeaderSequence(String),

    /// 已到达数据末尾
    #[error("已到达数据末尾")]
    Eof,

    /// 未处理的头部
    #[error("未处理的头部: 0x{0:02X}")]
    UnhandledHeader(u8),

    /// 不支持的操作
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 码流不可播放
    #[error("码流不可播放: {0}")]
    Unplayable(String),

    /// 缓冲区分配失败
    #[error("缓冲区分配失败: {0}")]
    BufferAllocation(String),

    /// 组件状态不允许该操作
    #[error("无效状态: {0}")]
    InvalidState(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

impl LiuError {
    /// 错误的恢复范围
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::InvalidData(_)
            | Self::MalformedPesHeader(_)
            | Self::LostPacket { .. }
            | Self::FrameTooLarge { .. }
            | Self::InsufficientReferences { .. }
            | Self::NoStreamParameters
            | Self::NoFrameParameters
            | Self::HeaderSyntax(_)
            | Self::HeaderSequence(_)
            | Self::Eof => ErrorSeverity::RecoverableFrame,
            Self::UnhandledHeader(_) | Self::Unsupported(_) => ErrorSeverity::RecoverableSequence,
            Self::Unplayable(_) => ErrorSeverity::FatalStream,
            Self::InvalidArgument(_)
            | Self::BufferAllocation(_)
            | Self::InvalidState(_)
            | Self::Io(_)
            | Self::Internal(_) => ErrorSeverity::FatalComponent,
        }
    }

    /// 是否只影响当前帧或当前头部
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.severity(),
            ErrorSeverity::RecoverableFrame | ErrorSeverity::RecoverableSequence
        )
    }
}

/// Liu 统一 Result 类型
pub type LiuResult<T> = Result<T, LiuError>;
