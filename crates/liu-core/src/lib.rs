//! # liu-core
//!
//! Liu 流式视频前端核心库, 提供错误类型、比特流读取器、有理数和 PES 时间戳.
//!
//! 收集器 (liu-collator) 与帧解析器 (liu-parser) 共用本 crate 的基础设施.

pub mod bitreader;
pub mod error;
pub mod rational;
pub mod timestamp;

// 重导出常用类型
pub use bitreader::BitReader;
pub use error::{ErrorSeverity, LiuError, LiuResult};
pub use rational::Rational;
pub use timestamp::{FrameTime, PES_CLOCK_HZ};
