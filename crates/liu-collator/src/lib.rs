//! # liu-collator
//!
//! PES 视频收集器, 将连续的 PES 字节流切分为带时间戳的编码帧.
//!
//! 收集器按起始码扫描输入数据, 剥离 PES 头并读取 PTS/DTS,
//! 把负载字节按帧聚合到一个缓冲区中, 同时记录帧内每个起始码的偏移.
//! 起始码或 PES 头跨越两次输入调用时也能正确拼接.

pub mod collator;
pub mod format;
pub mod frame;
pub mod pes;
pub mod scanner;

// 重导出常用类型
pub use collator::{Collator, CollatorState, CollatorStatistics, HeaderKind, Staging};
pub use format::{FormatConfig, FormatId};
pub use frame::{BufferAllocator, CodedFrame, CodedFrameFlags, HeapAllocator, StartCode};
pub use pes::{PesFlags, PesHeader};
pub use scanner::{IgnoreRange, ScanCursor};
