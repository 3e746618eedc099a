//! # Liu (流)
//!
//! 流式视频前端: 把 PES 封装的视频基本流切分为带时间戳的编码帧,
//! 再解析 VC-1 Advanced Profile 头部, 得到可直接送硬件解码的帧描述.
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use liu::{Pipeline, PipelineConfig};
//! use liu::parser::DecodeEvent;
//!
//! let data = std::fs::read("stream.pes").unwrap();
//! let mut pipeline = Pipeline::new(PipelineConfig::default(), Vec::<DecodeEvent>::new()).unwrap();
//! pipeline.run(&data).unwrap();
//! while let Some(frame) = pipeline.take_parsed() {
//!     println!("{} {:?} {:?}", frame.decode_index, frame.display_index, frame.time.pts);
//! }
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `liu-core` | 错误、比特流读取、有理数与 PES 时间戳 |
//! | `liu-collator` | 起始码扫描、PES 头解析与编码帧重组 |
//! | `liu-parser` | VC-1 头部解析、参考帧列表与显示顺序推导 |

pub mod config;
pub mod pipeline;

/// 核心类型与工具
pub use liu_core as core;

/// PES 视频收集器
pub use liu_collator as collator;

/// 视频帧解析器
pub use liu_parser as parser;

pub use config::{FrameRateConfig, PipelineConfig};
pub use pipeline::{Pipeline, PipelineStatistics, split_groups};

/// 获取 Liu 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
