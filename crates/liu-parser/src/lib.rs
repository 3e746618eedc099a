//! # liu-parser
//!
//! Liu 视频帧解析器.
//!
//! 读取收集器输出的编码帧及其起始码列表, 解析 VC-1 Advanced Profile 的
//! 序列头、入口点头、图像头和条带头, 推导解码所需的图像属性
//! (尺寸、帧率、宽高比、场/帧结构), 并维护参考帧列表.
//! 正向播放时推导显示序号与缺失的 PTS, 反向播放时按栈重建显示顺序.

pub mod event;
pub mod framework;
pub mod params;
pub mod reference;
pub mod vc1;

// 重导出常用类型
pub use event::{DecodeEvent, DecodeSink};
pub use framework::{
    DisplayTimeline, FrameParserCore, FrameworkStatistics, PanScanWindow, ParsedFrame,
    ParsedVideoParameters, PictureStructure, PlayDirection, SliceType, VideoContent,
};
pub use params::ParameterStore;
pub use reference::ReferenceFrameList;
pub use vc1::{
    Vc1FrameParameters, Vc1FrameParser, Vc1ParserConfig, Vc1Picture, Vc1StreamParameters,
};
