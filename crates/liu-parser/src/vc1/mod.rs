//! VC-1 Advanced Profile 帧解析.
//!
//! 流参数 ([`Vc1StreamParameters`]) 每个序列头一份, 以 `Arc` 与已提交的帧共享;
//! 帧参数 ([`Vc1FrameParameters`]) 每个图像或场一份, 提交时移入解析结果.

pub mod headers;
mod parser;
pub mod tables;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use liu_core::Rational;

use crate::framework::PlayDirection;

pub use headers::{
    AspectRatioCode, ColorDescription, DisplayExtension, EntryPointHeader, FrameRateCode,
    IntensityCompensation, LumaCompensation, MetadataCodingTools, PictureHeader, RangeMap,
    SequenceHeader, SequenceLayerMetadata, SliceHeader,
};
pub use parser::Vc1FrameParser;
pub use tables::{FrameCodingMode, IntensityField, MatrixCoefficients, MvMode, PictureType};

/// VC-1 起始码标识
///
/// 0x08 与 0x80 不是标准起始码, 由 WMV 封装层插入.
pub mod start_code {
    /// 默认帧率: 其后为 32 位分母与 32 位分子
    pub const DEFAULT_FRAME_RATE: u8 = 0x08;
    /// 序列结束
    pub const END_OF_SEQUENCE: u8 = 0x0A;
    /// 条带
    pub const SLICE: u8 = 0x0B;
    /// 场 (场图像对的第二场)
    pub const FIELD: u8 = 0x0C;
    /// 帧 (或场图像对的第一场)
    pub const FRAME: u8 = 0x0D;
    /// 入口点
    pub const ENTRY_POINT: u8 = 0x0E;
    /// 序列头
    pub const SEQUENCE_HEADER: u8 = 0x0F;
    /// 用户数据 (条带/场/帧/入口点/序列级)
    pub const USER_DATA: std::ops::RangeInclusive<u8> = 0x1B..=0x1F;
    /// 序列层元数据
    pub const SEQUENCE_LAYER_METADATA: u8 = 0x80;
}

/// VC-1 解析器配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vc1ParserConfig {
    /// 序列头未给出帧率且此前没有记录时使用的帧率
    pub default_frame_rate: Rational,
    /// 初始播放方向
    pub direction: PlayDirection,
}

impl Default for Vc1ParserConfig {
    fn default() -> Self {
        Self {
            default_frame_rate: Rational::FRAME_RATE_23_976,
            direction: PlayDirection::Forward,
        }
    }
}

/// 流参数: 序列头、最近的入口点头与保存的范围映射
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vc1StreamParameters {
    pub sequence: SequenceHeader,
    /// 新的序列头到来时清空
    pub entry_point: Option<EntryPointHeader>,
    /// 封闭入口点保存的范围映射, 跨序列头保留
    pub saved_range_map: Option<RangeMap>,
}

/// 帧参数: 一个图像或场的图像头与条带列表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vc1FrameParameters {
    pub picture: Option<PictureHeader>,
    /// 图像起始码在编码帧中的偏移
    pub picture_offset: usize,
    pub slices: Vec<SliceHeader>,
}

/// 随解析结果输出的 VC-1 参数
#[derive(Debug, Clone)]
pub struct Vc1Picture {
    /// 解码该图像时生效的流参数
    pub stream: Arc<Vc1StreamParameters>,
    pub frame: Vc1FrameParameters,
    /// 色彩转换矩阵
    pub matrix_coefficients: MatrixCoefficients,
}

impl Vc1Picture {
    /// 图像头
    pub fn picture(&self) -> Option<&PictureHeader> {
        self.frame.picture.as_ref()
    }
}
