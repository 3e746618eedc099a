//! 码流格式标识与收集器配置表.
//!
//! 每种格式对应一条 [`FormatConfig`] 记录, 由 [`FormatConfig::for_format`] 统一生成.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pes::{PES_START_CODE_EXTENDED, is_video_stream_id};
use crate::scanner::IgnoreRange;

/// 默认最大编码帧尺寸
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// 默认单帧最多记录的起始码数量
pub const DEFAULT_MAX_START_CODES: usize = 256;

/// 码流格式标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatId {
    /// VC-1 高级档次, 以起始码分帧
    Vc1,
    /// MPEG-2 视频
    Mpeg2Video,
    /// MPEG-4 Part 2 视频
    Mpeg4Part2,
    /// 每个 PES 包承载一帧的 VC-1 (WMV 风格, 4 字节私有帧长)
    Vc1FramePerPacket,
}

impl FormatId {
    /// 所有已知格式标识
    pub const ALL: &[FormatId] = &[
        Self::Vc1,
        Self::Mpeg2Video,
        Self::Mpeg4Part2,
        Self::Vc1FramePerPacket,
    ];

    /// 格式名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Vc1 => "vc1",
            Self::Mpeg2Video => "mpeg2video",
            Self::Mpeg4Part2 => "mpeg4",
            Self::Vc1FramePerPacket => "vc1_frame_per_packet",
        }
    }

    /// 根据名称查找格式
    pub fn from_name(name: &str) -> Option<FormatId> {
        let lower = name.to_lowercase();
        Self::ALL.iter().find(|id| id.name() == lower).copied()
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 收集器配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatConfig {
    /// 格式标识
    pub format: FormatId,
    /// 感兴趣的 PES stream_id 掩码
    pub stream_id_mask: u8,
    /// 感兴趣的 PES stream_id 值
    pub stream_id_code: u8,
    /// 是否接受扩展 stream_id (0xFD)
    pub accept_extended_stream_id: bool,
    /// 扩展 stream_id 的子流掩码
    pub sub_stream_id_mask: u8,
    /// 扩展 stream_id 的子流值
    pub sub_stream_id_code: u8,
    /// 忽略的起始码区间
    pub ignore_codes: Option<IgnoreRange>,
    /// 终止当前帧并开始新帧的起始码
    pub block_terminate_codes: &'static [u8],
    /// 图像起始码; 非空时, 只有当前帧已包含图像起始码才会被终止
    pub frame_start_codes: &'static [u8],
    /// 序列结束码, 本帧包含它并立即输出
    pub terminal_code: Option<u8>,
    /// PES 头后附加的私有头长度
    pub extended_header_length: usize,
    /// 每个 PES 包承载一帧
    pub frame_per_packet: bool,
    /// 单帧最多记录的起始码数量
    pub max_start_codes: usize,
    /// 最大编码帧尺寸
    pub max_frame_size: usize,
    /// 各起始码需要额外收集的头部字节数
    pub presentation_lengths: &'static [(u8, usize)],
}

impl FormatConfig {
    /// 格式配置分派表
    pub fn for_format(format: FormatId) -> Self {
        let base = Self {
            format,
            stream_id_mask: 0xF0,
            stream_id_code: 0xE0,
            accept_extended_stream_id: false,
            sub_stream_id_mask: 0,
            sub_stream_id_code: 0,
            ignore_codes: None,
            block_terminate_codes: &[],
            frame_start_codes: &[],
            terminal_code: None,
            extended_header_length: 0,
            frame_per_packet: false,
            max_start_codes: DEFAULT_MAX_START_CODES,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            presentation_lengths: &[],
        };

        match format {
            FormatId::Vc1 => Self {
                // VC-1 子流 0x55..=0x5F
                accept_extended_stream_id: true,
                sub_stream_id_mask: 0x70,
                sub_stream_id_code: 0x50,
                // 序列头 / 入口点 / 帧
                block_terminate_codes: &[0x0F, 0x0E, 0x0D],
                frame_start_codes: &[0x0D],
                terminal_code: Some(0x0A),
                ..base
            },
            FormatId::Mpeg2Video => Self {
                ignore_codes: Some(IgnoreRange::new(0x02, 0xAF)),
                // 序列头 / GOP / 图像
                block_terminate_codes: &[0xB3, 0xB8, 0x00],
                frame_start_codes: &[0x00],
                terminal_code: Some(0xB7),
                max_frame_size: 2 * 1024 * 1024,
                // 图像头: temporal_reference + picture_coding_type
                presentation_lengths: &[(0x00, 2)],
                ..base
            },
            FormatId::Mpeg4Part2 => Self {
                // VOS / GOV / VOP
                block_terminate_codes: &[0xB0, 0xB3, 0xB6],
                frame_start_codes: &[0xB6],
                terminal_code: Some(0xB1),
                max_frame_size: 2 * 1024 * 1024,
                ..base
            },
            FormatId::Vc1FramePerPacket => Self {
                accept_extended_stream_id: true,
                sub_stream_id_mask: 0x70,
                sub_stream_id_code: 0x50,
                extended_header_length: 4,
                frame_per_packet: true,
                ..base
            },
        }
    }

    /// 是否接受该 PES stream_id
    pub fn accepts_stream_id(&self, stream_id: u8) -> bool {
        if stream_id == PES_START_CODE_EXTENDED {
            return self.accept_extended_stream_id;
        }
        is_video_stream_id(stream_id) && (stream_id & self.stream_id_mask) == self.stream_id_code
    }

    /// 是否接受扩展 stream_id 的子流
    pub fn accepts_sub_stream_id(&self, sub_stream_id: u8) -> bool {
        (sub_stream_id & self.sub_stream_id_mask) == self.sub_stream_id_code
    }

    /// 该起始码是否终止当前帧
    ///
    /// `frame_has_picture` 表示当前帧是否已收集到图像起始码.
    pub fn terminates_frame(&self, code: u8, frame_has_picture: bool) -> bool {
        self.block_terminate_codes.contains(&code)
            && (self.frame_start_codes.is_empty() || frame_has_picture)
    }

    /// 是否为图像起始码
    pub fn is_frame_start(&self, code: u8) -> bool {
        self.frame_start_codes.contains(&code)
    }

    /// 该起始码是否为序列结束码
    pub fn is_terminal(&self, code: u8) -> bool {
        self.terminal_code == Some(code)
    }

    /// 起始码之后需要额外收集的字节数
    pub fn required_presentation_length(&self, code: u8) -> usize {
        self.presentation_lengths
            .iter()
            .find(|(c, _)| *c == code)
            .map_or(0, |(_, len)| *len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_name() {
        assert_eq!(FormatId::from_name("VC1"), Some(FormatId::Vc1));
        assert_eq!(
            FormatId::from_name("vc1_frame_per_packet"),
            Some(FormatId::Vc1FramePerPacket)
        );
        assert_eq!(FormatId::from_name("h264"), None);
    }

    #[test]
    fn test_vc1_config() {
        let cfg = FormatConfig::for_format(FormatId::Vc1);
        assert!(cfg.accepts_stream_id(0xE0));
        assert!(cfg.accepts_stream_id(0xEF));
        assert!(cfg.accepts_stream_id(0xFD));
        assert!(!cfg.accepts_stream_id(0xC0), "音频流不应被接受");
        assert!(cfg.accepts_sub_stream_id(0x55));
        assert!(!cfg.accepts_sub_stream_id(0x71));
        assert!(cfg.terminates_frame(0x0D, true));
        assert!(cfg.terminates_frame(0x0F, true));
        assert!(!cfg.terminates_frame(0x0D, false), "帧内尚无图像时不应终止");
        assert!(!cfg.terminates_frame(0x0C, true), "第二场不终止帧");
        assert!(cfg.is_frame_start(0x0D));
        assert!(cfg.is_terminal(0x0A));
        assert_eq!(cfg.required_presentation_length(0x0D), 0);
    }

    #[test]
    fn test_mpeg2_config() {
        let cfg = FormatConfig::for_format(FormatId::Mpeg2Video);
        assert!(!cfg.accepts_stream_id(0xFD));
        assert_eq!(cfg.required_presentation_length(0x00), 2);
        assert!(cfg.ignore_codes.is_some_and(|r| r.contains(0x10)));
        assert!(!cfg.frame_per_packet);
    }

    #[test]
    fn test_frame_per_packet_config() {
        let cfg = FormatConfig::for_format(FormatId::Vc1FramePerPacket);
        assert!(cfg.frame_per_packet);
        assert_eq!(cfg.extended_header_length, 4);
        assert!(!cfg.terminates_frame(0x0D, true));
    }
}
