//! VC-1 Advanced Profile 头部解析, 以及 WMV 封装的序列层元数据.
//!
//! 每种头部对应一个拥有所有权的记录, 由 [`BitReader`] 按位解析.
//! 调用方负责去除防竞争字节并跳过 32 位起始码.

use log::{debug, warn};

use liu_core::{BitReader, LiuError, LiuResult};

use crate::framework::PanScanWindow;

use super::tables::{
    ADVANCED_PROFILE, FIELD_PICTURE_FIRST, FIELD_PICTURE_SECOND, FrameCodingMode, IntensityField,
    MAX_CODED_DIMENSION, MAX_LEVEL, MvMode, PQUANT, PictureType, bfraction,
    frame_rate_code_from_duration, mv_mode, mv_mode2,
};

/// 显示扩展中的宽高比
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AspectRatioCode {
    /// 码表项 (0..=14)
    Table(u32),
    /// 显式给出的水平/垂直比例 (码 15)
    Explicit { horizontal: u32, vertical: u32 },
}

/// 显示扩展中的帧率
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameRateCode {
    /// FRAMERATENR / FRAMERATEDR, 超出范围的值已置 0
    Table { nr: u32, dr: u32 },
    /// FRAMERATEEXP
    Exponent(u32),
}

/// 色彩描述
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorDescription {
    pub color_primaries: u32,
    pub transfer_characteristics: u32,
    pub matrix_coefficients: u32,
}

/// 序列头显示扩展
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayExtension {
    /// 显示宽度
    pub display_width: u32,
    /// 显示高度
    pub display_height: u32,
    pub aspect_ratio: Option<AspectRatioCode>,
    pub frame_rate: Option<FrameRateCode>,
    pub color: Option<ColorDescription>,
    /// HRD 漏桶数量, 影响入口点头的长度
    pub hrd_num_leaky_buckets: Option<u32>,
}

impl DisplayExtension {
    fn parse(br: &mut BitReader<'_>) -> LiuResult<Self> {
        let display_width = br.read_bits(14)? + 1;
        let display_height = br.read_bits(14)? + 1;

        let aspect_ratio = if br.read_flag()? {
            let code = br.read_bits(4)?;
            if code == 15 {
                let horizontal = br.read_bits(8)?;
                let vertical = br.read_bits(8)?;
                Some(AspectRatioCode::Explicit {
                    horizontal,
                    vertical,
                })
            } else {
                Some(AspectRatioCode::Table(code))
            }
        } else {
            None
        };

        let frame_rate = if br.read_flag()? {
            if br.read_flag()? {
                Some(FrameRateCode::Exponent(br.read_bits(16)?))
            } else {
                let mut nr = br.read_bits(8)?;
                let mut dr = br.read_bits(4)?;
                if nr > 7 {
                    nr = 0;
                }
                if dr > 2 {
                    dr = 0;
                }
                Some(FrameRateCode::Table { nr, dr })
            }
        } else {
            None
        };

        let color = if br.read_flag()? {
            Some(ColorDescription {
                color_primaries: br.read_bits(8)?,
                transfer_characteristics: br.read_bits(8)?,
                matrix_coefficients: br.read_bits(8)?,
            })
        } else {
            None
        };

        let hrd_num_leaky_buckets = if br.read_flag()? {
            Some(br.read_bits(5)?)
        } else {
            None
        };

        Ok(Self {
            display_width,
            display_height,
            aspect_ratio,
            frame_rate,
            color,
            hrd_num_leaky_buckets,
        })
    }
}

/// 序列头
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceHeader {
    pub profile: u32,
    pub level: u32,
    /// 色度格式
    pub colordiff_format: u32,
    pub frmrtq_postproc: u32,
    pub bitrtq_postproc: u32,
    pub postprocflag: bool,
    /// 最大编码宽度
    pub max_coded_width: u32,
    /// 最大编码高度
    pub max_coded_height: u32,
    pub pulldown: bool,
    pub interlace: bool,
    pub tfcntrflag: bool,
    pub finterpflag: bool,
    /// 逐行分段帧
    pub psf: bool,
    pub display_ext: Option<DisplayExtension>,
}

impl SequenceHeader {
    /// 解析序列头, 只接受 Advanced Profile
    pub fn parse(br: &mut BitReader<'_>) -> LiuResult<Self> {
        let profile = br.peek_bits(2)?;
        if profile != ADVANCED_PROFILE {
            return Err(LiuError::Unsupported(format!(
                "VC-1 序列头 profile={}, 仅支持 Advanced Profile",
                profile
            )));
        }
        br.skip_bits(2)?;

        let level = br.read_bits(3)?;
        let colordiff_format = br.read_bits(2)?;
        let frmrtq_postproc = br.read_bits(3)?;
        let bitrtq_postproc = br.read_bits(5)?;
        let postprocflag = br.read_flag()?;
        let max_coded_width = br.read_bits(12)? * 2 + 2;
        let max_coded_height = br.read_bits(12)? * 2 + 2;
        let pulldown = br.read_flag()?;
        let interlace = br.read_flag()?;
        let tfcntrflag = br.read_flag()?;
        let finterpflag = br.read_flag()?;
        br.skip_bits(1)?; // reserved
        let psf = br.read_flag()?;
        let display_ext = if br.read_flag()? {
            Some(DisplayExtension::parse(br)?)
        } else {
            None
        };

        let header = Self {
            profile,
            level,
            colordiff_format,
            frmrtq_postproc,
            bitrtq_postproc,
            postprocflag,
            max_coded_width,
            max_coded_height,
            pulldown,
            interlace,
            tfcntrflag,
            finterpflag,
            psf,
            display_ext,
        };
        debug!(
            "VC-1 序列头: level={}, 最大尺寸={}x{}, interlace={}, pulldown={}, psf={}",
            header.level,
            header.max_coded_width,
            header.max_coded_height,
            header.interlace,
            header.pulldown,
            header.psf
        );
        Ok(header)
    }

    /// HRD 漏桶数量, 未给出 HRD 参数时为 0
    pub fn hrd_num_leaky_buckets(&self) -> u32 {
        self.display_ext
            .as_ref()
            .and_then(|ext| ext.hrd_num_leaky_buckets)
            .unwrap_or(0)
    }

    /// 目标显示是否为逐行 (`interlace == 0` 或 `psf == 1`)
    pub fn progressive_display(&self) -> bool {
        !self.interlace || self.psf
    }

    /// 检查码流是否可播放, 不可播放时返回原因
    pub fn check_playable(&self) -> Result<(), String> {
        if self.level > MAX_LEVEL {
            return Err(format!("level={} 超出 Advanced Profile 范围", self.level));
        }
        if self.max_coded_width > MAX_CODED_DIMENSION || self.max_coded_height > MAX_CODED_DIMENSION
        {
            return Err(format!(
                "编码尺寸 {}x{} 超出 {}x{}",
                self.max_coded_width, self.max_coded_height, MAX_CODED_DIMENSION, MAX_CODED_DIMENSION
            ));
        }
        Ok(())
    }
}

/// 序列层元数据中 Simple/Main Profile 的编码工具 (STRUCT_C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetadataCodingTools {
    pub frmrtq_postproc: u32,
    pub bitrtq_postproc: u32,
    pub loopfilter: bool,
    pub multires: bool,
    pub fastuvmc: bool,
    pub extended_mv: bool,
    pub dquant: u32,
    pub vstransform: bool,
    pub overlap: bool,
    pub syncmarker: bool,
    pub rangered: bool,
    pub maxbframes: u32,
    pub quantizer: u32,
    pub finterpflag: bool,
}

/// 序列层元数据
///
/// WMV 封装把序列信息放在一个固定布局的结构中 (帧数、STRUCT_C、STRUCT_A、
/// STRUCT_B), 多字节字段为小端. 它同时提供序列头与入口点头的内容.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceLayerMetadata {
    pub num_frames: u32,
    pub profile: u32,
    /// Advanced Profile 时为 `None`, 编码工具由码流内的头部给出
    pub coding_tools: Option<MetadataCodingTools>,
    pub max_coded_width: u32,
    pub max_coded_height: u32,
    pub level: u32,
    pub cbr: bool,
    pub hrd_buffer: u32,
    pub hrd_rate: u32,
    /// 帧时长, 100 ns 单位; 0 与 0xFFFFFFFF 表示未给出
    pub frame_duration: u32,
}

impl SequenceLayerMetadata {
    /// 标志字节, 紧跟在 24 位帧数之后
    const FLAG_BYTE: u32 = 0xC5;
    /// STRUCT_C 之前的标志字
    const STRUCT_C_FLAG: u32 = 0x04;
    /// STRUCT_B 之前的标志字
    const STRUCT_B_FLAG: u32 = 0x0C;

    /// 解析序列层元数据, 标志值或保留位不符时返回 [`LiuError::HeaderSyntax`]
    pub fn parse(br: &mut BitReader<'_>) -> LiuResult<Self> {
        let num_frames = br.read_le(3)?;
        let flag = br.read_le(1)?;
        if flag != Self::FLAG_BYTE {
            return Err(LiuError::HeaderSyntax(format!(
                "序列层元数据标志字节应为 0xC5, 实际 {:#04x}",
                flag
            )));
        }
        let flag = br.read_le(4)?;
        if flag != Self::STRUCT_C_FLAG {
            return Err(LiuError::HeaderSyntax(format!(
                "序列层元数据标志字应为 0x00000004, 实际 {:#010x}",
                flag
            )));
        }

        let profile = br.read_bits(2)?;
        br.skip_bits(2)?;
        let coding_tools = if profile == ADVANCED_PROFILE {
            br.skip_bits(28)?;
            None
        } else {
            Some(Self::parse_coding_tools(br)?)
        };

        // STRUCT_A: 先高后宽
        let max_coded_height = br.read_le(4)?;
        let max_coded_width = br.read_le(4)?;
        let flag = br.read_le(4)?;
        if flag != Self::STRUCT_B_FLAG {
            return Err(LiuError::HeaderSyntax(format!(
                "序列层元数据标志字应为 0x0000000c, 实际 {:#010x}",
                flag
            )));
        }

        let level = br.read_bits(3)?;
        let cbr = br.read_flag()?;
        br.skip_bits(4)?;
        let hrd_buffer = br.read_le(3)?;
        let hrd_rate = br.read_le(4)?;
        let frame_duration = br.read_le(4)?;

        let metadata = Self {
            num_frames,
            profile,
            coding_tools,
            max_coded_width,
            max_coded_height,
            level,
            cbr,
            hrd_buffer,
            hrd_rate,
            frame_duration,
        };
        debug!(
            "VC-1 序列层元数据: profile={}, level={}, {}x{}, 帧时长={}",
            profile, level, max_coded_width, max_coded_height, frame_duration
        );
        Ok(metadata)
    }

    fn parse_coding_tools(br: &mut BitReader<'_>) -> LiuResult<MetadataCodingTools> {
        let frmrtq_postproc = br.read_bits(3)?;
        let bitrtq_postproc = br.read_bits(5)?;
        let loopfilter = br.read_flag()?;
        let reserved3 = br.read_bit()?;
        let multires = br.read_flag()?;
        let reserved4 = br.read_bit()?;
        let fastuvmc = br.read_flag()?;
        let extended_mv = br.read_flag()?;
        let dquant = br.read_bits(2)?;
        let vstransform = br.read_flag()?;
        let reserved5 = br.read_bit()?;
        let overlap = br.read_flag()?;
        let syncmarker = br.read_flag()?;
        let rangered = br.read_flag()?;
        let maxbframes = br.read_bits(3)?;
        let quantizer = br.read_bits(2)?;
        let finterpflag = br.read_flag()?;
        let reserved6 = br.read_bit()?;
        if (reserved3, reserved4, reserved5, reserved6) != (0, 1, 0, 1) {
            return Err(LiuError::HeaderSyntax(
                "序列层元数据 STRUCT_C 保留位错误".into(),
            ));
        }
        Ok(MetadataCodingTools {
            frmrtq_postproc,
            bitrtq_postproc,
            loopfilter,
            multires,
            fastuvmc,
            extended_mv,
            dquant,
            vstransform,
            overlap,
            syncmarker,
            rangered,
            maxbframes,
            quantizer,
            finterpflag,
        })
    }

    /// 由帧时长得到帧率
    ///
    /// 与常见帧时长相差 1 微秒以内时使用对应的 FRAMERATENR / FRAMERATEDR;
    /// 否则换算为 FRAMERATEEXP: 小于 1000 的值按每秒帧数处理, 其余按帧时长处理.
    pub fn frame_rate(&self) -> Option<FrameRateCode> {
        let duration = self.frame_duration;
        if duration == 0 || duration == u32::MAX {
            return None;
        }
        if let Some((nr, dr)) = frame_rate_code_from_duration(duration) {
            return Some(FrameRateCode::Table { nr, dr });
        }
        let exp = if duration < 1000 {
            duration * 32 - 1
        } else {
            (320_000_000 / duration).saturating_sub(1)
        };
        Some(FrameRateCode::Exponent(exp))
    }

    /// 对应的序列头
    ///
    /// 元数据没有显示扩展; 给出帧率时生成只含帧率的显示扩展,
    /// 显示尺寸等于编码尺寸.
    pub fn sequence_header(&self) -> SequenceHeader {
        let tools = self.coding_tools.unwrap_or_default();
        let display_ext = self.frame_rate().map(|rate| DisplayExtension {
            display_width: self.max_coded_width,
            display_height: self.max_coded_height,
            aspect_ratio: None,
            frame_rate: Some(rate),
            color: None,
            hrd_num_leaky_buckets: None,
        });
        SequenceHeader {
            profile: self.profile,
            level: self.level,
            colordiff_format: 1,
            frmrtq_postproc: tools.frmrtq_postproc,
            bitrtq_postproc: tools.bitrtq_postproc,
            postprocflag: false,
            max_coded_width: self.max_coded_width,
            max_coded_height: self.max_coded_height,
            pulldown: false,
            interlace: false,
            tfcntrflag: false,
            finterpflag: tools.finterpflag,
            psf: false,
            display_ext,
        }
    }

    /// 对应的入口点头 (封闭, 无范围映射)
    pub fn entry_point_header(&self) -> EntryPointHeader {
        let tools = self.coding_tools.unwrap_or_default();
        EntryPointHeader {
            broken_link: false,
            closed_entry: true,
            panscan_flag: false,
            refdist_flag: false,
            loopfilter: tools.loopfilter,
            fastuvmc: tools.fastuvmc,
            extended_mv: tools.extended_mv,
            dquant: tools.dquant,
            vstransform: tools.vstransform,
            overlap: tools.overlap,
            quantizer: tools.quantizer,
            coded_size: None,
            extended_dmv: false,
            range_map: RangeMap::default(),
        }
    }
}

/// 亮度/色度范围映射
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RangeMap {
    /// RANGE_MAPY, 未给出时为 `None`
    pub luma: Option<u32>,
    /// RANGE_MAPUV, 未给出时为 `None`
    pub chroma: Option<u32>,
}

/// 入口点头
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointHeader {
    pub broken_link: bool,
    pub closed_entry: bool,
    pub panscan_flag: bool,
    pub refdist_flag: bool,
    pub loopfilter: bool,
    pub fastuvmc: bool,
    pub extended_mv: bool,
    pub dquant: u32,
    pub vstransform: bool,
    pub overlap: bool,
    pub quantizer: u32,
    /// 编码尺寸, 已限制在序列最大尺寸内
    pub coded_size: Option<(u32, u32)>,
    pub extended_dmv: bool,
    /// 生效的范围映射 (开放入口点继承保存的映射)
    pub range_map: RangeMap,
}

impl EntryPointHeader {
    /// 解析入口点头
    ///
    /// `saved_range_map` 为此前保存的范围映射: 开放入口点
    /// (`closed_entry == 0`) 继承已保存的映射, 否则保存本次映射.
    pub fn parse(
        br: &mut BitReader<'_>,
        sequence: &SequenceHeader,
        saved_range_map: &mut Option<RangeMap>,
    ) -> LiuResult<Self> {
        let broken_link = br.read_flag()?;
        let closed_entry = br.read_flag()?;
        let panscan_flag = br.read_flag()?;
        let refdist_flag = br.read_flag()?;
        let loopfilter = br.read_flag()?;
        let fastuvmc = br.read_flag()?;
        let extended_mv = br.read_flag()?;
        let dquant = br.read_bits(2)?;
        let vstransform = br.read_flag()?;
        let overlap = br.read_flag()?;
        let quantizer = br.read_bits(2)?;

        // HRD_FULL, 每个漏桶一字节
        for _ in 0..sequence.hrd_num_leaky_buckets() {
            br.skip_bits(8)?;
        }

        let coded_size = if br.read_flag()? {
            let mut width = br.read_bits(12)? * 2 + 2;
            let mut height = br.read_bits(12)? * 2 + 2;
            if width > sequence.max_coded_width {
                warn!(
                    "入口点编码宽度 {} 超过序列最大值 {}, 截断",
                    width, sequence.max_coded_width
                );
                width = sequence.max_coded_width;
            }
            if height > sequence.max_coded_height {
                warn!(
                    "入口点编码高度 {} 超过序列最大值 {}, 截断",
                    height, sequence.max_coded_height
                );
                height = sequence.max_coded_height;
            }
            Some((width, height))
        } else {
            None
        };

        let extended_dmv = extended_mv && br.read_flag()?;

        let mut range_map = RangeMap::default();
        if br.read_flag()? {
            range_map.luma = Some(br.read_bits(3)?);
        }
        if br.read_flag()? {
            range_map.chroma = Some(br.read_bits(3)?);
        }
        let inherited = if closed_entry { None } else { *saved_range_map };
        match inherited {
            Some(saved) => range_map = saved,
            None => *saved_range_map = Some(range_map),
        }

        debug!(
            "VC-1 入口点: closed={}, broken_link={}, panscan={}, coded_size={:?}, range_map={:?}",
            closed_entry, broken_link, panscan_flag, coded_size, range_map
        );
        Ok(Self {
            broken_link,
            closed_entry,
            panscan_flag,
            refdist_flag,
            loopfilter,
            fastuvmc,
            extended_mv,
            dquant,
            vstransform,
            overlap,
            quantizer,
            coded_size,
            extended_dmv,
            range_map,
        })
    }
}

/// 一组亮度补偿参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LumaCompensation {
    /// LUMSCALE
    pub scale: u32,
    /// LUMSHIFT
    pub shift: u32,
}

/// 亮度补偿
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntensityCompensation {
    pub field: IntensityField,
    pub top: Option<LumaCompensation>,
    pub bottom: Option<LumaCompensation>,
}

impl IntensityCompensation {
    /// 两场使用同一组参数
    fn both(luma: LumaCompensation) -> Self {
        Self {
            field: IntensityField::Both,
            top: Some(luma),
            bottom: Some(luma),
        }
    }
}

fn read_luma(br: &mut BitReader<'_>) -> LiuResult<LumaCompensation> {
    let scale = br.read_bits(6)?;
    let shift = br.read_bits(6)?;
    Ok(LumaCompensation { scale, shift })
}

/// 图像头 (帧或场)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureHeader {
    pub fcm: FrameCodingMode,
    pub ptype: PictureType,
    /// 场图像对的 FPTYPE
    pub fptype: u32,
    /// 是否为场图像对的第一场 (帧图像总为 true)
    pub first_field: bool,
    pub tfcntr: u32,
    pub rptfrm: u32,
    pub tff: bool,
    pub rff: bool,
    pub pan_scan: Vec<PanScanWindow>,
    pub rndctrl: bool,
    pub uvsamp: bool,
    pub interpfrm: bool,
    pub refdist: u32,
    pub backward_refdist: u32,
    pub bfraction_numerator: u32,
    pub bfraction_denominator: u32,
    /// BFRACTION 为保留码: 分母记为 8, 分子保持 0, 不是有效分数
    pub bfraction_reserved: bool,
    pub pqindex: u32,
    pub halfqp: bool,
    pub pquant: u32,
    /// 非均匀量化
    pub pquantizer: bool,
    pub postproc: u32,
    pub mvrange: u32,
    pub dmvrange: u32,
    pub mvmode: MvMode,
    pub mvmode2: MvMode,
    pub fourmvswitch: bool,
    pub numref: bool,
    pub reffield: bool,
    pub intensity: Option<IntensityCompensation>,
}

impl Default for PictureHeader {
    fn default() -> Self {
        Self {
            fcm: FrameCodingMode::Progressive,
            ptype: PictureType::I,
            fptype: 0,
            first_field: true,
            tfcntr: 0,
            rptfrm: 0,
            tff: true,
            rff: false,
            pan_scan: Vec::new(),
            rndctrl: false,
            uvsamp: false,
            interpfrm: false,
            refdist: 0,
            backward_refdist: 0,
            bfraction_numerator: 0,
            bfraction_denominator: 1,
            bfraction_reserved: false,
            pqindex: 0,
            halfqp: false,
            pquant: 0,
            pquantizer: false,
            postproc: 0,
            mvrange: 0,
            dmvrange: 0,
            mvmode: MvMode::default(),
            mvmode2: MvMode::default(),
            fourmvswitch: false,
            numref: false,
            reffield: false,
            intensity: None,
        }
    }
}

impl PictureHeader {
    /// 解析帧起始码 (0x0D) 后的图像头: 逐行帧、隔行帧或场图像对的第一场
    ///
    /// `backward_refdist` 保存最近一次 I/P 场对给出的 REFDIST, 供后续 B 场使用.
    pub fn parse_first(
        br: &mut BitReader<'_>,
        sequence: &SequenceHeader,
        entry: &EntryPointHeader,
        backward_refdist: &mut u32,
    ) -> LiuResult<Self> {
        let mut header = Self::default();

        if sequence.interlace {
            let fcm = br.read_vc1_vlc(2, 0)?;
            header.fcm = match (fcm.code, fcm.len) {
                (0, 1) => FrameCodingMode::Progressive,
                (0b10, 2) => FrameCodingMode::FrameInterlace,
                (0b11, 2) => FrameCodingMode::FieldInterlace,
                _ => {
                    return Err(LiuError::HeaderSyntax(format!(
                        "FCM 码字非法: code={:#b}, len={}",
                        fcm.code, fcm.len
                    )));
                }
            };
        }

        if header.fcm == FrameCodingMode::FieldInterlace {
            header.fptype = br.read_bits(3)?;
            header.ptype = FIELD_PICTURE_FIRST[header.fptype as usize];
        } else {
            let vlc = br.read_vc1_vlc(4, 0)?;
            header.ptype = PictureType::from_vlc_ones(vlc.ones()).ok_or_else(|| {
                LiuError::HeaderSyntax(format!("PTYPE 码字非法: code={:#b}", vlc.code))
            })?;
        }

        let skipped = header.ptype == PictureType::Skipped;
        if sequence.tfcntrflag && !skipped {
            header.tfcntr = br.read_bits(8)?;
        }

        if sequence.pulldown {
            if sequence.progressive_display() {
                header.rptfrm = br.read_bits(2)?;
            } else {
                header.tff = br.read_flag()?;
                header.rff = br.read_flag()?;
            }
        }

        if entry.panscan_flag && br.read_flag()? {
            let count = if sequence.interlace && !sequence.psf {
                2 + u32::from(sequence.pulldown && header.rff)
            } else {
                1 + if sequence.pulldown { header.rptfrm } else { 0 }
            };
            for _ in 0..count {
                header.pan_scan.push(PanScanWindow {
                    horizontal_offset: br.read_bits(18)?,
                    vertical_offset: br.read_bits(18)?,
                    width: br.read_bits(14)?,
                    height: br.read_bits(14)?,
                });
            }
        }

        if skipped {
            return Ok(header);
        }

        header.rndctrl = br.read_flag()?;
        if sequence.interlace {
            header.uvsamp = br.read_flag()?;
        }

        match header.fcm {
            FrameCodingMode::Progressive => header.read_progressive(br, sequence, entry)?,
            FrameCodingMode::FrameInterlace => header.read_interlaced_frame(br, sequence, entry)?,
            FrameCodingMode::FieldInterlace => {
                if entry.refdist_flag && header.fptype <= 3 {
                    let mut refdist = br.read_bits(2)?;
                    if refdist == 3 {
                        refdist = br.read_vc1_vlc(13, 0)?.len + 2;
                    }
                    header.refdist = refdist;
                    *backward_refdist = refdist;
                }
                if header.fptype > 3 {
                    header.read_bfraction(br)?;
                    header.backward_refdist = *backward_refdist;
                }
                header.read_interlaced_field(br, sequence, entry)?;
            }
        }
        Ok(header)
    }

    /// 解析场起始码 (0x0C) 后的第二场图像头
    ///
    /// 第二场继承第一场的帧级字段, 只有场级部分出现在码流中.
    pub fn parse_second(
        br: &mut BitReader<'_>,
        first: &PictureHeader,
        sequence: &SequenceHeader,
        entry: &EntryPointHeader,
    ) -> LiuResult<Self> {
        if first.fcm != FrameCodingMode::FieldInterlace || !first.first_field {
            return Err(LiuError::HeaderSequence(
                "第二场之前没有场图像对的第一场".into(),
            ));
        }
        let mut header = Self {
            fcm: first.fcm,
            ptype: FIELD_PICTURE_SECOND[first.fptype as usize],
            fptype: first.fptype,
            first_field: false,
            tfcntr: first.tfcntr,
            rptfrm: first.rptfrm,
            tff: first.tff,
            rff: first.rff,
            rndctrl: first.rndctrl,
            uvsamp: first.uvsamp,
            interpfrm: first.interpfrm,
            refdist: first.refdist,
            backward_refdist: first.backward_refdist,
            bfraction_numerator: first.bfraction_numerator,
            bfraction_denominator: first.bfraction_denominator,
            bfraction_reserved: first.bfraction_reserved,
            ..Self::default()
        };
        header.read_interlaced_field(br, sequence, entry)?;
        Ok(header)
    }

    /// 是否为场图像
    pub fn is_field(&self) -> bool {
        self.fcm == FrameCodingMode::FieldInterlace
    }

    fn read_bfraction(&mut self, br: &mut BitReader<'_>) -> LiuResult<()> {
        let mut index = br.read_bits(3)? as usize;
        if index == 7 {
            index += br.read_bits(4)? as usize;
        }
        let (numerator, denominator) = bfraction(index).unwrap_or_else(|| {
            warn!("BFRACTION 保留码: index={}, 分母按 8 处理, 分子为 0", index);
            self.bfraction_reserved = true;
            (0, 8)
        });
        self.bfraction_numerator = numerator;
        self.bfraction_denominator = denominator;
        Ok(())
    }

    fn read_quantizer(
        &mut self,
        br: &mut BitReader<'_>,
        sequence: &SequenceHeader,
        entry: &EntryPointHeader,
    ) -> LiuResult<()> {
        self.pqindex = br.read_bits(5)?;
        if self.pqindex <= 8 {
            self.halfqp = br.read_flag()?;
        }
        if entry.quantizer == 0 {
            self.pquant = u32::from(PQUANT[self.pqindex as usize]);
            self.pquantizer = self.pqindex <= 8;
        } else {
            self.pquant = self.pqindex;
            if entry.quantizer == 1 {
                self.pquantizer = br.read_flag()?;
            }
        }
        if sequence.postprocflag {
            self.postproc = br.read_bits(2)?;
        }
        Ok(())
    }

    fn read_mv_ranges(&mut self, br: &mut BitReader<'_>, entry: &EntryPointHeader) -> LiuResult<()> {
        if entry.extended_mv {
            self.mvrange = br.read_vc1_vlc(3, 0)?.ones();
        }
        if entry.extended_dmv {
            self.dmvrange = br.read_vc1_vlc(3, 0)?.ones();
        }
        Ok(())
    }

    fn is_intra(&self) -> bool {
        matches!(self.ptype, PictureType::I | PictureType::BI)
    }

    fn read_progressive(
        &mut self,
        br: &mut BitReader<'_>,
        sequence: &SequenceHeader,
        entry: &EntryPointHeader,
    ) -> LiuResult<()> {
        if sequence.finterpflag {
            self.interpfrm = br.read_flag()?;
        }
        if self.ptype == PictureType::B {
            self.read_bfraction(br)?;
        }
        self.read_quantizer(br, sequence, entry)?;
        if self.is_intra() {
            return Ok(());
        }

        if entry.extended_mv {
            self.mvrange = br.read_vc1_vlc(3, 0)?.ones();
        }
        if self.ptype == PictureType::P {
            let index = br.read_unary_limited(1, 4)?;
            self.mvmode = mv_mode(index, self.pquant);
            if self.mvmode == MvMode::IntensityCompensation {
                let index = br.read_unary_limited(1, 3)?;
                self.mvmode2 = mv_mode2(index, self.pquant);
                self.intensity = Some(IntensityCompensation::both(read_luma(br)?));
            }
        } else {
            self.mvmode = if br.read_flag()? {
                MvMode::OneMv
            } else {
                MvMode::HalfPelBilinear
            };
        }
        Ok(())
    }

    fn read_interlaced_frame(
        &mut self,
        br: &mut BitReader<'_>,
        sequence: &SequenceHeader,
        entry: &EntryPointHeader,
    ) -> LiuResult<()> {
        self.read_quantizer(br, sequence, entry)?;
        if self.is_intra() {
            return Ok(());
        }
        if self.ptype == PictureType::B {
            self.read_bfraction(br)?;
        }
        self.read_mv_ranges(br, entry)?;
        if self.ptype == PictureType::P {
            self.fourmvswitch = br.read_flag()?;
            if br.read_flag()? {
                self.intensity = Some(IntensityCompensation::both(read_luma(br)?));
            }
        }
        Ok(())
    }

    fn read_interlaced_field(
        &mut self,
        br: &mut BitReader<'_>,
        sequence: &SequenceHeader,
        entry: &EntryPointHeader,
    ) -> LiuResult<()> {
        self.read_quantizer(br, sequence, entry)?;
        if self.is_intra() {
            return Ok(());
        }
        if self.ptype == PictureType::P {
            self.numref = br.read_flag()?;
            if !self.numref {
                self.reffield = br.read_flag()?;
            }
        }
        self.read_mv_ranges(br, entry)?;

        if self.ptype != PictureType::P {
            // B 场没有亮度补偿
            let index = br.read_unary_limited(1, 3)?;
            self.mvmode = mv_mode2(index, self.pquant);
            return Ok(());
        }

        let index = br.read_unary_limited(1, 4)?;
        self.mvmode = mv_mode(index, self.pquant);
        if self.mvmode != MvMode::IntensityCompensation {
            return Ok(());
        }
        let index = br.read_unary_limited(1, 3)?;
        self.mvmode2 = mv_mode2(index, self.pquant);

        let field = if br.read_flag()? {
            IntensityField::Both
        } else if br.read_flag()? {
            IntensityField::Bottom
        } else {
            IntensityField::Top
        };
        let first = read_luma(br)?;
        let mut intensity = IntensityCompensation {
            field,
            top: None,
            bottom: None,
        };
        match field {
            IntensityField::Bottom => intensity.bottom = Some(first),
            IntensityField::Top => intensity.top = Some(first),
            IntensityField::Both => {
                intensity.top = Some(first);
                intensity.bottom = Some(read_luma(br)?);
            }
        }
        self.intensity = Some(intensity);
        Ok(())
    }
}

/// 条带头
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SliceHeader {
    /// 条带起始码在编码帧中的偏移
    pub offset: usize,
    /// SLICE_ADDR, 条带起始宏块行
    pub address: u32,
}

impl SliceHeader {
    /// 解析条带头
    pub fn parse(br: &mut BitReader<'_>, offset: usize) -> LiuResult<Self> {
        let address = br.read_bits(9)?;
        Ok(Self { offset, address })
    }
}
