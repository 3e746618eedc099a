//! VC-1 Advanced Profile 码表与枚举.

use std::fmt;

use liu_core::Rational;

use crate::framework::{PictureStructure, SliceType};

/// 序列头中 Advanced Profile 的 profile 值
pub const ADVANCED_PROFILE: u32 = 3;

/// Advanced Profile 允许的最高 level
pub const MAX_LEVEL: u32 = 4;

/// 支持的最大编码宽度/高度
pub const MAX_CODED_DIMENSION: u32 = 2048;

/// 图像编码类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PictureType {
    /// 帧内
    I,
    /// 前向预测
    P,
    /// 双向预测
    B,
    /// 不作参考的帧内图像
    BI,
    /// 跳过图像 (重复前一参考帧)
    Skipped,
}

impl PictureType {
    /// 由逐行图像类型变长码 (`0` P, `10` B, `110` I, `1110` BI, `1111` 跳过) 中 1 的个数得到类型
    pub const fn from_vlc_ones(ones: u32) -> Option<Self> {
        match ones {
            0 => Some(Self::P),
            1 => Some(Self::B),
            2 => Some(Self::I),
            3 => Some(Self::BI),
            4 => Some(Self::Skipped),
            _ => None,
        }
    }

    /// 解码所需参考帧数
    pub const fn references_required(self) -> usize {
        match self {
            Self::I | Self::BI => 0,
            Self::P | Self::Skipped => 1,
            Self::B => 2,
        }
    }

    /// 条带类型, 跳过图像没有条带
    pub const fn slice_type(self) -> Option<SliceType> {
        match self {
            Self::I | Self::BI => Some(SliceType::I),
            Self::P => Some(SliceType::P),
            Self::B => Some(SliceType::B),
            Self::Skipped => None,
        }
    }

    /// 是否为关键帧 (I 与 BI)
    pub const fn is_key(self) -> bool {
        matches!(self, Self::I | Self::BI)
    }

    /// 是否为参考帧 (I, P 与跳过图像)
    pub const fn is_reference(self) -> bool {
        matches!(self, Self::I | Self::P | Self::Skipped)
    }
}

impl fmt::Display for PictureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I => write!(f, "I"),
            Self::P => write!(f, "P"),
            Self::B => write!(f, "B"),
            Self::BI => write!(f, "BI"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// 场图像对中第一场的类型, 以 FPTYPE 为下标
pub const FIELD_PICTURE_FIRST: [PictureType; 8] = [
    PictureType::I,
    PictureType::I,
    PictureType::P,
    PictureType::P,
    PictureType::B,
    PictureType::B,
    PictureType::BI,
    PictureType::BI,
];

/// 场图像对中第二场的类型, 以 FPTYPE 为下标
pub const FIELD_PICTURE_SECOND: [PictureType; 8] = [
    PictureType::I,
    PictureType::P,
    PictureType::I,
    PictureType::P,
    PictureType::B,
    PictureType::BI,
    PictureType::B,
    PictureType::BI,
];

/// 帧编码模式 (FCM)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrameCodingMode {
    /// 逐行
    #[default]
    Progressive,
    /// 隔行帧
    FrameInterlace,
    /// 隔行场
    FieldInterlace,
}

/// 运动矢量模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MvMode {
    /// 1MV, 1/4 像素双三次
    #[default]
    OneMv,
    /// 混合 MV
    MixedMv,
    /// 1MV, 1/2 像素双三次
    HalfPel,
    /// 1MV, 1/2 像素双线性
    HalfPelBilinear,
    /// 亮度补偿, 实际模式由 MVMODE2 给出
    IntensityCompensation,
}

/// PQUANT <= 12 时的 MVMODE 表
const MV_MODE_HIGH_RATE: [MvMode; 5] = [
    MvMode::OneMv,
    MvMode::MixedMv,
    MvMode::HalfPel,
    MvMode::IntensityCompensation,
    MvMode::HalfPelBilinear,
];

/// PQUANT > 12 时的 MVMODE 表
const MV_MODE_LOW_RATE: [MvMode; 5] = [
    MvMode::HalfPelBilinear,
    MvMode::OneMv,
    MvMode::HalfPel,
    MvMode::IntensityCompensation,
    MvMode::MixedMv,
];

const MV_MODE2_HIGH_RATE: [MvMode; 4] = [
    MvMode::OneMv,
    MvMode::MixedMv,
    MvMode::HalfPel,
    MvMode::HalfPelBilinear,
];

const MV_MODE2_LOW_RATE: [MvMode; 4] = [
    MvMode::HalfPelBilinear,
    MvMode::OneMv,
    MvMode::HalfPel,
    MvMode::MixedMv,
];

/// MVMODE 一元码下标到模式 (含亮度补偿)
pub fn mv_mode(index: u32, pquant: u32) -> MvMode {
    let table = if pquant > 12 {
        &MV_MODE_LOW_RATE
    } else {
        &MV_MODE_HIGH_RATE
    };
    table[(index as usize).min(table.len() - 1)]
}

/// MVMODE2 (或 B 场的 MVMODE) 一元码下标到模式
pub fn mv_mode2(index: u32, pquant: u32) -> MvMode {
    let table = if pquant > 12 {
        &MV_MODE2_LOW_RATE
    } else {
        &MV_MODE2_HIGH_RATE
    };
    table[(index as usize).min(table.len() - 1)]
}

/// 亮度补偿作用的场
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IntensityField {
    /// 顶场
    Top,
    /// 底场
    Bottom,
    /// 两场 (帧图像总是两场)
    #[default]
    Both,
}

/// PQINDEX 到 PQUANT 的隐式量化器映射
pub const PQUANT: [u8; 32] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23,
    24, 25, 27, 29, 31,
];

const BFRACTION_NUMERATOR: [u8; 23] = [
    1, 1, 2, 1, 3, 1, 2, 3, 4, 1, 5, 1, 2, 3, 4, 5, 6, 1, 3, 5, 7, 0, 0,
];

const BFRACTION_DENOMINATOR: [u8; 23] = [
    2, 3, 3, 4, 4, 5, 5, 5, 5, 6, 6, 7, 7, 7, 7, 7, 7, 8, 8, 8, 8, 0, 0,
];

/// BFRACTION 码表下标的上限 (不含)
pub const BFRACTION_ENTRIES: usize = BFRACTION_DENOMINATOR.len();

/// B 图像分数 (分子, 分母)
///
/// 下标 0..=6 为三位码, 7..=22 为 `111` 后接四位码.
/// 下标 21 与 22 在表中分母为 0, 是保留码, 返回 `None`.
pub fn bfraction(index: usize) -> Option<(u32, u32)> {
    let index = index.min(BFRACTION_ENTRIES - 1);
    match BFRACTION_DENOMINATOR[index] {
        0 => None,
        denominator => Some((
            u32::from(BFRACTION_NUMERATOR[index]),
            u32::from(denominator),
        )),
    }
}

/// 由 FRAMERATENR / FRAMERATEDR 得到帧率
///
/// `nr` 取 1..=7 (24, 25, 30, 50, 60, 48, 72), `dr` 为 1 (÷1000) 或 2 (÷1001),
/// 其它组合无效.
pub fn frame_rate_from_code(nr: u32, dr: u32) -> Option<Rational> {
    const RATES: [i32; 8] = [0, 24, 25, 30, 50, 60, 48, 72];
    if !(1..=7).contains(&nr) {
        return None;
    }
    let base = RATES[nr as usize];
    match dr {
        1 => Some(Rational::new(base, 1)),
        2 => Some(Rational::new(base * 1000, 1001)),
        _ => None,
    }
}

/// 由 FRAMERATEEXP 得到帧率: `(exp + 1) / 32`
pub fn frame_rate_from_exp(exp: u32) -> Rational {
    Rational::new(exp as i32 + 1, 32)
}

/// 常见帧时长 (100 ns 单位) 对应的 FRAMERATENR / FRAMERATEDR
const FRAME_DURATIONS: [(u32, u32, u32); 12] = [
    (416_666, 1, 1),
    (417_083, 1, 2),
    (400_000, 2, 1),
    (333_333, 3, 1),
    (333_666, 3, 2),
    (200_000, 4, 1),
    (166_666, 5, 1),
    (166_833, 5, 2),
    (208_333, 6, 1),
    (208_541, 6, 2),
    (138_888, 7, 1),
    (139_027, 7, 2),
];

/// 帧时长允许的误差 (100 ns 单位), 即 1 微秒
const FRAME_DURATION_TOLERANCE: u32 = 10;

/// 按帧时长查找 FRAMERATENR / FRAMERATEDR, 误差在 1 微秒内才算匹配
pub fn frame_rate_code_from_duration(duration: u32) -> Option<(u32, u32)> {
    FRAME_DURATIONS
        .iter()
        .find(|(average, _, _)| duration.abs_diff(*average) <= FRAME_DURATION_TOLERANCE)
        .map(|&(_, nr, dr)| (nr, dr))
}

/// 宽高比码表 (宽:高), 0 为未指定, 14 保留, 15 为显式给出
const PIXEL_ASPECT_RATIOS: [(i32, i32); 14] = [
    (0, 1),
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
];

/// 像素宽高比码到像素宽高比, 未指定或保留码返回 `None`
pub fn pixel_aspect_ratio(code: u32) -> Option<Rational> {
    match code {
        1..=13 => {
            let (num, den) = PIXEL_ASPECT_RATIOS[code as usize];
            Some(Rational::new(num, den))
        }
        _ => None,
    }
}

/// 色彩转换矩阵系数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MatrixCoefficients {
    /// ITU-R BT.709
    Bt709,
    /// FCC
    Fcc,
    /// ITU-R BT.470-2 B/G
    Bt470Bg,
    /// SMPTE 170M
    Smpte170m,
    /// SMPTE 240M
    Smpte240m,
    /// 未指定, 按 BT.601 处理
    #[default]
    Unspecified,
}

impl MatrixCoefficients {
    /// 由 MATRIX_COEF 码得到矩阵, 禁止或保留码返回 `None`
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Bt709),
            2 => Some(Self::Unspecified),
            4 => Some(Self::Fcc),
            5 => Some(Self::Bt470Bg),
            6 => Some(Self::Smpte170m),
            7 => Some(Self::Smpte240m),
            _ => None,
        }
    }
}

/// 场图像的结构: 第一场为 TFF 指示的那一场, 第二场为另一场
pub const fn field_structure(top_field_first: bool, first_field: bool) -> PictureStructure {
    if top_field_first == first_field {
        PictureStructure::TopField
    } else {
        PictureStructure::BottomField
    }
}

/// 以 (逐行序列, 帧, TFF, RFF) 为下标的组合合法性
const DISPLAY_COMBINATION_LEGAL: [bool; 16] = [
    true, false, true, false, true, true, true, true, false, false, false, false, true, true,
    false, true,
];

/// 显示标志组合是否合法 (逐行序列时 TFF 不参与判断)
pub fn display_combination_legal(
    progressive_sequence: bool,
    frame: bool,
    top_field_first: bool,
    repeat_first_field: bool,
) -> bool {
    let tff = top_field_first && !progressive_sequence;
    let index = (usize::from(progressive_sequence) << 3)
        | (usize::from(frame) << 2)
        | (usize::from(tff) << 1)
        | usize::from(repeat_first_field);
    DISPLAY_COMBINATION_LEGAL[index]
}
