//! PES 时间戳.
//!
//! PES 头中的 PTS/DTS 为 33 位、90kHz 时钟的计数值, 超出范围时回绕.

use std::fmt;

use crate::Rational;

/// PES 时钟频率
pub const PES_CLOCK_HZ: u64 = 90_000;

/// PES 时间戳位宽
pub const PES_TIMESTAMP_BITS: u32 = 33;

/// 33 位回绕掩码
pub const PES_TIMESTAMP_MASK: u64 = (1 << PES_TIMESTAMP_BITS) - 1;

/// 帧时间: 播放时间 (PTS) 与解码时间 (DTS)
///
/// `None` 表示该字段无效.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameTime {
    /// 播放时间 (90kHz)
    pub pts: Option<u64>,
    /// 解码时间 (90kHz)
    pub dts: Option<u64>,
}

impl FrameTime {
    /// 创建帧时间
    pub const fn new(pts: Option<u64>, dts: Option<u64>) -> Self {
        Self { pts, dts }
    }

    /// 无效时间
    pub const fn none() -> Self {
        Self {
            pts: None,
            dts: None,
        }
    }

    /// 是否携带有效的播放时间
    pub const fn is_valid(&self) -> bool {
        self.pts.is_some()
    }
}

impl fmt::Display for FrameTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pts {
            Some(pts) => write!(f, "{:.6}s", ticks_to_seconds(pts))?,
            None => write!(f, "NOPTS")?,
        }
        if let Some(dts) = self.dts {
            write!(f, " (dts {:.6}s)", ticks_to_seconds(dts))?;
        }
        Ok(())
    }
}

/// 90kHz 计数转换为秒
pub fn ticks_to_seconds(ticks: u64) -> f64 {
    ticks as f64 / PES_CLOCK_HZ as f64
}

/// 在 33 位时间轴上加减偏移
pub fn wrapping_offset(ticks: u64, delta: i64) -> u64 {
    (ticks as i64).wrapping_add(delta) as u64 & PES_TIMESTAMP_MASK
}

/// 指定场数在给定场率下持续的 90kHz 计数
///
/// 场率无效时返回 0.
pub fn ticks_for_fields(fields: i64, field_rate: Rational) -> i64 {
    if !field_rate.is_positive() {
        return 0;
    }
    let num = i128::from(field_rate.num);
    let den = i128::from(field_rate.den);
    (i128::from(fields) * i128::from(PES_CLOCK_HZ) * den / num) as i64
}
