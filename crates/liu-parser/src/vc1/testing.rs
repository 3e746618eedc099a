//! 单元测试用的比特写入器与头部构造器.

use bytes::Bytes;

use liu_collator::{CodedFrame, StartCode};
use liu_core::FrameTime;

/// 按 MSB first 写入比特
#[derive(Debug, Default)]
pub(crate) struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put(&mut self, value: u32, bits: u32) {
        for i in (0..bits).rev() {
            let bit = (value >> i) & 1;
            if self.bit_len % 8 == 0 {
                self.bytes.push(0);
            }
            if bit == 1 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 0x80 >> (self.bit_len % 8);
            }
            self.bit_len += 1;
        }
    }

    pub(crate) fn put_flag(&mut self, flag: bool) {
        self.put(u32::from(flag), 1);
    }

    /// 结束写入, 以 `1` 加零填充到字节边界
    pub(crate) fn finish(mut self) -> Vec<u8> {
        self.put(1, 1);
        self.bytes
    }
}

/// 序列头构造器
#[derive(Debug, Clone)]
pub(crate) struct SequenceBuilder {
    pub(crate) profile: u32,
    pub(crate) level: u32,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) pulldown: bool,
    pub(crate) interlace: bool,
    pub(crate) tfcntr: bool,
    pub(crate) psf: bool,
    pub(crate) display: Option<(u32, u32)>,
    pub(crate) aspect: Option<u32>,
    pub(crate) aspect_explicit: (u32, u32),
    pub(crate) frame_rate: Option<(u32, u32)>,
    pub(crate) frame_rate_exp: Option<u32>,
    pub(crate) matrix_coefficients: Option<u32>,
    pub(crate) hrd_buckets: Option<u32>,
}

impl Default for SequenceBuilder {
    fn default() -> Self {
        Self {
            profile: 3,
            level: 2,
            width: 352,
            height: 288,
            pulldown: false,
            interlace: false,
            tfcntr: false,
            psf: false,
            display: None,
            aspect: None,
            aspect_explicit: (1, 1),
            frame_rate: None,
            frame_rate_exp: None,
            matrix_coefficients: None,
            hrd_buckets: None,
        }
    }
}

impl SequenceBuilder {
    pub(crate) fn write(&self, w: &mut BitWriter) {
        w.put(self.profile, 2);
        w.put(self.level, 3);
        w.put(1, 2); // 4:2:0
        w.put(0, 3);
        w.put(0, 5);
        w.put(0, 1); // postprocflag
        w.put((self.width - 2) / 2, 12);
        w.put((self.height - 2) / 2, 12);
        w.put_flag(self.pulldown);
        w.put_flag(self.interlace);
        w.put_flag(self.tfcntr);
        w.put(0, 1); // finterpflag
        w.put(1, 1); // reserved
        w.put_flag(self.psf);

        let extended = self.display.is_some()
            || self.aspect.is_some()
            || self.frame_rate.is_some()
            || self.frame_rate_exp.is_some()
            || self.matrix_coefficients.is_some()
            || self.hrd_buckets.is_some();
        w.put_flag(extended);
        if !extended {
            return;
        }
        let (display_width, display_height) = self.display.unwrap_or((self.width, self.height));
        w.put(display_width - 1, 14);
        w.put(display_height - 1, 14);
        match self.aspect {
            Some(code) => {
                w.put(1, 1);
                w.put(code, 4);
                if code == 15 {
                    w.put(self.aspect_explicit.0, 8);
                    w.put(self.aspect_explicit.1, 8);
                }
            }
            None => w.put(0, 1),
        }
        match (self.frame_rate, self.frame_rate_exp) {
            (Some((nr, dr)), _) => {
                w.put(1, 1);
                w.put(0, 1);
                w.put(nr, 8);
                w.put(dr, 4);
            }
            (None, Some(exp)) => {
                w.put(1, 1);
                w.put(1, 1);
                w.put(exp, 16);
            }
            (None, None) => w.put(0, 1),
        }
        match self.matrix_coefficients {
            Some(matrix) => {
                w.put(1, 1);
                w.put(1, 8);
                w.put(1, 8);
                w.put(matrix, 8);
            }
            None => w.put(0, 1),
        }
        match self.hrd_buckets {
            Some(buckets) => {
                w.put(1, 1);
                w.put(buckets, 5);
            }
            None => w.put(0, 1),
        }
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        self.write(&mut w);
        w.finish()
    }
}

/// 序列层元数据构造器, 默认为 Advanced Profile 352x288 且不带帧时长
#[derive(Debug, Clone)]
pub(crate) struct MetadataBuilder {
    pub(crate) profile: u32,
    /// STRUCT_C 中 profile 之后的 28 位
    pub(crate) coding_tools: u32,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) level: u32,
    pub(crate) frame_duration: u32,
    pub(crate) struct_c_flag: u32,
}

impl Default for MetadataBuilder {
    fn default() -> Self {
        Self {
            profile: 3,
            coding_tools: 0,
            width: 352,
            height: 288,
            level: 2,
            frame_duration: 0,
            struct_c_flag: 0x04,
        }
    }
}

impl MetadataBuilder {
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        put_le(&mut w, 120, 3); // 帧数
        w.put(0xC5, 8);
        put_le(&mut w, self.struct_c_flag, 4);
        w.put(self.profile, 2);
        w.put(0, 2);
        w.put(self.coding_tools, 28);
        put_le(&mut w, self.height, 4);
        put_le(&mut w, self.width, 4);
        put_le(&mut w, 0x0C, 4);
        w.put(self.level, 3);
        w.put(0, 1); // cbr
        w.put(0, 4);
        put_le(&mut w, 0x1000, 3); // hrd_buffer
        put_le(&mut w, 0x20000, 4); // hrd_rate
        put_le(&mut w, self.frame_duration, 4);
        w.finish()
    }
}

fn put_le(w: &mut BitWriter, value: u32, bytes: u32) {
    for i in 0..bytes {
        w.put((value >> (8 * i)) & 0xFF, 8);
    }
}

/// 入口点头: 封闭, 可选编码尺寸, 其余字段为 0
pub(crate) fn entry_point(closed: bool, panscan: bool, coded_size: Option<(u32, u32)>) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.put(0, 1); // broken_link
    w.put_flag(closed);
    w.put_flag(panscan);
    w.put(0, 3); // refdist_flag, loopfilter, fastuvmc
    w.put(0, 1); // extended_mv
    w.put(0, 2); // dquant
    w.put(0, 2); // vstransform, overlap
    w.put(0, 2); // quantizer
    match coded_size {
        Some((width, height)) => {
            w.put(1, 1);
            w.put((width - 2) / 2, 12);
            w.put((height - 2) / 2, 12);
        }
        None => w.put(0, 1),
    }
    w.put(0, 2); // range_mapy_flag, range_mapuv_flag
    w.finish()
}

/// 逐行序列的图像头, `ptype` 为图像类型码字 (值, 位数)
pub(crate) fn progressive_picture(ptype: (u32, u32)) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.put(ptype.0, ptype.1);
    if ptype != PTYPE_SKIPPED {
        w.put(0, 1); // rndctrl
        if ptype == PTYPE_B {
            w.put(0, 3); // BFRACTION 1/2
        }
        w.put(10, 5); // pqindex
        if ptype == PTYPE_P || ptype == PTYPE_B {
            w.put(1, 1); // mvmode
        }
    }
    w.finish()
}

pub(crate) const PTYPE_I: (u32, u32) = (0b110, 3);
pub(crate) const PTYPE_P: (u32, u32) = (0, 1);
pub(crate) const PTYPE_B: (u32, u32) = (0b10, 2);
pub(crate) const PTYPE_SKIPPED: (u32, u32) = (0b1111, 4);

/// 插入防竞争字节
fn escape(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    let mut zeros = 0;
    for &b in payload {
        if zeros >= 2 && b <= 3 {
            out.push(3);
            zeros = 0;
        }
        out.push(b);
        zeros = if b == 0 { zeros + 1 } else { 0 };
    }
    out
}

/// 由 (起始码, 负载) 列表构造编码帧
pub(crate) fn coded_frame(units: &[(u8, Vec<u8>)], time: FrameTime) -> CodedFrame {
    let mut data = Vec::new();
    let mut start_codes = Vec::new();
    for (code, payload) in units {
        start_codes.push(StartCode {
            offset: data.len(),
            code: *code,
        });
        data.extend_from_slice(&[0, 0, 1, *code]);
        data.extend_from_slice(&escape(payload));
    }
    CodedFrame::new(Bytes::from(data), start_codes, time)
}
