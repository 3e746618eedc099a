//! PES 头解析.
//!
//! 支持 MPEG-2 PES 头 (PTS/DTS, ESCR 等可选字段, 扩展 stream_id 的子流过滤)
//! 以及 MPEG-1 系统流包头.
//!
//! # MPEG-2 PES 头结构
//! ```text
//! 00 00 01 stream_id | packet_length(16) | 10 flags(6) | flags(8) | header_data_length(8)
//! [PTS 5 字节] [DTS 5 字节] [ESCR 6] [ES_rate 3] [trick 1] [copy 1] [CRC 2] [extension ...]
//! ```

use bitflags::bitflags;
use liu_core::bitreader::BitReader;
use liu_core::{FrameTime, LiuError, LiuResult};

/// 填充流 stream_id
pub const PES_START_CODE_PADDING: u8 = 0xBE;

/// 扩展 stream_id
pub const PES_START_CODE_EXTENDED: u8 = 0xFD;

/// 确定 PES 头长度所需的初始字节数
pub const PES_INITIAL_HEADER_SIZE: usize = 9;

/// 填充包头长度
pub const PES_PADDING_HEADER_SIZE: usize = 6;

/// 零起始码需要收集的字节数 (`00 00 01 00 00 01 xx`)
pub const ZERO_CODE_HEADER_SIZE: usize = 7;

/// MPEG-1 包头中最多允许的填充字节
const MPEG1_MAX_STUFFING: usize = 16;

bitflags! {
    /// MPEG-2 PES 头第 8 字节的可选字段标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PesFlags: u8 {
        const PTS = 0x80;
        const DTS = 0x40;
        const ESCR = 0x20;
        const ES_RATE = 0x10;
        const DSM_TRICK_MODE = 0x08;
        const ADDITIONAL_COPY_INFO = 0x04;
        const CRC = 0x02;
        const EXTENSION = 0x01;
    }
}

/// stream_id 是否为视频 PES (0xE0..=0xEF 或扩展 0xFD)
pub fn is_video_stream_id(stream_id: u8) -> bool {
    (stream_id & 0xF0) == 0xE0 || stream_id == PES_START_CODE_EXTENDED
}

/// 填充包需要跳过的负载长度
pub fn padding_skip(header: &[u8]) -> usize {
    if header.len() < PES_PADDING_HEADER_SIZE {
        return 0;
    }
    (usize::from(header[4]) << 8) | usize::from(header[5])
}

/// 解析后的 PES 头
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PesHeader {
    /// stream_id
    pub stream_id: u8,
    /// PES_packet_length (0 表示未指定)
    pub packet_length: usize,
    /// 负载长度 (0 表示未指定)
    pub payload_length: usize,
    /// 头部长度 (含 6 字节前缀, 不含私有头)
    pub header_length: usize,
    /// 可选字段标志 (仅 MPEG-2)
    pub flags: PesFlags,
    /// 是否为 MPEG-1 系统流包头
    pub mpeg1: bool,
    /// PTS/DTS
    pub time: FrameTime,
    /// 扩展 stream_id 的子流标识
    pub sub_stream_id: Option<u8>,
    /// 私有头数据
    pub private_data: Vec<u8>,
}

impl PesHeader {
    /// 私有头中声明的帧长 (4 字节大端)
    pub fn private_frame_length(&self) -> Option<usize> {
        let bytes: [u8; 4] = self.private_data.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(bytes) as usize)
    }
}

/// 计算 PES 头长度 (不含私有头)
///
/// 数据不足以确定长度时, 返回继续判断所需的最少字节数.
pub fn pes_header_size(header: &[u8]) -> usize {
    if header.len() < PES_INITIAL_HEADER_SIZE {
        return PES_INITIAL_HEADER_SIZE;
    }
    if (header[6] & 0xC0) == 0x80 {
        return PES_INITIAL_HEADER_SIZE + usize::from(header[8]);
    }

    // MPEG-1: 填充字节 / STD 缓冲 / 时间戳标志
    let mut pos = 6;
    let mut stuffing = 0;
    loop {
        let Some(&b) = header.get(pos) else {
            return pos + 1;
        };
        if b != 0xFF || stuffing == MPEG1_MAX_STUFFING {
            break;
        }
        pos += 1;
        stuffing += 1;
    }
    if (header[pos] & 0xC0) == 0x40 {
        pos += 2;
    }
    let Some(&b) = header.get(pos) else {
        return pos + 1;
    };
    match b & 0xF0 {
        0x20 => pos + 5,
        0x30 => pos + 10,
        _ => pos + 1,
    }
}

/// 解析完整的 PES 头
///
/// `header` 从 `00 00 01 stream_id` 开始, 包含私有头.
pub fn parse_pes_header(header: &[u8], extended_header_length: usize) -> LiuResult<PesHeader> {
    if header.len() < PES_INITIAL_HEADER_SIZE || header[..3] != [0x00, 0x00, 0x01] {
        return Err(LiuError::MalformedPesHeader(format!(
            "无效的 PES 起始码, 长度 {}",
            header.len()
        )));
    }

    let header_length = pes_header_size(header);
    if header.len() < header_length + extended_header_length {
        return Err(LiuError::MalformedPesHeader(format!(
            "PES 头不完整: 需要 {} 字节, 实际 {}",
            header_length + extended_header_length,
            header.len()
        )));
    }

    let stream_id = header[3];
    let packet_length = (usize::from(header[4]) << 8) | usize::from(header[5]);
    let mpeg1 = (header[6] & 0xC0) != 0x80;
    let payload_length = if packet_length == 0 {
        0
    } else {
        packet_length.saturating_sub(header_length - 6 + extended_header_length)
    };

    let mut pes = PesHeader {
        stream_id,
        packet_length,
        payload_length,
        header_length,
        flags: PesFlags::empty(),
        mpeg1,
        time: FrameTime::none(),
        sub_stream_id: None,
        private_data: header[header_length..header_length + extended_header_length].to_vec(),
    };

    let fields = &header[..header_length];
    let result = if mpeg1 {
        read_mpeg1_fields(fields, &mut pes)
    } else {
        read_mpeg2_fields(fields, &mut pes)
    };
    match result {
        Err(LiuError::Eof) => Err(LiuError::MalformedPesHeader(format!(
            "PES 可选字段越界: stream_id=0x{:02X}, 头长 {}",
            stream_id, header_length
        ))),
        other => other.map(|()| pes),
    }
}

/// 读取 33 位时间戳 (前 4 位由调用方处理)
fn read_timestamp(br: &mut BitReader<'_>) -> LiuResult<u64> {
    let mut ts = u64::from(br.read_bits(3)?) << 30;
    br.skip_bits(1)?;
    ts |= u64::from(br.read_bits(15)?) << 15;
    br.skip_bits(1)?;
    ts |= u64::from(br.read_bits(15)?);
    br.skip_bits(1)?;
    Ok(ts)
}

fn read_mpeg2_fields(header: &[u8], pes: &mut PesHeader) -> LiuResult<()> {
    pes.flags = PesFlags::from_bits_truncate(header[7]);
    let mut br = BitReader::new(&header[PES_INITIAL_HEADER_SIZE..]);

    if pes.flags.contains(PesFlags::DTS) && !pes.flags.contains(PesFlags::PTS) {
        return Err(LiuError::MalformedPesHeader(format!(
            "DTS 存在但缺少 PTS: stream_id=0x{:02X}",
            pes.stream_id
        )));
    }

    if pes.flags.contains(PesFlags::PTS) {
        br.skip_bits(4)?;
        pes.time.pts = Some(read_timestamp(&mut br)?);
    }
    if pes.flags.contains(PesFlags::DTS) {
        br.skip_bits(4)?;
        pes.time.dts = Some(read_timestamp(&mut br)?);
    }

    if pes.stream_id != PES_START_CODE_EXTENDED {
        return Ok(());
    }

    // 扩展 stream_id: 跳过其余可选字段, 读取 PES 扩展中的子流标识
    if pes.flags.contains(PesFlags::ESCR) {
        br.skip_bits(48)?;
    }
    if pes.flags.contains(PesFlags::ES_RATE) {
        br.skip_bits(24)?;
    }
    if pes.flags.contains(PesFlags::DSM_TRICK_MODE) {
        br.skip_bits(8)?;
    }
    if pes.flags.contains(PesFlags::ADDITIONAL_COPY_INFO) {
        br.skip_bits(8)?;
    }
    if pes.flags.contains(PesFlags::CRC) {
        br.skip_bits(16)?;
    }
    if pes.flags.contains(PesFlags::EXTENSION) {
        let private = br.read_flag()?;
        let pack_header = br.read_flag()?;
        let program_counter = br.read_flag()?;
        let pstd = br.read_flag()?;
        br.skip_bits(3)?;
        let extension2 = br.read_flag()?;

        let mut skip = 0;
        if private {
            skip += 128;
        }
        if pack_header {
            skip += 8;
        }
        if program_counter {
            skip += 16;
        }
        if pstd {
            skip += 16;
        }
        br.skip_bits(skip)?;

        if extension2 {
            br.skip_bits(8)?;
            let stream_id_extension_flag = br.read_flag()?;
            if !stream_id_extension_flag {
                pes.sub_stream_id = Some(br.read_bits(7)? as u8);
            }
        }
    }
    Ok(())
}

fn read_mpeg1_fields(header: &[u8], pes: &mut PesHeader) -> LiuResult<()> {
    let mut br = BitReader::new(&header[6..]);

    let mut stuffing = 0;
    while stuffing < MPEG1_MAX_STUFFING && br.peek_bits(8)? == 0xFF {
        br.skip_bits(8)?;
        stuffing += 1;
    }

    if br.peek_bits(2)? == 0x01 {
        // STD_buffer_scale + STD_buffer_size
        br.skip_bits(16)?;
    }

    let flags = br.read_bits(4)?;
    if flags == 0x02 || flags == 0x03 {
        pes.time.pts = Some(read_timestamp(&mut br)?);
    }
    if flags == 0x03 {
        br.skip_bits(4)?;
        pes.time.dts = Some(read_timestamp(&mut br)?);
    }
    Ok(())
}
