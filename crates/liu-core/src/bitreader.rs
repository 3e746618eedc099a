//! 比特流读取器.
//!
//! 按大端位序 (MSB first) 从字节缓冲区中读取 VC-1 / MPEG 头部字段,
//! 并提供 VC-1 变长码读取与防竞争字节 (emulation prevention) 去除.

use crate::{LiuError, LiuResult};

/// VC-1 变长码读取结果
///
/// 对应标准文本中 "码字 + 码长" 的写法, 例如 `110` 为 `{ code: 6, len: 3 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vc1Vlc {
    /// 已读取的位按 MSB first 拼接的值
    pub code: u32,
    /// 已读取的位数
    pub len: u32,
}

impl Vc1Vlc {
    /// 码字中 1 的个数 (用于 `0`/`10`/`110`/`111` 形式的截断一元码)
    pub fn ones(&self) -> u32 {
        self.code.count_ones()
    }
}

/// 比特流读取器
///
/// # 示例
/// ```
/// use liu_core::bitreader::BitReader;
///
/// let data = [0b10110001, 0b01010101];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_bits(4).unwrap(), 0b1011);
/// assert_eq!(br.read_bits(4).unwrap(), 0b0001);
/// assert_eq!(br.read_bits(8).unwrap(), 0b01010101);
/// ```
pub struct BitReader<'a> {
    /// 源数据
    data: &'a [u8],
    /// 当前字节索引
    byte_pos: usize,
    /// 当前字节中的位位置 (0-7, 0 表示最高位)
    bit_pos: u8,
}

impl<'a> BitReader<'a> {
    /// 创建新的比特流读取器
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
        }
    }

    /// 获取剩余可读位数
    pub fn bits_left(&self) -> usize {
        if self.byte_pos >= self.data.len() {
            return 0;
        }
        (self.data.len() - self.byte_pos) * 8 - self.bit_pos as usize
    }

    /// 读取 1 个位
    pub fn read_bit(&mut self) -> LiuResult<u32> {
        if self.byte_pos >= self.data.len() {
            return Err(LiuError::Eof);
        }

        let bit = (self.data[self.byte_pos] >> (7 - self.bit_pos)) & 1;
        self.bit_pos += 1;
        if self.bit_pos >= 8 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }

        Ok(u32::from(bit))
    }

    /// 读取 1 位标志
    pub fn read_flag(&mut self) -> LiuResult<bool> {
        Ok(self.read_bit()? != 0)
    }

    /// 读取 N 个位 (最多 32 位)
    ///
    /// 按大端位序读取, 返回值的低 N 位有效.
    pub fn read_bits(&mut self, n: u32) -> LiuResult<u32> {
        if n == 0 {
            return Ok(0);
        }
        if n > 32 {
            return Err(LiuError::InvalidArgument(format!(
                "read_bits: n={} 超过 32 位",
                n,
            )));
        }
        if (n as usize) > self.bits_left() {
            return Err(LiuError::Eof);
        }

        let mut result: u32 = 0;
        let mut remaining = n;

        while remaining > 0 {
            let available = 8 - self.bit_pos as u32;
            let to_read = remaining.min(available);

            let shift = available - to_read;
            let mask = ((1u32 << to_read) - 1) as u8;
            let bits = (self.data[self.byte_pos] >> shift) & mask;

            result = (result << to_read) | u32::from(bits);

            self.bit_pos += to_read as u8;
            if self.bit_pos >= 8 {
                self.bit_pos = 0;
                self.byte_pos += 1;
            }
            remaining -= to_read;
        }

        Ok(result)
    }

    /// 读取一元编码值, 最多读取 `max` 位
    ///
    /// 统计遇到 `stop_bit` 之前的位数; 读满 `max` 位仍未遇到时返回 `max`.
    /// 例如 MVMODE: `read_unary_limited(1, 4)` 从 `001...` 得到 2.
    pub fn read_unary_limited(&mut self, stop_bit: u32, max: u32) -> LiuResult<u32> {
        let stop = stop_bit & 1;
        let mut count = 0u32;
        while count < max {
            if self.read_bit()? == stop {
                return Ok(count);
            }
            count += 1;
        }
        Ok(count)
    }

    /// 读取 VC-1 前缀变长码
    ///
    /// 最多读取 `max_bits` 位, 读到等于 `leaf` 的位即停止.
    pub fn read_vc1_vlc(&mut self, max_bits: u32, leaf: u32) -> LiuResult<Vc1Vlc> {
        let leaf = leaf & 1;
        let mut vlc = Vc1Vlc { code: 0, len: 0 };
        while vlc.len < max_bits {
            let bit = self.read_bit()?;
            vlc.code = (vlc.code << 1) | bit;
            vlc.len += 1;
            if bit == leaf {
                break;
            }
        }
        Ok(vlc)
    }

    /// 窥视 N 个位 (不移动位置)
    pub fn peek_bits(&mut self, n: u32) -> LiuResult<u32> {
        let saved_byte = self.byte_pos;
        let saved_bit = self.bit_pos;
        let result = self.read_bits(n);
        self.byte_pos = saved_byte;
        self.bit_pos = saved_bit;
        result
    }

    /// 跳过 N 个位
    pub fn skip_bits(&mut self, n: u32) -> LiuResult<()> {
        if (n as usize) > self.bits_left() {
            return Err(LiuError::Eof);
        }

        let total_bits = self.bit_pos as u32 + n;
        self.byte_pos += (total_bits / 8) as usize;
        self.bit_pos = (total_bits % 8) as u8;

        Ok(())
    }

    /// 读取 N 个字节组成的小端整数 (最多 4 字节)
    ///
    /// WMV 封装的序列层元数据按小端存放多字节字段.
    pub fn read_le(&mut self, bytes: u32) -> LiuResult<u32> {
        if bytes > 4 {
            return Err(LiuError::InvalidArgument(format!(
                "read_le: bytes={} 超过 4 字节",
                bytes,
            )));
        }
        if (bytes as usize) * 8 > self.bits_left() {
            return Err(LiuError::Eof);
        }
        let mut value = 0u32;
        for i in 0..bytes {
            value |= self.read_bits(8)? << (8 * i);
        }
        Ok(value)
    }
}

/// 去除防竞争字节
///
/// 将 `00 00 03 xx` (xx <= 3) 中的 `03` 删除, 还原原始头部比特.
pub fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0usize;
    let mut i = 0;
    while i < data.len() {
        let byte = data[i];
        if zeros >= 2 && byte == 0x03 && data.get(i + 1).is_none_or(|&next| next <= 0x03) {
            zeros = 0;
            i += 1;
            continue;
        }
        if byte == 0x00 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(byte);
        i += 1;
    }
    out
}
