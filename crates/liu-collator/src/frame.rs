//! 编码帧缓冲区与缓冲区分配接口.

use bitflags::bitflags;
use bytes::{Bytes, BytesMut};
use liu_core::{FrameTime, LiuError, LiuResult};

bitflags! {
    /// 编码帧标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CodedFrameFlags: u32 {
        /// 输入不连续后的第一帧
        const DISCONTINUITY = 1 << 0;
        /// 帧内包含序列结束码
        const END_OF_SEQUENCE = 1 << 1;
        /// 来自每包一帧的码流, 帧长由私有头声明
        const FRAME_PER_PACKET = 1 << 2;
        /// 起始码列表已满, 部分起始码未记录
        const START_CODES_TRUNCATED = 1 << 3;
    }
}

/// 帧内的一个起始码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StartCode {
    /// 前缀 `00 00 01` 在帧内的偏移
    pub offset: usize,
    /// 起始码标识
    pub code: u8,
}

/// 收集完成的编码帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedFrame {
    /// 输出序号
    pub index: u64,
    /// 帧数据
    pub data: Bytes,
    /// 起始码列表, 偏移严格递增
    pub start_codes: Vec<StartCode>,
    /// 帧的 PTS/DTS
    pub time: FrameTime,
    /// 帧标志
    pub flags: CodedFrameFlags,
    /// 私有头中声明的帧长
    pub declared_length: Option<usize>,
}

impl CodedFrame {
    /// 由已有数据构造帧 (用于测试或外部输入)
    pub fn new(data: impl Into<Bytes>, start_codes: Vec<StartCode>, time: FrameTime) -> Self {
        Self {
            index: 0,
            data: data.into(),
            start_codes,
            time,
            flags: CodedFrameFlags::empty(),
            declared_length: None,
        }
    }

    /// 帧长度
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 是否为空帧
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 第 `i` 个起始码对应的数据, 到下一个起始码或帧尾为止
    pub fn start_code_data(&self, i: usize) -> Option<&[u8]> {
        let sc = self.start_codes.get(i)?;
        let end = self
            .start_codes
            .get(i + 1)
            .map_or(self.data.len(), |next| next.offset);
        self.data.get(sc.offset..end)
    }
}

/// 编码帧缓冲区分配器
///
/// 收集器在每帧开始时申请缓冲区, 分配失败会立即向调用方传播.
pub trait BufferAllocator: Send {
    /// 申请至少 `min_size` 字节容量的缓冲区
    fn allocate(&mut self, min_size: usize) -> LiuResult<BytesMut>;
}

/// 基于堆内存的默认分配器
#[derive(Debug, Clone)]
pub struct HeapAllocator {
    /// 单个缓冲区允许的最大容量
    max_size: usize,
    /// 已分配次数
    allocations: u64,
}

impl HeapAllocator {
    /// 创建分配器
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            allocations: 0,
        }
    }

    /// 已分配次数
    pub fn allocations(&self) -> u64 {
        self.allocations
    }
}

impl BufferAllocator for HeapAllocator {
    fn allocate(&mut self, min_size: usize) -> LiuResult<BytesMut> {
        if min_size > self.max_size {
            return Err(LiuError::BufferAllocation(format!(
                "请求 {} 字节, 上限 {} 字节",
                min_size, self.max_size
            )));
        }
        self.allocations += 1;
        Ok(BytesMut::with_capacity(min_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_code_data() {
        let data = vec![0x00, 0x00, 0x01, 0x0F, 0xAA, 0x00, 0x00, 0x01, 0x0D, 0xBB, 0xCC];
        let frame = CodedFrame::new(
            data,
            vec![
                StartCode {
                    offset: 0,
                    code: 0x0F,
                },
                StartCode {
                    offset: 5,
                    code: 0x0D,
                },
            ],
            FrameTime::none(),
        );
        assert_eq!(frame.start_code_data(0), Some(&[0x00, 0x00, 0x01, 0x0F, 0xAA][..]));
        assert_eq!(
            frame.start_code_data(1),
            Some(&[0x00, 0x00, 0x01, 0x0D, 0xBB, 0xCC][..])
        );
        assert_eq!(frame.start_code_data(2), None);
    }

    #[test]
    fn test_heap_allocator_limit() {
        let mut alloc = HeapAllocator::new(1024);
        let buf = alloc.allocate(512).unwrap();
        assert!(buf.capacity() >= 512);
        assert_eq!(alloc.allocations(), 1);
        let err = alloc.allocate(2048).expect_err("超出上限应返回错误");
        assert!(matches!(err, LiuError::BufferAllocation(_)));
    }
}
