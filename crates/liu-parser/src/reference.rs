//! 参考帧列表与反向播放队列.
//!
//! 参考帧列表是一个有界 FIFO, 记录可被后续图像引用的解码缓冲区序号.
//! 正向播放时参考帧在最后一场入列, 列表已满则淘汰最旧的一项;
//! 反向播放时整组参考帧先依次入列, 展开解码栈时再从尾部逐个移除.
//! 每次释放都以 [`DecodeEvent`] 通知解码协作者.

use std::collections::VecDeque;

use log::{debug, error};

use liu_core::{LiuError, LiuResult};

use crate::event::{DecodeEvent, DecodeSink};

/// VC-1 正向解码所需的最大参考帧数 (B 图像需要两个)
pub const VC1_MAX_REFERENCE_FRAMES: usize = 2;

/// 反向播放时一组图像内允许同时记录的参考帧数
pub const REVERSE_MAX_REFERENCE_FRAMES: usize = 32;

/// 参考帧列表
#[derive(Debug, Clone)]
pub struct ReferenceFrameList {
    /// 解码序号, 最旧的在前
    entries: VecDeque<u64>,
    /// 正向播放时的容量
    capacity: usize,
}

impl ReferenceFrameList {
    /// 创建指定正向容量的列表
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(REVERSE_MAX_REFERENCE_FRAMES),
            capacity,
        }
    }

    /// 当前记录的参考帧数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 正向播放时的容量
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 当前记录的解码序号, 最旧的在前
    pub fn entries(&self) -> Vec<u64> {
        self.entries.iter().copied().collect()
    }

    /// 为即将解码的图像准备参考列表
    ///
    /// 取列表末尾的 `needed` 项. 场图像的第二场为 P 且列表为空时,
    /// 该场引用自身所在的解码缓冲区 (`self_index`), 即 `I P P P` 场序列的起始情形.
    pub fn prepare(&self, needed: usize, second_field: bool, self_index: u64) -> LiuResult<Vec<u64>> {
        let self_reference = second_field && needed == 1 && self.entries.is_empty();
        if self_reference {
            return Ok(vec![self_index]);
        }
        if self.entries.len() < needed {
            return Err(LiuError::InsufficientReferences {
                needed,
                available: self.entries.len(),
            });
        }
        let skip = self.entries.len() - needed;
        Ok(self.entries.iter().skip(skip).copied().collect())
    }

    /// 正向播放的列表更新
    ///
    /// 参考帧在最后一场时入列, 列表已满先释放最旧的一项;
    /// 参考帧的第一场立即通知解码器释放自身.
    pub fn for_play_update(
        &mut self,
        decode_index: u64,
        reference: bool,
        last_field: bool,
        sink: &mut dyn DecodeSink,
    ) {
        if !reference {
            return;
        }
        if !last_field {
            sink.send_event(DecodeEvent::ReleaseReferenceFrame(decode_index));
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.entries.pop_front() {
                debug!("参考帧列表已满, 淘汰 decode_index={}", oldest);
                sink.send_event(DecodeEvent::ReleaseReferenceFrame(oldest));
            }
        }
        self.entries.push_back(decode_index);
    }

    /// 反向播放: 参考帧在最后一场时追加到列表尾部
    pub fn rev_play_append(&mut self, decode_index: u64, reference: bool, last_field: bool) -> LiuResult<()> {
        if !(reference && last_field) {
            return Ok(());
        }
        if self.entries.len() >= REVERSE_MAX_REFERENCE_FRAMES {
            error!(
                "反向播放参考帧列表已满: decode_index={}, 容量={}",
                decode_index, REVERSE_MAX_REFERENCE_FRAMES
            );
            return Err(LiuError::Internal("反向播放参考帧列表已满".into()));
        }
        self.entries.push_back(decode_index);
        Ok(())
    }

    /// 反向播放: 展开解码栈时参考帧在最后一场移出列表并释放
    pub fn rev_play_remove(&mut self, decode_index: u64, last_field: bool, sink: &mut dyn DecodeSink) {
        if self.entries.is_empty() || !last_field {
            return;
        }
        sink.send_event(DecodeEvent::ReleaseReferenceFrame(decode_index));
        self.entries.pop_back();
    }

    /// 丢弃列表内容, 不通知解码器 (反向展开结束后)
    pub fn junk(&mut self) {
        self.entries.clear();
    }

    /// 清空列表并通知解码器释放全部参考帧
    pub fn reset(&mut self, sink: &mut dyn DecodeSink) {
        sink.send_event(DecodeEvent::ReleaseAllReferenceFrames);
        self.entries.clear();
    }
}

/// 反向播放时等待显示序号的非参考图像
///
/// 按入队顺序取出: 遇到参考图像时先为参考图像编号, 再依次为队列中的图像编号.
#[derive(Debug, Clone, Default)]
pub struct ReverseQueue {
    ring: VecDeque<u64>,
}

impl ReverseQueue {
    /// 创建空队列
    pub fn new() -> Self {
        Self::default()
    }

    /// 放入一个解码序号
    pub fn insert(&mut self, decode_index: u64) {
        self.ring.push_back(decode_index);
    }

    /// 取出最早放入的解码序号
    pub fn extract(&mut self) -> Option<u64> {
        self.ring.pop_front()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// 清空队列, 返回未处理的解码序号
    pub fn flush(&mut self) -> Vec<u64> {
        self.ring.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_正向列表淘汰并发送释放事件() {
        let mut list = ReferenceFrameList::new(VC1_MAX_REFERENCE_FRAMES);
        let mut events: Vec<DecodeEvent> = Vec::new();
        for index in 0..5 {
            list.for_play_update(index, true, true, &mut events);
            assert!(list.len() <= 2, "参考帧列表不应超过两项");
        }
        assert_eq!(list.entries(), vec![3, 4]);
        assert_eq!(
            events,
            vec![
                DecodeEvent::ReleaseReferenceFrame(0),
                DecodeEvent::ReleaseReferenceFrame(1),
                DecodeEvent::ReleaseReferenceFrame(2),
            ]
        );
    }

    #[test]
    fn test_参考帧第一场立即释放() {
        let mut list = ReferenceFrameList::new(VC1_MAX_REFERENCE_FRAMES);
        let mut events: Vec<DecodeEvent> = Vec::new();
        list.for_play_update(7, true, false, &mut events);
        assert!(list.is_empty());
        assert_eq!(events, vec![DecodeEvent::ReleaseReferenceFrame(7)]);

        // 非参考帧不改变列表
        list.for_play_update(8, false, true, &mut events);
        assert!(list.is_empty());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_prepare_取末尾参考帧() {
        let mut list = ReferenceFrameList::new(VC1_MAX_REFERENCE_FRAMES);
        let mut events: Vec<DecodeEvent> = Vec::new();
        list.for_play_update(10, true, true, &mut events);
        list.for_play_update(11, true, true, &mut events);
        assert_eq!(list.prepare(1, false, 12).unwrap(), vec![11]);
        assert_eq!(list.prepare(2, false, 12).unwrap(), vec![10, 11]);
        assert!(list.prepare(0, false, 12).unwrap().is_empty());
    }

    #[test]
    fn test_prepare_参考帧不足() {
        let list = ReferenceFrameList::new(VC1_MAX_REFERENCE_FRAMES);
        let err = list.prepare(1, false, 0).expect_err("参考帧不足时应返回错误");
        assert!(matches!(
            err,
            LiuError::InsufficientReferences {
                needed: 1,
                available: 0
            }
        ));
    }

    #[test]
    fn test_prepare_第二场自引用() {
        let list = ReferenceFrameList::new(VC1_MAX_REFERENCE_FRAMES);
        assert_eq!(list.prepare(1, true, 42).unwrap(), vec![42]);
        // 第二场为 B 时不允许自引用
        assert!(list.prepare(2, true, 42).is_err());
    }

    #[test]
    fn test_反向追加与移除() {
        let mut list = ReferenceFrameList::new(VC1_MAX_REFERENCE_FRAMES);
        let mut events: Vec<DecodeEvent> = Vec::new();
        for index in 0..4 {
            list.rev_play_append(index, true, true).unwrap();
        }
        // 反向时不受正向容量限制
        assert_eq!(list.len(), 4);
        list.rev_play_append(9, false, true).unwrap();
        list.rev_play_append(9, true, false).unwrap();
        assert_eq!(list.len(), 4);

        list.rev_play_remove(3, true, &mut events);
        list.rev_play_remove(2, false, &mut events);
        assert_eq!(list.entries(), vec![0, 1, 2]);
        assert_eq!(events, vec![DecodeEvent::ReleaseReferenceFrame(3)]);

        list.junk();
        assert!(list.is_empty());
        list.rev_play_remove(1, true, &mut events);
        assert_eq!(events.len(), 1, "空列表移除不应发送事件");
    }

    #[test]
    fn test_反向列表已满() {
        let mut list = ReferenceFrameList::new(VC1_MAX_REFERENCE_FRAMES);
        for index in 0..REVERSE_MAX_REFERENCE_FRAMES as u64 {
            list.rev_play_append(index, true, true).unwrap();
        }
        list.rev_play_append(99, true, true)
            .expect_err("反向列表已满时应返回错误");
    }

    #[test]
    fn test_reset_释放全部() {
        let mut list = ReferenceFrameList::new(VC1_MAX_REFERENCE_FRAMES);
        let mut events: Vec<DecodeEvent> = Vec::new();
        list.for_play_update(1, true, true, &mut events);
        list.reset(&mut events);
        assert!(list.is_empty());
        assert_eq!(events, vec![DecodeEvent::ReleaseAllReferenceFrames]);
    }

    #[test]
    fn test_reverse_queue_先进先出() {
        let mut queue = ReverseQueue::new();
        queue.insert(5);
        queue.insert(6);
        queue.insert(7);
        assert_eq!(queue.extract(), Some(5));
        assert_eq!(queue.flush(), vec![6, 7]);
        assert!(queue.is_empty());
        assert_eq!(queue.extract(), None);
    }
}
