//! 解码协作者事件.
//!
//! 帧解析器不直接操作解码缓冲区, 而是把参考帧释放、部分解码冲刷等
//! 通知以 [`DecodeEvent`] 的形式发送给 [`DecodeSink`].

use std::sync::mpsc::Sender;

use log::warn;

/// 发给解码协作者的事件
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DecodeEvent {
    /// 释放指定解码序号的参考帧
    ReleaseReferenceFrame(u64),
    /// 释放全部参考帧 (不连续或重置后)
    ReleaseAllReferenceFrames,
    /// 冲刷尚未完成的部分解码 (场序列错误)
    FlushPartialDecode,
    /// 码流不可播放
    StreamUnplayable(String),
}

/// 解码事件接收方
pub trait DecodeSink {
    /// 接收一个事件
    fn send_event(&mut self, event: DecodeEvent);
}

impl DecodeSink for Vec<DecodeEvent> {
    fn send_event(&mut self, event: DecodeEvent) {
        self.push(event);
    }
}

impl DecodeSink for Sender<DecodeEvent> {
    fn send_event(&mut self, event: DecodeEvent) {
        if let Err(e) = self.send(event) {
            warn!("解码事件接收方已关闭, 丢弃事件: {:?}", e.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_vec_sink_保持顺序() {
        let mut sink: Vec<DecodeEvent> = Vec::new();
        sink.send_event(DecodeEvent::ReleaseReferenceFrame(3));
        sink.send_event(DecodeEvent::FlushPartialDecode);
        assert_eq!(
            sink,
            vec![
                DecodeEvent::ReleaseReferenceFrame(3),
                DecodeEvent::FlushPartialDecode
            ]
        );
    }

    #[test]
    fn test_channel_sink() {
        let (mut tx, rx) = mpsc::channel();
        tx.send_event(DecodeEvent::ReleaseAllReferenceFrames);
        assert_eq!(rx.recv().unwrap(), DecodeEvent::ReleaseAllReferenceFrames);

        // 接收方关闭后发送不应 panic
        drop(rx);
        tx.send_event(DecodeEvent::FlushPartialDecode);
    }
}
