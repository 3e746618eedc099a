//! 收集器与 VC-1 帧解析器串联.
//!
//! 正向播放时每个编码帧一输出就送入解析器. 反向播放时先收集全部编码帧,
//! 在 [`Pipeline::finish`] 中按图像组从后往前送入, 每组之后作一次连续反向跳变,
//! 模拟播放器的反向读取.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use log::{debug, info};

use liu_collator::{Collator, CollatorStatistics, CodedFrame};
use liu_core::{ErrorSeverity, LiuResult};
use liu_parser::vc1::start_code;
use liu_parser::{
    DecodeSink, FrameworkStatistics, ParsedFrame, PlayDirection, Vc1FrameParser, Vc1Picture,
};

use crate::config::PipelineConfig;

/// 流水线统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStatistics {
    /// 收集器输出的编码帧数
    pub coded_frames: u64,
    /// 解析失败而丢弃的编码帧数
    pub discarded_frames: u64,
    /// 反向播放送入的图像组数
    pub reverse_groups: u64,
    pub collator: CollatorStatistics,
    pub framework: FrameworkStatistics,
}

/// 收集器 + 帧解析器
///
/// 非 VC-1 格式只运行收集器, 编码帧由 [`Pipeline::take_coded`] 取出.
pub struct Pipeline<S: DecodeSink> {
    config: PipelineConfig,
    collator: Collator,
    parser: Vc1FrameParser<S>,
    coded: VecDeque<CodedFrame>,
    /// 反向播放中等待按组倒序送入的编码帧
    reverse_pending: Vec<CodedFrame>,
    coded_frames: u64,
    discarded_frames: u64,
    reverse_groups: u64,
}

impl<S: DecodeSink> Pipeline<S> {
    /// 按配置创建流水线
    pub fn new(config: PipelineConfig, sink: S) -> LiuResult<Self> {
        let collator = Collator::new(config.format_config())?;
        let parser = Vc1FrameParser::new(config.parser_config(), sink);
        info!(
            "创建流水线: format={}, direction={}, chunk_size={}",
            config.format, config.direction, config.chunk_size
        );
        Ok(Self {
            config,
            collator,
            parser,
            coded: VecDeque::new(),
            reverse_pending: Vec::new(),
            coded_frames: 0,
            discarded_frames: 0,
            reverse_groups: 0,
        })
    }

    /// 流水线配置
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 收集器
    pub fn collator(&self) -> &Collator {
        &self.collator
    }

    /// 帧解析器
    pub fn parser(&self) -> &Vc1FrameParser<S> {
        &self.parser
    }

    /// 解码事件接收方
    pub fn sink(&self) -> &S {
        self.parser.sink()
    }

    /// 统计信息
    pub fn statistics(&self) -> PipelineStatistics {
        PipelineStatistics {
            coded_frames: self.coded_frames,
            discarded_frames: self.discarded_frames,
            reverse_groups: self.reverse_groups,
            collator: self.collator.statistics(),
            framework: self.parser.statistics().clone(),
        }
    }

    /// 输入一段数据
    pub fn push(&mut self, chunk: &[u8]) -> LiuResult<()> {
        self.collator.input(chunk)?;
        self.dispatch()
    }

    /// 输入结束: 输出剩余的编码帧并冲刷解析器
    pub fn finish(&mut self) -> LiuResult<()> {
        self.collator.flush()?;
        self.dispatch()?;
        if !self.config.parses_vc1() {
            return Ok(());
        }
        match self.config.direction {
            PlayDirection::Forward => self.parser.purge(),
            PlayDirection::Reverse => self.play_reverse()?,
        }
        Ok(())
    }

    /// 按配置的块大小送入一段完整数据并结束
    pub fn run(&mut self, data: &[u8]) -> LiuResult<()> {
        for chunk in data.chunks(self.config.chunk_size) {
            self.push(chunk)?;
        }
        self.finish()
    }

    /// 从读取器读到结尾, 每次最多读取配置的块大小
    pub fn run_reader<R: Read>(&mut self, mut reader: R) -> LiuResult<()> {
        let mut buf = vec![0u8; self.config.chunk_size];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.push(&buf[..n])?;
        }
        self.finish()
    }

    /// 输入不连续, `surplus_data_injected` 为真时丢弃正在收集的帧
    pub fn input_jump(&mut self, surplus_data_injected: bool) -> LiuResult<()> {
        self.collator.input_jump(surplus_data_injected)?;
        self.dispatch()
    }

    /// 丢弃全部状态与未取出的输出
    pub fn reset(&mut self) {
        self.collator.reset();
        self.collator.drain_frames();
        self.parser.reset();
        self.coded.clear();
        self.reverse_pending.clear();
    }

    /// 取出下一个解析结果 (解码顺序)
    pub fn take_parsed(&mut self) -> Option<ParsedFrame<Vc1Picture>> {
        self.parser.take_parsed()
    }

    /// 取出下一个未经解析的编码帧 (非 VC-1 格式)
    pub fn take_coded(&mut self) -> Option<CodedFrame> {
        self.coded.pop_front()
    }

    fn dispatch(&mut self) -> LiuResult<()> {
        while let Some(frame) = self.collator.pop_frame() {
            self.coded_frames += 1;
            if !self.config.parses_vc1() {
                self.coded.push_back(frame);
            } else if self.config.direction == PlayDirection::Reverse {
                self.reverse_pending.push(frame);
            } else {
                self.parse(&frame)?;
            }
        }
        Ok(())
    }

    /// 解析一个编码帧, 只有组件级错误向上传递
    fn parse(&mut self, frame: &CodedFrame) -> LiuResult<()> {
        match self.parser.read_headers(frame) {
            Ok(()) => Ok(()),
            Err(e) if e.severity() == ErrorSeverity::FatalComponent => Err(e),
            Err(e) => {
                self.discarded_frames += 1;
                debug!("丢弃编码帧: index={}, {}", frame.index, e);
                Ok(())
            }
        }
    }

    fn play_reverse(&mut self) -> LiuResult<()> {
        let groups = split_groups(std::mem::take(&mut self.reverse_pending));
        info!("反向播放: {} 组图像", groups.len());
        for group in groups.into_iter().rev() {
            self.reverse_groups += 1;
            for frame in &group {
                self.parse(frame)?;
            }
            self.parser.input_jump(true);
        }
        // 最早一组中仍缺少参考的图像不再等待
        self.parser.input_jump(false);
        Ok(())
    }
}

impl<S: DecodeSink> std::fmt::Debug for Pipeline<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("collator_state", &self.collator.state())
            .field("parser", &self.parser)
            .field("coded_frames", &self.coded_frames)
            .finish()
    }
}

/// 按图像组切分编码帧: 以序列头或入口点开头的编码帧开始新的一组
pub fn split_groups(frames: Vec<CodedFrame>) -> Vec<Vec<CodedFrame>> {
    let mut groups: Vec<Vec<CodedFrame>> = Vec::new();
    for frame in frames {
        let starts_group = frame.start_codes.first().is_some_and(|sc| {
            sc.code == start_code::SEQUENCE_HEADER || sc.code == start_code::ENTRY_POINT
        });
        match groups.last_mut() {
            Some(group) if !starts_group => group.push(frame),
            _ => groups.push(vec![frame]),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use liu_collator::StartCode;
    use liu_core::FrameTime;
    use liu_parser::DecodeEvent;

    fn frame_with_codes(codes: &[u8]) -> CodedFrame {
        let start_codes = codes
            .iter()
            .enumerate()
            .map(|(i, &code)| StartCode {
                offset: i * 8,
                code,
            })
            .collect();
        CodedFrame::new(Bytes::from(vec![0u8; codes.len() * 8]), start_codes, FrameTime::none())
    }

    #[test]
    fn test_按图像组切分() {
        let frames = vec![
            frame_with_codes(&[0x0D]),
            frame_with_codes(&[0x0F, 0x0E, 0x0D]),
            frame_with_codes(&[0x0D]),
            frame_with_codes(&[0x0E, 0x0D]),
            frame_with_codes(&[0x0D, 0x0C]),
        ];
        let sizes: Vec<usize> = split_groups(frames).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1, 2, 2]);
        assert!(split_groups(Vec::new()).is_empty());
    }

    #[test]
    fn test_非_vc1_格式只输出编码帧() {
        let config = PipelineConfig {
            format: liu_collator::FormatId::Mpeg4Part2,
            ..PipelineConfig::default()
        };
        let mut pipeline = Pipeline::new(config, Vec::<DecodeEvent>::new()).unwrap();
        pipeline.run(&[]).unwrap();
        assert!(pipeline.take_coded().is_none());
        assert!(pipeline.take_parsed().is_none());
        assert_eq!(pipeline.statistics().coded_frames, 0);
    }

    #[test]
    fn test_reset_幂等() {
        let mut pipeline = Pipeline::new(PipelineConfig::default(), Vec::new()).unwrap();
        pipeline.push(&[0, 0, 1, 0xE0, 0, 0]).unwrap();
        pipeline.reset();
        pipeline.reset();
        assert_eq!(pipeline.collator().accumulated_len(), 0);
        assert!(pipeline.take_parsed().is_none());
    }
}
