//! PES 视频收集器.
//!
//! 收集器是一个可恢复的状态机: 每次 [`Collator::input`] 处理任意长度的输入,
//! 起始码、PES 头或填充包被输入边界截断时, 状态保存在 [`CollatorState`] 中,
//! 下一次调用继续处理.
//!
//! # 时间戳规则
//! 读到 PES 头时, 当前时间移入 "跨越时间", 新头部的 PTS/DTS 成为当前时间.
//! PES 头之后识别到的第一个起始码决定下一帧使用哪一个:
//! - 起始码开始于 PES 头之前 (跨越该头部): 使用跨越时间;
//! - 起始码紧接 PES 头: 使用当前时间;
//! - 起始码位于包内更靠后的位置: 当前时间无效时沿用跨越时间.
//!
//! 判断只依赖字节位置, 与输入如何分块无关. 每帧只取其一, 另一个被丢弃.

use std::collections::VecDeque;
use std::mem;

use bytes::BytesMut;
use liu_core::{FrameTime, LiuError, LiuResult};
use log::{debug, error, info, trace, warn};

use crate::format::FormatConfig;
use crate::frame::{BufferAllocator, CodedFrame, CodedFrameFlags, HeapAllocator, StartCode};
use crate::pes::{
    PES_INITIAL_HEADER_SIZE, PES_PADDING_HEADER_SIZE, PES_START_CODE_EXTENDED,
    PES_START_CODE_PADDING, PesHeader, ZERO_CODE_HEADER_SIZE, is_video_stream_id, padding_skip,
    parse_pes_header, pes_header_size,
};
use crate::scanner::{
    START_CODE_PREFIX, START_CODE_SIZE, ScanCursor, find_next_start_code, is_ignored,
    spanning_count,
};

/// 新帧缓冲区的初始容量
const INITIAL_FRAME_CAPACITY: usize = 64 * 1024;

/// 跨越检测保留的累积数据尾部长度
const SPANNING_TAIL: usize = 3;

/// 正在收集的头部类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderKind {
    /// `00 00 01 00`, 需要多看 3 字节判断是否被 PES 头截断
    ZeroCode,
    /// PES 包头
    Pes,
    /// 填充包头
    Padding,
    /// 普通起始码
    Generic,
    /// 控制数据 (保留, 不会进入)
    Control,
}

/// 头部收集进度
///
/// 已收集的 `current` 字节位于累积缓冲区末尾.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Staging {
    /// 头部类型
    pub kind: HeaderKind,
    /// 已收集字节数
    pub current: usize,
    /// 需要的字节数
    pub desired: usize,
    /// 头部开始时是否处于丢弃状态
    pub seeking: bool,
}

/// 收集器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollatorState {
    /// 丢弃数据, 直到下一个感兴趣的 PES 头
    Seeking,
    /// 正常累积
    Accumulating,
    /// 正在收集头部
    StagingHeader(Staging),
    /// 跳过填充数据
    SkippingPadding {
        /// 剩余待跳过的字节数
        remaining: usize,
        /// 填充结束后是否回到丢弃状态
        seeking: bool,
    },
    /// 起始码终止了当前帧, 待输出
    TerminatePending(Staging),
    /// 已停止
    Halted,
}

/// 收集器统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollatorStatistics {
    /// 输出的帧数
    pub frames_emitted: u64,
    /// 输入的字节数
    pub bytes_input: u64,
    /// 丢弃的字节数
    pub bytes_discarded: u64,
    /// 解析的 PES 头数量
    pub pes_headers: u64,
    /// 格式错误的 PES 头数量
    pub malformed_headers: u64,
    /// 检测到的丢包数
    pub lost_packets: u64,
    /// 超过最大尺寸被丢弃的帧数
    pub oversize_frames: u64,
    /// 跳过的填充字节数
    pub padding_bytes_skipped: u64,
    /// 起始码列表已满而未记录的起始码数量
    pub start_codes_dropped: u64,
}

/// 时间戳状态
#[derive(Debug, Clone, Copy, Default)]
struct TimingState {
    /// 最近一个 PES 头的时间
    current: FrameTime,
    /// 上一个 PES 头的时间, 供跨越该头部的起始码使用
    spanning: FrameTime,
    /// 下一帧是否使用跨越时间
    use_spanning: bool,
}

impl TimingState {
    fn on_pes_header(&mut self, time: FrameTime) {
        self.spanning = self.current;
        self.use_spanning = true;
        self.current = time;
    }

    fn clear_spanning(&mut self) {
        self.use_spanning = false;
        self.spanning = FrameTime::none();
    }

    /// 没有跨越的起始码时, 当前时间无效则沿用跨越时间
    fn promote_spanning(&mut self) {
        if !self.current.is_valid() && self.spanning.is_valid() {
            self.current = self.spanning;
        }
        self.clear_spanning();
    }

    fn take_for_next_frame(&mut self) -> FrameTime {
        if self.use_spanning {
            mem::take(&mut self.spanning)
        } else {
            mem::take(&mut self.current)
        }
    }
}

const fn scan_state(seeking: bool) -> CollatorState {
    if seeking {
        CollatorState::Seeking
    } else {
        CollatorState::Accumulating
    }
}

/// PES 视频收集器
pub struct Collator {
    /// 格式配置
    config: FormatConfig,
    /// 缓冲区分配器
    allocator: Box<dyn BufferAllocator>,
    /// 当前状态
    state: CollatorState,
    /// 当前帧的累积数据
    buffer: BytesMut,
    /// 当前帧的起始码列表
    start_codes: Vec<StartCode>,
    /// 当前帧是否已包含图像起始码
    picture_seen: bool,
    /// 最近一个 PES 头在累积数据中的位置, 跨越判断完成后清除
    pes_mark: Option<usize>,
    /// 当前帧的时间
    frame_time: FrameTime,
    /// 当前帧的标志
    frame_flags: CodedFrameFlags,
    /// 当前帧在私有头中声明的长度
    declared_length: Option<usize>,
    /// 时间戳状态
    timing: TimingState,
    /// 输出队列
    output: VecDeque<CodedFrame>,
    /// 统计
    stats: CollatorStatistics,
    /// 下一帧的输出序号
    next_index: u64,
}

impl Collator {
    /// 使用默认堆分配器创建收集器
    pub fn new(config: FormatConfig) -> LiuResult<Self> {
        let allocator = HeapAllocator::new(config.max_frame_size);
        Self::with_allocator(config, Box::new(allocator))
    }

    /// 使用指定分配器创建收集器
    pub fn with_allocator(
        config: FormatConfig,
        mut allocator: Box<dyn BufferAllocator>,
    ) -> LiuResult<Self> {
        if config.max_frame_size < START_CODE_SIZE + PES_INITIAL_HEADER_SIZE {
            return Err(LiuError::InvalidArgument(format!(
                "最大帧尺寸过小: {}",
                config.max_frame_size
            )));
        }
        let buffer = allocator.allocate(INITIAL_FRAME_CAPACITY.min(config.max_frame_size))?;
        info!(
            "创建收集器: format={}, max_frame_size={}, max_start_codes={}",
            config.format, config.max_frame_size, config.max_start_codes
        );
        Ok(Self {
            config,
            allocator,
            state: CollatorState::Seeking,
            buffer,
            start_codes: Vec::new(),
            picture_seen: false,
            pes_mark: None,
            frame_time: FrameTime::none(),
            frame_flags: CodedFrameFlags::empty(),
            declared_length: None,
            timing: TimingState::default(),
            output: VecDeque::new(),
            stats: CollatorStatistics::default(),
            next_index: 0,
        })
    }

    /// 格式配置
    pub fn config(&self) -> &FormatConfig {
        &self.config
    }

    /// 当前状态
    pub fn state(&self) -> CollatorState {
        self.state
    }

    /// 统计信息
    pub fn statistics(&self) -> CollatorStatistics {
        self.stats
    }

    /// 当前帧已累积的字节数
    pub fn accumulated_len(&self) -> usize {
        self.buffer.len()
    }

    /// 取出一帧 (按输出顺序)
    pub fn pop_frame(&mut self) -> Option<CodedFrame> {
        self.output.pop_front()
    }

    /// 取出所有已输出的帧
    pub fn drain_frames(&mut self) -> Vec<CodedFrame> {
        self.output.drain(..).collect()
    }

    /// 输入一段数据
    pub fn input(&mut self, chunk: &[u8]) -> LiuResult<()> {
        if self.state == CollatorState::Halted {
            return Err(LiuError::InvalidState("收集器已停止".into()));
        }
        self.stats.bytes_input += chunk.len() as u64;

        let mut cursor = ScanCursor::new(chunk);
        loop {
            match self.state {
                CollatorState::Halted => {
                    return Err(LiuError::InvalidState("收集器已停止".into()));
                }
                CollatorState::StagingHeader(staging) => {
                    if !self.stage_header(staging, &mut cursor)? {
                        break;
                    }
                }
                CollatorState::SkippingPadding { remaining, seeking } => {
                    let skipped = cursor.advance(remaining);
                    self.stats.padding_bytes_skipped += skipped as u64;
                    if skipped < remaining {
                        self.state = CollatorState::SkippingPadding {
                            remaining: remaining - skipped,
                            seeking,
                        };
                        break;
                    }
                    self.state = scan_state(seeking);
                }
                CollatorState::TerminatePending(staging) => self.terminate_frame(staging)?,
                CollatorState::Seeking | CollatorState::Accumulating => {
                    if cursor.is_empty() {
                        break;
                    }
                    let seeking = self.state == CollatorState::Seeking;
                    self.scan(&mut cursor, seeking);
                }
            }
        }
        Ok(())
    }

    /// 输入结束: 输出已累积的帧
    pub fn flush(&mut self) -> LiuResult<()> {
        let seeking = match self.state {
            CollatorState::Halted => {
                return Err(LiuError::InvalidState("收集器已停止".into()));
            }
            CollatorState::Seeking => true,
            CollatorState::StagingHeader(staging) => staging.seeking,
            CollatorState::SkippingPadding { seeking, .. } => seeking,
            CollatorState::Accumulating | CollatorState::TerminatePending(_) => false,
        };
        if seeking {
            self.drop_frame(0);
        } else {
            self.flush_frame()?;
        }
        self.state = CollatorState::Accumulating;
        Ok(())
    }

    /// 重置到初始状态
    ///
    /// 清空累积数据、头部收集、起始码列表和时间戳, 已输出的帧保留. 可重复调用.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.start_codes.clear();
        self.picture_seen = false;
        self.pes_mark = None;
        self.frame_time = FrameTime::none();
        self.frame_flags = CodedFrameFlags::empty();
        self.declared_length = None;
        self.timing = TimingState::default();
        self.state = CollatorState::Seeking;
    }

    /// 停止收集器, 之后的输入返回 [`LiuError::InvalidState`]
    pub fn halt(&mut self) {
        self.reset();
        self.output.clear();
        self.state = CollatorState::Halted;
        info!("收集器已停止: {:?}", self.stats);
    }

    /// 丢弃当前帧和正在收集的头部, 等待下一个 PES 头
    pub fn discard_accumulated(&mut self) {
        if self.state == CollatorState::Halted {
            return;
        }
        self.drop_frame(0);
        self.timing.clear_spanning();
        self.state = CollatorState::Seeking;
    }

    /// 输入不连续
    ///
    /// `surplus_data_injected` 为真时丢弃当前帧, 否则先输出它.
    /// 所有时间戳失效, 下一帧带 [`CodedFrameFlags::DISCONTINUITY`].
    pub fn input_jump(&mut self, surplus_data_injected: bool) -> LiuResult<()> {
        if self.state == CollatorState::Halted {
            return Err(LiuError::InvalidState("收集器已停止".into()));
        }
        if surplus_data_injected {
            self.discard_accumulated();
        } else {
            self.flush()?;
        }
        self.timing = TimingState::default();
        self.pes_mark = None;
        self.frame_time = FrameTime::none();
        self.frame_flags |= CodedFrameFlags::DISCONTINUITY;
        debug!("输入不连续: surplus={}", surplus_data_injected);
        Ok(())
    }

    // ========================
    // 扫描
    // ========================

    /// 查找下一个起始码并开始收集它的头部
    fn scan(&mut self, cursor: &mut ScanCursor<'_>, seeking: bool) {
        let data = cursor.remaining();
        let tail_start = self.buffer.len().saturating_sub(SPANNING_TAIL);
        let mut count = spanning_count(&self.buffer[tail_start..], data);

        if count == 0 && data.starts_with(&START_CODE_PREFIX) {
            count = START_CODE_SIZE;
        }

        // 可能存在跨越的起始码, 等待更多数据
        if count > data.len() {
            self.take_pending(cursor, seeking);
            return;
        }

        if count != 0 && is_ignored(self.config.ignore_codes, data[count - 1]) {
            count = 0;
        }

        let run_len = if count != 0 {
            count
        } else {
            match find_next_start_code(data, self.config.ignore_codes) {
                Some(offset) => offset + START_CODE_SIZE,
                None => {
                    self.take_pending(cursor, seeking);
                    return;
                }
            }
        };

        let run = cursor.take(run_len);
        let seeking = self.take_run(run, seeking, START_CODE_SIZE);
        let code_start = self.buffer.len() - START_CODE_SIZE;
        self.resolve_timing(Some(code_start));

        let code = self.buffer[self.buffer.len() - 1];
        self.stage_code(code, seeking);
    }

    /// 没有完整的起始码: 累积剩余数据, 末尾保留可能的起始码前缀
    fn take_pending(&mut self, cursor: &mut ScanCursor<'_>, seeking: bool) {
        let run = cursor.take(cursor.len());
        let seeking = self.take_run(run, seeking, SPANNING_TAIL);
        self.resolve_timing(None);
        self.state = scan_state(seeking);
    }

    /// 根据 PES 头之后第一个起始码的位置决定下一帧的时间来源
    fn resolve_timing(&mut self, code_start: Option<usize>) {
        let Some(mark) = self.pes_mark else {
            return;
        };
        match code_start {
            Some(start) if start < mark => {}
            Some(start) if start == mark => self.timing.clear_spanning(),
            Some(_) => self.timing.promote_spanning(),
            // 之后的起始码不可能再开始于头部之前或恰好在头部处
            None if self.buffer.len() > mark + SPANNING_TAIL => self.timing.promote_spanning(),
            None => return,
        }
        self.pes_mark = None;
    }

    /// 根据起始码标识选择头部类型
    ///
    /// 起始码的 4 字节已位于缓冲区末尾.
    fn stage_code(&mut self, code: u8, seeking: bool) {
        let staging = |kind, desired| {
            CollatorState::StagingHeader(Staging {
                kind,
                current: START_CODE_SIZE,
                desired,
                seeking,
            })
        };

        self.state = if code == 0x00 {
            staging(HeaderKind::ZeroCode, ZERO_CODE_HEADER_SIZE)
        } else if is_video_stream_id(code) {
            if self.config.accepts_stream_id(code) {
                staging(HeaderKind::Pes, PES_INITIAL_HEADER_SIZE)
            } else {
                debug!("忽略不感兴趣的 PES 包: stream_id=0x{:02X}", code);
                self.drop_frame(0);
                CollatorState::Seeking
            }
        } else if code == PES_START_CODE_PADDING {
            staging(HeaderKind::Padding, PES_PADDING_HEADER_SIZE)
        } else if seeking {
            self.drop_frame(0);
            CollatorState::Seeking
        } else {
            let desired = START_CODE_SIZE + self.config.required_presentation_length(code);
            staging(HeaderKind::Generic, desired)
        };
    }

    // ========================
    // 头部收集
    // ========================

    /// 收集头部字节; 返回 false 表示输入已用完, 需要等待下一次调用
    fn stage_header(
        &mut self,
        mut staging: Staging,
        cursor: &mut ScanCursor<'_>,
    ) -> LiuResult<bool> {
        if staging.current < staging.desired {
            let bytes = cursor.take(staging.desired - staging.current);
            if self.accumulate(bytes, 0) {
                self.state = CollatorState::Seeking;
                return Ok(true);
            }
            staging.current += bytes.len();
        }

        if staging.current < staging.desired {
            self.state = CollatorState::StagingHeader(staging);
            return Ok(false);
        }

        self.complete_header(staging)?;
        Ok(true)
    }

    fn complete_header(&mut self, staging: Staging) -> LiuResult<()> {
        match staging.kind {
            HeaderKind::ZeroCode => {
                self.complete_zero_code(staging);
                Ok(())
            }
            HeaderKind::Pes => self.complete_pes_header(staging),
            HeaderKind::Padding => {
                self.complete_padding_header(staging);
                Ok(())
            }
            HeaderKind::Generic => self.complete_generic_header(staging),
            HeaderKind::Control => {
                self.state = scan_state(staging.seeking);
                Ok(())
            }
        }
    }

    /// `00 00 01 00 00 01 xx`: 第一个前缀被 PES/填充包头截断时, 重新识别后面的头部
    fn complete_zero_code(&mut self, staging: Staging) {
        let start = self.buffer.len() - staging.current;
        let header = &self.buffer[start..];
        let id = header[6];

        if header[4] == 0x00
            && header[5] == 0x01
            && (id == PES_START_CODE_PADDING || is_video_stream_id(id))
        {
            trace!("零起始码后紧跟 PES 头, 重新识别为 0x{:02X}", id);
            self.stage_code(id, staging.seeking);
        } else if staging.seeking {
            self.drop_frame(0);
            self.state = CollatorState::Seeking;
        } else {
            self.state = CollatorState::StagingHeader(Staging {
                kind: HeaderKind::Generic,
                desired: START_CODE_SIZE + self.config.required_presentation_length(0x00),
                ..staging
            });
        }
    }

    fn complete_pes_header(&mut self, staging: Staging) -> LiuResult<()> {
        let start = self.buffer.len() - staging.current;
        let required =
            pes_header_size(&self.buffer[start..]) + self.config.extended_header_length;
        if staging.current < required {
            self.state = CollatorState::StagingHeader(Staging {
                desired: required,
                ..staging
            });
            return Ok(());
        }

        // 从累积数据中移除头部, 多收集的字节稍后放回
        let mut header = self.buffer.split_off(start);
        let extra = header.split_off(required);
        self.stats.pes_headers += 1;

        let parsed = parse_pes_header(&header, self.config.extended_header_length)
            .and_then(|pes| self.check_sub_stream(pes));
        match parsed {
            Ok(pes) => {
                self.handle_pes_header(&pes, staging.seeking)?;
                // MPEG-1 头部可能比初始收集的字节短
                if !extra.is_empty() && self.accumulate(&extra, SPANNING_TAIL) {
                    self.state = CollatorState::Seeking;
                }
            }
            Err(err) => {
                if matches!(err, LiuError::MalformedPesHeader(_)) {
                    self.stats.malformed_headers += 1;
                    error!("丢弃当前帧: {}", err);
                } else {
                    debug!("跳过 PES 包: {}", err);
                }
                self.drop_frame(0);
                self.take_run(&extra, true, SPANNING_TAIL);
                self.state = CollatorState::Seeking;
            }
        }
        Ok(())
    }

    /// 扩展 stream_id 的子流过滤
    fn check_sub_stream(&self, pes: PesHeader) -> LiuResult<PesHeader> {
        let Some(sub) = pes.sub_stream_id.filter(|_| pes.stream_id == PES_START_CODE_EXTENDED)
        else {
            return Ok(pes);
        };
        if !self.config.accepts_sub_stream_id(sub) {
            return Err(LiuError::Unsupported(format!(
                "子流 0x{:02X} 不匹配 (掩码 0x{:02X}, 值 0x{:02X})",
                sub, self.config.sub_stream_id_mask, self.config.sub_stream_id_code
            )));
        }
        Ok(pes)
    }

    fn handle_pes_header(&mut self, pes: &PesHeader, seeking: bool) -> LiuResult<()> {
        self.timing.on_pes_header(pes.time);

        if seeking {
            self.drop_frame(0);
        } else if self.config.frame_per_packet && !self.check_lost_packet() {
            self.flush_frame()?;
        }

        if self.config.frame_per_packet {
            self.declared_length = pes.private_frame_length();
            self.frame_flags |= CodedFrameFlags::FRAME_PER_PACKET;
        }

        self.state = CollatorState::Accumulating;

        // 帧从这个包开始, 时间直接归属于它
        if self.buffer.is_empty() && self.timing.current.is_valid() {
            self.frame_time = mem::take(&mut self.timing.current);
        }
        self.pes_mark = self.timing.use_spanning.then_some(self.buffer.len());

        trace!(
            "PES 头: stream_id=0x{:02X}, time={}, payload={}",
            pes.stream_id, pes.time, pes.payload_length
        );
        Ok(())
    }

    fn complete_padding_header(&mut self, staging: Staging) {
        let start = self.buffer.len() - staging.current;
        let skip = padding_skip(&self.buffer[start..]);
        self.buffer.truncate(start);

        if self.config.frame_per_packet && !staging.seeking {
            self.check_lost_packet();
        }

        self.state = if skip == 0 {
            scan_state(staging.seeking)
        } else {
            CollatorState::SkippingPadding {
                remaining: skip,
                seeking: staging.seeking,
            }
        };
    }

    fn complete_generic_header(&mut self, staging: Staging) -> LiuResult<()> {
        let offset = self.buffer.len() - staging.current;
        let code = self.buffer[offset + 3];

        if self.config.is_terminal(code) {
            self.record_start_code(offset, code);
            self.frame_flags |= CodedFrameFlags::END_OF_SEQUENCE;
            self.flush_frame()?;
            self.state = CollatorState::Accumulating;
        } else if self.config.terminates_frame(code, self.picture_seen) {
            self.state = CollatorState::TerminatePending(staging);
        } else {
            self.record_start_code(offset, code);
            self.state = CollatorState::Accumulating;
        }
        Ok(())
    }

    /// 输出当前帧, 终止它的起始码成为下一帧的第一个起始码
    fn terminate_frame(&mut self, staging: Staging) -> LiuResult<()> {
        let start = self.buffer.len() - staging.current;
        let header = self.buffer.split_off(start);

        if let Err(err) = self.flush_frame() {
            self.buffer.unsplit(header);
            return Err(err);
        }

        let code = header[3];
        self.buffer.extend_from_slice(&header);
        self.record_start_code(0, code);
        self.state = CollatorState::Accumulating;
        Ok(())
    }

    // ========================
    // 累积与输出
    // ========================

    /// 累积一段数据, 返回之后是否处于丢弃状态
    fn take_run(&mut self, run: &[u8], seeking: bool, keep: usize) -> bool {
        if seeking {
            self.discard_run(run, keep);
            return true;
        }
        self.accumulate(run, keep)
    }

    /// 丢弃状态下只保留末尾 `keep` 字节, 供起始码跨越检测和头部收集使用
    fn discard_run(&mut self, run: &[u8], keep: usize) {
        let from_run = run.len().min(keep);
        self.buffer.extend_from_slice(&run[run.len() - from_run..]);
        self.stats.bytes_discarded += (run.len() - from_run) as u64;
        if self.buffer.len() > keep {
            let excess = self.buffer.len() - keep;
            let _ = self.buffer.split_to(excess);
            self.stats.bytes_discarded += excess as u64;
        }
    }

    /// 追加数据; 超过最大帧尺寸时丢弃当前帧 (保留末尾 `keep` 字节) 并返回 true
    fn accumulate(&mut self, data: &[u8], keep: usize) -> bool {
        let limit = self.config.max_frame_size;
        let size = self.buffer.len() + data.len();
        if size <= limit {
            self.buffer.extend_from_slice(data);
            return false;
        }

        error!("{}", LiuError::FrameTooLarge { size, limit });
        self.stats.oversize_frames += 1;
        self.buffer.extend_from_slice(data);
        self.drop_frame(keep);
        true
    }

    /// 丢弃当前帧, 保留缓冲区末尾 `keep` 字节
    fn drop_frame(&mut self, keep: usize) {
        let keep = keep.min(self.buffer.len());
        let excess = self.buffer.len() - keep;
        if excess > 0 {
            let _ = self.buffer.split_to(excess);
            self.stats.bytes_discarded += excess as u64;
        }
        self.start_codes.clear();
        self.picture_seen = false;
        self.declared_length = None;
        self.frame_time = FrameTime::none();
        self.frame_flags &= CodedFrameFlags::DISCONTINUITY;
        self.pes_mark = None;
        self.timing.promote_spanning();
    }

    /// 每包一帧: 声明长度大于实际累积长度时判定为丢包并丢弃当前帧
    fn check_lost_packet(&mut self) -> bool {
        let Some(expected) = self.declared_length else {
            return false;
        };
        let actual = self.buffer.len();
        if expected <= actual {
            return false;
        }
        error!("{}", LiuError::LostPacket { expected, actual });
        self.stats.lost_packets += 1;
        self.drop_frame(0);
        true
    }

    fn record_start_code(&mut self, offset: usize, code: u8) {
        if self.config.is_frame_start(code) {
            self.picture_seen = true;
        }
        if self.start_codes.len() >= self.config.max_start_codes {
            warn!(
                "起始码列表已满, 丢弃: code=0x{:02X}, offset={}, max={}",
                code, offset, self.config.max_start_codes
            );
            self.stats.start_codes_dropped += 1;
            self.frame_flags |= CodedFrameFlags::START_CODES_TRUNCATED;
            return;
        }
        self.start_codes.push(StartCode { offset, code });
    }

    /// 输出当前帧; 空帧不输出, 保留已附加的时间
    fn flush_frame(&mut self) -> LiuResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let fresh = self
            .allocator
            .allocate(INITIAL_FRAME_CAPACITY.min(self.config.max_frame_size))?;
        let data = mem::replace(&mut self.buffer, fresh).freeze();
        let next_time = self.timing.take_for_next_frame();

        let frame = CodedFrame {
            index: self.next_index,
            data,
            start_codes: mem::take(&mut self.start_codes),
            time: mem::replace(&mut self.frame_time, next_time),
            flags: mem::take(&mut self.frame_flags),
            declared_length: self.declared_length.take(),
        };
        self.picture_seen = false;

        debug!(
            "输出帧 #{}: {} 字节, {} 个起始码, time={}",
            frame.index,
            frame.len(),
            frame.start_codes.len(),
            frame.time
        );
        self.next_index += 1;
        self.stats.frames_emitted += 1;
        self.output.push_back(frame);
        Ok(())
    }
}
