//! 视频帧解析通用框架.
//!
//! 与具体编码无关的部分: 解析结果描述、显示序号与 PTS/DTS 推导、
//! 正向播放时参考帧显示序号的延迟分配, 以及反向播放的解码栈.
//!
//! 解析结果按解码顺序进入输出队列. 显示序号尚未确定的帧
//! (正向播放中被延迟的参考帧, 反向播放中等待展开的整组图像)
//! 会挡住其后的帧, 直到序号确定后才能被取出.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use liu_core::timestamp::{PES_TIMESTAMP_MASK, ticks_for_fields, wrapping_offset};
use liu_core::{FrameTime, LiuResult, Rational};

use crate::event::{DecodeEvent, DecodeSink};
use crate::reference::{ReferenceFrameList, ReverseQueue};

/// PTS 与 DTS 的最大合理差值 (4 秒, 90kHz)
pub const MAXIMUM_DECODE_TIME_OFFSET: u64 = 4 * 90_000;

/// 播放方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayDirection {
    /// 正向播放
    #[default]
    Forward,
    /// 反向播放 (按组输入, 组内仍为解码顺序)
    Reverse,
}

impl fmt::Display for PlayDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Reverse => write!(f, "reverse"),
        }
    }
}

/// 图像结构
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PictureStructure {
    /// 顶场
    TopField,
    /// 底场
    BottomField,
    /// 帧
    Frame,
}

impl PictureStructure {
    /// 位表示: 顶场 1, 底场 2, 帧 3 (两场按位或得到帧)
    pub const fn bits(self) -> u8 {
        match self {
            Self::TopField => 1,
            Self::BottomField => 2,
            Self::Frame => 3,
        }
    }

    /// 是否为场
    pub const fn is_field(self) -> bool {
        !matches!(self, Self::Frame)
    }
}

impl fmt::Display for PictureStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TopField => write!(f, "top"),
            Self::BottomField => write!(f, "bottom"),
            Self::Frame => write!(f, "frame"),
        }
    }
}

/// 条带类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceType {
    /// 帧内
    I,
    /// 前向预测
    P,
    /// 双向预测
    B,
}

impl fmt::Display for SliceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I => write!(f, "I"),
            Self::P => write!(f, "P"),
            Self::B => write!(f, "B"),
        }
    }
}

/// 全景扫描窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PanScanWindow {
    /// 水平偏移 (1/16 像素)
    pub horizontal_offset: u32,
    /// 垂直偏移 (1/16 像素)
    pub vertical_offset: u32,
    /// 宽度
    pub width: u32,
    /// 高度
    pub height: u32,
}

/// 图像内容描述
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoContent {
    /// 编码宽度
    pub width: u32,
    /// 编码高度
    pub height: u32,
    /// 显示宽度
    pub display_width: u32,
    /// 显示高度
    pub display_height: u32,
    /// 显示窗口水平位置
    pub display_x: u32,
    /// 显示窗口垂直位置
    pub display_y: u32,
    /// 是否为逐行序列
    pub progressive: bool,
    /// 帧率
    pub frame_rate: Rational,
    /// 像素宽高比
    pub pixel_aspect_ratio: Rational,
}

impl Default for VideoContent {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            display_width: 0,
            display_height: 0,
            display_x: 0,
            display_y: 0,
            progressive: true,
            frame_rate: Rational::FRAME_RATE_23_976,
            pixel_aspect_ratio: Rational::ONE,
        }
    }
}

impl VideoContent {
    /// 场率: 隔行序列为帧率的两倍
    pub fn field_rate(&self) -> Rational {
        if self.progressive {
            self.frame_rate
        } else {
            self.frame_rate.mul_int(2)
        }
    }
}

/// 解码相关的图像参数
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedVideoParameters {
    /// 内容描述
    pub content: VideoContent,
    /// 条带类型 (跳过图像没有条带类型)
    pub slice_type: Option<SliceType>,
    /// 图像结构
    pub picture_structure: PictureStructure,
    /// 是否为隔行帧
    pub interlaced_frame: bool,
    /// 顶场优先
    pub top_field_first: bool,
    /// 两个显示计数 (以场为单位)
    pub display_count: [u32; 2],
    /// 全景扫描窗口
    pub pan_scan: Vec<PanScanWindow>,
}

impl Default for ParsedVideoParameters {
    fn default() -> Self {
        Self {
            content: VideoContent::default(),
            slice_type: None,
            picture_structure: PictureStructure::Frame,
            interlaced_frame: false,
            top_field_first: true,
            display_count: [1, 0],
            pan_scan: Vec::new(),
        }
    }
}

impl ParsedVideoParameters {
    /// 显示占用的总场数
    pub fn display_fields(&self) -> i64 {
        i64::from(self.display_count[0]) + i64::from(self.display_count[1])
    }
}

/// 一个图像 (帧或场) 的解析结果
///
/// `C` 为编码相关的参数, VC-1 为流参数与帧参数.
#[derive(Debug, Clone)]
pub struct ParsedFrame<C> {
    /// 来源编码帧的输出序号
    pub coded_index: u64,
    /// 编码帧数据
    pub data: Bytes,
    /// 图像头在数据中的偏移
    pub data_offset: usize,
    /// 解码序号
    pub decode_index: u64,
    /// 显示序号, 只有输出帧的第一场才有
    pub display_index: Option<u64>,
    /// PTS/DTS (缺失时由帧率推导)
    pub time: FrameTime,
    /// 关键帧
    pub key_frame: bool,
    /// 参考帧
    pub reference_frame: bool,
    /// 是否为输出帧的第一份参数 (帧, 或场对的第一场)
    pub first_field_of_frame: bool,
    /// 是否为场对的第二场
    pub second_field: bool,
    /// 解码所需参考帧数
    pub references_required: usize,
    /// 参考列表; 反向播放中参考帧尚未齐备时为 `None`
    pub reference_list: Option<Vec<u64>>,
    /// 输入跳变后的第一次解码
    pub first_decode_after_input_jump: bool,
    /// 是否携带新的流参数
    pub new_stream_parameters: bool,
    /// 图像参数
    pub video: ParsedVideoParameters,
    /// 编码相关参数
    pub codec: C,
    /// 显示序号尚未确定
    pending: bool,
}

impl<C> ParsedFrame<C> {
    /// 以编码相关参数创建解析结果, 序号等字段由框架填写
    pub fn new(coded_index: u64, data: Bytes, video: ParsedVideoParameters, codec: C) -> Self {
        Self {
            coded_index,
            data,
            data_offset: 0,
            decode_index: 0,
            display_index: None,
            time: FrameTime::none(),
            key_frame: false,
            reference_frame: false,
            first_field_of_frame: true,
            second_field: false,
            references_required: 0,
            reference_list: None,
            first_decode_after_input_jump: false,
            new_stream_parameters: false,
            video,
            codec,
            pending: false,
        }
    }

    /// 是否为输出帧的最后一份参数
    pub fn is_last_field(&self) -> bool {
        self.video.picture_structure == PictureStructure::Frame || !self.first_field_of_frame
    }

    /// 显示序号是否仍待确定
    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

/// 根据编码帧携带的时间初始化解析结果的 PTS/DTS
///
/// DTS 晚于 PTS 时截断为 PTS; 两者相差超过 4 秒的 DTS 视为无效.
pub fn initialize_post_decode_time(coded: FrameTime) -> FrameTime {
    let mut time = FrameTime::new(coded.pts, None);
    let Some(mut dts) = coded.dts else {
        return time;
    };

    let mut reasonable = match coded.pts {
        Some(pts) => (pts.wrapping_sub(dts) & PES_TIMESTAMP_MASK) < MAXIMUM_DECODE_TIME_OFFSET,
        None => true,
    };
    if let Some(pts) = coded.pts {
        if dts > pts {
            info!("DTS 晚于 PTS: dts={}, pts={}", dts, pts);
            dts = pts;
            reasonable = true;
        }
    }

    if reasonable {
        time.dts = Some(dts);
    } else {
        error!("PTS 与 DTS 相差过大, 丢弃 DTS: pts={:?}, dts={}", coded.pts, dts);
    }
    time
}

/// 显示序号与时间戳推导状态
#[derive(Debug, Clone)]
pub struct DisplayTimeline {
    /// 下一个显示场序号
    next_display_field_index: i64,
    /// 下一个显示帧序号
    next_display_frame_index: u64,
    /// 下一个解码场序号
    next_decode_field_index: i64,
    /// 最近记录的 (显示场序号, PTS)
    last_recorded_pts: Option<(i64, u64)>,
    /// 最近记录的 (解码场序号, DTS)
    last_recorded_dts: Option<(i64, u64)>,
    /// 最近使用的场率
    last_field_rate: Rational,
}

impl Default for DisplayTimeline {
    fn default() -> Self {
        Self {
            next_display_field_index: 0,
            next_display_frame_index: 0,
            next_decode_field_index: 0,
            last_recorded_pts: None,
            last_recorded_dts: None,
            last_field_rate: Rational::UNDEFINED,
        }
    }
}

impl DisplayTimeline {
    /// 创建推导状态
    pub fn new() -> Self {
        Self::default()
    }

    /// 下一个显示帧序号
    pub fn next_display_frame_index(&self) -> u64 {
        self.next_display_frame_index
    }

    /// 作废已记录的时间基准 (输入跳变)
    pub fn invalidate(&mut self) {
        self.last_recorded_pts = None;
        self.last_recorded_dts = None;
    }

    /// 计算显示序号与 PTS
    ///
    /// 每次调用都按显示计数推进场序号; 只有输出帧的第一份参数分配显示序号.
    /// 缺少 PTS 时由最近记录的时间加上经过的场数推导.
    /// 给出 PTS 或场率变化时重新记录时间基准.
    pub fn calculate_frame_index_and_pts<C>(
        &mut self,
        frame: &mut ParsedFrame<C>,
        direction: PlayDirection,
    ) {
        let fields = frame.video.display_fields();
        let mut field_index = match direction {
            PlayDirection::Forward => {
                let index = self.next_display_field_index;
                self.next_display_field_index += fields;
                index
            }
            PlayDirection::Reverse => {
                self.next_display_field_index -= fields;
                self.next_display_field_index
            }
        };

        if !frame.first_field_of_frame {
            return;
        }

        // 第一场不是先显示的那一场
        let video = &frame.video;
        if video.picture_structure.is_field()
            && (video.picture_structure == PictureStructure::TopField) != video.top_field_first
        {
            field_index -= 1;
        }

        let derive = frame.time.pts.is_none();
        if derive {
            frame.time.pts = self.last_recorded_pts.map(|(recorded_index, recorded_pts)| {
                let elapsed = ticks_for_fields(field_index - recorded_index, self.last_field_rate);
                wrapping_offset(recorded_pts, elapsed)
            });
        }

        let field_rate = frame.video.content.field_rate();
        let rate_changed = !field_rate.same_value(&self.last_field_rate);
        if !derive || (self.last_recorded_pts.is_some() && rate_changed) {
            self.last_recorded_pts = frame.time.pts.map(|pts| (field_index, pts));
        }
        self.last_field_rate = field_rate;

        frame.display_index = Some(self.next_display_frame_index);
        self.next_display_frame_index += 1;
    }

    /// 计算 DTS
    ///
    /// 缺少 DTS 时由最近记录的 DTS 加上经过的解码场数推导, 否则记录新的基准.
    pub fn calculate_dts<C>(&mut self, frame: &mut ParsedFrame<C>) {
        if !frame.first_field_of_frame {
            return;
        }
        match frame.time.dts {
            None => {
                if let Some((recorded_index, recorded_dts)) = self.last_recorded_dts {
                    let elapsed = ticks_for_fields(
                        self.next_decode_field_index - recorded_index,
                        frame.video.content.field_rate(),
                    );
                    frame.time.dts = Some(wrapping_offset(recorded_dts, elapsed));
                }
            }
            Some(dts) => {
                self.last_recorded_dts = Some((self.next_decode_field_index, dts));
            }
        }
    }

    /// 送解码时推进解码场序号
    pub fn advance_decode_field_index(&mut self, fields: i64, direction: PlayDirection) {
        match direction {
            PlayDirection::Forward => self.next_decode_field_index += fields,
            PlayDirection::Reverse => self.next_decode_field_index -= fields,
        }
    }
}

/// 反向解码栈中的一项
#[derive(Debug)]
enum Stacked<C> {
    /// 已送解码的参考图像, 帧本身位于输出队列
    Queued {
        decode_index: u64,
        first_field_of_frame: bool,
        last_field: bool,
    },
    /// 尚未送解码的非参考图像
    Held(ParsedFrame<C>),
}

impl<C> Stacked<C> {
    fn first_field_of_frame(&self) -> bool {
        match self {
            Self::Queued {
                first_field_of_frame,
                ..
            } => *first_field_of_frame,
            Self::Held(frame) => frame.first_field_of_frame,
        }
    }

    fn has_references(&self) -> bool {
        match self {
            Self::Queued { .. } => true,
            Self::Held(frame) => frame.reference_list.is_some(),
        }
    }
}

/// 帧解析框架统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameworkStatistics {
    /// 送解码的图像数
    pub queued: u64,
    /// 参考帧不足而丢弃的图像数
    pub insufficient_references: u64,
    /// 反向播放中丢弃的图像数
    pub reverse_discarded: u64,
}

/// 帧解析通用框架
///
/// 接收编码相关部分提交的 [`ParsedFrame`], 按播放方向完成参考列表、
/// 显示序号与时间戳的处理, 并按解码顺序放入输出队列.
#[derive(Debug)]
pub struct FrameParserCore<C> {
    direction: PlayDirection,
    references: ReferenceFrameList,
    timeline: DisplayTimeline,
    output: VecDeque<ParsedFrame<C>>,
    next_decode_index: u64,
    /// 正向播放中延迟分配显示序号的参考图像
    deferred: Option<u64>,
    deferred_second_field: Option<u64>,
    /// 新流参数已出现但尚未随图像送出
    new_stream_parameters_pending: bool,
    first_decode_after_input_jump: bool,
    reverse_stack: Vec<Stacked<C>>,
    unsatisfied_stack: Vec<Stacked<C>>,
    reverse_queue: ReverseQueue,
    /// 反向播放中参考帧不足, 丢弃直到下一次展开
    discarding: bool,
    stats: FrameworkStatistics,
}

impl<C> FrameParserCore<C> {
    /// 创建框架, `max_references` 为正向参考列表容量
    pub fn new(direction: PlayDirection, max_references: usize) -> Self {
        Self {
            direction,
            references: ReferenceFrameList::new(max_references),
            timeline: DisplayTimeline::new(),
            output: VecDeque::new(),
            next_decode_index: 0,
            deferred: None,
            deferred_second_field: None,
            new_stream_parameters_pending: false,
            first_decode_after_input_jump: true,
            reverse_stack: Vec::new(),
            unsatisfied_stack: Vec::new(),
            reverse_queue: ReverseQueue::new(),
            discarding: false,
            stats: FrameworkStatistics::default(),
        }
    }

    /// 当前播放方向
    pub fn direction(&self) -> PlayDirection {
        self.direction
    }

    /// 参考帧列表
    pub fn references(&self) -> &ReferenceFrameList {
        &self.references
    }

    /// 统计信息
    pub fn statistics(&self) -> &FrameworkStatistics {
        &self.stats
    }

    /// 下一个将分配的解码序号
    pub fn next_decode_index(&self) -> u64 {
        self.next_decode_index
    }

    /// 输出队列中的帧数 (含尚未确定显示序号的帧)
    pub fn queued_len(&self) -> usize {
        self.output.len()
    }

    /// 取出下一帧 (解码顺序), 队首帧显示序号未定时返回 `None`
    pub fn take_parsed(&mut self) -> Option<ParsedFrame<C>> {
        if self.output.front().is_some_and(|frame| !frame.pending) {
            self.output.pop_front()
        } else {
            None
        }
    }

    /// 处理一份已提交的图像参数
    pub fn process_frame(
        &mut self,
        frame: ParsedFrame<C>,
        end_of_sequence: bool,
        sink: &mut dyn DecodeSink,
    ) -> LiuResult<()> {
        match self.direction {
            PlayDirection::Forward => self.for_play_process_frame(frame, end_of_sequence, sink),
            PlayDirection::Reverse => self.rev_play_process_frame(frame),
        }
    }

    /// 冲刷未决的显示序号
    ///
    /// 正向播放时为延迟的参考帧分配序号; 反向播放时展开解码栈.
    pub fn purge(&mut self, sink: &mut dyn DecodeSink) {
        match self.direction {
            PlayDirection::Forward => self.for_play_purge_queued_post_decode_parameter_settings(),
            PlayDirection::Reverse => self.rev_play_process_decode_stacks(sink),
        }
    }

    /// 输入跳变
    ///
    /// 反向播放中的连续跳变 (上一组图像之前的一组) 只展开解码栈;
    /// 其它跳变作废时间基准并释放全部参考帧.
    pub fn input_jump(&mut self, continuous_reverse_jump: bool, sink: &mut dyn DecodeSink) {
        if self.direction == PlayDirection::Reverse && continuous_reverse_jump {
            self.rev_play_process_decode_stacks(sink);
        } else {
            if self.direction == PlayDirection::Forward {
                self.for_play_purge_queued_post_decode_parameter_settings();
            }
            if self.direction == PlayDirection::Reverse
                || !self.reverse_stack.is_empty()
                || !self.unsatisfied_stack.is_empty()
            {
                self.rev_play_purge_decode_stacks();
            }
            self.timeline.invalidate();
            self.references.reset(sink);
        }
        self.first_decode_after_input_jump = true;
        sink.send_event(DecodeEvent::FlushPartialDecode);
    }

    /// 切换播放方向, 先冲刷旧方向的未决状态
    pub fn set_direction(&mut self, direction: PlayDirection, sink: &mut dyn DecodeSink) {
        if direction == self.direction {
            return;
        }
        info!("播放方向切换: {} -> {}", self.direction, direction);
        self.input_jump(false, sink);
        self.direction = direction;
    }

    /// 丢弃全部状态 (含输出队列)
    pub fn reset(&mut self, sink: &mut dyn DecodeSink) {
        let direction = self.direction;
        let capacity = self.references.capacity();
        self.references.reset(sink);
        *self = Self::new(direction, capacity);
    }

    // ========================
    // 正向播放
    // ========================

    fn for_play_process_frame(
        &mut self,
        mut frame: ParsedFrame<C>,
        end_of_sequence: bool,
        sink: &mut dyn DecodeSink,
    ) -> LiuResult<()> {
        if self.new_stream_parameters_pending {
            frame.new_stream_parameters = true;
        } else if frame.new_stream_parameters {
            self.new_stream_parameters_pending = true;
        }

        let list = self
            .references
            .prepare(frame.references_required, frame.second_field, self.next_decode_index)
            .inspect_err(|e| {
                self.stats.insufficient_references += 1;
                warn!("丢弃图像: {}, coded_index={}", e, frame.coded_index);
            })?;
        frame.reference_list = Some(list);

        self.for_play_process_queued_post_decode_parameter_settings(&frame);
        self.for_play_generate_post_decode_parameter_settings(&mut frame);

        let reference = frame.reference_frame;
        let last_field = frame.is_last_field();
        let decode_index = self.queue_for_decode(frame);
        self.references
            .for_play_update(decode_index, reference, last_field, sink);

        if end_of_sequence {
            self.for_play_purge_queued_post_decode_parameter_settings();
        }
        Ok(())
    }

    /// 新的参考帧到来时, 之前延迟的参考帧即可确定显示序号
    fn for_play_process_queued_post_decode_parameter_settings(&mut self, frame: &ParsedFrame<C>) {
        if frame.first_field_of_frame && frame.reference_frame && self.deferred.is_some() {
            self.calculate_deferred();
        }
    }

    /// 非参考帧立即分配显示序号, 参考帧延迟到下一个参考帧
    fn for_play_generate_post_decode_parameter_settings(&mut self, frame: &mut ParsedFrame<C>) {
        frame.time = initialize_post_decode_time(frame.time);
        frame.display_index = None;
        frame.decode_index = self.next_decode_index;

        if !frame.reference_frame {
            self.timeline
                .calculate_frame_index_and_pts(frame, self.direction);
            return;
        }

        if let Some(deferred) = self.deferred {
            let inconsistent = self
                .find_output(deferred)
                .is_some_and(|d| {
                    d.video.picture_structure.bits() ^ frame.video.picture_structure.bits()
                        != PictureStructure::Frame.bits()
                });
            if inconsistent {
                error!("延迟的场/帧结构不一致: decode_index={}", deferred);
                self.calculate_deferred();
            }
        }
        if self.deferred_second_field.is_some() {
            error!("第二场重复延迟: decode_index={}", frame.decode_index);
            self.calculate_deferred();
        }

        if self.deferred.is_some() {
            self.deferred_second_field = Some(frame.decode_index);
        } else {
            self.deferred = Some(frame.decode_index);
        }
        frame.pending = true;
        self.timeline.calculate_dts(frame);
    }

    /// 为延迟的参考帧分配显示序号 (流结束或跳变时)
    fn for_play_purge_queued_post_decode_parameter_settings(&mut self) {
        if self.deferred.is_some() {
            self.calculate_deferred();
        }
    }

    fn calculate_deferred(&mut self) {
        let indices = [self.deferred.take(), self.deferred_second_field.take()];
        for decode_index in indices.into_iter().flatten() {
            self.calculate_output(decode_index);
        }
    }

    // ========================
    // 反向播放
    // ========================

    fn rev_play_process_frame(&mut self, mut frame: ParsedFrame<C>) -> LiuResult<()> {
        if self.discarding {
            self.stats.reverse_discarded += 1;
            debug!("反向播放丢弃状态, 跳过 coded_index={}", frame.coded_index);
            return Ok(());
        }

        frame.time = initialize_post_decode_time(frame.time);
        frame.display_index = None;
        let prepared = self.references.prepare(
            frame.references_required,
            frame.second_field,
            self.next_decode_index,
        );

        if frame.reference_frame {
            let list = prepared.inspect_err(|e| {
                error!("反向播放参考帧缺少参考: {}, 进入丢弃状态", e);
                self.discarding = true;
                self.stats.insufficient_references += 1;
            })?;
            frame.reference_list = Some(list);
            frame.pending = frame.first_field_of_frame;
            let first_field_of_frame = frame.first_field_of_frame;
            let last_field = frame.is_last_field();
            let decode_index = self.queue_for_decode(frame);
            self.reverse_stack.push(Stacked::Queued {
                decode_index,
                first_field_of_frame,
                last_field,
            });
            self.references
                .rev_play_append(decode_index, true, last_field)?;
        } else {
            frame.reference_list = prepared.ok();
            self.reverse_stack.push(Stacked::Held(frame));
        }
        Ok(())
    }

    /// 展开反向解码栈
    ///
    /// 栈顶为最后输入的图像. 每次取出一个输出帧的全部场, 按正向顺序处理:
    /// 参考图像分配显示序号并移出参考列表, 非参考图像送解码.
    /// 遇到缺少参考的图像 (开放的图像组) 时停止, 剩余部分留待下一组展开.
    pub fn rev_play_process_decode_stacks(&mut self, sink: &mut dyn DecodeSink) {
        self.settle_reverse_queue();

        while let Some(entry) = self.unsatisfied_stack.pop() {
            match entry {
                Stacked::Held(mut frame) => {
                    if frame.reference_list.is_none() {
                        match self.references.prepare(
                            frame.references_required,
                            frame.second_field,
                            self.next_decode_index,
                        ) {
                            Ok(list) => frame.reference_list = Some(list),
                            Err(e) => {
                                error!("延迟解码的图像仍缺少参考: {}, 丢弃", e);
                                self.stats.reverse_discarded += 1;
                                continue;
                            }
                        }
                    }
                    self.reverse_stack.push(Stacked::Held(frame));
                }
                Stacked::Queued {
                    decode_index,
                    first_field_of_frame,
                    last_field,
                } => {
                    if let Err(e) = self
                        .references
                        .rev_play_append(decode_index, true, last_field)
                    {
                        error!("延迟的参考帧无法入列: {}", e);
                    }
                    self.reverse_stack.push(Stacked::Queued {
                        decode_index,
                        first_field_of_frame,
                        last_field,
                    });
                }
            }
        }

        let mut single_frame: Vec<Stacked<C>> = Vec::new();
        while !self.reverse_stack.is_empty() {
            let mut open_group = false;
            while let Some(entry) = self.reverse_stack.pop() {
                let stop = entry.first_field_of_frame() || !entry.has_references();
                open_group = !entry.has_references();
                single_frame.push(entry);
                if stop {
                    break;
                }
            }
            if open_group {
                break;
            }
            while let Some(entry) = single_frame.pop() {
                self.rev_play_unwind(entry, sink);
            }
        }

        // 开放图像组的剩余部分保持原顺序, 等待更早一组的参考帧
        while let Some(entry) = single_frame.pop() {
            self.reverse_stack.push(entry);
        }
        while let Some(entry) = self.reverse_stack.pop() {
            self.unsatisfied_stack.push(entry);
        }

        self.references.junk();
        self.settle_reverse_queue();
        self.discarding = false;
    }

    fn rev_play_unwind(&mut self, entry: Stacked<C>, sink: &mut dyn DecodeSink) {
        match entry {
            Stacked::Queued {
                decode_index,
                first_field_of_frame,
                last_field,
            } => {
                if first_field_of_frame {
                    self.rev_play_generate_reference(decode_index);
                }
                self.references
                    .rev_play_remove(decode_index, last_field, sink);
            }
            Stacked::Held(mut frame) => {
                frame.pending = frame.first_field_of_frame;
                let first_field_of_frame = frame.first_field_of_frame;
                let decode_index = self.queue_for_decode(frame);
                if first_field_of_frame {
                    self.reverse_queue.insert(decode_index);
                }
            }
        }
    }

    /// 参考图像先编号, 随后为队列中等待的非参考图像编号
    fn rev_play_generate_reference(&mut self, decode_index: u64) {
        self.calculate_output(decode_index);
        while let Some(queued) = self.reverse_queue.extract() {
            self.calculate_output(queued);
        }
    }

    /// 放弃反向解码栈: 参考图像仍分配显示序号, 未送解码的图像直接丢弃
    fn rev_play_purge_decode_stacks(&mut self) {
        while let Some(entry) = self.unsatisfied_stack.pop() {
            self.reverse_stack.push(entry);
        }
        while let Some(entry) = self.reverse_stack.pop() {
            match entry {
                Stacked::Queued {
                    decode_index,
                    first_field_of_frame: true,
                    ..
                } => self.rev_play_generate_reference(decode_index),
                Stacked::Queued { .. } => {}
                Stacked::Held(frame) => {
                    self.stats.reverse_discarded += 1;
                    debug!("丢弃未解码的反向图像: coded_index={}", frame.coded_index);
                }
            }
        }
        self.settle_reverse_queue();
        self.discarding = false;
    }

    /// 队列中剩余的图像不再等待编号
    fn settle_reverse_queue(&mut self) {
        for decode_index in self.reverse_queue.flush() {
            warn!("反向图像未获得显示序号: decode_index={}", decode_index);
            if let Some(frame) = self.find_output_mut(decode_index) {
                frame.pending = false;
            }
        }
    }

    // ========================
    // 公共部分
    // ========================

    /// 分配解码序号并放入输出队列
    fn queue_for_decode(&mut self, mut frame: ParsedFrame<C>) -> u64 {
        self.timeline
            .advance_decode_field_index(frame.video.display_fields(), self.direction);
        let decode_index = self.next_decode_index;
        self.next_decode_index += 1;

        frame.decode_index = decode_index;
        frame.first_decode_after_input_jump = self.first_decode_after_input_jump;
        self.first_decode_after_input_jump = false;
        self.new_stream_parameters_pending = false;
        self.stats.queued += 1;
        debug!(
            "送解码: decode_index={}, 参考={}, 结构={}, 参考列表={:?}",
            decode_index,
            frame.reference_frame,
            frame.video.picture_structure,
            frame.reference_list
        );
        self.output.push_back(frame);
        decode_index
    }

    /// 为输出队列中的帧计算显示序号并解除等待
    fn calculate_output(&mut self, decode_index: u64) {
        let direction = self.direction;
        match self
            .output
            .iter_mut()
            .find(|f| f.decode_index == decode_index)
        {
            Some(frame) => {
                self.timeline
                    .calculate_frame_index_and_pts(frame, direction);
                frame.pending = false;
            }
            None => warn!("输出队列中找不到 decode_index={}", decode_index),
        }
    }

    fn find_output(&self, decode_index: u64) -> Option<&ParsedFrame<C>> {
        self.output.iter().find(|f| f.decode_index == decode_index)
    }

    fn find_output_mut(&mut self, decode_index: u64) -> Option<&mut ParsedFrame<C>> {
        self.output
            .iter_mut()
            .find(|f| f.decode_index == decode_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FPS25: Rational = Rational::new(25, 1);

    /// 构造逐行帧
    fn frame(coded_index: u64, kind: SliceType, pts: Option<u64>) -> ParsedFrame<()> {
        let video = ParsedVideoParameters {
            content: VideoContent {
                frame_rate: FPS25,
                ..VideoContent::default()
            },
            slice_type: Some(kind),
            ..ParsedVideoParameters::default()
        };
        let mut f = ParsedFrame::new(coded_index, Bytes::new(), video, ());
        f.key_frame = kind == SliceType::I;
        f.reference_frame = kind != SliceType::B;
        f.references_required = match kind {
            SliceType::I => 0,
            SliceType::P => 1,
            SliceType::B => 2,
        };
        f.time = FrameTime::new(pts, None);
        f
    }

    fn drain(core: &mut FrameParserCore<()>) -> Vec<ParsedFrame<()>> {
        std::iter::from_fn(|| core.take_parsed()).collect()
    }

    #[test]
    fn test_initialize_post_decode_time() {
        // DTS 晚于 PTS 截断为 PTS
        let t = initialize_post_decode_time(FrameTime::new(Some(1000), Some(2000)));
        assert_eq!(t.dts, Some(1000));
        // 相差超过 4 秒的 DTS 被丢弃
        let t = initialize_post_decode_time(FrameTime::new(Some(500_000), Some(1000)));
        assert_eq!(t.pts, Some(500_000));
        assert_eq!(t.dts, None);
        // 没有 PTS 时保留 DTS
        let t = initialize_post_decode_time(FrameTime::new(None, Some(7)));
        assert_eq!(t.dts, Some(7));
    }

    #[test]
    fn test_正向播放显示序号() {
        let mut core = FrameParserCore::new(PlayDirection::Forward, 2);
        let mut events: Vec<DecodeEvent> = Vec::new();
        // 解码顺序 I0 P3 B1 B2, 显示顺序 I0 B1 B2 P3
        core.process_frame(frame(0, SliceType::I, Some(0)), false, &mut events)
            .unwrap();
        assert!(core.take_parsed().is_none(), "参考帧的显示序号应被延迟");
        core.process_frame(frame(1, SliceType::P, None), false, &mut events)
            .unwrap();
        core.process_frame(frame(2, SliceType::B, None), false, &mut events)
            .unwrap();
        core.process_frame(frame(3, SliceType::B, None), false, &mut events)
            .unwrap();
        core.purge(&mut events);

        let out = drain(&mut core);
        let display: Vec<Option<u64>> = out.iter().map(|f| f.display_index).collect();
        assert_eq!(display, vec![Some(0), Some(3), Some(1), Some(2)]);
        let decode: Vec<u64> = out.iter().map(|f| f.decode_index).collect();
        assert_eq!(decode, vec![0, 1, 2, 3]);

        // 缺失的 PTS 按 25fps 每帧 3600 推导
        let pts: Vec<Option<u64>> = out.iter().map(|f| f.time.pts).collect();
        assert_eq!(pts, vec![Some(0), Some(10800), Some(3600), Some(7200)]);
        assert!(out[0].first_decode_after_input_jump);
        assert!(!out[1].first_decode_after_input_jump);
        assert_eq!(out[3].reference_list, Some(vec![0, 1]));
    }

    #[test]
    fn test_参考帧不足返回错误() {
        let mut core = FrameParserCore::new(PlayDirection::Forward, 2);
        let mut events: Vec<DecodeEvent> = Vec::new();
        let err = core
            .process_frame(frame(0, SliceType::P, Some(0)), false, &mut events)
            .expect_err("没有参考帧的 P 图像应返回错误");
        assert!(matches!(err, liu_core::LiuError::InsufficientReferences { .. }));
        assert_eq!(core.statistics().insufficient_references, 1);
        assert_eq!(core.queued_len(), 0);
        assert_eq!(core.next_decode_index(), 0, "丢弃的图像不应占用解码序号");
    }

    #[test]
    fn test_参考列表淘汰() {
        let mut core = FrameParserCore::new(PlayDirection::Forward, 2);
        let mut events: Vec<DecodeEvent> = Vec::new();
        core.process_frame(frame(0, SliceType::I, Some(0)), false, &mut events)
            .unwrap();
        for i in 1..4 {
            core.process_frame(frame(i, SliceType::P, None), false, &mut events)
                .unwrap();
            assert!(core.references().len() <= 2);
        }
        assert_eq!(core.references().entries(), vec![2, 3]);
        assert_eq!(
            events,
            vec![
                DecodeEvent::ReleaseReferenceFrame(0),
                DecodeEvent::ReleaseReferenceFrame(1)
            ]
        );
    }

    #[test]
    fn test_序列结束冲刷延迟的参考帧() {
        let mut core = FrameParserCore::new(PlayDirection::Forward, 2);
        let mut events: Vec<DecodeEvent> = Vec::new();
        core.process_frame(frame(0, SliceType::I, Some(900)), true, &mut events)
            .unwrap();
        let f = core.take_parsed().expect("序列结束后应可取出");
        assert_eq!(f.display_index, Some(0));
        assert_eq!(f.time.pts, Some(900));
    }

    #[test]
    fn test_隔行场对() {
        let mut core = FrameParserCore::new(PlayDirection::Forward, 2);
        let mut events: Vec<DecodeEvent> = Vec::new();

        let mut top = frame(0, SliceType::I, Some(0));
        top.video.picture_structure = PictureStructure::TopField;
        top.video.content.progressive = false;
        let mut bottom = top.clone();
        bottom.time = FrameTime::none();
        bottom.video.picture_structure = PictureStructure::BottomField;
        bottom.first_field_of_frame = false;
        bottom.second_field = true;
        bottom.references_required = 1;

        core.process_frame(top, false, &mut events).unwrap();
        core.process_frame(bottom, false, &mut events).unwrap();
        // 第一场立即释放自身, 第二场入列
        assert_eq!(events, vec![DecodeEvent::ReleaseReferenceFrame(0)]);
        assert_eq!(core.references().entries(), vec![1]);

        core.purge(&mut events);
        let out = drain(&mut core);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].display_index, Some(0));
        assert_eq!(out[1].display_index, None, "第二场没有显示序号");
        assert_eq!(out[1].reference_list, Some(vec![1]), "第二场引用自身缓冲区");
    }

    #[test]
    fn test_输入跳变释放全部参考帧() {
        let mut core = FrameParserCore::new(PlayDirection::Forward, 2);
        let mut events: Vec<DecodeEvent> = Vec::new();
        core.process_frame(frame(0, SliceType::I, Some(0)), false, &mut events)
            .unwrap();
        core.input_jump(false, &mut events);
        assert_eq!(
            events,
            vec![
                DecodeEvent::ReleaseAllReferenceFrames,
                DecodeEvent::FlushPartialDecode
            ]
        );
        assert!(core.references().is_empty());
        assert_eq!(core.take_parsed().map(|f| f.display_index), Some(Some(0)));

        // 跳变后没有时间基准, 缺失的 PTS 无法推导
        core.process_frame(frame(1, SliceType::I, None), false, &mut events)
            .unwrap();
        core.purge(&mut events);
        let f = core.take_parsed().unwrap();
        assert_eq!(f.time.pts, None);
        assert!(f.first_decode_after_input_jump);
    }

    #[test]
    fn test_反向播放重建显示顺序() {
        let mut core = FrameParserCore::new(PlayDirection::Reverse, 2);
        let mut events: Vec<DecodeEvent> = Vec::new();
        // 一组图像, 解码顺序 I0 P3 B1 B2
        for (i, kind) in [SliceType::I, SliceType::P, SliceType::B, SliceType::B]
            .into_iter()
            .enumerate()
        {
            core.process_frame(frame(i as u64, kind, None), false, &mut events)
                .unwrap();
        }
        assert!(core.take_parsed().is_none(), "展开前不应输出");

        core.purge(&mut events);
        let out = drain(&mut core);
        assert_eq!(out.len(), 4);
        // 参考帧先送解码, 非参考帧在展开时按反向顺序送解码
        let coded: Vec<u64> = out.iter().map(|f| f.coded_index).collect();
        assert_eq!(coded, vec![0, 1, 3, 2]);
        // 反向显示顺序: P3 B2 B1 I0
        let display: Vec<(u64, Option<u64>)> =
            out.iter().map(|f| (f.coded_index, f.display_index)).collect();
        assert_eq!(
            display,
            vec![(0, Some(3)), (1, Some(0)), (3, Some(1)), (2, Some(2))]
        );
        // 参考帧展开时释放
        assert_eq!(
            events,
            vec![
                DecodeEvent::ReleaseReferenceFrame(1),
                DecodeEvent::ReleaseReferenceFrame(0)
            ]
        );
        assert!(core.references().is_empty());
    }

    #[test]
    fn test_反向播放开放图像组() {
        let mut core = FrameParserCore::new(PlayDirection::Reverse, 2);
        let mut events: Vec<DecodeEvent> = Vec::new();

        // 后一组: I10 B8 B9 (B 引用前一组的 P), P13
        for (i, kind) in [SliceType::I, SliceType::B, SliceType::P]
            .into_iter()
            .enumerate()
        {
            core.process_frame(frame(10 + i as u64, kind, None), false, &mut events)
                .unwrap();
        }
        core.input_jump(true, &mut events);
        // B 缺少参考, 只有 P 与其后的部分被展开
        let first: Vec<u64> = std::iter::from_fn(|| core.take_parsed())
            .map(|f| f.coded_index)
            .collect();
        assert!(first.is_empty(), "I 帧仍在等待, 输出队列被挡住");

        // 前一组: I0 P1
        core.process_frame(frame(0, SliceType::I, None), false, &mut events)
            .unwrap();
        core.process_frame(frame(1, SliceType::P, None), false, &mut events)
            .unwrap();
        core.purge(&mut events);

        let out = drain(&mut core);
        let mut by_display: Vec<(Option<u64>, u64)> =
            out.iter().map(|f| (f.display_index, f.coded_index)).collect();
        by_display.sort();
        let order: Vec<u64> = by_display.iter().map(|(_, c)| *c).collect();
        // 反向显示: P12 I10 B11 P1 I0
        assert_eq!(order, vec![12, 10, 11, 1, 0]);
        let b = out.iter().find(|f| f.coded_index == 11).unwrap();
        assert_eq!(b.reference_list.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_反向参考帧不足进入丢弃状态() {
        let mut core = FrameParserCore::new(PlayDirection::Reverse, 2);
        let mut events: Vec<DecodeEvent> = Vec::new();
        core.process_frame(frame(0, SliceType::P, None), false, &mut events)
            .expect_err("反向播放参考帧缺少参考应返回错误");
        // 丢弃状态下后续图像被跳过
        core.process_frame(frame(1, SliceType::I, None), false, &mut events)
            .unwrap();
        assert_eq!(core.statistics().reverse_discarded, 1);
        core.purge(&mut events);
        assert!(core.take_parsed().is_none());

        // 展开后恢复
        core.process_frame(frame(2, SliceType::I, None), false, &mut events)
            .unwrap();
        core.purge(&mut events);
        assert_eq!(core.take_parsed().map(|f| f.coded_index), Some(2));
    }

    #[test]
    fn test_reset_幂等() {
        let mut core = FrameParserCore::new(PlayDirection::Forward, 2);
        let mut events: Vec<DecodeEvent> = Vec::new();
        core.process_frame(frame(0, SliceType::I, Some(0)), false, &mut events)
            .unwrap();
        core.reset(&mut events);
        core.reset(&mut events);
        assert_eq!(core.queued_len(), 0);
        assert_eq!(core.next_decode_index(), 0);
        assert!(core.references().is_empty());
        assert_eq!(core.direction(), PlayDirection::Forward);
    }

    #[test]
    fn test_场率变化时重新记录基准() {
        let mut timeline = DisplayTimeline::new();
        let mut a = frame(0, SliceType::B, Some(0));
        timeline.calculate_frame_index_and_pts(&mut a, PlayDirection::Forward);
        let mut b = frame(1, SliceType::B, None);
        b.video.content.frame_rate = Rational::new(50, 1);
        timeline.calculate_frame_index_and_pts(&mut b, PlayDirection::Forward);
        // 按旧场率推导: 一帧 3600
        assert_eq!(b.time.pts, Some(3600));
        let mut c = frame(2, SliceType::B, None);
        c.video.content.frame_rate = Rational::new(50, 1);
        timeline.calculate_frame_index_and_pts(&mut c, PlayDirection::Forward);
        // 新基准之后按 50fps: 一帧 1800
        assert_eq!(c.time.pts, Some(5400));
        assert_eq!(timeline.next_display_frame_index(), 3);
    }

    #[test]
    fn test_dts_推导() {
        let mut timeline = DisplayTimeline::new();
        let mut a = frame(0, SliceType::I, Some(7200));
        a.time.dts = Some(3600);
        timeline.calculate_dts(&mut a);
        timeline.advance_decode_field_index(1, PlayDirection::Forward);
        let mut b = frame(1, SliceType::P, None);
        timeline.calculate_dts(&mut b);
        assert_eq!(b.time.dts, Some(7200));
    }
}
