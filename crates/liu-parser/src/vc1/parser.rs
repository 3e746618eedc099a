//! VC-1 帧解析器.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, info, trace, warn};

use liu_collator::{CodedFrame, CodedFrameFlags};
use liu_core::bitreader::remove_emulation_prevention;
use liu_core::{BitReader, ErrorSeverity, FrameTime, LiuError, LiuResult, Rational};

use crate::event::{DecodeEvent, DecodeSink};
use crate::framework::{
    FrameParserCore, FrameworkStatistics, ParsedFrame, ParsedVideoParameters, PictureStructure,
    PlayDirection, VideoContent,
};
use crate::params::ParameterStore;
use crate::reference::VC1_MAX_REFERENCE_FRAMES;

use super::headers::{
    AspectRatioCode, EntryPointHeader, FrameRateCode, PictureHeader, SequenceHeader,
    SequenceLayerMetadata, SliceHeader,
};
use super::tables::{
    FrameCodingMode, MatrixCoefficients, display_combination_legal, field_structure, frame_rate_from_code,
    frame_rate_from_exp, pixel_aspect_ratio,
};
use super::{Vc1FrameParameters, Vc1ParserConfig, Vc1Picture, Vc1StreamParameters, start_code};

/// 读取一个编码帧期间的状态
struct ReadContext {
    coded_index: u64,
    data: Bytes,
    /// 编码帧的时间, 只给第一个提交的图像
    time: Option<FrameTime>,
    picture_ready: bool,
}

/// VC-1 帧解析器
///
/// 逐个读取收集器输出的编码帧, 解析其中的头部并把图像提交给
/// [`FrameParserCore`]. 参考帧释放等通知发送给 `S`.
pub struct Vc1FrameParser<S: DecodeSink> {
    config: Vc1ParserConfig,
    sink: S,
    params: ParameterStore<Vc1StreamParameters, Vc1FrameParameters>,
    core: FrameParserCore<Vc1Picture>,
    /// 场图像对的第一场, 等待第二场
    first_field: Option<PictureHeader>,
    /// 最近一次 I/P 场对的 REFDIST
    backward_refdist: u32,
    /// 上一个提交的图像结构, `None` 表示尚无
    accumulated_structure: Option<PictureStructure>,
    first_decode_of_frame: bool,
    /// 最近一次码流给出的有效帧率
    frame_rate: Option<Rational>,
    /// 码流没有给出帧率时使用, 可被封装层的默认帧率覆盖
    default_frame_rate: Rational,
    /// 序列层元数据只读取一次
    metadata_received: bool,
    /// 序列头更新后尚未随图像送出
    stream_updated: bool,
    last_stream: Option<Arc<Vc1StreamParameters>>,
    /// 码流不可播放, 等待新的有效序列头
    unplayable: bool,
}

impl<S: DecodeSink> Vc1FrameParser<S> {
    /// 创建解析器
    pub fn new(config: Vc1ParserConfig, sink: S) -> Self {
        Self {
            config,
            sink,
            params: ParameterStore::new(),
            core: FrameParserCore::new(config.direction, VC1_MAX_REFERENCE_FRAMES),
            first_field: None,
            backward_refdist: 0,
            accumulated_structure: None,
            first_decode_of_frame: false,
            frame_rate: None,
            default_frame_rate: config.default_frame_rate,
            metadata_received: false,
            stream_updated: false,
            last_stream: None,
            unplayable: false,
        }
    }

    /// 解析器配置
    pub fn config(&self) -> &Vc1ParserConfig {
        &self.config
    }

    /// 事件接收方
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// 可写的事件接收方
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// 当前播放方向
    pub fn direction(&self) -> PlayDirection {
        self.core.direction()
    }

    /// 帧解析框架统计信息
    pub fn statistics(&self) -> &FrameworkStatistics {
        self.core.statistics()
    }

    /// 当前流参数
    pub fn stream_parameters(&self) -> Option<&Arc<Vc1StreamParameters>> {
        self.params.stream()
    }

    /// 当前参考帧列表
    pub fn reference_frames(&self) -> Vec<u64> {
        self.core.references().entries()
    }

    /// 读取一个编码帧中的全部头部
    ///
    /// 帧或场头之后遇到非条带起始码即提交该图像, 列表结束时再提交一次.
    /// 图像头解析或提交失败只放弃该图像, 继续读取后续起始码, 读完后返回
    /// 第一个这样的错误. 序列头、元数据、入口点与条带出错时立即返回.
    pub fn read_headers(&mut self, frame: &CodedFrame) -> LiuResult<()> {
        if frame.flags.contains(CodedFrameFlags::DISCONTINUITY) {
            info!("编码帧不连续, 作输入跳变处理: index={}", frame.index);
            self.input_jump(false);
        }
        if frame.flags.contains(CodedFrameFlags::START_CODES_TRUNCATED) {
            warn!("编码帧的起始码列表不完整: index={}", frame.index);
        }

        let mut ctx = ReadContext {
            coded_index: frame.index,
            data: frame.data.clone(),
            time: Some(frame.time),
            picture_ready: false,
        };
        let mut dropped: Option<LiuError> = None;

        for (i, sc) in frame.start_codes.iter().enumerate() {
            if self.unplayable && sc.code != start_code::SEQUENCE_HEADER {
                trace!("码流不可播放, 跳过起始码 {:#04x}", sc.code);
                continue;
            }

            if ctx.picture_ready && sc.code != start_code::SLICE {
                let end_of_sequence = sc.code == start_code::END_OF_SEQUENCE;
                if let Err(e) = self.commit_frame_for_decode(&mut ctx, end_of_sequence) {
                    if e.severity() == ErrorSeverity::FatalComponent {
                        return Err(e);
                    }
                    dropped.get_or_insert(e);
                }
            }

            let Some(raw) = frame.start_code_data(i) else {
                warn!("起始码偏移越界: offset={}, len={}", sc.offset, frame.len());
                continue;
            };
            let unit = remove_emulation_prevention(raw);
            let mut br = BitReader::new(&unit);

            let result = br
                .skip_bits(32)
                .and_then(|()| self.read_unit(sc.code, sc.offset, &mut br, &mut ctx));
            match result {
                Ok(()) => {}
                Err(LiuError::UnhandledHeader(code)) => {
                    debug!("忽略未处理的起始码 {:#04x}, offset={}", code, sc.offset);
                }
                Err(e) if sc.code == start_code::FRAME || sc.code == start_code::FIELD => {
                    error!(
                        "图像头解析失败, 丢弃该图像: code={:#04x}, offset={}, {}",
                        sc.code, sc.offset, e
                    );
                    self.params.take_frame();
                    ctx.picture_ready = false;
                    dropped.get_or_insert(e);
                }
                Err(e) => {
                    error!(
                        "头部解析失败, 放弃当前图像: code={:#04x}, offset={}, {}",
                        sc.code, sc.offset, e
                    );
                    self.params.take_frame();
                    ctx.picture_ready = false;
                    return Err(e);
                }
            }
        }

        if ctx.picture_ready {
            self.commit_frame_for_decode(&mut ctx, false)?;
        }
        dropped.map_or(Ok(()), Err)
    }

    /// 冲刷未决的显示序号 (正向: 延迟的参考帧; 反向: 展开解码栈)
    pub fn purge(&mut self) {
        self.core.purge(&mut self.sink);
    }

    /// 输入跳变
    ///
    /// `continuous_reverse_jump` 表示反向播放中跳到上一组图像之前的一组.
    pub fn input_jump(&mut self, continuous_reverse_jump: bool) {
        self.core.input_jump(continuous_reverse_jump, &mut self.sink);
        self.first_field = None;
        self.accumulated_structure = None;
        self.first_decode_of_frame = false;
    }

    /// 切换播放方向
    pub fn set_direction(&mut self, direction: PlayDirection) {
        if direction == self.core.direction() {
            return;
        }
        self.core.set_direction(direction, &mut self.sink);
        self.first_field = None;
        self.accumulated_structure = None;
        self.first_decode_of_frame = false;
    }

    /// 丢弃全部状态, 回到刚创建时的样子 (方向保持不变)
    pub fn reset(&mut self) {
        self.core.reset(&mut self.sink);
        self.params.clear();
        self.first_field = None;
        self.backward_refdist = 0;
        self.accumulated_structure = None;
        self.first_decode_of_frame = false;
        self.frame_rate = None;
        self.default_frame_rate = self.config.default_frame_rate;
        self.metadata_received = false;
        self.stream_updated = false;
        self.last_stream = None;
        self.unplayable = false;
    }

    /// 取出下一帧 (解码顺序)
    pub fn take_parsed(&mut self) -> Option<ParsedFrame<Vc1Picture>> {
        self.core.take_parsed()
    }

    /// 取出全部可输出的帧
    pub fn drain_parsed(&mut self) -> Vec<ParsedFrame<Vc1Picture>> {
        std::iter::from_fn(|| self.core.take_parsed()).collect()
    }

    // ========================
    // 头部分派
    // ========================

    fn read_unit(
        &mut self,
        code: u8,
        offset: usize,
        br: &mut BitReader<'_>,
        ctx: &mut ReadContext,
    ) -> LiuResult<()> {
        match code {
            start_code::SEQUENCE_HEADER => self.read_sequence_header(br),
            start_code::SEQUENCE_LAYER_METADATA => self.read_sequence_layer_metadata(br),
            start_code::DEFAULT_FRAME_RATE => self.read_default_frame_rate(br),
            start_code::ENTRY_POINT => self.read_entry_point_header(br),
            start_code::FRAME => {
                self.read_picture_header(br, offset, true)?;
                ctx.picture_ready = true;
                Ok(())
            }
            start_code::FIELD => {
                self.read_picture_header(br, offset, false)?;
                ctx.picture_ready = true;
                Ok(())
            }
            start_code::SLICE => self.read_slice_header(br, offset),
            start_code::END_OF_SEQUENCE => {
                debug!("VC-1 序列结束");
                if self.core.direction() == PlayDirection::Forward {
                    self.core.purge(&mut self.sink);
                }
                Ok(())
            }
            c if start_code::USER_DATA.contains(&c) => {
                trace!("跳过用户数据 {:#04x}", c);
                Ok(())
            }
            other => Err(LiuError::UnhandledHeader(other)),
        }
    }

    fn read_sequence_header(&mut self, br: &mut BitReader<'_>) -> LiuResult<()> {
        let sequence = SequenceHeader::parse(br).inspect_err(|_| self.params.clear())?;

        if let Err(reason) = sequence.check_playable() {
            return Err(self.mark_unplayable(reason));
        }
        if self.unplayable {
            info!("收到有效序列头, 恢复解析");
            self.unplayable = false;
        }

        let saved_range_map = self.params.stream().and_then(|s| s.saved_range_map);
        let changed = self
            .params
            .stream()
            .is_none_or(|s| s.sequence != sequence);
        if changed {
            info!(
                "VC-1 序列参数: {}x{}, level={}, interlace={}",
                sequence.max_coded_width, sequence.max_coded_height, sequence.level, sequence.interlace
            );
        }
        self.params.replace_stream(Vc1StreamParameters {
            sequence,
            entry_point: None,
            saved_range_map,
        });
        self.stream_updated = true;
        Ok(())
    }

    fn mark_unplayable(&mut self, reason: String) -> LiuError {
        error!("码流不可播放: {}", reason);
        self.params.clear();
        self.unplayable = true;
        self.sink
            .send_event(DecodeEvent::StreamUnplayable(reason.clone()));
        LiuError::Unplayable(reason)
    }

    /// 序列层元数据同时给出序列头与入口点头, 在码流内的序列头之后收到时忽略
    fn read_sequence_layer_metadata(&mut self, br: &mut BitReader<'_>) -> LiuResult<()> {
        if self.metadata_received {
            trace!("序列层元数据已读取, 忽略");
            return Ok(());
        }
        if self.params.stream().is_some() {
            error!("序列参数已存在, 忽略之后收到的序列层元数据");
            return Ok(());
        }

        let metadata = SequenceLayerMetadata::parse(br)?;
        let sequence = metadata.sequence_header();
        if let Err(reason) = sequence.check_playable() {
            return Err(self.mark_unplayable(reason));
        }
        info!(
            "VC-1 序列层元数据: profile={}, {}x{}, level={}, 帧数={}",
            metadata.profile,
            metadata.max_coded_width,
            metadata.max_coded_height,
            metadata.level,
            metadata.num_frames
        );
        self.params.replace_stream(Vc1StreamParameters {
            sequence,
            entry_point: Some(metadata.entry_point_header()),
            saved_range_map: None,
        });
        self.stream_updated = true;
        self.metadata_received = true;
        Ok(())
    }

    /// 封装层给出的默认帧率, 先分母后分子
    fn read_default_frame_rate(&mut self, br: &mut BitReader<'_>) -> LiuResult<()> {
        let den = br.read_bits(32)?;
        let num = br.read_bits(32)?;
        let rate = match (i32::try_from(num), i32::try_from(den)) {
            (Ok(num), Ok(den)) if num > 0 && den > 0 => Rational::new(num, den),
            _ => {
                warn!("默认帧率无效, 忽略: {}/{}", num, den);
                return Ok(());
            }
        };
        info!("封装层默认帧率: {}", rate);
        self.default_frame_rate = rate;
        Ok(())
    }

    fn read_entry_point_header(&mut self, br: &mut BitReader<'_>) -> LiuResult<()> {
        let stream = self
            .params
            .stream_mut()
            .ok_or_else(|| LiuError::HeaderSequence("入口点之前没有序列头".into()))?;
        let entry = EntryPointHeader::parse(br, &stream.sequence, &mut stream.saved_range_map)?;
        stream.entry_point = Some(entry);
        Ok(())
    }

    fn read_picture_header(
        &mut self,
        br: &mut BitReader<'_>,
        offset: usize,
        first: bool,
    ) -> LiuResult<()> {
        let stream = Arc::clone(self.params.stream().ok_or(LiuError::NoStreamParameters)?);
        let entry = stream
            .entry_point
            .as_ref()
            .ok_or_else(|| LiuError::HeaderSequence("图像头之前没有入口点".into()))?;

        let header = if first {
            let header =
                PictureHeader::parse_first(br, &stream.sequence, entry, &mut self.backward_refdist)?;
            self.first_field = header.is_field().then(|| header.clone());
            header
        } else {
            let first_field = self
                .first_field
                .take()
                .ok_or_else(|| LiuError::HeaderSequence("第二场之前没有第一场".into()))?;
            PictureHeader::parse_second(br, &first_field, &stream.sequence, entry)?
        };
        debug!(
            "VC-1 图像头: offset={}, 类型={}, fcm={:?}, 第一场={}, tff={}, rff={}, rptfrm={}",
            offset, header.ptype, header.fcm, header.first_field, header.tff, header.rff, header.rptfrm
        );

        let frame = self.params.new_frame();
        frame.picture = Some(header);
        frame.picture_offset = offset;
        Ok(())
    }

    fn read_slice_header(&mut self, br: &mut BitReader<'_>, offset: usize) -> LiuResult<()> {
        if self.params.stream().is_none() {
            return Err(LiuError::NoStreamParameters);
        }
        let frame = self
            .params
            .frame_mut()
            .ok_or(LiuError::NoFrameParameters)?;
        let slice = SliceHeader::parse(br, offset)?;
        trace!("VC-1 条带: offset={}, address={}", offset, slice.address);
        frame.slices.push(slice);
        Ok(())
    }

    // ========================
    // 提交
    // ========================

    fn commit_frame_for_decode(
        &mut self,
        ctx: &mut ReadContext,
        end_of_sequence: bool,
    ) -> LiuResult<()> {
        ctx.picture_ready = false;
        let stream = Arc::clone(self.params.stream().ok_or(LiuError::NoStreamParameters)?);
        let frame = self.params.take_frame().ok_or(LiuError::NoFrameParameters)?;
        let picture = frame.picture.as_ref().ok_or(LiuError::NoFrameParameters)?;
        let sequence = &stream.sequence;

        let structure = if picture.is_field() {
            field_structure(picture.tff, picture.first_field)
        } else {
            PictureStructure::Frame
        };
        let is_frame = structure == PictureStructure::Frame;
        let progressive_sequence = !sequence.interlace;
        if !display_combination_legal(progressive_sequence, is_frame, picture.tff, picture.rff) {
            warn!(
                "显示标志组合非法, 继续解码: progressive={}, frame={}, tff={}, rff={}",
                progressive_sequence, is_frame, picture.tff, picture.rff
            );
        }

        self.track_field_sequence(structure);

        let video = self.video_parameters(sequence, stream.entry_point.as_ref(), picture, structure);
        let matrix_coefficients = Self::matrix_coefficients(sequence);
        let ptype = picture.ptype;
        let second_field = picture.is_field() && !picture.first_field;
        let new_stream_parameters = self.new_stream_parameters_check(&stream);
        let time = ctx.time.take().unwrap_or_else(FrameTime::none);
        let data_offset = frame.picture_offset;

        let mut parsed = ParsedFrame::new(
            ctx.coded_index,
            ctx.data.clone(),
            video,
            Vc1Picture {
                stream,
                frame,
                matrix_coefficients,
            },
        );
        parsed.data_offset = data_offset;
        parsed.time = time;
        parsed.key_frame = ptype.is_key();
        parsed.reference_frame = ptype.is_reference();
        parsed.first_field_of_frame = self.first_decode_of_frame;
        parsed.second_field = second_field;
        parsed.references_required = ptype.references_required();
        parsed.new_stream_parameters = new_stream_parameters;

        self.core
            .process_frame(parsed, end_of_sequence, &mut self.sink)
    }

    /// 根据相邻图像的结构判断是否为输出帧的第一份参数, 并检测场序列错误
    fn track_field_sequence(&mut self, structure: PictureStructure) {
        let field_sequence_error = if structure == PictureStructure::Frame {
            self.first_decode_of_frame = true;
            false
        } else {
            let error = self.accumulated_structure == Some(structure);
            if self.accumulated_structure == Some(PictureStructure::Frame) {
                self.first_decode_of_frame = false;
            }
            self.first_decode_of_frame = self.first_decode_of_frame == error;
            error
        };
        self.accumulated_structure = Some(structure);

        if field_sequence_error {
            if self.first_decode_of_frame {
                warn!("场序列错误: 第二场缺失");
            } else {
                warn!("场序列错误: 第一场缺失");
                self.sink.send_event(DecodeEvent::FlushPartialDecode);
            }
        }
    }

    fn video_parameters(
        &mut self,
        sequence: &SequenceHeader,
        entry: Option<&EntryPointHeader>,
        picture: &PictureHeader,
        structure: PictureStructure,
    ) -> ParsedVideoParameters {
        let (width, height) = entry
            .and_then(|e| e.coded_size)
            .unwrap_or((sequence.max_coded_width, sequence.max_coded_height));
        let (display_width, display_height) = sequence
            .display_ext
            .as_ref()
            .map_or((width, height), |ext| (ext.display_width, ext.display_height));
        let display_width = display_width.min(width);
        let display_height = display_height.min(height);

        let mut content = VideoContent {
            width,
            height,
            display_width,
            display_height,
            display_x: (width - display_width) / 2,
            display_y: (height - display_height) / 2,
            progressive: !sequence.interlace,
            frame_rate: self.resolve_frame_rate(sequence),
            pixel_aspect_ratio: Rational::ONE,
        };
        content.pixel_aspect_ratio = Self::pixel_aspect_ratio(sequence, &content);

        let display_count = if sequence.progressive_display() {
            [picture.rptfrm + 1, 0]
        } else {
            [
                u32::from(picture.rff) + 1,
                u32::from(structure == PictureStructure::Frame),
            ]
        };

        ParsedVideoParameters {
            content,
            slice_type: picture.ptype.slice_type(),
            picture_structure: structure,
            interlaced_frame: picture.fcm != FrameCodingMode::Progressive,
            top_field_first: picture.tff,
            display_count,
            pan_scan: picture.pan_scan.clone(),
        }
    }

    /// 帧率: 码流给出的有效值, 其次为最近记录的值, 最后为配置的默认值
    fn resolve_frame_rate(&mut self, sequence: &SequenceHeader) -> Rational {
        let encoded = match sequence.display_ext.as_ref().and_then(|ext| ext.frame_rate) {
            Some(FrameRateCode::Table { nr, dr }) => {
                let rate = frame_rate_from_code(nr, dr);
                if rate.is_none() {
                    warn!("帧率码无效: nr={}, dr={}", nr, dr);
                }
                rate
            }
            Some(FrameRateCode::Exponent(exp)) => Some(frame_rate_from_exp(exp)),
            None => None,
        };
        match encoded {
            Some(rate) => {
                self.frame_rate = Some(rate);
                rate
            }
            None => self.frame_rate.unwrap_or(self.default_frame_rate),
        }
    }

    /// 像素宽高比 (宽:高)
    fn pixel_aspect_ratio(sequence: &SequenceHeader, content: &VideoContent) -> Rational {
        let Some(ext) = sequence.display_ext.as_ref() else {
            return Rational::ONE;
        };
        match ext.aspect_ratio {
            Some(AspectRatioCode::Explicit {
                horizontal,
                vertical,
            }) => {
                if vertical == 0 {
                    Rational::ONE
                } else {
                    Rational::new(horizontal as i32, vertical as i32)
                }
            }
            Some(AspectRatioCode::Table(code)) => pixel_aspect_ratio(code).unwrap_or_else(|| {
                if code != 0 {
                    warn!("保留的宽高比码 {}, 按 1:1 处理", code);
                }
                Rational::ONE
            }),
            None => {
                // 显示窗口按正方形像素铺满时的像素宽高比
                if content.display_height == 0 || content.width == 0 {
                    return Rational::ONE;
                }
                Rational::new(
                    (content.display_width * content.height) as i32,
                    (content.display_height * content.width) as i32,
                )
                .reduce()
            }
        }
    }

    fn matrix_coefficients(sequence: &SequenceHeader) -> MatrixCoefficients {
        let Some(color) = sequence.display_ext.as_ref().and_then(|ext| ext.color) else {
            return MatrixCoefficients::Unspecified;
        };
        MatrixCoefficients::from_code(color.matrix_coefficients).unwrap_or_else(|| {
            error!(
                "禁止或保留的矩阵系数码 {:#04x}, 按未指定处理",
                color.matrix_coefficients
            );
            MatrixCoefficients::Unspecified
        })
    }

    /// 序列头更新后的第一帧: 与上一次送出的流参数不同时才算新参数
    fn new_stream_parameters_check(&mut self, stream: &Arc<Vc1StreamParameters>) -> bool {
        if !self.stream_updated {
            return false;
        }
        self.stream_updated = false;
        let different = self
            .last_stream
            .as_deref()
            .is_none_or(|last| last != stream.as_ref());
        if different {
            self.last_stream = Some(Arc::clone(stream));
        }
        different
    }
}

impl<S: DecodeSink> std::fmt::Debug for Vc1FrameParser<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vc1FrameParser")
            .field("direction", &self.core.direction())
            .field("next_decode_index", &self.core.next_decode_index())
            .field("queued", &self.core.queued_len())
            .field("unplayable", &self.unplayable)
            .finish()
    }
}
