//! liu-probe - 码流探测工具
//!
//! 读取 PES 文件, 运行收集器与 VC-1 帧解析器, 按解码顺序逐帧输出解析结果.

mod logging;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;

use liu::collator::{CodedFrame, FormatId};
use liu::parser::{DecodeEvent, ParsedFrame, PlayDirection, Vc1Picture};
use liu::{Pipeline, PipelineConfig, PipelineStatistics};

/// Liu 码流探测工具
#[derive(Parser, Debug)]
#[command(name = "liu-probe", version, about = "PES 视频收集与 VC-1 帧解析探测工具")]
struct Cli {
    /// 输入文件路径
    input: PathBuf,

    /// JSON 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 码流格式 (vc1, mpeg2video, mpeg4, vc1_frame_per_packet), 覆盖配置文件
    #[arg(short, long)]
    format: Option<String>,

    /// 每次读取的字节数, 覆盖配置文件
    #[arg(long)]
    chunk_size: Option<usize>,

    /// 模拟反向播放
    #[arg(long)]
    reverse: bool,

    /// 输出 JSON 格式
    #[arg(long)]
    json: bool,

    /// 只输出统计信息
    #[arg(long)]
    summary: bool,

    /// 日志详细程度 (-v/-vv/-vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// 日志文件目录
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

// ============================================================
// 输出结构体
// ============================================================

/// 完整探测结果
#[derive(Serialize)]
struct ProbeOutput {
    filename: String,
    format: String,
    direction: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    frames: Vec<FrameInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    coded_frames: Vec<CodedInfo>,
    summary: Summary,
}

/// 一个解析结果
#[derive(Serialize)]
struct FrameInfo {
    decode_index: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_index: Option<u64>,
    coded_index: u64,
    picture_type: String,
    structure: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pts: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dts: Option<u64>,
    width: u32,
    height: u32,
    display_width: u32,
    display_height: u32,
    frame_rate: String,
    pixel_aspect_ratio: String,
    key_frame: bool,
    reference_frame: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_list: Option<Vec<u64>>,
    display_count: [u32; 2],
    slices: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    new_stream_parameters: bool,
}

/// 一个未解析的编码帧
#[derive(Serialize)]
struct CodedInfo {
    index: u64,
    size: usize,
    start_codes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pts: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dts: Option<u64>,
}

/// 统计信息
#[derive(Serialize, Default)]
struct Summary {
    bytes_input: u64,
    coded_frames: u64,
    parsed_frames: u64,
    discarded_frames: u64,
    bytes_discarded: u64,
    malformed_headers: u64,
    lost_packets: u64,
    oversize_frames: u64,
    start_codes_dropped: u64,
    insufficient_references: u64,
    reverse_groups: u64,
    released_references: u64,
    partial_decode_flushes: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    unplayable: Vec<String>,
}

impl Summary {
    fn new(stats: &PipelineStatistics, parsed_frames: u64, events: &[DecodeEvent]) -> Self {
        let mut summary = Self {
            bytes_input: stats.collator.bytes_input,
            coded_frames: stats.coded_frames,
            parsed_frames,
            discarded_frames: stats.discarded_frames,
            bytes_discarded: stats.collator.bytes_discarded,
            malformed_headers: stats.collator.malformed_headers,
            lost_packets: stats.collator.lost_packets,
            oversize_frames: stats.collator.oversize_frames,
            start_codes_dropped: stats.collator.start_codes_dropped,
            insufficient_references: stats.framework.insufficient_references,
            reverse_groups: stats.reverse_groups,
            ..Self::default()
        };
        for event in events {
            match event {
                DecodeEvent::ReleaseReferenceFrame(_) | DecodeEvent::ReleaseAllReferenceFrames => {
                    summary.released_references += 1;
                }
                DecodeEvent::FlushPartialDecode => summary.partial_decode_flushes += 1,
                DecodeEvent::StreamUnplayable(reason) => summary.unplayable.push(reason.clone()),
            }
        }
        summary
    }
}

fn frame_info(frame: &ParsedFrame<Vc1Picture>) -> FrameInfo {
    let content = &frame.video.content;
    FrameInfo {
        decode_index: frame.decode_index,
        display_index: frame.display_index,
        coded_index: frame.coded_index,
        picture_type: frame
            .codec
            .picture()
            .map_or_else(|| "?".to_string(), |p| p.ptype.to_string()),
        structure: frame.video.picture_structure.to_string(),
        pts: frame.time.pts,
        dts: frame.time.dts,
        width: content.width,
        height: content.height,
        display_width: content.display_width,
        display_height: content.display_height,
        frame_rate: content.frame_rate.to_string(),
        pixel_aspect_ratio: content.pixel_aspect_ratio.to_string(),
        key_frame: frame.key_frame,
        reference_frame: frame.reference_frame,
        reference_list: frame.reference_list.clone(),
        display_count: frame.video.display_count,
        slices: frame.codec.frame.slices.len(),
        new_stream_parameters: frame.new_stream_parameters,
    }
}

fn coded_info(frame: &CodedFrame) -> CodedInfo {
    CodedInfo {
        index: frame.index,
        size: frame.len(),
        start_codes: frame.start_codes.len(),
        pts: frame.time.pts,
        dts: frame.time.dts,
    }
}

// ============================================================
// 主逻辑
// ============================================================

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("错误: {e:#}");
        std::process::exit(1);
    }
}

fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(name) = &cli.format {
        config.format = match FormatId::from_name(name) {
            Some(format) => format,
            None => bail!("未知格式: {name}"),
        };
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = chunk_size;
    }
    if cli.reverse {
        config.direction = PlayDirection::Reverse;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> Result<()> {
    logging::init(&logging::LoggingOptions {
        file_prefix: "liu-probe".into(),
        verbosity: cli.verbose,
        directory: cli.log_dir.clone(),
    })?;

    let config = build_config(cli)?;
    log::info!(
        "探测: input={}, format={}, direction={}",
        cli.input.display(),
        config.format,
        config.direction
    );

    let file = File::open(&cli.input)
        .with_context(|| format!("无法打开文件 '{}'", cli.input.display()))?;
    let mut pipeline =
        Pipeline::new(config.clone(), Vec::<DecodeEvent>::new()).context("创建流水线失败")?;
    pipeline
        .run_reader(BufReader::new(file))
        .context("处理码流失败")?;

    let mut frames = Vec::new();
    while let Some(frame) = pipeline.take_parsed() {
        frames.push(frame_info(&frame));
    }
    let mut coded_frames = Vec::new();
    while let Some(frame) = pipeline.take_coded() {
        coded_frames.push(coded_info(&frame));
    }
    let summary = Summary::new(
        &pipeline.statistics(),
        frames.len() as u64,
        pipeline.sink(),
    );
    if cli.summary {
        frames.clear();
        coded_frames.clear();
    }

    let output = ProbeOutput {
        filename: cli.input.display().to_string(),
        format: config.format.to_string(),
        direction: config.direction.to_string(),
        frames,
        coded_frames,
        summary,
    };
    if cli.json {
        let text = serde_json::to_string_pretty(&output).context("JSON 序列化失败")?;
        println!("{text}");
    } else {
        print_text(&output);
    }
    Ok(())
}

fn print_text(output: &ProbeOutput) {
    println!("文件: {}", output.filename);
    println!("格式: {}, 方向: {}", output.format, output.direction);

    if !output.frames.is_empty() {
        println!();
        println!(
            "{:>6} {:>6} {:>6} {:<4} {:<6} {:>12} {:>12} {:>11} {:>12} {:<8} 参考",
            "解码", "显示", "编码帧", "类型", "结构", "PTS", "DTS", "尺寸", "帧率", "宽高比"
        );
        for f in &output.frames {
            println!(
                "{:>6} {:>6} {:>6} {:<4} {:<6} {:>12} {:>12} {:>11} {:>12} {:<8} {:?}",
                f.decode_index,
                opt(f.display_index),
                f.coded_index,
                f.picture_type,
                f.structure,
                opt(f.pts),
                opt(f.dts),
                format!("{}x{}", f.width, f.height),
                f.frame_rate,
                f.pixel_aspect_ratio,
                f.reference_list.as_deref().unwrap_or_default(),
            );
        }
    }

    if !output.coded_frames.is_empty() {
        println!();
        println!("{:>6} {:>10} {:>8} {:>12} {:>12}", "序号", "大小", "起始码", "PTS", "DTS");
        for c in &output.coded_frames {
            println!(
                "{:>6} {:>10} {:>8} {:>12} {:>12}",
                c.index,
                c.size,
                c.start_codes,
                opt(c.pts),
                opt(c.dts)
            );
        }
    }

    let s = &output.summary;
    println!();
    println!("--- 统计 ---");
    println!("输入字节:   {}", s.bytes_input);
    println!("编码帧:     {}", s.coded_frames);
    println!("解析帧:     {}", s.parsed_frames);
    println!("丢弃帧:     {} (参考不足 {})", s.discarded_frames, s.insufficient_references);
    println!(
        "收集器:     丢弃 {} 字节, 坏 PES 头 {}, 丢包 {}, 超长帧 {}, 起始码溢出 {}",
        s.bytes_discarded, s.malformed_headers, s.lost_packets, s.oversize_frames, s.start_codes_dropped
    );
    println!(
        "解码事件:   释放参考 {}, 冲刷部分解码 {}",
        s.released_references, s.partial_decode_flushes
    );
    if s.reverse_groups > 0 {
        println!("反向图像组: {}", s.reverse_groups);
    }
    for reason in &s.unplayable {
        println!("不可播放:   {reason}");
    }
}

fn opt(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("liu-probe").chain(args.iter().copied()))
    }

    #[test]
    fn test_命令行覆盖配置() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.json");
        std::fs::write(&path, r#"{"format": "mpeg2_video", "chunk_size": 100}"#).unwrap();

        let args = cli(&[
            "in.pes",
            "--config",
            path.to_str().unwrap(),
            "--chunk-size",
            "7",
            "--reverse",
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.format, FormatId::Mpeg2Video);
        assert_eq!(config.chunk_size, 7);
        assert_eq!(config.direction, PlayDirection::Reverse);

        let args = cli(&["in.pes", "--format", "VC1_FRAME_PER_PACKET"]);
        assert_eq!(build_config(&args).unwrap().format, FormatId::Vc1FramePerPacket);
    }

    #[test]
    fn test_未知格式应返回错误() {
        let args = cli(&["in.pes", "--format", "h265"]);
        build_config(&args).expect_err("未知格式应返回错误");
        let args = cli(&["in.pes", "--chunk-size", "0"]);
        build_config(&args).expect_err("chunk_size 为 0 应返回错误");
    }

    #[test]
    fn test_事件统计() {
        let events = vec![
            DecodeEvent::ReleaseReferenceFrame(0),
            DecodeEvent::ReleaseAllReferenceFrames,
            DecodeEvent::FlushPartialDecode,
            DecodeEvent::StreamUnplayable("level=6".into()),
        ];
        let summary = Summary::new(&PipelineStatistics::default(), 3, &events);
        assert_eq!(summary.released_references, 2);
        assert_eq!(summary.partial_decode_flushes, 1);
        assert_eq!(summary.unplayable, vec!["level=6".to_string()]);
        assert_eq!(summary.parsed_frames, 3);
    }
}
