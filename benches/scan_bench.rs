//! Liu 性能基准测试.
//!
//! 覆盖起始码扫描、PES 收集与 VC-1 头部解析路径.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use liu::collator::{Collator, FormatConfig, FormatId, scanner};
use liu::parser::DecodeEvent;
use liu::{Pipeline, PipelineConfig};

/// 伪随机负载, 不含 `00 00 01`
fn payload(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            ((state >> 16) as u8) | 0x02
        })
        .collect()
}

fn pes(pts: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x00, 0x00, 0x01, 0xE0];
    out.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    out.extend_from_slice(&[0x80, 0x80, 0x05]);
    out.extend_from_slice(&[
        0x21 | (((pts >> 30) as u8 & 0x07) << 1),
        (pts >> 22) as u8,
        (((pts >> 15) as u8) << 1) | 1,
        (pts >> 7) as u8,
        ((pts as u8) << 1) | 1,
    ]);
    out.extend_from_slice(payload);
    out
}

/// VC-1 码流: 每帧拆成若干 PES 包, 帧首为 `00 00 01 0D`
fn vc1_stream(frames: usize, frame_size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for i in 0..frames {
        let mut frame = vec![0x00, 0x00, 0x01, 0x0D];
        frame.extend(payload(frame_size, i as u32));
        for (j, part) in frame.chunks(2000).enumerate() {
            out.extend(pes((i * 3600 + j) as u64, part));
        }
    }
    out
}

fn bench_find_start_code(c: &mut Criterion) {
    let mut data = payload(1 << 20, 7);
    data.extend_from_slice(&[0x00, 0x00, 0x01, 0x0D]);
    let mut group = c.benchmark_group("scanner");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("find_next_start_code_1m", |b| {
        b.iter(|| scanner::find_next_start_code(black_box(&data), None));
    });
    group.finish();
}

fn bench_collate(c: &mut Criterion) {
    let stream = vc1_stream(64, 16 * 1024);
    let mut group = c.benchmark_group("collator");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    for chunk in [188usize, 4096, 65536] {
        group.bench_function(format!("vc1_chunk_{}", chunk), |b| {
            b.iter(|| {
                let mut collator = Collator::new(FormatConfig::for_format(FormatId::Vc1)).unwrap();
                for part in black_box(&stream).chunks(chunk) {
                    collator.input(part).unwrap();
                }
                collator.flush().unwrap();
                collator.drain_frames().len()
            });
        });
    }
    group.finish();
}

fn bench_pipeline_mpeg2(c: &mut Criterion) {
    // 非 VC-1 格式只经过收集器, 衡量流水线分派开销
    let mut stream = Vec::new();
    for i in 0..64u64 {
        let mut frame = vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x10];
        frame.extend(payload(8 * 1024, i as u32));
        stream.extend(pes(i * 3003, &frame));
    }
    let config = PipelineConfig {
        format: FormatId::Mpeg2Video,
        ..PipelineConfig::default()
    };
    c.bench_function("pipeline_mpeg2_64_frames", |b| {
        b.iter(|| {
            let mut pipeline = Pipeline::new(config.clone(), Vec::<DecodeEvent>::new()).unwrap();
            pipeline.run(black_box(&stream)).unwrap();
            std::iter::from_fn(|| pipeline.take_coded()).count()
        });
    });
}

criterion_group!(benches, bench_find_start_code, bench_collate, bench_pipeline_mpeg2);
criterion_main!(benches);
