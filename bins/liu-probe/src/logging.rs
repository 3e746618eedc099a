//! 日志初始化.
//!
//! - console: 输出到 stderr (stdout 留给探测结果), 彩色
//! - file: 可选, 按天滚动, 无色
//!
//! 级别由 -v/-vv 控制, LIU_LOG 环境变量可覆盖. 库 crate 的 `log` 记录经
//! tracing-subscriber 内置的 tracing-log 桥接输出.

use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::{Datelike, Local, Timelike};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// 覆盖日志级别的环境变量
pub const LOG_ENV: &str = "LIU_LOG";

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// 日志选项
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// 日志文件前缀
    pub file_prefix: String,
    /// 0=warn, 1=info, 2=debug, 3+=trace
    pub verbosity: u8,
    /// 日志文件目录, `None` 时不写文件
    pub directory: Option<PathBuf>,
}

/// -v 次数对应的级别
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level_for_verbosity(verbosity)))
}

/// 初始化日志系统
pub fn init(options: &LoggingOptions) -> Result<()> {
    let console_layer = fmt::Layer::default()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .event_format(ProbeFormatter { ansi: true })
        .with_filter(filter(options.verbosity));

    let file_layer = match &options.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)
                .with_context(|| format!("创建日志目录失败, path={}", directory.display()))?;
            let appender = tracing_appender::rolling::RollingFileAppender::builder()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix(&options.file_prefix)
                .filename_suffix("log")
                .build(directory)
                .context("创建日志文件失败")?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            LOG_GUARD.set(guard).ok();
            Some(
                fmt::Layer::default()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(ProbeFormatter { ansi: false })
                    .with_filter(filter(options.verbosity)),
            )
        }
        None => None,
    };

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("日志系统已初始化")?;
    Ok(())
}

/// 时间戳 + 级别 + 消息, 彩色模式下级别着色
struct ProbeFormatter {
    ansi: bool,
}

impl<S, N> FormatEvent<S, N> for ProbeFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        let level = *event.metadata().level();
        write!(
            writer,
            "[{:02}-{:02} {:02}:{:02}:{:02}.{:03}] ",
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_millis(),
        )?;
        if self.ansi {
            let color = match level {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                _ => "\x1b[34m",
            };
            write!(writer, "{}{:5}\x1b[0m > ", color, level)?;
        } else {
            write!(writer, "{:5} > ", level)?;
        }
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
