//! 流水线配置.
//!
//! 配置以 JSON 保存, 省略的字段取默认值:
//!
//! ```json
//! {
//!     "format": "vc1",
//!     "chunk_size": 65536,
//!     "default_frame_rate": { "num": 24000, "den": 1001 },
//!     "direction": "forward"
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use liu_collator::{FormatConfig, FormatId};
use liu_core::Rational;
use liu_parser::{PlayDirection, Vc1ParserConfig};

/// 帧率配置 (分子/分母)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct FrameRateConfig {
    pub num: i32,
    pub den: i32,
}

impl From<FrameRateConfig> for Rational {
    fn from(rate: FrameRateConfig) -> Self {
        Rational::new(rate.num, rate.den)
    }
}

/// 流水线配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// 码流格式
    #[serde(default = "default_format")]
    pub format: FormatId,
    /// 每次送入收集器的字节数
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// 覆盖格式表中的最大帧尺寸
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_frame_size: Option<usize>,
    /// 覆盖格式表中单帧最多记录的起始码数量
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_start_codes: Option<usize>,
    /// 码流未给出帧率时使用的帧率
    #[serde(default = "default_frame_rate")]
    pub default_frame_rate: FrameRateConfig,
    /// 播放方向
    #[serde(default)]
    pub direction: PlayDirection,
}

fn default_format() -> FormatId {
    FormatId::Vc1
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_frame_rate() -> FrameRateConfig {
    FrameRateConfig {
        num: 24000,
        den: 1001,
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            chunk_size: default_chunk_size(),
            max_frame_size: None,
            max_start_codes: None,
            default_frame_rate: default_frame_rate(),
            direction: PlayDirection::Forward,
        }
    }
}

impl PipelineConfig {
    /// 从 JSON 文本解析并校验
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).context("解析流水线配置失败")?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败, path={}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("配置文件无效, path={}", path.display()))
    }

    /// 序列化为带缩进的 JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("序列化流水线配置失败")
    }

    /// 检查取值范围
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size 不能为 0");
        }
        if !Rational::from(self.default_frame_rate).is_positive() {
            bail!(
                "default_frame_rate 必须为正: {}/{}",
                self.default_frame_rate.num,
                self.default_frame_rate.den
            );
        }
        if self.max_start_codes == Some(0) {
            bail!("max_start_codes 不能为 0");
        }
        Ok(())
    }

    /// 是否对该格式运行 VC-1 帧解析器
    pub fn parses_vc1(&self) -> bool {
        matches!(self.format, FormatId::Vc1 | FormatId::Vc1FramePerPacket)
    }

    /// 收集器配置: 格式表记录加上本配置的覆盖项
    pub fn format_config(&self) -> FormatConfig {
        let mut config = FormatConfig::for_format(self.format);
        if let Some(max_frame_size) = self.max_frame_size {
            config.max_frame_size = max_frame_size;
        }
        if let Some(max_start_codes) = self.max_start_codes {
            config.max_start_codes = max_start_codes;
        }
        config
    }

    /// VC-1 帧解析器配置
    pub fn parser_config(&self) -> Vc1ParserConfig {
        Vc1ParserConfig {
            default_frame_rate: self.default_frame_rate.into(),
            direction: self.direction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_空对象取默认值() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.chunk_size, 65536);
        assert!(config.parses_vc1());
    }

    #[test]
    fn test_覆盖格式表() {
        let config = PipelineConfig::from_json(
            r#"{"format": "mpeg2_video", "max_frame_size": 1024, "max_start_codes": 8}"#,
        )
        .unwrap();
        let format = config.format_config();
        assert_eq!(format.format, FormatId::Mpeg2Video);
        assert_eq!(format.max_frame_size, 1024);
        assert_eq!(format.max_start_codes, 8);
        assert!(!config.parses_vc1());
    }

    #[test]
    fn test_解析器配置() {
        let config = PipelineConfig::from_json(
            r#"{"direction": "reverse", "default_frame_rate": {"num": 25, "den": 1}}"#,
        )
        .unwrap();
        let parser = config.parser_config();
        assert_eq!(parser.direction, PlayDirection::Reverse);
        assert_eq!(parser.default_frame_rate, Rational::new(25, 1));
    }

    #[test]
    fn test_非法取值应返回错误() {
        PipelineConfig::from_json(r#"{"chunk_size": 0}"#).expect_err("chunk_size 为 0 应返回错误");
        PipelineConfig::from_json(r#"{"default_frame_rate": {"num": 0, "den": 1}}"#)
            .expect_err("帧率为 0 应返回错误");
        PipelineConfig::from_json(r#"{"format": "h264"}"#).expect_err("未知格式应返回错误");
    }

    #[test]
    fn test_json_往返() {
        let config = PipelineConfig {
            format: FormatId::Vc1FramePerPacket,
            max_frame_size: Some(4096),
            ..PipelineConfig::default()
        };
        let text = config.to_json().unwrap();
        assert!(!text.contains("max_start_codes"), "未设置的覆盖项不应输出");
        assert_eq!(PipelineConfig::from_json(&text).unwrap(), config);
    }
}
