use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{OptionsError, Result};

/// 分片流媒体格式
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    #[default]
    Hls,
    Dash,
}

impl StreamFormat {
    /// 清单文件名（相对于输出目录）
    pub fn manifest_name(&self) -> &'static str {
        match self {
            StreamFormat::Hls => "livestream.m3u8",
            StreamFormat::Dash => "livestream.mpd",
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFormat::Hls => write!(f, "hls"),
            StreamFormat::Dash => write!(f, "dash"),
        }
    }
}

impl FromStr for StreamFormat {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hls" => Ok(StreamFormat::Hls),
            "dash" => Ok(StreamFormat::Dash),
            other => Err(OptionsError::UnknownFormat(other.to_string())),
        }
    }
}

/// 摄像头采集参数
///
/// 数值为 0 表示不覆盖采集程序的默认值。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoOptions {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
}

/// 封装（切片）参数，会话开始时固定
///
/// ffmpeg 会在未设置（为 0）的字段上使用自己的默认值。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuxOptions {
    pub directory: PathBuf,
    /// 输出帧率
    pub fps: u32,
    /// 目标分片时长（秒）
    pub segment_time: u32,
    /// 播放列表最大条目数
    pub playlist_size: u32,
    /// 磁盘上保留的未被引用分片的最大数量
    pub storage_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!("hls".parse::<StreamFormat>().unwrap(), StreamFormat::Hls);
        assert_eq!("DASH".parse::<StreamFormat>().unwrap(), StreamFormat::Dash);
        assert!(matches!(
            "webm".parse::<StreamFormat>(),
            Err(OptionsError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_manifest_names() {
        assert_eq!(StreamFormat::Hls.manifest_name(), "livestream.m3u8");
        assert_eq!(StreamFormat::Dash.manifest_name(), "livestream.mpd");
    }
}
