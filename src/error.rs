//! 错误类型

use std::fmt;
use thiserror::Error;

/// 组装视频记录时失败的步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    VideoDetail,
    UploaderId,
    UploaderDetail,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::VideoDetail => "video detail",
            Stage::UploaderId => "uploader id",
            Stage::UploaderDetail => "uploader detail",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum BiliError {
    /// 传输层失败或超时，调用方可直接重试
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// 响应体 code 非 0（包括签名被拒）
    #[error("platform returned code {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("failed to assemble {bvid} at {stage}: {source}")]
    Assembly {
        bvid: String,
        stage: Stage,
        #[source]
        source: Box<BiliError>,
    },
}

impl BiliError {
    pub fn missing(field: impl Into<String>) -> Self {
        BiliError::MissingField(field.into())
    }

    pub fn assembly(bvid: &str, stage: Stage, source: BiliError) -> Self {
        BiliError::Assembly {
            bvid: bvid.to_string(),
            stage,
            source: Box::new(source),
        }
    }

    /// 网络错误可直接重试，协议错误需要在刷新密钥后重试
    pub fn is_retryable(&self) -> bool {
        match self {
            BiliError::Network(_) | BiliError::Protocol { .. } => true,
            BiliError::MissingField(_) => false,
            BiliError::Assembly { source, .. } => source.is_retryable(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BiliError>;

/// 播放量预测服务错误
#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("prediction service unreachable: {0}")]
    Network(#[from] reqwest::Error),

    #[error("prediction service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("prediction service error: {0}")]
    Service(String),

    #[error("invalid video reference: {0}")]
    InvalidVideo(String),
}
