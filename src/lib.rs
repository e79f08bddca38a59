//! B站视频数据监控
//!
//! 核心是数据抓取：WBI 签名、密钥缓存、两次请求合并成一条视频记录，
//! 以及限制并发的批量抓取。HTTP 接口和定时刷新是外围的调用方。

pub mod assembler;
pub mod batch;
pub mod client;
pub mod crawler;
pub mod credential;
pub mod error;
pub mod prediction;
pub mod server;
pub mod state;
pub mod wbi;

pub use assembler::{RecordAssembler, VideoSource};
pub use batch::{BatchCoordinator, DEFAULT_MAX_CONCURRENCY};
pub use client::{ClientConfig, PlatformClient};
pub use credential::{Credential, SignatureCache};
pub use error::{BiliError, PredictionError, Result};
pub use state::{SharedState, VideoRecord};
