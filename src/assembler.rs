//! 视频记录组装
//!
//! 先请求视频详情拿到 UP主 mid，再请求 UP主名片，两份数据合并成一条
//! [`VideoRecord`]。上游字段缺失时用占位值填充，不直接失败。

use crate::client::{PlatformClient, RawUploaderPayload, RawVideoPayload};
use crate::credential::Clock;
use crate::error::{BiliError, Result, Stage};
use crate::state::{parse_count_string, VideoRecord};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

const UNKNOWN_TITLE: &str = "未知标题";
const UNKNOWN_CATEGORY: &str = "未知分区";
const UNKNOWN_AUTHOR: &str = "未知UP主";

/// 组装所需的两个接口
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn fetch_video_detail(&self, bvid: &str) -> Result<RawVideoPayload>;
    async fn fetch_uploader_detail(&self, mid: &str) -> Result<RawUploaderPayload>;
}

#[async_trait]
impl<C: Clock> VideoSource for PlatformClient<C> {
    async fn fetch_video_detail(&self, bvid: &str) -> Result<RawVideoPayload> {
        PlatformClient::<C>::fetch_video_detail(self, bvid).await
    }

    async fn fetch_uploader_detail(&self, mid: &str) -> Result<RawUploaderPayload> {
        PlatformClient::<C>::fetch_uploader_detail(self, mid).await
    }
}

pub struct RecordAssembler<S> {
    source: Arc<S>,
}

impl<S: VideoSource> RecordAssembler<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }

    /// 抓取并合并一个视频的完整记录
    pub async fn assemble(&self, bvid: &str) -> Result<VideoRecord> {
        info!("[bili] assembling {}", bvid);

        let video = self
            .source
            .fetch_video_detail(bvid)
            .await
            .map_err(|e| BiliError::assembly(bvid, Stage::VideoDetail, e))?;

        let mid = uploader_id(&video).ok_or_else(|| {
            error!("[bili] no uploader id in video detail for {}", bvid);
            BiliError::assembly(bvid, Stage::UploaderId, BiliError::missing("owner.mid"))
        })?;

        let uploader = self
            .source
            .fetch_uploader_detail(&mid)
            .await
            .map_err(|e| BiliError::assembly(bvid, Stage::UploaderDetail, e))?;

        Ok(merge_record(bvid, &mid, &video, &uploader))
    }
}

/// 取 `owner.mid`，兼容数字和字符串，0/空串视为缺失
pub fn uploader_id(video: &Value) -> Option<String> {
    let mid = video.get("owner")?.get("mid")?;
    let mid = if let Some(s) = mid.as_str() {
        s.trim().to_string()
    } else if let Some(n) = mid.as_u64() {
        n.to_string()
    } else {
        return None;
    };

    if mid.is_empty() || mid == "0" {
        None
    } else {
        Some(mid)
    }
}

/// 计数字段：数字或带单位的字符串，缺失或非法记为 0
fn count(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => parse_count_string(s).unwrap_or(0),
        _ => 0,
    }
}

fn text(value: Option<&Value>, default: &str) -> String {
    value
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// 按字段表合并两份原始数据
pub fn merge_record(
    bvid: &str,
    mid: &str,
    video: &RawVideoPayload,
    uploader: &RawUploaderPayload,
) -> VideoRecord {
    let stat = video.get("stat");
    let stat_field = |name: &str| count(stat.and_then(|s| s.get(name)));
    let card = uploader.get("card");

    VideoRecord {
        bvid: bvid.to_string(),
        title: text(video.get("title"), UNKNOWN_TITLE),
        link: format!("https://www.bilibili.com/video/{}", bvid),
        view_count: stat_field("view"),
        comment_count: stat_field("reply"),
        danmaku_count: stat_field("danmaku"),
        coin_count: stat_field("coin"),
        like_count: stat_field("like"),
        share_count: stat_field("share"),
        favorite_count: stat_field("favorite"),
        tname: text(video.get("tname"), UNKNOWN_CATEGORY),
        cover_url: text(video.get("pic"), ""),
        duration: count(video.get("duration")),
        mid: mid.to_string(),
        author_name: text(card.and_then(|c| c.get("name")), UNKNOWN_AUTHOR),
        follower_count: count(card.and_then(|c| c.get("fans"))),
        historical_likes: count(uploader.get("like_num")),
        archive_count: count(uploader.get("archive_count")),
        last_updated: Utc::now(),
    }
}
