//! 共享状态管理

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// 一个视频的统计数据及抓取时UP主数据的快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub bvid: String,
    pub title: String,
    pub link: String,
    pub view_count: u64,
    pub comment_count: u64,
    pub danmaku_count: u64,
    pub coin_count: u64,
    pub like_count: u64,
    pub share_count: u64,
    pub favorite_count: u64,
    pub tname: String,
    pub cover_url: String,
    pub duration: u64,
    pub mid: String,
    pub author_name: String,
    pub follower_count: u64,
    pub historical_likes: u64,
    pub archive_count: u64,
    pub last_updated: DateTime<Utc>,
}

/// 共享状态：已跟踪的视频和刷新进度
pub struct SharedState {
    inner: RwLock<SharedStateInner>,
    stop: AtomicBool,
}

struct SharedStateInner {
    videos: HashMap<String, VideoRecord>,
    last_modified: String,
    progress_updated: Option<DateTime<Utc>>,
    total_items: usize,
    completed_items: usize,
    fetching: bool,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SharedStateInner {
                videos: HashMap::new(),
                last_modified: String::new(),
                progress_updated: None,
                total_items: 0,
                completed_items: 0,
                fetching: false,
            }),
            stop: AtomicBool::new(false),
        }
    }

    pub fn set_stop(&self, stop: bool) {
        self.stop.store(stop, Ordering::Release);
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn is_fetching(&self) -> bool {
        self.inner.read().fetching
    }

    /// 原子地开始一次刷新，已有刷新在进行时返回 false
    pub fn try_start_fetching(&self, total: usize) -> bool {
        let mut inner = self.inner.write();
        if inner.fetching {
            return false;
        }
        inner.fetching = true;
        inner.total_items = total;
        inner.completed_items = 0;
        inner.progress_updated = Some(Utc::now());
        true
    }

    pub fn update_progress(&self, completed: usize) {
        let mut inner = self.inner.write();
        inner.completed_items = inner.completed_items.max(completed);
        inner.progress_updated = Some(Utc::now());
    }

    pub fn finish_fetching(&self, completed: usize) {
        let mut inner = self.inner.write();
        inner.fetching = false;
        inner.completed_items = completed.min(inner.total_items);
        inner.progress_updated = Some(Utc::now());
    }

    /// 按 bvid 排序返回所有视频
    pub fn list_videos(&self) -> Vec<VideoRecord> {
        let inner = self.inner.read();
        let mut videos: Vec<_> = inner.videos.values().cloned().collect();
        videos.sort_by(|a, b| a.bvid.cmp(&b.bvid));
        videos
    }

    pub fn get_video(&self, bvid: &str) -> Option<VideoRecord> {
        self.inner.read().videos.get(bvid).cloned()
    }

    pub fn contains(&self, bvid: &str) -> bool {
        self.inner.read().videos.contains_key(bvid)
    }

    pub fn tracked_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.read().videos.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 新增视频，已存在时返回 `None` 且不做修改
    pub fn insert_new(&self, record: VideoRecord) -> Option<VideoRecord> {
        let mut inner = self.inner.write();
        if inner.videos.contains_key(&record.bvid) {
            return None;
        }
        inner.videos.insert(record.bvid.clone(), record.clone());
        inner.last_modified = format_http_date(Utc::now());
        Some(record)
    }

    /// 整条替换（或新增）记录，保证 `last_updated` 严格递增
    pub fn upsert(&self, mut record: VideoRecord) -> VideoRecord {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.videos.get(&record.bvid) {
            let floor = existing.last_updated + Duration::milliseconds(1);
            if record.last_updated < floor {
                record.last_updated = floor;
            }
        }
        inner.videos.insert(record.bvid.clone(), record.clone());
        inner.last_modified = format_http_date(Utc::now());
        record
    }

    pub fn remove(&self, bvid: &str) -> Option<VideoRecord> {
        let mut inner = self.inner.write();
        let removed = inner.videos.remove(bvid);
        if removed.is_some() {
            inner.last_modified = format_http_date(Utc::now());
        }
        removed
    }

    pub fn last_modified(&self) -> String {
        self.inner.read().last_modified.clone()
    }

    pub fn get_progress(&self) -> ProgressInfo {
        let inner = self.inner.read();
        let percent = if inner.total_items > 0 {
            (inner.completed_items as f64 / inner.total_items as f64) * 100.0
        } else {
            0.0
        };
        ProgressInfo {
            fetching: inner.fetching,
            completed: inner.completed_items,
            total: inner.total_items,
            percent,
            tracked: inner.videos.len(),
            last_data_time: inner.last_modified.clone(),
            progress_time: inner
                .progress_updated
                .map(format_http_date)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProgressInfo {
    pub fetching: bool,
    pub completed: usize,
    pub total: usize,
    pub percent: f64,
    pub tracked: usize,
    pub last_data_time: String,
    pub progress_time: String,
}

/// 格式化 HTTP 日期
pub fn format_http_date(dt: DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// 解析计数字符串（支持"万"、"亿"单位以及千分位逗号）
pub fn parse_count_string(value: &str) -> Option<u64> {
    let mut filtered = String::new();
    let mut scale = 1.0;

    for ch in value.trim().chars() {
        match ch {
            '0'..='9' | '.' => filtered.push(ch),
            '万' => scale *= 10_000.0,
            '亿' => scale *= 100_000_000.0,
            // 负数不是合法计数
            '-' => return None,
            _ => {}
        }
    }

    if filtered.is_empty() {
        return None;
    }

    let base: f64 = filtered.parse().ok()?;
    Some((base * scale).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(bvid: &str, views: u64, at: DateTime<Utc>) -> VideoRecord {
        VideoRecord {
            bvid: bvid.to_string(),
            title: "T".to_string(),
            link: format!("https://www.bilibili.com/video/{}", bvid),
            view_count: views,
            comment_count: 0,
            danmaku_count: 0,
            coin_count: 0,
            like_count: 0,
            share_count: 0,
            favorite_count: 0,
            tname: "未知分区".to_string(),
            cover_url: String::new(),
            duration: 0,
            mid: "7".to_string(),
            author_name: "U".to_string(),
            follower_count: 0,
            historical_likes: 0,
            archive_count: 0,
            last_updated: at,
        }
    }

    #[test]
    fn test_parse_count_string() {
        assert_eq!(parse_count_string("1234"), Some(1234));
        assert_eq!(parse_count_string("1,234"), Some(1234));
        assert_eq!(parse_count_string("1.5万"), Some(15000));
        assert_eq!(parse_count_string("2亿"), Some(200_000_000));
        assert_eq!(parse_count_string("-3"), None);
        assert_eq!(parse_count_string("--"), None);
        assert_eq!(parse_count_string(""), None);
    }

    #[test]
    fn test_insert_new_rejects_duplicates() {
        let state = SharedState::new();
        let now = Utc::now();
        assert!(state.insert_new(record("BV1", 1, now)).is_some());
        assert!(state.insert_new(record("BV1", 2, now)).is_none());
        assert_eq!(state.get_video("BV1").unwrap().view_count, 1);
    }

    #[test]
    fn test_upsert_replaces_whole_record_and_advances_time() {
        let state = SharedState::new();
        let now = Utc::now();
        state.upsert(record("BV1", 1, now));

        // 时钟回拨也不能让 last_updated 倒退
        let stored = state.upsert(record("BV1", 5, now - Duration::seconds(10)));
        assert_eq!(stored.view_count, 5);
        assert!(stored.last_updated > now);
        assert_eq!(state.get_video("BV1"), Some(stored));
    }

    #[test]
    fn test_list_and_remove() {
        let state = SharedState::new();
        let now = Utc::now();
        state.upsert(record("BVb", 1, now));
        state.upsert(record("BVa", 1, now));
        assert_eq!(state.tracked_ids(), vec!["BVa".to_string(), "BVb".to_string()]);
        assert_eq!(state.list_videos()[0].bvid, "BVa");

        assert!(state.remove("BVa").is_some());
        assert!(state.remove("BVa").is_none());
        assert!(!state.contains("BVa"));
        assert_eq!(state.get_progress().tracked, 1);
    }

    #[test]
    fn test_progress() {
        let state = SharedState::new();
        assert!(state.try_start_fetching(4));
        assert!(!state.try_start_fetching(7));
        state.update_progress(2);
        state.update_progress(1);
        let progress = state.get_progress();
        assert!(progress.fetching);
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.percent, 50.0);

        state.finish_fetching(9);
        let progress = state.get_progress();
        assert!(!progress.fetching);
        assert_eq!(progress.completed, 4);
        assert_eq!(progress.total, 4);

        // 结束后可以再次开始
        assert!(state.try_start_fetching(1));
    }
}
