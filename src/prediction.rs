//! 播放量预测服务客户端
//!
//! 预测模型运行在外部服务上，这里只负责发请求和整理返回结果。

use crate::error::PredictionError;
use chrono::Local;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info};

/// 预测过程较慢，超时放宽到 120 秒
pub const PREDICTION_TIMEOUT: Duration = Duration::from_secs(120);
const PREDICTION_USER_AGENT: &str = "BiliBrother-Prediction-Client/1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub bvid: String,
    pub predicted_play_count: f64,
    pub range_score: Value,
    #[serde(rename = "estimated7DayViews")]
    pub estimated_7day_views: Value,
    pub trending_analysis: Value,
    pub prediction_time: String,
    pub raw_regression: f64,
    pub post_processed: f64,
    pub raw_message: String,
}

/// 从 BV 号或完整视频链接中取出 BV 号
pub fn normalize_bvid(input: &str) -> Option<String> {
    let input = input.trim();
    if input.starts_with("BV") {
        return Some(input.to_string());
    }
    input
        .split(&['/', '?', '#'][..])
        .find(|part| part.starts_with("BV") && part.len() > 2)
        .map(str::to_string)
}

pub struct PredictionClient {
    client: Client,
    server_url: String,
}

impl PredictionClient {
    pub fn new(server_url: &str) -> Result<Self, PredictionError> {
        let client = Client::builder()
            .timeout(PREDICTION_TIMEOUT)
            .user_agent(PREDICTION_USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// 请求外部服务预测播放量，`cookie` 原样转发给预测服务
    pub async fn predict(
        &self,
        video: &str,
        cookie: Option<&str>,
    ) -> Result<Prediction, PredictionError> {
        let bvid = normalize_bvid(video)
            .ok_or_else(|| PredictionError::InvalidVideo(video.to_string()))?;
        let endpoint = format!("{}/analyze_video_link", self.server_url);
        info!("[predict] requesting prediction for {} from {}", bvid, endpoint);

        let payload = json!({
            "videoLink": bvid,
            "config": { "cookie": cookie.unwrap_or("") },
        });

        let response = self.client.post(&endpoint).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("[predict] service returned status {}: {}", status, body);
            return Err(PredictionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let result: Value = response.json().await?;
        parse_prediction(&bvid, &result)
    }
}

fn parse_prediction(bvid: &str, result: &Value) -> Result<Prediction, PredictionError> {
    if let Some(err) = result.get("error") {
        let message = err
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(PredictionError::Service(message));
    }

    let number = |name: &str| result.get(name).and_then(|v| v.as_f64()).unwrap_or(0.0);
    let raw = |name: &str, default: Value| result.get(name).cloned().unwrap_or(default);

    let prediction = Prediction {
        bvid: bvid.to_string(),
        predicted_play_count: number("predicted_play_count"),
        range_score: raw("range_score", json!("")),
        estimated_7day_views: raw("estimated7DayViews", json!("")),
        trending_analysis: raw("trending_analysis", json!({})),
        prediction_time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        raw_regression: number("raw_regression"),
        post_processed: number("post_processed"),
        raw_message: result
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
    };
    info!(
        "[predict] {} predicted play count {}",
        bvid, prediction.predicted_play_count
    );
    Ok(prediction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bvid() {
        assert_eq!(normalize_bvid("BV1xx411c7mD").as_deref(), Some("BV1xx411c7mD"));
        assert_eq!(
            normalize_bvid("https://www.bilibili.com/video/BV1xx411c7mD/?spm=1").as_deref(),
            Some("BV1xx411c7mD")
        );
        assert_eq!(normalize_bvid("https://www.bilibili.com/"), None);
    }

    #[test]
    fn test_parse_prediction() {
        let result = json!({
            "predicted_play_count": 12345.0,
            "range_score": "B",
            "estimated7DayViews": "1.2万",
            "raw_regression": 1.5,
            "message": "ok"
        });
        let prediction = parse_prediction("BV1", &result).unwrap();
        assert_eq!(prediction.predicted_play_count, 12345.0);
        assert_eq!(prediction.range_score, json!("B"));
        assert_eq!(prediction.trending_analysis, json!({}));
        assert_eq!(prediction.post_processed, 0.0);
        assert_eq!(prediction.raw_message, "ok");
    }

    #[test]
    fn test_parse_prediction_error_field() {
        let err = parse_prediction("BV1", &json!({"error": "model offline"})).unwrap_err();
        assert!(matches!(err, PredictionError::Service(m) if m == "model offline"));
    }
}
