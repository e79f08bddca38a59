//! B站接口客户端

use crate::credential::{Clock, KeySource, SignatureCache, SystemClock, WbiKeys};
use crate::error::{BiliError, Result};
use crate::wbi;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

pub const BILIBILI_API_HOST: &str = "https://api.bilibili.com";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const REFERER: &str = "https://www.bilibili.com/";
const ORIGIN: &str = "https://www.bilibili.com";

/// 单次请求超时
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// 每次请求前的固定延迟，避免触发风控
pub const REQUEST_DELAY: Duration = Duration::from_secs(1);

const NAV_PATH: &str = "/x/web-interface/nav";
const VIDEO_VIEW_PATH: &str = "/x/web-interface/wbi/view";
const CARD_PATH: &str = "/x/web-interface/card";

/// `wbi/view` 返回的 `data`
pub type RawVideoPayload = Value;
/// `card` 返回的 `data`
pub type RawUploaderPayload = Value;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_host: String,
    pub timeout: Duration,
    pub request_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_host: BILIBILI_API_HOST.to_string(),
            timeout: REQUEST_TIMEOUT,
            request_delay: REQUEST_DELAY,
        }
    }
}

/// 拆开 `{code, data, message}` 响应，code 非 0 视为协议错误
pub fn unwrap_envelope(mut json: Value) -> Result<Value> {
    let code = json
        .get("code")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| BiliError::missing("code"))?;

    if code != 0 {
        let message = json
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("未知错误")
            .to_string();
        return Err(BiliError::Protocol { code, message });
    }

    match json.get_mut("data").map(Value::take) {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(BiliError::missing("data")),
    }
}

/// 共享的 HTTP 层：浏览器伪装头、超时和 Cookie
pub struct BiliHttp {
    client: Client,
    config: ClientConfig,
    cookie: RwLock<Option<String>>,
}

impl BiliHttp {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            config,
            cookie: RwLock::new(None),
        })
    }

    pub fn set_cookie(&self, cookie: &str) {
        let cookie = cookie.trim();
        *self.cookie.write() = if cookie.is_empty() {
            None
        } else {
            Some(cookie.to_string())
        };
    }

    pub fn cookie(&self) -> Option<String> {
        self.cookie.read().clone()
    }

    async fn throttle(&self) {
        if !self.config.request_delay.is_zero() {
            sleep(self.config.request_delay).await;
        }
    }

    async fn get_data<Q: Serialize + ?Sized>(&self, path: &str, query: &Q) -> Result<Value> {
        let url = format!("{}{}", self.config.api_host, path);

        let mut request = self
            .client
            .get(&url)
            .query(query)
            .header("Referer", REFERER)
            .header("Origin", ORIGIN)
            .header("Accept", "application/json")
            .header("Accept-Language", "zh-CN,zh;q=0.9");

        if let Some(cookie) = self.cookie() {
            request = request.header("Cookie", cookie);
        }

        debug!("[bili] GET {}", url);
        let response = request.send().await?;
        // 风控时平台会返回非 2xx 状态，但 body 里仍带有 code
        let status_error = response.error_for_status_ref().err();
        let body = response.bytes().await?;
        decode_response(&body, status_error)
    }
}

/// 解析响应体：能解析出 `code` 就按信封处理，否则再看 HTTP 状态
fn decode_response(body: &[u8], status_error: Option<reqwest::Error>) -> Result<Value> {
    match serde_json::from_slice::<Value>(body) {
        Ok(json) if json.get("code").is_some() => unwrap_envelope(json),
        parsed => match status_error {
            Some(e) => Err(e.into()),
            None => match parsed {
                Ok(json) => unwrap_envelope(json),
                Err(e) => Err(BiliError::missing(format!("json body ({})", e))),
            },
        },
    }
}

/// nav 响应缺少密钥字段时按协议错误处理
fn nav_field_error(error: BiliError) -> BiliError {
    match error {
        BiliError::MissingField(field) => BiliError::Protocol {
            code: 0,
            message: format!("nav response missing {}", field),
        },
        other => other,
    }
}

fn parse_wbi_keys(data: &Value) -> Result<WbiKeys> {
    let wbi_img = data
        .get("wbi_img")
        .ok_or_else(|| BiliError::missing("wbi_img"))?;
    let img_url = wbi_img
        .get("img_url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BiliError::missing("wbi_img.img_url"))?;
    let sub_url = wbi_img
        .get("sub_url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BiliError::missing("wbi_img.sub_url"))?;
    WbiKeys::from_urls(img_url, sub_url)
}

#[async_trait]
impl KeySource for BiliHttp {
    async fn fetch_wbi_keys(&self) -> Result<WbiKeys> {
        let data = self
            .get_data(NAV_PATH, &[] as &[(&str, &str)])
            .await
            .map_err(nav_field_error)?;
        parse_wbi_keys(&data).map_err(nav_field_error)
    }
}

/// 平台客户端：只负责带签名/不带签名的请求，不做字段映射
pub struct PlatformClient<C = SystemClock> {
    http: Arc<BiliHttp>,
    signatures: SignatureCache<Arc<BiliHttp>, C>,
}

impl PlatformClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> PlatformClient<C> {
    /// 使用指定时钟，密钥有效期和签名时间戳都以它为准
    pub fn with_clock(config: ClientConfig, clock: C) -> Result<Self> {
        let http = Arc::new(BiliHttp::new(config)?);
        let signatures = SignatureCache::with_clock(Arc::clone(&http), clock);
        Ok(Self { http, signatures })
    }

    /// 更新后续所有请求使用的 Cookie，空串表示清除
    pub fn set_credential_cookie(&self, cookie: &str) {
        self.http.set_cookie(cookie);
    }

    pub fn cookie(&self) -> Option<String> {
        self.http.cookie()
    }

    pub fn signatures(&self) -> &SignatureCache<Arc<BiliHttp>, C> {
        &self.signatures
    }

    /// 获取视频详情（WBI 签名）
    pub async fn fetch_video_detail(&self, bvid: &str) -> Result<RawVideoPayload> {
        let credential = self.signatures.get_credential().await?;

        let mut params = BTreeMap::new();
        params.insert("bvid".to_string(), bvid.to_string());
        let params = wbi::signed_params(
            params,
            self.signatures.now().timestamp(),
            &credential.img_key,
            &credential.sub_key,
        );

        self.http.throttle().await;
        self.http
            .get_data(VIDEO_VIEW_PATH, &params)
            .await
            .inspect_err(|e| warn!("[bili] video detail failed for {}: {}", bvid, e))
    }

    /// 获取UP主名片信息（无需签名）
    pub async fn fetch_uploader_detail(&self, mid: &str) -> Result<RawUploaderPayload> {
        self.http.throttle().await;
        self.http
            .get_data(CARD_PATH, &[("mid", mid)])
            .await
            .inspect_err(|e| warn!("[bili] uploader detail failed for mid={}: {}", mid, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_envelope_ok() {
        let data = unwrap_envelope(json!({"code": 0, "data": {"title": "T"}})).unwrap();
        assert_eq!(data["title"], "T");
    }

    #[test]
    fn test_unwrap_envelope_non_zero_code() {
        let err = unwrap_envelope(json!({"code": -404, "message": "啥都木有"})).unwrap_err();
        match err {
            BiliError::Protocol { code, message } => {
                assert_eq!(code, -404);
                assert_eq!(message, "啥都木有");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_unwrap_envelope_missing_data() {
        assert!(matches!(
            unwrap_envelope(json!({"code": 0})),
            Err(BiliError::MissingField(f)) if f == "data"
        ));
        assert!(matches!(
            unwrap_envelope(json!({"code": 0, "data": null})),
            Err(BiliError::MissingField(_))
        ));
        assert!(matches!(
            unwrap_envelope(json!({"data": {}})),
            Err(BiliError::MissingField(f)) if f == "code"
        ));
    }

    #[test]
    fn test_decode_response_prefers_body_code() {
        let err = decode_response(br#"{"code":-412,"message":"request was banned"}"#, None)
            .unwrap_err();
        assert!(matches!(err, BiliError::Protocol { code: -412, .. }));

        let err = decode_response(b"<html>oops</html>", None).unwrap_err();
        assert!(matches!(err, BiliError::MissingField(_)));
    }

    #[test]
    fn test_nav_missing_field_is_protocol_error() {
        let err = parse_wbi_keys(&json!({"isLogin": false})).map_err(nav_field_error);
        assert!(matches!(err, Err(BiliError::Protocol { code: 0, ref message }) if message.contains("wbi_img")));

        let err = nav_field_error(BiliError::Protocol {
            code: -101,
            message: "账号未登录".to_string(),
        });
        assert!(matches!(err, BiliError::Protocol { code: -101, .. }));

        let keys = parse_wbi_keys(&json!({"wbi_img": {
            "img_url": "https://i0.hdslb.com/bfs/wbi/aaa.png",
            "sub_url": "https://i0.hdslb.com/bfs/wbi/bbb.png"
        }}))
        .unwrap();
        assert_eq!(keys.img_key, "aaa");
        assert_eq!(keys.sub_key, "bbb");
    }

    #[test]
    fn test_cookie_is_replaced_and_cleared() {
        let client = PlatformClient::new(ClientConfig::default()).unwrap();
        assert_eq!(client.cookie(), None);
        client.set_credential_cookie("SESSDATA=abc; bili_jct=def");
        assert_eq!(client.cookie().as_deref(), Some("SESSDATA=abc; bili_jct=def"));
        client.set_credential_cookie("  ");
        assert_eq!(client.cookie(), None);
    }
}
