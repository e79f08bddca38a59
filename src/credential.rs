//! WBI 密钥缓存

use crate::error::{BiliError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// 密钥有效期 30 分钟
pub const CREDENTIAL_TTL_SECS: i64 = 30 * 60;

/// 从 nav 接口拿到的两段密钥
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WbiKeys {
    pub img_key: String,
    pub sub_key: String,
}

impl WbiKeys {
    /// 从 `wbi_img.img_url` / `wbi_img.sub_url` 中解析密钥
    pub fn from_urls(img_url: &str, sub_url: &str) -> Result<Self> {
        Ok(Self {
            img_key: key_from_url(img_url).ok_or_else(|| BiliError::missing("wbi_img.img_url"))?,
            sub_key: key_from_url(sub_url).ok_or_else(|| BiliError::missing("wbi_img.sub_url"))?,
        })
    }
}

/// 取 URL 最后一段文件名去掉扩展名的部分
pub fn key_from_url(url: &str) -> Option<String> {
    let file = url.rsplit('/').next()?;
    let stem = file.split('.').next()?;
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub img_key: String,
    pub sub_key: String,
    pub issued_at: DateTime<Utc>,
}

impl Credential {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.issued_at + Duration::seconds(CREDENTIAL_TTL_SECS)
    }
}

/// 时钟，测试时可替换
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// 密钥来源（线上为 nav 接口）
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch_wbi_keys(&self) -> Result<WbiKeys>;
}

#[async_trait]
impl<T: KeySource + ?Sized> KeySource for Arc<T> {
    async fn fetch_wbi_keys(&self) -> Result<WbiKeys> {
        (**self).fetch_wbi_keys().await
    }
}

/// 带有效期的密钥缓存
///
/// 读取走 `RwLock` 快照；过期后的刷新由 `refresh_lock` 串行化，
/// 等待期间其他调用方拿到的是同一次刷新的结果。
pub struct SignatureCache<S, C = SystemClock> {
    source: S,
    clock: C,
    current: RwLock<Option<Credential>>,
    refresh_lock: Mutex<()>,
}

impl<S: KeySource> SignatureCache<S, SystemClock> {
    pub fn new(source: S) -> Self {
        Self::with_clock(source, SystemClock)
    }
}

impl<S: KeySource, C: Clock> SignatureCache<S, C> {
    pub fn with_clock(source: S, clock: C) -> Self {
        Self {
            source,
            clock,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// 缓存使用的当前时间，签名时间戳也取自这里
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn fresh_credential(&self) -> Option<Credential> {
        let now = self.clock.now();
        self.current
            .read()
            .as_ref()
            .filter(|c| c.is_fresh(now))
            .cloned()
    }

    /// 获取当前可用的密钥，过期时刷新
    pub async fn get_credential(&self) -> Result<Credential> {
        if let Some(credential) = self.fresh_credential() {
            return Ok(credential);
        }

        let _guard = self.refresh_lock.lock().await;

        // 排队期间可能已被其他调用方刷新
        if let Some(credential) = self.fresh_credential() {
            return Ok(credential);
        }

        let keys = match self.source.fetch_wbi_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("[bili] wbi key refresh failed, keeping previous keys: {}", e);
                return Err(e);
            }
        };

        let credential = Credential {
            img_key: keys.img_key,
            sub_key: keys.sub_key,
            issued_at: self.clock.now(),
        };
        info!(
            "[bili] wbi keys refreshed: img_key={}, sub_key={}",
            credential.img_key, credential.sub_key
        );
        *self.current.write() = Some(credential.clone());
        Ok(credential)
    }

    /// 当前缓存的密钥（可能已过期）
    pub fn cached(&self) -> Option<Credential> {
        self.current.read().clone()
    }
}
