//! WBI 签名算法
//!
//! 参考 B站 web 端的 `w_rid` 生成流程：两段密钥拼接后按固定混淆表重排，
//! 取前 32 位作为 mixin key，再对排序后的参数串加 mixin key 求 MD5。

use md5::{Digest, Md5};
use std::collections::BTreeMap;

/// B站官方的混淆密钥表
pub const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

const MIXIN_KEY_LEN: usize = 32;

/// 生成 mixin key
pub fn mixin_key(img_key: &str, sub_key: &str) -> String {
    let combined: Vec<u8> = img_key.bytes().chain(sub_key.bytes()).collect();
    MIXIN_KEY_ENC_TAB
        .iter()
        .filter_map(|&i| combined.get(i).copied())
        .take(MIXIN_KEY_LEN)
        .map(char::from)
        .collect()
}

/// 按完整的 `key=value` 字符串排序后用 `&` 拼接
pub fn canonical_query<K, V>(params: &BTreeMap<K, V>) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", k.as_ref(), v.as_ref()))
        .collect();
    // 注意不能按 key 排序：`a-b=1` 应排在 `a=2` 之前
    pairs.sort_unstable();
    pairs.join("&")
}

/// 计算 `w_rid`，返回 32 位小写十六进制
pub fn sign<K, V>(params: &BTreeMap<K, V>, img_key: &str, sub_key: &str) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut payload = canonical_query(params);
    payload.push_str(&mixin_key(img_key, sub_key));
    format!("{:x}", Md5::digest(payload.as_bytes()))
}

/// 构造一次性的签名参数：加入 `wts` 后计算并附上 `w_rid`
pub fn signed_params(
    mut params: BTreeMap<String, String>,
    wts: i64,
    img_key: &str,
    sub_key: &str,
) -> BTreeMap<String, String> {
    params.insert("wts".to_string(), wts.to_string());
    let w_rid = sign(&params, img_key, sub_key);
    params.insert("w_rid".to_string(), w_rid);
    params
}
