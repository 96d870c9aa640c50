//! Cookie 解析：从原始 Cookie 头中取出指定名称的值。

use axum::http::{HeaderMap, header};
use cookie::Cookie;

/// 解析单个 Cookie 头字符串，返回解码后的值。
pub fn extract_cookie(header_value: &str, name: &str) -> Option<String> {
    Cookie::split_parse_encoded(header_value)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}

/// 在请求的所有 Cookie 头中查找。
pub fn cookie_from_headers(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| extract_cookie(value, name))
}

/// 粗略判断令牌是否可用：非空且不含空白或控制字符。
pub fn is_plausible_token(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_graphic())
}
