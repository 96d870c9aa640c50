//! 逻辑路径：按段做 NFC 规范化与百分号编码。
//!
//! 存储端按字节比较路径，移动端常提交分解形式（NFD）的 Unicode，
//! 因此检查、创建与上传三处必须使用同一编码结果。

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::fmt;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// 与 URI 组件编码一致：仅保留非保留字符。
const SEGMENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid path: {0}")]
    Invalid(String),
}

/// 已规范化的逻辑路径（根到叶的段序列）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalPath {
    segments: Vec<String>,
}

impl LogicalPath {
    /// 解析以 `/` 分隔的路径，忽略首尾与重复的分隔符。
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let segments = raw
            .split('/')
            .map(normalize_segment)
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>();
        Self::from_normalized(segments)
    }

    /// 从段序列构建，任何空段均视为错误。
    pub fn from_segments<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized = Vec::new();
        for raw in segments {
            let segment = normalize_segment(raw.as_ref());
            if segment.is_empty() {
                return Err(PathError::Invalid("empty path segment".into()));
            }
            normalized.push(segment);
        }
        Self::from_normalized(normalized)
    }

    fn from_normalized(segments: Vec<String>) -> Result<Self, PathError> {
        if segments.is_empty() {
            return Err(PathError::Invalid("path is empty".into()));
        }
        if let Some(bad) = segments.iter().find(|s| *s == "." || *s == "..") {
            return Err(PathError::Invalid(format!("relative segment `{bad}`")));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// 追加一个段，返回新路径。
    pub fn join(&self, segment: &str) -> Result<Self, PathError> {
        let mut segments = self.segments.clone();
        segments.extend(Self::from_segments([segment])?.segments);
        Ok(Self { segments })
    }

    /// 整体编码：各段独立编码后以 `/` 连接。
    pub fn encoded(&self) -> String {
        self.encoded_prefixes()
            .pop()
            .map(|(_, encoded)| encoded)
            .unwrap_or_default()
    }

    /// 依次返回 (段, 截至该段的编码路径)，从根到叶。
    pub fn encoded_prefixes(&self) -> Vec<(&str, String)> {
        let mut accumulated = String::new();
        self.segments
            .iter()
            .map(|segment| {
                if !accumulated.is_empty() {
                    accumulated.push('/');
                }
                accumulated.push_str(&encode_segment(segment));
                (segment.as_str(), accumulated.clone())
            })
            .collect()
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// 去除首尾空白并转换为 NFC。
pub fn normalize_segment(raw: &str) -> String {
    raw.trim().nfc().collect()
}

/// 对单个段做 NFC + 百分号编码。
pub fn encode_segment(raw: &str) -> String {
    utf8_percent_encode(&normalize_segment(raw), SEGMENT_ENCODE_SET).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPOSED: &str = "Фото ТАУ контроль й";
    const DECOMPOSED: &str = "Фото ТАУ контроль \u{0438}\u{0306}";

    #[test]
    fn decomposed_and_composed_forms_encode_identically() {
        assert_ne!(COMPOSED, DECOMPOSED);
        assert_eq!(encode_segment(COMPOSED), encode_segment(DECOMPOSED));
        assert_eq!(
            encode_segment(&normalize_segment(DECOMPOSED)),
            encode_segment(DECOMPOSED)
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_segment(DECOMPOSED);
        assert_eq!(normalize_segment(&once), once);
    }

    #[test]
    fn reserved_characters_are_encoded_per_segment() {
        let path = LogicalPath::from_segments(["a/b", "x?y#z&k=v", "ok-_.~"]).expect("path");
        assert_eq!(path.encoded(), "a%2Fb/x%3Fy%23z%26k%3Dv/ok-_.~");
        assert_eq!(path.segments().len(), 3);
    }

    #[test]
    fn spaces_and_non_ascii_become_octets() {
        assert_eq!(encode_segment("Q 1"), "Q%201");
        assert_eq!(encode_segment("й"), "%D0%B9");
    }

    #[test]
    fn empty_segments_are_rejected() {
        assert!(matches!(
            LogicalPath::from_segments(Vec::<&str>::new()),
            Err(PathError::Invalid(_))
        ));
        assert!(matches!(
            LogicalPath::from_segments(["root", "   "]),
            Err(PathError::Invalid(_))
        ));
        assert!(LogicalPath::parse(" / / ").is_err());
        assert!(LogicalPath::from_segments(["root", ".."]).is_err());
    }

    #[test]
    fn parse_skips_redundant_separators() {
        let path = LogicalPath::parse("/Root//Photos/ ").expect("parse");
        assert_eq!(path.segments(), ["Root", "Photos"]);
        assert_eq!(path.to_string(), "Root/Photos");
    }

    #[test]
    fn prefixes_accumulate_from_root_to_leaf() {
        let path = LogicalPath::parse("Root Dir/Q1")
            .and_then(|p| p.join("batch 3"))
            .expect("path");
        let prefixes = path.encoded_prefixes();
        assert_eq!(
            prefixes,
            vec![
                ("Root Dir", "Root%20Dir".to_string()),
                ("Q1", "Root%20Dir/Q1".to_string()),
                ("batch 3", "Root%20Dir/Q1/batch%203".to_string()),
            ]
        );
        assert_eq!(path.encoded(), "Root%20Dir/Q1/batch%203");
    }
}
