//! 上传文件命名：随机后缀、扩展名提取与内容类型映射。

use rand::Rng;

pub const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// 随机后缀来源，测试中可替换为固定值。
pub trait SuffixGenerator: Send + Sync {
    fn suffix(&self) -> String;
}

/// 基于线程本地 RNG 的小写字母数字后缀。
#[derive(Debug, Clone)]
pub struct RandomSuffix {
    len: usize,
}

impl RandomSuffix {
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl SuffixGenerator for RandomSuffix {
    fn suffix(&self) -> String {
        let mut rng = rand::rng();
        (0..self.len)
            .map(|_| SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect()
    }
}

/// 取最后一个 `.` 起的扩展名（含点，保留大小写），没有则为空。
pub fn extension_of(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(index) => &file_name[index..],
        None => "",
    }
}

/// 去掉扩展名后的文件名主体。
pub fn stem_of(file_name: &str) -> &str {
    let ext = extension_of(file_name);
    &file_name[..file_name.len() - ext.len()]
}

/// 生成 `<prefix>__<suffix><ext>` 形式的新文件名。
pub fn generate_name(prefix: &str, original_name: &str, suffixes: &dyn SuffixGenerator) -> String {
    format!(
        "{}__{}{}",
        prefix.trim(),
        suffixes.suffix(),
        extension_of(original_name)
    )
}

/// 按扩展名推断内容类型。
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = extension_of(file_name)
        .trim_start_matches('.')
        .to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "heic" | "heif" => "image/heic",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// 调用方给出的类型优先，缺失或为通用二进制类型时回退到扩展名映射。
pub fn resolve_content_type(file_name: &str, declared: Option<&str>) -> String {
    match declared.map(str::trim) {
        Some(value) if !value.is_empty() && value != DEFAULT_CONTENT_TYPE => value.to_string(),
        _ => content_type_for(file_name).to_string(),
    }
}

#[cfg(test)]
pub(crate) struct FixedSuffix(pub &'static str);

#[cfg(test)]
impl SuffixGenerator for FixedSuffix {
    fn suffix(&self) -> String {
        self.0.to_string()
    }
}
