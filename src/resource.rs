//! 资源定位解析
//!
//! 将消息中出现的文件定位串（网络 URL / `base64://` 内联数据 / 本地路径或 `file://`）
//! 解析为 [`Resource`]。解析过程不做任何网络请求，仅在本地路径时读取磁盘。

use base64::{Engine as _, engine::general_purpose};
use std::borrow::Cow;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use url::Url;

/// 本地文件默认大小上限 (50MB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

const OCTET_STREAM: &str = "application/octet-stream";

// ============================================================================
// 1. 错误类型
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceErrorKind {
    /// 定位串格式错误 (URL 非法 / base64 解码失败)
    InvalidLocator,
    /// 目标不存在或无法读取
    Unavailable,
    /// 路径不在允许的目录下
    Restricted,
    /// 文件为空或超出大小上限
    InvalidSize,
}

impl fmt::Display for ResourceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceErrorKind::InvalidLocator => "资源定位无效",
            ResourceErrorKind::Unavailable => "资源不可用",
            ResourceErrorKind::Restricted => "资源路径受限",
            ResourceErrorKind::InvalidSize => "资源大小无效",
        };
        f.write_str(s)
    }
}

/// 资源解析错误，携带足够的上下文供上层挑选占位文本
#[derive(Debug, thiserror::Error)]
#[error("{}: {}", .kind, preview(.raw))]
pub struct ResourceError {
    pub kind: ResourceErrorKind,
    /// 原始输入
    pub raw: String,
    /// 规范化后的形式 (绝对路径等)，如果已经算出
    pub normalized: Option<String>,
    /// 传输层状态码，留给需要实际下载的上层填写
    pub status: Option<u16>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ResourceError {
    pub fn new(kind: ResourceErrorKind, raw: impl Into<String>) -> Self {
        Self {
            kind,
            raw: raw.into(),
            normalized: None,
            status: None,
            source: None,
        }
    }

    pub fn with_normalized(mut self, normalized: impl Into<String>) -> Self {
        self.normalized = Some(normalized.into());
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }
}

/// base64 载荷可能很长，错误信息里只保留开头
fn preview(raw: &str) -> Cow<'_, str> {
    const LIMIT: usize = 64;
    match raw.char_indices().nth(LIMIT) {
        Some((idx, _)) => Cow::Owned(format!("{}...", &raw[..idx])),
        None => Cow::Borrowed(raw),
    }
}

// ============================================================================
// 2. 资源模型
// ============================================================================

/// 解析后的资源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// 网络资源，只保存规范化后的地址
    Remote { url: Url, name: String },
    /// `base64://` 内联数据
    Embedded {
        bytes: Vec<u8>,
        content_type: String,
        name: String,
    },
    /// 本地文件 (已校验路径与大小)
    Local {
        path: PathBuf,
        bytes: Vec<u8>,
        content_type: String,
        url: Url,
        name: String,
    },
}

impl Resource {
    /// 展示用文件名
    pub fn name(&self) -> &str {
        match self {
            Resource::Remote { name, .. }
            | Resource::Embedded { name, .. }
            | Resource::Local { name, .. } => name,
        }
    }

    /// 内容类型。网络资源按扩展名推断，推断不出时为 None
    pub fn content_type(&self) -> Option<&str> {
        match self {
            Resource::Remote { name, .. } => extension_of(name).and_then(mime_for_extension),
            Resource::Embedded { content_type, .. } | Resource::Local { content_type, .. } => {
                Some(content_type)
            }
        }
    }

    /// 已读入内存的内容
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Resource::Remote { .. } => None,
            Resource::Embedded { bytes, .. } | Resource::Local { bytes, .. } => Some(bytes),
        }
    }

    /// 发回协议端时使用的定位串
    pub fn locator(&self) -> String {
        match self {
            Resource::Remote { url, .. } | Resource::Local { url, .. } => url.to_string(),
            Resource::Embedded { bytes, .. } => {
                format!("base64://{}", general_purpose::STANDARD.encode(bytes))
            }
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Resource::Remote { .. })
    }
}

// ============================================================================
// 3. 解析器
// ============================================================================

#[derive(Debug, Clone)]
pub struct Resolver {
    max_file_size: u64,
}

impl Default for Resolver {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl Resolver {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn resolve(&self, locator: &str) -> Result<Resource, ResourceError> {
        let raw = locator.trim();
        if raw.is_empty() {
            return Err(ResourceError::new(ResourceErrorKind::InvalidLocator, locator));
        }

        if has_prefix_ci(raw, "http://") || has_prefix_ci(raw, "https://") {
            resolve_remote(raw)
        } else if has_prefix_ci(raw, "base64://") {
            resolve_embedded(raw)
        } else {
            self.resolve_local(raw)
        }
    }

    fn resolve_local(&self, raw: &str) -> Result<Resource, ResourceError> {
        let path = if has_prefix_ci(raw, "file://") {
            file_url_to_path(raw)?
        } else {
            PathBuf::from(raw)
        };
        let shown = path.display().to_string();

        let unavailable = |e: std::io::Error| {
            ResourceError::new(ResourceErrorKind::Unavailable, raw)
                .with_normalized(shown.clone())
                .with_source(e)
        };

        let meta = std::fs::metadata(&path).map_err(unavailable)?;
        if !meta.is_file() {
            return Err(ResourceError::new(ResourceErrorKind::Unavailable, raw)
                .with_normalized(shown.clone()));
        }

        let size = meta.len();
        if size == 0 || size >= self.max_file_size {
            return Err(ResourceError::new(ResourceErrorKind::InvalidSize, raw)
                .with_normalized(shown.clone()));
        }

        let canonical = std::fs::canonicalize(&path).map_err(unavailable)?;
        if !is_within_allowed_roots(&canonical) {
            return Err(ResourceError::new(ResourceErrorKind::Restricted, raw)
                .with_normalized(canonical.display().to_string()));
        }

        let bytes = std::fs::read(&canonical).map_err(unavailable)?;
        let content_type = canonical
            .extension()
            .and_then(|e| e.to_str())
            .and_then(mime_for_extension)
            .unwrap_or(OCTET_STREAM)
            .to_string();

        let url = Url::from_file_path(&canonical).map_err(|_| {
            ResourceError::new(ResourceErrorKind::InvalidLocator, raw)
                .with_normalized(canonical.display().to_string())
        })?;

        let name = canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Resource::Local {
            path: canonical,
            bytes,
            content_type,
            url,
            name,
        })
    }
}

fn resolve_remote(raw: &str) -> Result<Resource, ResourceError> {
    let invalid = || ResourceError::new(ResourceErrorKind::InvalidLocator, raw);

    let mut url = Url::parse(raw).map_err(|e| invalid().with_source(e))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid());
    }

    // 路径段先解码再交给 url 重新编码，统一百分号编码形式
    let segments: Vec<String> = url
        .path_segments()
        .map(|segs| {
            segs.map(|seg| match urlencoding::decode(seg) {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => seg.to_string(),
            })
            .collect()
        })
        .unwrap_or_default();

    if let Ok(mut path) = url.path_segments_mut() {
        path.clear().extend(segments.iter());
    }

    // 查询参数按键值排序
    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let name = segments.last().cloned().unwrap_or_default();
    Ok(Resource::Remote { url, name })
}

fn resolve_embedded(raw: &str) -> Result<Resource, ResourceError> {
    let payload = raw["base64://".len()..].trim();
    let bytes = general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| ResourceError::new(ResourceErrorKind::InvalidLocator, raw).with_source(e))?;

    if bytes.is_empty() {
        return Err(ResourceError::new(ResourceErrorKind::InvalidLocator, raw));
    }

    let content_type = sniff_mime(&bytes);
    let name = match extension_for_mime(content_type) {
        Some(ext) => format!("{:x}.{}", md5::compute(&bytes), ext),
        None => format!("{:x}", md5::compute(&bytes)),
    };

    Ok(Resource::Embedded {
        bytes,
        content_type: content_type.to_string(),
        name,
    })
}

/// `file://` 地址转为本地路径
fn file_url_to_path(raw: &str) -> Result<PathBuf, ResourceError> {
    if let Ok(url) = Url::parse(raw)
        && let Ok(path) = url.to_file_path()
    {
        return Ok(path);
    }

    // 兜底：形如 file://relative/path 或非标准写法时手动解码
    let rest = &raw["file://".len()..];
    let decoded = urlencoding::decode(rest)
        .map_err(|e| ResourceError::new(ResourceErrorKind::InvalidLocator, raw).with_source(e))?;
    let mut path: &str = &decoded;
    if let Some(stripped) = path.strip_prefix("localhost/") {
        return Ok(PathBuf::from(format!("/{}", stripped)));
    }
    // Windows 下 /C:/xx 需去掉开头的斜杠
    if cfg!(windows) && path.starts_with('/') && path.as_bytes().get(2) == Some(&b':') {
        path = &path[1..];
    }
    Ok(PathBuf::from(path))
}

fn has_prefix_ci(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
}

// ============================================================================
// 4. 路径约束
// ============================================================================

/// 当前工作目录，获取失败时为 None
pub(crate) fn working_dir() -> Option<PathBuf> {
    std::env::current_dir().ok()
}

/// 纯词法的路径规范化：拼接到工作目录并消去 `.` 与 `..`，不访问文件系统
pub(crate) fn absolutize(path: &Path, base: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut out = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn allowed_roots() -> Vec<PathBuf> {
    [working_dir(), Some(std::env::temp_dir())]
        .into_iter()
        .flatten()
        .filter_map(|p| std::fs::canonicalize(&p).ok())
        .collect()
}

fn is_within_allowed_roots(canonical: &Path) -> bool {
    is_within(canonical, &allowed_roots())
}

/// 按路径组件比较，`/srv/bot-evil` 不属于 `/srv/bot`
fn is_within(canonical: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| canonical.starts_with(root))
}

// ============================================================================
// 5. MIME 推断
// ============================================================================

/// 根据内容头部嗅探 MIME 类型
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    const MAGIC: &[(&[u8], &str)] = &[
        (b"%PDF-", "application/pdf"),
        (b"OggS", "audio/ogg"),
        (b"ID3", "audio/mpeg"),
        (b"fLaC", "audio/flac"),
        (b"#!AMR", "audio/amr"),
        (b"#!SILK_V3", "audio/silk"),
        (b"\x02#!SILK_V3", "audio/silk"),
        (b"\x1a\x45\xdf\xa3", "video/webm"),
        (b"PK\x03\x04", "application/zip"),
    ];

    if let Some((_, mime)) = MAGIC.iter().find(|(magic, _)| bytes.starts_with(magic)) {
        return *mime;
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WAVE" {
        return "audio/wav";
    }
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        return "video/mp4";
    }
    if bytes.len() >= 2 && bytes[0] == 0xFF && matches!(bytes[1], 0xFB | 0xF3 | 0xF2) {
        return "audio/mpeg";
    }

    if let Ok(format) = image::guess_format(bytes) {
        use image::ImageFormat;
        if matches!(
            format,
            ImageFormat::Png
                | ImageFormat::Jpeg
                | ImageFormat::Gif
                | ImageFormat::WebP
                | ImageFormat::Bmp
                | ImageFormat::Ico
                | ImageFormat::Tiff
                | ImageFormat::Avif
        ) {
            return format.to_mime_type();
        }
    }

    if std::str::from_utf8(bytes).is_ok() {
        "text/plain; charset=utf-8"
    } else {
        OCTET_STREAM
    }
}

fn extension_of(name: &str) -> Option<&str> {
    Path::new(name).extension().and_then(|e| e.to_str())
}

/// 扩展名 -> MIME
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        "amr" => "audio/amr",
        "silk" | "slk" => "audio/silk",
        "m4a" | "aac" => "audio/aac",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "txt" | "log" => "text/plain; charset=utf-8",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        _ => return None,
    };
    Some(mime)
}

/// MIME -> 扩展名
pub fn extension_for_mime(content_type: &str) -> Option<&'static str> {
    let base = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();
    let ext = match base {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
        "image/tiff" => "tiff",
        "image/avif" => "avif",
        "audio/mpeg" => "mp3",
        "audio/wav" => "wav",
        "audio/ogg" => "ogg",
        "audio/flac" => "flac",
        "audio/amr" => "amr",
        "audio/silk" => "silk",
        "audio/aac" => "aac",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "text/plain" => "txt",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        _ => return None,
    };
    Some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PNG_HEAD: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn temp_file_with(contents: &[u8], suffix: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .prefix("cqbridge-")
            .suffix(suffix)
            .tempfile()
            .unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn remote_url_is_canonicalized_without_fetching() {
        let res = Resolver::default()
            .resolve("https://example.com/pics/a%20b/%E5%9B%BE.png?z=1&a=2")
            .unwrap();
        match &res {
            Resource::Remote { url, name } => {
                assert_eq!(name, "图.png");
                assert_eq!(url.query(), Some("a=2&z=1"));
                assert_eq!(url.path(), "/pics/a%20b/%E5%9B%BE.png");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(res.content_type(), Some("image/png"));

        // 规范化结果再解析一次应保持不变
        let again = Resolver::default().resolve(&res.locator()).unwrap();
        assert_eq!(again, res);
    }

    #[test]
    fn remote_root_has_empty_name() {
        let res = Resolver::default().resolve("http://example.com").unwrap();
        assert_eq!(res.name(), "");
    }

    #[test]
    fn malformed_remote_is_invalid_locator() {
        let err = Resolver::default().resolve("http://").unwrap_err();
        assert_eq!(err.kind, ResourceErrorKind::InvalidLocator);
        assert_eq!(err.raw, "http://");
    }

    #[test]
    fn embedded_png_is_sniffed_and_hashed() {
        let locator = format!("base64://{}", general_purpose::STANDARD.encode(PNG_HEAD));
        let res = Resolver::default().resolve(&locator).unwrap();
        assert_eq!(res.content_type(), Some("image/png"));
        assert_eq!(res.name(), format!("{:x}.png", md5::compute(PNG_HEAD)));
        assert_eq!(res.bytes(), Some(PNG_HEAD));
        assert_eq!(res.locator(), locator);
    }

    #[test]
    fn malformed_base64_is_invalid_locator() {
        let err = Resolver::default().resolve("base64://@@not*base64@@").unwrap_err();
        assert_eq!(err.kind, ResourceErrorKind::InvalidLocator);
        assert!(err.source.is_some());

        let err = Resolver::default().resolve("base64://").unwrap_err();
        assert_eq!(err.kind, ResourceErrorKind::InvalidLocator);
    }

    #[test]
    fn local_file_in_temp_dir_resolves() {
        let file = temp_file_with(b"hello dice", ".txt");
        let res = Resolver::default()
            .resolve(file.path().to_str().unwrap())
            .unwrap();
        match &res {
            Resource::Local {
                path,
                bytes,
                content_type,
                url,
                name,
            } => {
                assert!(path.is_absolute());
                assert_eq!(bytes, b"hello dice");
                assert_eq!(content_type, "text/plain; charset=utf-8");
                assert_eq!(url.scheme(), "file");
                assert!(name.ends_with(".txt"));
            }
            other => panic!("unexpected {other:?}"),
        }

        // 通过 file:// 地址解析得到同一资源
        let via_url = Resolver::default().resolve(&res.locator()).unwrap();
        assert_eq!(via_url, res);
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        let file = temp_file_with(b"\x00\x01\x02", ".dat");
        let res = Resolver::default()
            .resolve(file.path().to_str().unwrap())
            .unwrap();
        assert_eq!(res.content_type(), Some(OCTET_STREAM));
    }

    #[test]
    fn empty_and_oversized_files_are_invalid_size() {
        let empty = temp_file_with(b"", ".txt");
        let err = Resolver::default()
            .resolve(empty.path().to_str().unwrap())
            .unwrap_err();
        assert_eq!(err.kind, ResourceErrorKind::InvalidSize);
        assert!(err.normalized.is_some());

        let sixteen = temp_file_with(&[b'x'; 16], ".txt");
        let err = Resolver::new(16)
            .resolve(sixteen.path().to_str().unwrap())
            .unwrap_err();
        assert_eq!(err.kind, ResourceErrorKind::InvalidSize);

        assert!(
            Resolver::new(17)
                .resolve(sixteen.path().to_str().unwrap())
                .is_ok()
        );
    }

    #[test]
    fn missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.png");
        let err = Resolver::default()
            .resolve(missing.to_str().unwrap())
            .unwrap_err();
        assert_eq!(err.kind, ResourceErrorKind::Unavailable);
        assert!(err.source.is_some());
    }

    #[cfg(unix)]
    #[test]
    fn file_outside_roots_is_restricted() {
        let err = Resolver::default().resolve("/etc/passwd").unwrap_err();
        assert_eq!(err.kind, ResourceErrorKind::Restricted);
        assert_eq!(err.normalized.as_deref(), Some("/etc/passwd"));

        let err = Resolver::default().resolve("file:///etc/passwd").unwrap_err();
        assert_eq!(err.kind, ResourceErrorKind::Restricted);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_roots_is_restricted() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("innocent.png");
        std::os::unix::fs::symlink("/etc/passwd", &link).unwrap();

        let err = Resolver::default()
            .resolve(link.to_str().unwrap())
            .unwrap_err();
        assert_eq!(err.kind, ResourceErrorKind::Restricted);
        assert_eq!(err.normalized.as_deref(), Some("/etc/passwd"));
    }

    #[test]
    fn containment_compares_whole_components() {
        let roots = vec![PathBuf::from("/srv/bot"), PathBuf::from("/tmp")];
        assert!(is_within(Path::new("/srv/bot/img/a.png"), &roots));
        assert!(is_within(Path::new("/tmp/x"), &roots));
        assert!(!is_within(Path::new("/srv/bot-evil/a.png"), &roots));
        assert!(!is_within(Path::new("/tmpfoo/a.png"), &roots));
        assert!(!is_within(Path::new("/srv"), &roots));
    }

    #[test]
    fn absolutize_removes_dot_segments() {
        let base = Path::new("/srv/bot");
        assert_eq!(
            absolutize(Path::new("data/../img/./a.png"), base),
            PathBuf::from("/srv/bot/img/a.png")
        );
        assert_eq!(
            absolutize(Path::new("../../etc/passwd"), base),
            PathBuf::from("/etc/passwd")
        );
    }

    #[test]
    fn sniffing_known_signatures() {
        assert_eq!(sniff_mime(b"OggS\0\x02"), "audio/ogg");
        assert_eq!(sniff_mime(b"#!SILK_V3\x0c"), "audio/silk");
        assert_eq!(sniff_mime(b"RIFF\0\0\0\0WAVEfmt "), "audio/wav");
        assert_eq!(sniff_mime(b"\0\0\0\x18ftypmp42"), "video/mp4");
        assert_eq!(sniff_mime(PNG_HEAD), "image/png");
        assert_eq!(sniff_mime("纯文本".as_bytes()), "text/plain; charset=utf-8");
        assert_eq!(sniff_mime(&[0xC3, 0x28, 0xA0]), OCTET_STREAM);
    }

    #[test]
    fn error_display_truncates_long_input() {
        let raw = format!("base64://{}", "A".repeat(500));
        let err = ResourceError::new(ResourceErrorKind::InvalidLocator, raw);
        let shown = err.to_string();
        assert!(shown.starts_with("资源定位无效: base64://"));
        assert!(shown.len() < 120);
    }
}
