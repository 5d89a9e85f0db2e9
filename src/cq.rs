//! CQ 码编解码
//!
//! 解码流程：简写码改写 -> 状态机扫描 -> 经注册表构造元素。
//! 构造失败不会中断解码，失败的标签被替换为中文占位文本，
//! 同时写日志并通知可选的观察者回调。

use crate::element::{CqArgs, Element, ElementError, ElementKind};
use crate::message::Segment;
use crate::registry::{self, ElementRegistry};
use crate::resource::{Resolver, ResourceErrorKind};
use crate::warn;
use std::borrow::Cow;
use std::fmt::Write as _;
use std::sync::Arc;

mod scanner;
pub mod shorthand;

use scanner::Token;

/// 无法归类时的占位文本
pub const GENERIC_PLACEHOLDER: &str = "[消息解析失败]";

// ============================================================================
// 1. 转义
// ============================================================================

/// 纯文本转义: & [ ]
pub fn escape_text(s: &str) -> Cow<'_, str> {
    escape_with(s, false)
}

/// 参数值转义: & [ ] ,
pub fn escape_value(s: &str) -> Cow<'_, str> {
    escape_with(s, true)
}

fn escape_with(s: &str, comma: bool) -> Cow<'_, str> {
    let needs = |c: char| matches!(c, '&' | '[' | ']') || (comma && c == ',');
    if !s.contains(needs) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '[' => out.push_str("&#91;"),
            ']' => out.push_str("&#93;"),
            ',' if comma => out.push_str("&#44;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// 反转义，单趟扫描，`&amp;#91;` 还原为 `&#91;`
pub fn unescape(s: &str) -> Cow<'_, str> {
    const TABLE: [(&str, char); 4] = [("&amp;", '&'), ("&#91;", '['), ("&#93;", ']'), ("&#44;", ',')];

    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];
        match TABLE.iter().find(|(pat, _)| rest.starts_with(pat)) {
            Some((pat, c)) => {
                out.push(*c);
                rest = &rest[pat.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

// ============================================================================
// 2. 编码
// ============================================================================

/// 渲染单个 CQ 码
pub fn render_tag<'a, I>(type_name: &str, args: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = format!("[CQ:{}", type_name);
    for (k, v) in args {
        let _ = write!(out, ",{}={}", k, escape_value(v));
    }
    out.push(']');
    out
}

/// 元素序列 -> CQ 文本
///
/// 空文本不产生任何输出，解码时也不会出现空文本，因此它是往返不变式唯一的例外。
pub fn encode(elements: &[Element]) -> String {
    let mut out = String::new();
    for el in elements {
        match el {
            Element::Text { content } => out.push_str(&escape_text(content)),
            other => {
                let args = other.cq_args().unwrap_or_default();
                out.push_str(&render_tag(
                    other.type_name(),
                    args.iter().map(|(k, v)| (k.as_str(), v.as_str())),
                ));
            }
        }
    }
    out
}

/// 上报的 JSON 数组消息 -> CQ 文本
///
/// 兼容 NapCat：图片的 file 不是 URL 而 url 是时使用 url，
/// 语音的 file 不是 URL 而带有 path 时使用 path。
pub fn inbound_segments_to_cq(segments: &[Segment]) -> String {
    let mut out = String::new();
    for seg in segments {
        if seg.type_ == "text" {
            out.push_str(&escape_text(seg.str_field("text").unwrap_or_default()));
            continue;
        }

        let mut args: Vec<(String, String)> = seg
            .data
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect();

        let file_is_url = seg.str_field("file").is_some_and(has_scheme);
        let replacement = match seg.type_.as_str() {
            "image" if !file_is_url => seg.str_field("url").filter(|u| has_scheme(u)),
            "record" if !file_is_url => seg.str_field("path").filter(|p| !p.is_empty()),
            _ => None,
        };
        if let Some(value) = replacement {
            let value = value.to_string();
            match args.iter_mut().find(|(k, _)| k == "file") {
                Some(slot) => slot.1 = value,
                None => args.push(("file".to_string(), value)),
            }
        }

        out.push_str(&render_tag(
            &seg.type_,
            args.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        ));
    }
    out
}

fn has_scheme(s: &str) -> bool {
    url::Url::parse(s).is_ok_and(|u| u.scheme().len() > 1)
}

// ============================================================================
// 3. 解码
// ============================================================================

/// 解码失败的上报信息
#[derive(Debug)]
pub struct DecodeFailure<'a> {
    pub type_name: &'a str,
    pub args: &'a CqArgs,
    pub error: &'a ElementError,
    pub placeholder: &'a str,
}

pub type DecodeObserver = Arc<dyn Fn(&DecodeFailure<'_>) + Send + Sync>;

#[derive(Clone)]
pub struct DecodeOptions {
    pub resolver: Resolver,
    pub observer: Option<DecodeObserver>,
    /// 是否先改写简写码
    pub rewrite_shorthand: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            resolver: Resolver::default(),
            observer: None,
            rewrite_shorthand: true,
        }
    }
}

impl DecodeOptions {
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&DecodeFailure<'_>) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn without_shorthand(mut self) -> Self {
        self.rewrite_shorthand = false;
        self
    }
}

/// 使用内置注册表解码
pub fn decode(raw: &str, opts: &DecodeOptions) -> Vec<Element> {
    decode_with(registry::builtin(), raw, opts)
}

pub fn decode_with(registry: &ElementRegistry, raw: &str, opts: &DecodeOptions) -> Vec<Element> {
    let text = if opts.rewrite_shorthand {
        shorthand::rewrite(raw)
    } else {
        Cow::Borrowed(raw)
    };

    scanner::scan(&text)
        .into_iter()
        .map(|token| match token {
            Token::Text(content) => Element::Text { content },
            Token::Tag { name, args } => match registry.build(&name, &args, &opts.resolver) {
                Ok(el) => el,
                Err(err) => {
                    let placeholder = placeholder_for(&name, &err);
                    warn!(target: "Codec", "CQ 码 [{}] {:?} 解析失败: {}", name, args, err);
                    if let Some(observer) = &opts.observer {
                        observer(&DecodeFailure {
                            type_name: &name,
                            args: &args,
                            error: &err,
                            placeholder: &placeholder,
                        });
                    }
                    Element::Text {
                        content: placeholder,
                    }
                }
            },
        })
        .collect()
}

/// 按资源类型与失败类型选择占位文本
pub fn placeholder_for(type_name: &str, err: &ElementError) -> String {
    let noun = match type_name {
        "image" => "图片",
        "record" => "语音",
        "video" => "视频",
        "file" => "文件",
        _ => return GENERIC_PLACEHOLDER.to_string(),
    };
    match err.as_resource().map(|e| e.kind) {
        Some(ResourceErrorKind::InvalidLocator) => format!("[{}URL无效]", noun),
        Some(ResourceErrorKind::Unavailable) => format!("[找不到{}]", noun),
        Some(ResourceErrorKind::Restricted) => format!("[{}路径受限]", noun),
        Some(ResourceErrorKind::InvalidSize) => format!("[{}大小无效]", noun),
        None => GENERIC_PLACEHOLDER.to_string(),
    }
}

// ============================================================================
// 4. 过滤
// ============================================================================

/// 按元素类型过滤已解码的序列
pub trait ElementsExt {
    fn first_of(&self, kind: ElementKind) -> Option<&Element>;
    fn all_of(&self, kind: ElementKind) -> impl Iterator<Item = &Element>;
}

impl ElementsExt for [Element] {
    fn first_of(&self, kind: ElementKind) -> Option<&Element> {
        self.iter().find(|el| el.kind() == kind)
    }

    fn all_of(&self, kind: ElementKind) -> impl Iterator<Item = &Element> {
        self.iter().filter(move |el| el.kind() == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::FileElement;
    use serde_json::json;
    use std::sync::Mutex;

    fn opts() -> DecodeOptions {
        DecodeOptions::default()
    }

    #[test]
    fn escape_and_unescape_are_inverse() {
        let s = "a&b[c]d,e&#91;";
        assert_eq!(escape_value(s), "a&amp;b&#91;c&#93;d&#44;e&amp;#91;");
        assert_eq!(unescape(&escape_value(s)), s);
        assert_eq!(unescape(&escape_text(s)), s);
        assert_eq!(escape_text("a,b"), "a,b");
        assert_eq!(unescape("&unknown;&"), "&unknown;&");
    }

    #[test]
    fn text_roundtrip_with_special_characters() {
        let els = vec![Element::text("[CQ:at,qq=1] & , ]")];
        let encoded = encode(&els);
        assert_eq!(encoded, "&#91;CQ:at,qq=1&#93; &amp; , &#93;");
        assert_eq!(decode(&encoded, &opts()), els);
    }

    #[test]
    fn builtin_kinds_roundtrip() {
        let image = Resolver::default()
            .resolve("https://example.com/a%20b.png?b=2&a=1")
            .unwrap();
        let els = vec![
            Element::at("12,3]"),
            Element::Face { id: "14".into() },
            Element::Reply { id: "-998".into() },
            Element::Tts {
                content: "你好, [世界] & 骰子".into(),
            },
            Element::Poke { target: "10001".into() },
            Element::Image(FileElement::new(image.clone())),
            Element::Record(FileElement::new(image.clone())),
            Element::File(FileElement::new(image)),
        ];
        for el in els {
            let encoded = encode(std::slice::from_ref(&el));
            assert_eq!(decode(&encoded, &opts()), vec![el], "{encoded}");
        }
    }

    #[test]
    fn unknown_type_is_preserved() {
        let els = decode("[CQ:foo,bar=1]", &opts());
        assert_eq!(
            els,
            vec![Element::Default {
                raw_type: "foo".into(),
                data: CqArgs::from([("bar".to_string(), "1".to_string())]),
            }]
        );
        assert_eq!(encode(&els), "[CQ:foo,bar=1]");
    }

    #[test]
    fn truncated_tag_keeps_prefix() {
        let els = decode("pre[CQ:image,file=x", &opts());
        assert_eq!(els, vec![Element::text("pre")]);
    }

    #[test]
    fn placeholders_depend_on_kind_and_failure() {
        let els = decode(
            "a[CQ:image,file=base64://!!!]b[CQ:record,file=/definitely/missing.amr]",
            &opts(),
        );
        assert_eq!(
            els,
            vec![
                Element::text("a"),
                Element::text("[图片URL无效]"),
                Element::text("b"),
                Element::text("[找不到语音]"),
            ]
        );

        // 缺少参数的回复仍然是回复
        let els = decode("[CQ:text,text=hi][CQ:reply]", &opts());
        assert_eq!(
            els,
            vec![
                Element::text(GENERIC_PLACEHOLDER),
                Element::Reply { id: String::new() }
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn restricted_file_placeholder() {
        let els = decode("[CQ:file,file=file:///etc/passwd]", &opts().without_shorthand());
        assert_eq!(els, vec![Element::text("[文件路径受限]")]);
    }

    #[test]
    fn observer_receives_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = opts().with_observer(move |f: &DecodeFailure<'_>| {
            sink.lock().unwrap().push((
                f.type_name.to_string(),
                f.args.get("file").cloned(),
                f.placeholder.to_string(),
            ));
        });

        decode("ok[CQ:image,file=base64://!!!]", &options);
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![(
                "image".to_string(),
                Some("base64://!!!".to_string()),
                "[图片URL无效]".to_string()
            )]
        );
    }

    #[test]
    fn empty_text_encodes_to_nothing() {
        let els = vec![Element::text(""), Element::at("1"), Element::text("")];
        assert_eq!(encode(&els), "[CQ:at,qq=1]");
        assert_eq!(decode(&encode(&els), &opts()), vec![Element::at("1")]);
    }

    #[test]
    fn filters_are_order_preserving_and_restartable() {
        let els = decode("[CQ:at,qq=1]hi[CQ:at,qq=2][CQ:face,id=3]", &opts());
        assert_eq!(els.first_of(ElementKind::At), Some(&Element::at("1")));
        assert_eq!(els.first_of(ElementKind::Image), None);

        let targets: Vec<_> = els.all_of(ElementKind::At).collect();
        assert_eq!(targets, vec![&Element::at("1"), &Element::at("2")]);
        assert_eq!(els.all_of(ElementKind::At).count(), 2);
    }

    #[test]
    fn napcat_segments_prefer_usable_locators() {
        let segments: Vec<Segment> = serde_json::from_value(json!([
            {"type": "text", "data": {"text": "看[图]"}},
            {"type": "image", "data": {"file": "abc.image", "url": "https://example.com/x.png"}},
            {"type": "record", "data": {"file": "v.amr", "path": "/tmp/v.amr"}},
            {"type": "at", "data": {"qq": 10001}}
        ]))
        .unwrap();

        assert_eq!(
            inbound_segments_to_cq(&segments),
            "看&#91;图&#93;[CQ:image,file=https://example.com/x.png,url=https://example.com/x.png]\
             [CQ:record,file=/tmp/v.amr,path=/tmp/v.amr][CQ:at,qq=10001]"
        );
    }
}
