//! 结构化消息元素

use crate::resource::{Resource, ResourceError};
use std::collections::BTreeMap;
use std::fmt;

/// CQ 码参数表
pub type CqArgs = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Text,
    At,
    Face,
    Reply,
    Record,
    Image,
    File,
    Tts,
    Poke,
    Default,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Text => "text",
            ElementKind::At => "at",
            ElementKind::Face => "face",
            ElementKind::Reply => "reply",
            ElementKind::Record => "record",
            ElementKind::Image => "image",
            ElementKind::File => "file",
            ElementKind::Tts => "tts",
            ElementKind::Poke => "poke",
            ElementKind::Default => "default",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 文件类元素 (图片 / 语音 / 文件) 的载荷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileElement {
    resource: Resource,
}

impl FileElement {
    pub fn new(resource: Resource) -> Self {
        Self { resource }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn name(&self) -> &str {
        self.resource.name()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.resource.content_type()
    }

    /// 回传给协议端的 file 字段
    pub fn locator(&self) -> String {
        self.resource.locator()
    }
}

/// 消息元素。构造后不可变，一条消息即 `Vec<Element>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Text { content: String },
    At { target: String },
    Face { id: String },
    Reply { id: String },
    Record(FileElement),
    Image(FileElement),
    File(FileElement),
    Tts { content: String },
    Poke { target: String },
    /// 未识别的类型，原样保留
    Default { raw_type: String, data: CqArgs },
}

impl Element {
    pub fn text(content: impl Into<String>) -> Self {
        Element::Text {
            content: content.into(),
        }
    }

    pub fn at(target: impl ToString) -> Self {
        Element::At {
            target: target.to_string(),
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Text { .. } => ElementKind::Text,
            Element::At { .. } => ElementKind::At,
            Element::Face { .. } => ElementKind::Face,
            Element::Reply { .. } => ElementKind::Reply,
            Element::Record(_) => ElementKind::Record,
            Element::Image(_) => ElementKind::Image,
            Element::File(_) => ElementKind::File,
            Element::Tts { .. } => ElementKind::Tts,
            Element::Poke { .. } => ElementKind::Poke,
            Element::Default { .. } => ElementKind::Default,
        }
    }

    /// 线上类型名。`Default` 返回其原始类型名
    pub fn type_name(&self) -> &str {
        match self {
            Element::Default { raw_type, .. } => raw_type,
            other => other.kind().as_str(),
        }
    }

    /// 文件类元素的载荷
    pub fn as_file(&self) -> Option<&FileElement> {
        match self {
            Element::Record(f) | Element::Image(f) | Element::File(f) => Some(f),
            _ => None,
        }
    }

    /// 转为 CQ 码参数。纯文本不是 CQ 码，返回 None
    pub fn cq_args(&self) -> Option<CqArgs> {
        let single = |key: &str, value: &str| CqArgs::from([(key.to_string(), value.to_string())]);
        let args = match self {
            Element::Text { .. } => return None,
            Element::At { target } | Element::Poke { target } => single("qq", target),
            Element::Face { id } | Element::Reply { id } => single("id", id),
            Element::Tts { content } => single("text", content),
            Element::Record(f) | Element::Image(f) | Element::File(f) => {
                single("file", &f.locator())
            }
            Element::Default { data, .. } => data.clone(),
        };
        Some(args)
    }
}

/// 元素构造错误
#[derive(Debug, thiserror::Error)]
pub enum ElementError {
    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("类型 {type_name} 不能从 CQ 码构造")]
    NotConstructible { type_name: String },

    #[error("类型 {type_name} 缺少参数 {field}")]
    MissingField {
        type_name: String,
        field: &'static str,
    },
}

impl ElementError {
    pub fn as_resource(&self) -> Option<&ResourceError> {
        match self {
            ElementError::Resource(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resolver;

    #[test]
    fn default_keeps_raw_type_name() {
        let el = Element::Default {
            raw_type: "dice".into(),
            data: CqArgs::from([("result".into(), "6".into())]),
        };
        assert_eq!(el.kind(), ElementKind::Default);
        assert_eq!(el.type_name(), "dice");
        assert_eq!(el.cq_args().unwrap().get("result").map(String::as_str), Some("6"));
    }

    #[test]
    fn file_args_use_resource_locator() {
        let res = Resolver::default()
            .resolve("https://example.com/a.png")
            .unwrap();
        let el = Element::Image(FileElement::new(res));
        let args = el.cq_args().unwrap();
        assert_eq!(args["file"], "https://example.com/a.png");
        assert_eq!(el.as_file().unwrap().name(), "a.png");
    }

    #[test]
    fn text_has_no_cq_args() {
        assert!(Element::text("hi").cq_args().is_none());
        assert_eq!(Element::at(123).type_name(), "at");
    }
}
