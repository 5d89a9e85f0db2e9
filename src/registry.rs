//! 元素注册表：CQ 类型名 -> 构造函数
//!
//! 内置 `at, tts, reply, poke, face, file, image, record`。
//! `text` 只由解码器对纯文本片段内部生成，从 CQ 码构造一律拒绝。
//! 未注册的类型名回落到 `Default`，完整保留类型名与参数。

use crate::element::{CqArgs, Element, ElementError, FileElement};
use crate::resource::Resolver;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// 构造函数签名: (类型名, 参数, 资源解析器)
pub type ElementFactory =
    Arc<dyn Fn(&str, &CqArgs, &Resolver) -> Result<Element, ElementError> + Send + Sync>;

pub struct ElementRegistry {
    factories: HashMap<String, ElementFactory>,
    fallback: ElementFactory,
}

static BUILTIN: OnceLock<ElementRegistry> = OnceLock::new();

/// 全局只读的内置注册表
pub fn builtin() -> &'static ElementRegistry {
    BUILTIN.get_or_init(ElementRegistry::with_builtins)
}

impl Default for ElementRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ElementRegistry {
    /// 空注册表，所有类型都落到 `Default`
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            fallback: Arc::new(build_default),
        }
    }

    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        reg.register("at", build_at);
        reg.register("tts", build_tts);
        reg.register("reply", build_reply);
        reg.register("poke", build_poke);
        reg.register("face", build_face);
        reg.register("file", |name: &str, args: &CqArgs, resolver: &Resolver| {
            build_file(name, args, resolver).map(Element::File)
        });
        reg.register("image", |name: &str, args: &CqArgs, resolver: &Resolver| {
            build_file(name, args, resolver).map(Element::Image)
        });
        reg.register("record", |name: &str, args: &CqArgs, resolver: &Resolver| {
            build_file(name, args, resolver).map(Element::Record)
        });
        reg.register("text", reject);
        reg
    }

    /// 注册或覆盖一个类型
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&str, &CqArgs, &Resolver) -> Result<Element, ElementError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// 查找构造函数，未注册时返回 `Default` 回落
    pub fn lookup(&self, name: &str) -> &ElementFactory {
        self.factories.get(name).unwrap_or(&self.fallback)
    }

    pub fn build(
        &self,
        name: &str,
        args: &CqArgs,
        resolver: &Resolver,
    ) -> Result<Element, ElementError> {
        (self.lookup(name))(name, args, resolver)
    }
}

// ============================================================================
// 内置构造函数
// ============================================================================

fn field<'a>(
    type_name: &str,
    args: &'a CqArgs,
    keys: &[&'static str],
) -> Result<&'a str, ElementError> {
    keys.iter()
        .find_map(|k| args.get(*k).map(String::as_str))
        .ok_or_else(|| ElementError::MissingField {
            type_name: type_name.to_string(),
            field: keys.first().copied().unwrap_or_default(),
        })
}

/// 纯文本参数缺失时取空串，与协议端的宽松行为一致
fn field_or_empty<'a>(args: &'a CqArgs, keys: &[&str]) -> &'a str {
    keys.iter()
        .find_map(|k| args.get(*k).map(String::as_str))
        .unwrap_or_default()
}

fn build_default(name: &str, args: &CqArgs, _: &Resolver) -> Result<Element, ElementError> {
    Ok(Element::Default {
        raw_type: name.to_string(),
        data: args.clone(),
    })
}

fn reject(name: &str, _: &CqArgs, _: &Resolver) -> Result<Element, ElementError> {
    Err(ElementError::NotConstructible {
        type_name: name.to_string(),
    })
}

fn build_at(_: &str, args: &CqArgs, _: &Resolver) -> Result<Element, ElementError> {
    // 部分实现用 id 而非 qq
    let target = field_or_empty(args, &["id", "qq"]);
    Ok(Element::At {
        target: target.to_string(),
    })
}

fn build_poke(_: &str, args: &CqArgs, _: &Resolver) -> Result<Element, ElementError> {
    let target = field_or_empty(args, &["qq", "id"]);
    Ok(Element::Poke {
        target: target.to_string(),
    })
}

fn build_tts(_: &str, args: &CqArgs, _: &Resolver) -> Result<Element, ElementError> {
    let content = field_or_empty(args, &["text"]);
    Ok(Element::Tts {
        content: content.to_string(),
    })
}

fn build_reply(_: &str, args: &CqArgs, _: &Resolver) -> Result<Element, ElementError> {
    let id = field_or_empty(args, &["id"]);
    Ok(Element::Reply { id: id.to_string() })
}

fn build_face(_: &str, args: &CqArgs, _: &Resolver) -> Result<Element, ElementError> {
    let id = field_or_empty(args, &["id"]);
    Ok(Element::Face { id: id.to_string() })
}

/// url 非空时优先使用 url，否则使用 file
fn build_file(name: &str, args: &CqArgs, resolver: &Resolver) -> Result<FileElement, ElementError> {
    let locator = match args.get("url").filter(|u| !u.trim().is_empty()) {
        Some(url) => url.as_str(),
        None => field(name, args, &["file"])?,
    };
    let resource = resolver.resolve(locator)?;
    Ok(FileElement::new(resource))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementKind;
    use crate::resource::ResourceErrorKind;

    fn args(pairs: &[(&str, &str)]) -> CqArgs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn builtins_are_registered() {
        let reg = builtin();
        for name in ["at", "tts", "reply", "poke", "face", "file", "image", "record", "text"] {
            assert!(reg.contains(name), "{name}");
        }
        assert!(!reg.contains("video"));
    }

    #[test]
    fn at_prefers_id_over_qq() {
        let el = builtin()
            .build("at", &args(&[("qq", "1"), ("id", "2")]), &Resolver::default())
            .unwrap();
        assert_eq!(el, Element::At { target: "2".into() });
    }

    #[test]
    fn text_is_never_built_from_cq() {
        let err = builtin()
            .build("text", &args(&[("text", "hi")]), &Resolver::default())
            .unwrap_err();
        assert!(matches!(err, ElementError::NotConstructible { .. }));
    }

    #[test]
    fn missing_text_fields_default_to_empty() {
        let reg = builtin();
        let none = CqArgs::new();
        let resolver = Resolver::default();
        assert_eq!(
            reg.build("reply", &none, &resolver).unwrap(),
            Element::Reply { id: String::new() }
        );
        assert_eq!(
            reg.build("face", &none, &resolver).unwrap(),
            Element::Face { id: String::new() }
        );
        assert_eq!(
            reg.build("at", &none, &resolver).unwrap(),
            Element::At {
                target: String::new()
            }
        );
        assert_eq!(
            reg.build("tts", &none, &resolver).unwrap(),
            Element::Tts {
                content: String::new()
            }
        );
    }

    #[test]
    fn missing_file_locator_is_reported() {
        let err = builtin()
            .build("image", &CqArgs::new(), &Resolver::default())
            .unwrap_err();
        match err {
            ElementError::MissingField { type_name, field } => {
                assert_eq!(type_name, "image");
                assert_eq!(field, "file");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn image_prefers_non_empty_url() {
        let el = builtin()
            .build(
                "image",
                &args(&[("file", "abc.image"), ("url", "https://example.com/x.jpg")]),
                &Resolver::default(),
            )
            .unwrap();
        assert_eq!(el.kind(), ElementKind::Image);
        assert_eq!(el.as_file().unwrap().name(), "x.jpg");

        let err = builtin()
            .build(
                "image",
                &args(&[("file", "base64://%%%"), ("url", " ")]),
                &Resolver::default(),
            )
            .unwrap_err();
        assert_eq!(
            err.as_resource().map(|e| e.kind),
            Some(ResourceErrorKind::InvalidLocator)
        );
    }

    #[test]
    fn unknown_names_fall_back_to_default() {
        let el = builtin()
            .build("foo", &args(&[("bar", "1")]), &Resolver::default())
            .unwrap();
        assert_eq!(
            el,
            Element::Default {
                raw_type: "foo".into(),
                data: args(&[("bar", "1")]),
            }
        );
    }

    #[test]
    fn custom_registration_overrides_fallback() {
        let mut reg = ElementRegistry::with_builtins();
        reg.register("dice", |_: &str, args: &CqArgs, _: &Resolver| {
            Ok(Element::text(format!(
                "骰子: {}",
                args.get("result").map(String::as_str).unwrap_or("?")
            )))
        });
        let el = reg
            .build("dice", &args(&[("result", "4")]), &Resolver::default())
            .unwrap();
        assert_eq!(el, Element::text("骰子: 4"));
    }
}
