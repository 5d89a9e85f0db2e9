//! 简写码改写: `[img:xx]` / `[图:xx]` / `[语音:xx]` / `[视频:xx]` 等转为标准 CQ 码

use super::escape_value;
use crate::resource::{absolutize, working_dir};
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::path::Path;
use std::sync::OnceLock;
use url::Url;

pub const FORBIDDEN_PATH: &str = "[图片/文件指向非当前程序目录，已禁止]";
pub const MISSING_PATH: &str = "[找不到图片/文件]";

static SHORTHAND_REGEX: OnceLock<Regex> = OnceLock::new();

fn shorthand_regex() -> &'static Regex {
    SHORTHAND_REGEX.get_or_init(|| {
        Regex::new(r"\[(img|图|文本|text|语音|voice|视频|video):(.+?)\]").expect("Invalid Regex")
    })
}

/// 改写文本中所有简写码，不匹配的部分原样保留
pub fn rewrite(text: &str) -> Cow<'_, str> {
    shorthand_regex().replace_all(text, |caps: &Captures| {
        let kind = match &caps[1] {
            "语音" | "voice" => "record",
            "视频" | "video" => "video",
            _ => "image",
        };
        rewrite_one(kind, caps[2].trim()).unwrap_or_else(|| caps[0].to_string())
    })
}

/// 返回 None 表示保持原文
fn rewrite_one(kind: &str, target: &str) -> Option<String> {
    if target.is_empty() {
        return None;
    }

    let lower = target.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("file://")
    {
        let url = Url::parse(target).ok()?;
        return Some(format!("[CQ:{},file={}]", kind, escape_value(url.as_str())));
    }

    let cwd = working_dir()?;
    let abs = absolutize(Path::new(target), &cwd);
    if !abs.starts_with(&cwd) {
        return Some(FORBIDDEN_PATH.to_string());
    }
    if !abs.exists() {
        return Some(MISSING_PATH.to_string());
    }

    let url = Url::from_file_path(&abs).ok()?;
    Some(format!("[CQ:{},file={}]", kind, escape_value(url.as_str())))
}
