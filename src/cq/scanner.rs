//! CQ 码扫描器
//!
//! 显式状态机: Text -> TagName -> KeyName -> Value -> (KeyName | 闭合)。
//! 每个状态遇到输入结束都直接返回已解析的部分，未闭合的标签被丢弃。

use super::unescape;
use crate::element::CqArgs;

const TAG_OPEN: &str = "[CQ:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Text(String),
    Tag { name: String, args: CqArgs },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Text,
    TagName,
    KeyName,
    Value,
}

struct Scanner<'a> {
    input: &'a str,
    pos: usize,
    state: State,
    tokens: Vec<Token>,

    // 当前标签
    tag_start: usize,
    name: &'a str,
    key: &'a str,
    args: CqArgs,
}

pub(crate) fn scan(input: &str) -> Vec<Token> {
    let mut scanner = Scanner {
        input,
        pos: 0,
        state: State::Text,
        tokens: Vec::new(),
        tag_start: 0,
        name: "",
        key: "",
        args: CqArgs::new(),
    };
    while scanner.step() {}
    scanner.tokens
}

impl<'a> Scanner<'a> {
    fn rest(&self) -> &'a str {
        let input = self.input;
        &input[self.pos..]
    }

    /// 在剩余输入中寻找第一个属于 `set` 的字符，返回 (绝对位置, 字符)
    fn find_any(&self, set: &[char]) -> Option<(usize, char)> {
        self.rest()
            .char_indices()
            .find(|(_, c)| set.contains(c))
            .map(|(i, c)| (self.pos + i, c))
    }

    /// 推进一步，返回 false 表示扫描结束
    fn step(&mut self) -> bool {
        let input = self.input;
        match self.state {
            State::Text => match self.rest().find(TAG_OPEN) {
                Some(offset) => {
                    let start = self.pos + offset;
                    self.push_text(&input[self.pos..start]);
                    self.tag_start = start;
                    self.pos = start + TAG_OPEN.len();
                    self.args.clear();
                    self.state = State::TagName;
                    true
                }
                None => {
                    self.push_text(self.rest());
                    self.pos = input.len();
                    false
                }
            },
            State::TagName => match self.find_any(&[',', ']']) {
                None => false,
                Some((at, c)) => {
                    self.name = &input[self.pos..at];
                    self.pos = at + 1;
                    if c == ']' {
                        self.close_tag();
                    } else {
                        self.state = State::KeyName;
                    }
                    true
                }
            },
            State::KeyName => match self.find_any(&['=', ',', ']']) {
                None => false,
                Some((at, c)) => {
                    let key = &input[self.pos..at];
                    self.pos = at + 1;
                    match c {
                        '=' => {
                            self.key = key;
                            self.state = State::Value;
                        }
                        // 没有等号的键视为空值
                        ',' => self.insert(key, String::new()),
                        _ => {
                            self.insert(key, String::new());
                            self.close_tag();
                        }
                    }
                    true
                }
            },
            State::Value => match self.find_any(&[',', ']']) {
                None => false,
                Some((at, c)) => {
                    let value = unescape(&input[self.pos..at]).into_owned();
                    self.pos = at + 1;
                    let key = self.key;
                    self.insert(key, value);
                    if c == ']' {
                        self.close_tag();
                    } else {
                        self.state = State::KeyName;
                    }
                    true
                }
            },
        }
    }

    fn insert(&mut self, key: &str, value: String) {
        if !key.is_empty() {
            self.args.insert(key.to_string(), value);
        }
    }

    fn close_tag(&mut self) {
        if self.name.is_empty() {
            // 没有类型名的标签按原文处理
            let input = self.input;
            self.push_text(&input[self.tag_start..self.pos]);
        } else {
            self.tokens.push(Token::Tag {
                name: self.name.to_string(),
                args: std::mem::take(&mut self.args),
            });
        }
        self.state = State::Text;
    }

    fn push_text(&mut self, raw: &str) {
        if raw.is_empty() {
            return;
        }
        let text = unescape(raw);
        match self.tokens.last_mut() {
            Some(Token::Text(prev)) => prev.push_str(&text),
            _ => self.tokens.push(Token::Text(text.into_owned())),
        }
    }
}
