use crate::cq::{self, DecodeOptions};
use crate::element::Element;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 消息段 (Segment)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Segment {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Segment {
    pub fn new(type_: &str, data: Map<String, Value>) -> Self {
        Self {
            type_: type_.to_string(),
            data,
        }
    }

    /// 读取字符串字段
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// 消息链 (Message Chain)
///
/// 每次追加都消耗旧值并返回新值，需要复用前缀时先 clone。
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct Message(Vec<Segment>);

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// 通用添加方法：手动构建 Segment
    pub fn add(mut self, type_: &str, data: Map<String, Value>) -> Self {
        self.0.push(Segment::new(type_, data));
        self
    }

    fn add_str(self, type_: &str, key: &str, value: String) -> Self {
        let mut data = Map::new();
        data.insert(key.into(), Value::from(value));
        self.add(type_, data)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    // ================== 基础文本类 ==================

    /// 纯文本
    pub fn text(self, text: impl Into<String>) -> Self {
        self.add_str("text", "text", text.into())
    }

    /// 换行
    pub fn br(self) -> Self {
        self.text("\n")
    }

    /// QQ 表情 (ID)
    pub fn face(self, id: impl ToString) -> Self {
        self.add_str("face", "id", id.to_string())
    }

    /// 文字转语音
    pub fn tts(self, text: impl Into<String>) -> Self {
        self.add_str("tts", "text", text.into())
    }

    // ================== 媒体资源类 ==================
    // 定位串原样保存，只有在解析时才会报错

    /// 图片
    /// - `file`: URL、`base64://` 或文件路径
    pub fn image(self, file: impl Into<String>) -> Self {
        self.add_str("image", "file", file.into())
    }

    /// 语音
    pub fn record(self, file: impl Into<String>) -> Self {
        self.add_str("record", "file", file.into())
    }

    /// 视频
    pub fn video(self, file: impl Into<String>) -> Self {
        self.add_str("video", "file", file.into())
    }

    /// 文件
    pub fn file(self, file: impl Into<String>) -> Self {
        self.add_str("file", "file", file.into())
    }

    // ================== 互动/艾特类 ==================

    /// @某人
    pub fn at(self, user_id: impl ToString) -> Self {
        self.add_str("at", "qq", user_id.to_string())
    }

    /// @全体成员
    pub fn at_all(self) -> Self {
        self.at("all")
    }

    /// 回复消息
    pub fn reply(self, message_id: impl ToString) -> Self {
        self.add_str("reply", "id", message_id.to_string())
    }

    /// 戳一戳
    pub fn poke(self, user_id: impl ToString) -> Self {
        self.add_str("poke", "qq", user_id.to_string())
    }

    // ================== 转换 ==================

    /// 结构化元素 -> 消息段
    pub fn from_elements(elements: &[Element]) -> Self {
        elements.iter().fold(Message::new(), |msg, el| match el {
            // 与 cq::encode 一致，空文本不产生分段
            Element::Text { content } if content.is_empty() => msg,
            Element::Text { content } => msg.text(content.clone()),
            other => {
                let data = other
                    .cq_args()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect();
                msg.add(other.type_name(), data)
            }
        })
    }

    /// 转为 CQ 码字符串
    pub fn to_cq_string(&self) -> String {
        cq::inbound_segments_to_cq(&self.0)
    }

    /// 解码为结构化元素
    pub fn to_elements(&self, opts: &DecodeOptions) -> Vec<Element> {
        cq::decode(&self.to_cq_string(), opts)
    }
}

// 允许直接从字符串字面量转换为纯文本消息
impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::new().text(s)
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::new().text(s)
    }
}

impl From<Vec<Segment>> for Message {
    fn from(segments: Vec<Segment>) -> Self {
        Message(segments)
    }
}
