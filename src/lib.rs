// lib.rs
//
// ================================================================================
// cqbridge - OneBot 协议适配层
//
// 动作调用：echo 关联 | 超时 | 类型化错误
// 消息编解码：CQ 码 | 元素注册表 | 资源解析
// ================================================================================

pub mod adapters;
pub mod config;
pub mod cq;
pub mod element;
pub mod log;
pub mod message;
pub mod registry;
pub mod resource;

// ============================================================================
// Error Types (统一错误处理)
// ============================================================================

/// 连接与启动流程使用的通用错误类型
pub type BotError = Box<dyn std::error::Error + Send + Sync>;

pub type BotResult<T> = Result<T, BotError>;

// ============================================================================
// Prelude
// ============================================================================

pub mod prelude {
    pub use crate::adapters::Transport;
    pub use crate::adapters::onebot::action::{ActionError, ActionInvoker, ActionResponse};
    pub use crate::adapters::onebot::{Event, connect, route_frame, run_bot_loop};
    pub use crate::config::AppConfig;
    pub use crate::cq::{DecodeFailure, DecodeOptions, ElementsExt, decode, encode};
    pub use crate::element::{CqArgs, Element, ElementKind, FileElement};
    pub use crate::message::{Message, Segment};
    pub use crate::registry::ElementRegistry;
    pub use crate::resource::{Resolver, Resource, ResourceError, ResourceErrorKind};
    pub use crate::{BotError, BotResult};
}
