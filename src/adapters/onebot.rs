use crate::adapters::Transport;
use crate::config::OneBotConfig;
use crate::{BotError, BotResult, debug, error, info, warn};
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use http::HeaderValue;
use simd_json::OwnedValue;
use simd_json::derived::{ValueObjectAccess, ValueObjectAccessAsScalar};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};

pub mod action;
pub mod api;

use action::{ActionInvoker, ActionResponse};

/// 上报事件 (非动作响应的帧)
pub type Event = OwnedValue;

pub type TraitSink =
    Box<dyn Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin>;

/// WebSocket 写半边
pub struct WsTransport {
    sink: TraitSink,
}

impl WsTransport {
    pub fn new(sink: TraitSink) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: String) -> BotResult<()> {
        self.sink.send(WsMessage::Text(frame.into())).await?;
        Ok(())
    }
}

/// 建立连接并启动读任务
///
/// 读任务把动作响应直接交给调用器，其余帧作为事件发往返回的通道。
/// 连接断开后调用器被关闭，事件通道随之结束。
pub async fn connect(
    config: &OneBotConfig,
) -> BotResult<(Arc<ActionInvoker>, mpsc::UnboundedReceiver<Event>)> {
    let mut request = config.url.as_str().into_client_request()?;

    if let Some(token) = config.token() {
        let token_header = format!("Bearer {}", token);
        request
            .headers_mut()
            .insert("Authorization", HeaderValue::from_str(&token_header)?);
    }

    let (ws_stream, _) = connect_async(request).await?;
    info!(target: "Bot", "[{}] 连接成功！(OneBot)", config.url);

    let (write_half, mut read_half) = ws_stream.split();
    let invoker = Arc::new(ActionInvoker::new(
        WsTransport::new(Box::new(write_half)),
        config.action_timeout(),
    ));

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let reader = invoker.clone();
    tokio::spawn(async move {
        while let Some(message) = read_half.next().await {
            match message {
                Ok(WsMessage::Text(text)) => {
                    let mut data = text.as_bytes().to_vec();
                    if let Some(event) = route_frame(&reader, &mut data)
                        && event_tx.send(event).is_err()
                    {
                        break;
                    }
                }
                Ok(WsMessage::Close(_)) => break,
                Err(e) => {
                    warn!(target: "Bot", "读取失败: {}", e);
                    break;
                }
                _ => {}
            }
        }
        reader.close();
    });

    Ok((invoker, event_rx))
}

/// 分发一帧：动作响应交给调用器并返回 None，其余作为事件返回
pub fn route_frame(invoker: &ActionInvoker, data: &mut [u8]) -> Option<Event> {
    let value = match simd_json::to_owned_value(data) {
        Ok(v) => v,
        Err(e) => {
            debug!(target: "Bot", "无法解析的帧: {}", e);
            return None;
        }
    };

    if value.get("echo").is_some() && value.get("status").is_some() {
        match simd_json::serde::from_owned_value::<ActionResponse>(value) {
            Ok(resp) => {
                invoker.handle_response(resp);
            }
            Err(e) => warn!(target: "Bot", "动作响应格式错误: {}", e),
        }
        return None;
    }

    if let Some(id) = value.get_i64("self_id")
        && invoker.self_id() != Some(id)
    {
        invoker.set_self_id(id);
    }
    Some(value)
}

/// OneBot 主循环：连接、分发事件、断线后等待重连
pub async fn run_bot_loop<F, Fut>(config: OneBotConfig, handler: F)
where
    F: Fn(Arc<ActionInvoker>, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let interval = config.reconnect_interval();
    loop {
        match serve(&config, &handler).await {
            Ok(()) => warn!(
                target: "Bot",
                "[{}] 连接断开，{}ms 后重连...",
                config.url,
                interval.as_millis()
            ),
            Err(e) => error!(
                target: "Bot",
                "[{}] 连接失败: {}。{}ms 后重试...",
                config.url,
                e,
                interval.as_millis()
            ),
        }
        tokio::time::sleep(interval).await;
    }
}

async fn serve<F, Fut>(config: &OneBotConfig, handler: &F) -> Result<(), BotError>
where
    F: Fn(Arc<ActionInvoker>, Event) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (invoker, mut events) = connect(config).await?;

    // 后台获取登录信息
    {
        let invoker = invoker.clone();
        tokio::spawn(async move {
            match invoker.get_login_info().await {
                Ok(login) => {
                    invoker.set_self_id(login.user_id);
                    info!(target: "Bot", "已获取登录信息: {} ({})", login.nickname, login.user_id);
                }
                Err(e) => warn!(target: "Bot", "获取登录信息失败: {}", e),
            }
        });
    }

    while let Some(event) = events.recv().await {
        tokio::spawn(handler(invoker.clone(), event));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use action::DEFAULT_ACTION_TIMEOUT;

    fn invoker() -> (ActionInvoker, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        (ActionInvoker::new(tx, DEFAULT_ACTION_TIMEOUT), rx)
    }

    #[test]
    fn events_update_self_id() {
        let (invoker, _rx) = invoker();
        let mut frame =
            br#"{"post_type":"message","self_id":10001,"raw_message":"hi"}"#.to_vec();
        let event = route_frame(&invoker, &mut frame).unwrap();
        assert_eq!(event.get_str("raw_message"), Some("hi"));
        assert_eq!(invoker.self_id(), Some(10001));
    }

    #[test]
    fn responses_are_not_events() {
        let (invoker, _rx) = invoker();
        let mut frame = br#"{"status":"ok","retcode":0,"data":null,"echo":"gone"}"#.to_vec();
        assert!(route_frame(&invoker, &mut frame).is_none());
        assert_eq!(invoker.dropped_echo_count(), 1);
    }

    #[test]
    fn garbage_is_dropped() {
        let (invoker, _rx) = invoker();
        let mut frame = b"not json".to_vec();
        assert!(route_frame(&invoker, &mut frame).is_none());
    }
}
