use crate::BotResult;
use async_trait::async_trait;

pub mod onebot;

/// 出站传输
///
/// `send` 需要 `&mut self`，调用方持有锁才能写入，同一时刻只有一帧在发送。
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: String) -> BotResult<()>;
}

#[async_trait]
impl Transport for tokio::sync::mpsc::UnboundedSender<String> {
    async fn send(&mut self, frame: String) -> BotResult<()> {
        tokio::sync::mpsc::UnboundedSender::send(self, frame).map_err(|_| "传输通道已关闭")?;
        Ok(())
    }
}
