//! 动作调用与 echo 关联
//!
//! 每次调用生成一个 UUID 作为 echo，先在等待表中登记一次性回调槽再发送。
//! 连接的读任务收到响应后按 echo 直接取出对应的槽并投递，
//! 不扫描、不回灌，找不到主人的响应只计数后丢弃。

use crate::adapters::Transport;
use crate::{BotError, debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use simd_json::OwnedValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::time::Instant;

/// 默认超时
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// 超时过大 (如 `Duration::MAX`) 时使用的截止时间，约 30 年
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

// ============================================================================
// 1. 请求与响应
// ============================================================================

/// 出站请求: `{"echo": .., "action": .., "params": {..}}`
#[derive(Debug, Serialize)]
pub struct ActionRequest<'a, P> {
    pub echo: &'a str,
    pub action: &'a str,
    pub params: P,
}

/// 入站响应: `{"status": .., "retcode": .., "data": .., "echo": ..}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub status: String,
    #[serde(default, alias = "retCode")]
    pub retcode: i64,
    #[serde(default = "null_value")]
    pub data: OwnedValue,
    #[serde(default)]
    pub echo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wording: Option<String>,
}

fn null_value() -> OwnedValue {
    OwnedValue::from(())
}

impl ActionResponse {
    pub fn ok(echo: impl Into<String>, data: OwnedValue) -> Self {
        Self {
            status: "ok".to_string(),
            retcode: 0,
            data,
            echo: echo.into(),
            msg: None,
            wording: None,
        }
    }

    pub fn failed(echo: impl Into<String>, retcode: i64, msg: impl Into<String>) -> Self {
        Self {
            status: "failed".to_string(),
            retcode,
            data: null_value(),
            echo: echo.into(),
            msg: Some(msg.into()),
            wording: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status.eq_ignore_ascii_case("failed")
    }

    /// 将 data 反序列化为具体类型
    pub fn into_data<R: DeserializeOwned>(self) -> Result<R, simd_json::Error> {
        simd_json::serde::from_owned_value(self.data)
    }
}

// ============================================================================
// 2. 错误
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("动作 {action} 执行失败 (status={status}, retcode={retcode}): {message}")]
    Failed {
        action: String,
        status: String,
        retcode: i64,
        message: String,
    },

    #[error("动作 {action} 等待响应超时 ({timeout:?}, echo={echo})")]
    Timeout {
        action: String,
        echo: String,
        timeout: Duration,
    },

    #[error("连接已关闭")]
    Closed,

    #[error("发送失败: {0}")]
    Transport(BotError),

    #[error("请求序列化失败: {0}")]
    Encode(#[from] simd_json::Error),

    #[error("动作 {action} 的响应数据解析失败: {source}")]
    Decode {
        action: String,
        #[source]
        source: simd_json::Error,
    },
}

// ============================================================================
// 3. 调用器
// ============================================================================

type PendingMap = HashMap<String, oneshot::Sender<ActionResponse>>;

pub struct ActionInvoker {
    transport: AsyncMutex<Box<dyn Transport>>,
    pending: Mutex<PendingMap>,
    default_timeout: Duration,
    closed: AtomicBool,
    dropped: AtomicU64,
    self_id: AtomicI64,
}

/// 调用结束 (完成 / 超时 / 被取消) 时移除等待表中的条目
struct PendingGuard<'a> {
    invoker: &'a ActionInvoker,
    echo: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.invoker.pending().remove(self.echo);
    }
}

impl ActionInvoker {
    pub fn new(transport: impl Transport + 'static, default_timeout: Duration) -> Self {
        Self {
            transport: AsyncMutex::new(Box::new(transport)),
            pending: Mutex::new(HashMap::new()),
            default_timeout,
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            self_id: AtomicI64::new(0),
        }
    }

    fn pending(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// 使用默认超时调用
    pub async fn invoke<P: Serialize>(
        &self,
        action: &str,
        params: P,
    ) -> Result<ActionResponse, ActionError> {
        self.invoke_with_timeout(action, params, self.default_timeout)
            .await
    }

    /// 发送并等待响应，发送与等待共用同一个截止时间
    pub async fn invoke_with_timeout<P: Serialize>(
        &self,
        action: &str,
        params: P,
        timeout: Duration,
    ) -> Result<ActionResponse, ActionError> {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let echo = uuid::Uuid::new_v4().to_string();
        let frame = simd_json::to_string(&ActionRequest {
            echo: &echo,
            action,
            params,
        })?;

        // 先登记再发送，立即返回的响应也不会丢
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending();
            if self.closed.load(Ordering::SeqCst) {
                return Err(ActionError::Closed);
            }
            pending.insert(echo.clone(), tx);
        }
        let _guard = PendingGuard {
            invoker: self,
            echo: &echo,
        };

        let exchange = async {
            self.transport
                .lock()
                .await
                .send(frame)
                .await
                .map_err(ActionError::Transport)?;
            debug!(target: "Action", "-> {} (echo={})", action, echo);
            rx.await.map_err(|_| ActionError::Closed)
        };

        let resp = match tokio::time::timeout_at(deadline, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(target: "Action", "动作 {} 超时 ({:?})", action, timeout);
                return Err(ActionError::Timeout {
                    action: action.to_string(),
                    echo: echo.clone(),
                    timeout,
                });
            }
        };

        if resp.is_failed() {
            let message = resp
                .wording
                .clone()
                .or_else(|| resp.msg.clone())
                .unwrap_or_default();
            return Err(ActionError::Failed {
                action: action.to_string(),
                status: resp.status,
                retcode: resp.retcode,
                message,
            });
        }
        Ok(resp)
    }

    /// 调用并把 data 解析为具体类型
    pub async fn call<P, R>(&self, action: &str, params: P) -> Result<R, ActionError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let resp = self.invoke(action, params).await?;
        resp.into_data().map_err(|source| ActionError::Decode {
            action: action.to_string(),
            source,
        })
    }

    /// 投递一条响应，返回是否找到了等待者
    pub fn handle_response(&self, resp: ActionResponse) -> bool {
        if resp.echo.is_empty() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(target: "Action", "丢弃缺少 echo 的响应");
            return false;
        }

        let slot = self.pending().remove(&resp.echo);
        match slot {
            Some(tx) => {
                let echo = resp.echo.clone();
                if tx.send(resp).is_err() {
                    // 调用方已经放弃等待
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(target: "Action", "响应到达时调用已结束 (echo={})", echo);
                    return false;
                }
                true
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(target: "Action", "丢弃无人等待的响应 (echo={})", resp.echo);
                false
            }
        }
    }

    /// 从响应流中持续投递，直到流结束。返回成功投递的数量
    pub async fn route_responses<S>(&self, mut responses: S) -> usize
    where
        S: futures_util::Stream<Item = ActionResponse> + Unpin,
    {
        use futures_util::StreamExt;

        let mut delivered = 0;
        while let Some(resp) = responses.next().await {
            if self.handle_response(resp) {
                delivered += 1;
            }
        }
        delivered
    }

    /// 连接断开：清空等待表，所有等待中的调用立即返回 `Closed`
    pub fn close(&self) {
        let drained = {
            let mut pending = self.pending();
            self.closed.store(true, Ordering::SeqCst);
            std::mem::take(&mut *pending)
        };
        if !drained.is_empty() {
            warn!(target: "Action", "连接关闭，{} 个调用被中止", drained.len());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// 无人认领的响应数量 (缺少 echo / 未知 echo / 调用已超时)
    pub fn dropped_echo_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 机器人账号，尚未获知时为 None
    pub fn self_id(&self) -> Option<i64> {
        match self.self_id.load(Ordering::Relaxed) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn set_self_id(&self, id: i64) {
        self.self_id.store(id, Ordering::Relaxed);
    }
}
