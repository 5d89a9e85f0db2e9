use super::action::{ActionError, ActionInvoker, ActionResponse};
use crate::message::Message;
use serde::{Deserialize, Serialize};

// ================= API 定义 =================
// 字段名与 OneBot v11 保持一致

#[derive(Debug, Deserialize)]
pub struct MessageIdData {
    pub message_id: i64,
}

// --- send_private_msg / send_group_msg ---

#[derive(Serialize)]
struct SendPrivateMsgParams<M> {
    user_id: i64,
    message: M,
}

#[derive(Serialize)]
struct SendGroupMsgParams<M> {
    group_id: i64,
    message: M,
}

// --- get_msg ---

#[derive(Serialize)]
struct MessageIdParams {
    message_id: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SenderInfo {
    pub user_id: i64,
    pub nickname: String,
    pub card: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MsgData {
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub message_type: String,
    pub message_id: i64,
    #[serde(default)]
    pub real_id: i64,
    #[serde(default)]
    pub sender: SenderInfo,
    #[serde(default)]
    pub message: Message,
    #[serde(default)]
    pub raw_message: Option<String>,
}

// --- get_login_info / get_stranger_info ---

#[derive(Serialize)]
struct EmptyParams {}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginInfo {
    pub user_id: i64,
    pub nickname: String,
}

#[derive(Serialize)]
struct GetStrangerInfoParams {
    user_id: i64,
    no_cache: bool,
}

#[derive(Debug, Deserialize)]
pub struct StrangerInfo {
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub age: Option<i64>,
}

// --- get_status / get_version_info ---

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Status {
    pub online: Option<bool>,
    pub good: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VersionInfo {
    pub app_name: String,
    pub app_version: String,
    pub protocol_version: String,
}

// --- 加好友 / 加群请求 ---

#[derive(Serialize)]
struct SetFriendAddRequestParams<'a> {
    flag: &'a str,
    approve: bool,
    remark: &'a str,
}

#[derive(Serialize)]
struct SetGroupAddRequestParams<'a> {
    flag: &'a str,
    sub_type: &'a str,
    approve: bool,
    reason: &'a str,
}

// --- 群管理 ---

#[derive(Serialize)]
struct SetGroupSpecialTitleParams<'a> {
    group_id: i64,
    user_id: i64,
    special_title: &'a str,
    duration: i64,
}

#[derive(Serialize)]
struct SetGroupLeaveParams {
    group_id: i64,
    is_dismiss: bool,
}

#[derive(Serialize)]
struct SetGroupCardParams<'a> {
    group_id: i64,
    user_id: i64,
    card: &'a str,
}

#[derive(Serialize)]
struct GetGroupInfoParams {
    group_id: i64,
    no_cache: bool,
}

#[derive(Debug, Deserialize)]
pub struct GroupInfo {
    pub group_id: i64,
    #[serde(default)]
    pub group_name: String,
    pub member_count: Option<i32>,
    pub max_member_count: Option<i32>,
}

#[derive(Serialize)]
struct GetGroupMemberInfoParams {
    group_id: i64,
    user_id: i64,
    no_cache: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GroupMemberInfo {
    pub group_id: i64,
    pub user_id: i64,
    pub nickname: String,
    pub card: String,
    pub sex: String, // "male", "female", or "unknown"
    pub age: i32,
    pub join_time: i64,
    pub last_sent_time: i64,
    pub level: String,
    pub role: String, // "owner", "admin", or "member"
    pub title: String,
    pub title_expire_time: i64,
}

impl ActionInvoker {
    /// 发送私聊消息，`message` 可以是 [`Message`] 或 CQ 码字符串
    pub async fn send_private_msg<M: Serialize>(
        &self,
        user_id: i64,
        message: M,
    ) -> Result<i64, ActionError> {
        let data: MessageIdData = self
            .call("send_private_msg", SendPrivateMsgParams { user_id, message })
            .await?;
        Ok(data.message_id)
    }

    pub async fn send_group_msg<M: Serialize>(
        &self,
        group_id: i64,
        message: M,
    ) -> Result<i64, ActionError> {
        let data: MessageIdData = self
            .call("send_group_msg", SendGroupMsgParams { group_id, message })
            .await?;
        Ok(data.message_id)
    }

    pub async fn get_msg(&self, message_id: i64) -> Result<MsgData, ActionError> {
        self.call("get_msg", MessageIdParams { message_id }).await
    }

    pub async fn delete_msg(&self, message_id: i64) -> Result<(), ActionError> {
        self.invoke("delete_msg", MessageIdParams { message_id })
            .await?;
        Ok(())
    }

    pub async fn get_login_info(&self) -> Result<LoginInfo, ActionError> {
        self.call("get_login_info", EmptyParams {}).await
    }

    pub async fn get_stranger_info(
        &self,
        user_id: i64,
        no_cache: bool,
    ) -> Result<StrangerInfo, ActionError> {
        self.call("get_stranger_info", GetStrangerInfoParams { user_id, no_cache })
            .await
    }

    pub async fn get_status(&self) -> Result<Status, ActionError> {
        self.call("get_status", EmptyParams {}).await
    }

    pub async fn get_version_info(&self) -> Result<VersionInfo, ActionError> {
        self.call("get_version_info", EmptyParams {}).await
    }

    /// 处理加好友请求
    pub async fn set_friend_add_request(
        &self,
        flag: &str,
        approve: bool,
        remark: &str,
    ) -> Result<(), ActionError> {
        let params = SetFriendAddRequestParams {
            flag,
            approve,
            remark,
        };
        self.invoke("set_friend_add_request", params).await?;
        Ok(())
    }

    /// 处理加群请求 / 邀请，`sub_type` 为 "add" 或 "invite"
    pub async fn set_group_add_request(
        &self,
        flag: &str,
        sub_type: &str,
        approve: bool,
        reason: &str,
    ) -> Result<(), ActionError> {
        let params = SetGroupAddRequestParams {
            flag,
            sub_type,
            approve,
            reason,
        };
        self.invoke("set_group_add_request", params).await?;
        Ok(())
    }

    pub async fn set_group_special_title(
        &self,
        group_id: i64,
        user_id: i64,
        special_title: &str,
        duration: i64,
    ) -> Result<(), ActionError> {
        let params = SetGroupSpecialTitleParams {
            group_id,
            user_id,
            special_title,
            duration,
        };
        self.invoke("set_group_special_title", params).await?;
        Ok(())
    }

    /// 退群
    pub async fn set_group_leave(&self, group_id: i64, is_dismiss: bool) -> Result<(), ActionError> {
        self.invoke(
            "set_group_leave",
            SetGroupLeaveParams {
                group_id,
                is_dismiss,
            },
        )
        .await?;
        Ok(())
    }

    pub async fn set_group_card(
        &self,
        group_id: i64,
        user_id: i64,
        card: &str,
    ) -> Result<(), ActionError> {
        let params = SetGroupCardParams {
            group_id,
            user_id,
            card,
        };
        self.invoke("set_group_card", params).await?;
        Ok(())
    }

    pub async fn get_group_info(
        &self,
        group_id: i64,
        no_cache: bool,
    ) -> Result<GroupInfo, ActionError> {
        self.call("get_group_info", GetGroupInfoParams { group_id, no_cache })
            .await
    }

    pub async fn get_group_member_info(
        &self,
        group_id: i64,
        user_id: i64,
        no_cache: bool,
    ) -> Result<GroupMemberInfo, ActionError> {
        let params = GetGroupMemberInfoParams {
            group_id,
            user_id,
            no_cache,
        };
        self.call("get_group_member_info", params).await
    }

    /// 未封装的动作直接透传
    pub async fn raw<P: Serialize>(
        &self,
        action: &str,
        params: P,
    ) -> Result<ActionResponse, ActionError> {
        self.invoke(action, params).await
    }
}
