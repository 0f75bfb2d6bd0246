use crate::external::TelegramClient;
use crate::models::UserId;
use async_trait::async_trait;
use std::collections::HashSet;

/// Decides whether a user may transact. Callers ask before any balance-affecting operation
/// and pass the verdict to the ledger.
#[async_trait]
pub trait MembershipGate: Send + Sync {
    async fn is_authorized(&self, user_id: UserId) -> bool;
}

/// Channel membership via the Bot API. Lookup failures count as "not a member".
pub struct ChannelMembershipGate {
    client: TelegramClient,
}

impl ChannelMembershipGate {
    pub fn new(client: TelegramClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MembershipGate for ChannelMembershipGate {
    async fn is_authorized(&self, user_id: UserId) -> bool {
        match self
            .client
            .get_chat_member(self.client.channel(), user_id)
            .await
        {
            Ok(member) => member.is_member(),
            Err(e) => {
                log::warn!("Membership lookup failed for {user_id}: {e}");
                false
            }
        }
    }
}

/// Fixed answer, for local runs and tests.
pub struct StaticMembershipGate {
    members: Option<HashSet<UserId>>,
}

impl StaticMembershipGate {
    pub fn allow_all() -> Self {
        Self { members: None }
    }

    pub fn only(members: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            members: Some(members.into_iter().collect()),
        }
    }
}

#[async_trait]
impl MembershipGate for StaticMembershipGate {
    async fn is_authorized(&self, user_id: UserId) -> bool {
        self.members
            .as_ref()
            .is_none_or(|members| members.contains(&user_id))
    }
}
