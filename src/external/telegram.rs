use crate::config::TelegramConfig;
use crate::error::{AppError, AppResult};
use crate::models::UserId;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Bot API envelope: `{"ok": true, "result": ...}` or `{"ok": false, "description": ...}`.
#[derive(Debug, Deserialize)]
pub struct BotApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetChatMemberRequest<'a> {
    chat_id: &'a str,
    user_id: UserId,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: UserId,
    text: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMember {
    pub status: String,
}

impl ChatMember {
    pub fn is_member(&self) -> bool {
        matches!(self.status.as_str(), "member" | "administrator" | "creator")
    }
}

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    config: TelegramConfig,
}

impl TelegramClient {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn channel(&self) -> &str {
        &self.config.channel
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    async fn call<B: Serialize, T: DeserializeOwned>(&self, method: &str, body: &B) -> AppResult<T> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await?;

        let result: BotApiResponse<T> = response.json().await?;

        if !result.ok {
            return Err(AppError::ExternalApiError(format!(
                "Telegram {method} failed: {}",
                result.description.unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        result.result.ok_or_else(|| {
            AppError::ExternalApiError(format!("Telegram {method} returned no result"))
        })
    }

    pub async fn get_chat_member(&self, chat_id: &str, user_id: UserId) -> AppResult<ChatMember> {
        self.call("getChatMember", &GetChatMemberRequest { chat_id, user_id })
            .await
    }

    pub async fn send_message(&self, chat_id: UserId, text: &str) -> AppResult<()> {
        let _: serde_json::Value = self
            .call("sendMessage", &SendMessageRequest { chat_id, text })
            .await?;
        Ok(())
    }
}
