use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

pub type UserId = i64;

/// Points deducted per allocated account.
pub const ACCOUNT_COST: u64 = 10;

/// Length of generated redeem codes.
pub const CODE_LENGTH: usize = 10;

/// `users/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: Option<String>,
    pub points: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new(username: Option<String>) -> Self {
        Self {
            username,
            points: 0,
            created_at: Some(Utc::now()),
        }
    }
}

/// `codes/{code}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeRecord {
    pub points: u64,
    #[serde(deserialize_with = "flag_from_bool_or_int")]
    pub used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl CodeRecord {
    pub fn new(points: u64) -> Self {
        Self {
            points,
            used: false,
            created_at: Some(Utc::now()),
        }
    }
}

/// `accounts/{id}`; `credentials` is the full `login:secret` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub credentials: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

// 兼容旧数据: used 以 0/1 存储
fn flag_from_bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(n) => n != 0,
    })
}

/// Who is calling the ledger. `is_member` is the Membership Gate's verdict, obtained by the
/// caller before invoking a balance-affecting operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub is_member: bool,
}

impl Caller {
    pub fn member(user_id: UserId) -> Self {
        Self {
            user_id,
            display_name: None,
            is_member: true,
        }
    }

    pub fn with_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RedemptionResult {
    pub code: String,
    pub points_granted: u64,
    pub new_balance: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AllocationResult {
    pub account_id: String,
    pub credentials: String,
    pub points_spent: u64,
    pub remaining_balance: u64,
}

impl AllocationResult {
    /// Splits the payload at the first `:`; payloads without one are all login.
    pub fn login_and_secret(&self) -> (&str, &str) {
        self.credentials
            .split_once(':')
            .unwrap_or((self.credentials.as_str(), ""))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct GeneratedCode {
    pub code: String,
    pub points: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Added,
    AlreadyExists,
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ImportEntryReport {
    pub entry: String,
    pub account_id: Option<String>,
    pub status: ImportStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ImportReport {
    pub entries: Vec<ImportEntryReport>,
}

impl ImportReport {
    pub fn count(&self, status: ImportStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub user: UserRecord,
    pub created: bool,
}

// ---------- HTTP payloads ----------

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RedeemCodeRequest {
    #[schema(example = "A1B2C3D4E5")]
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub user_id: UserId,
    pub points: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AddCodeRequest {
    #[schema(example = "SUMMER2024")]
    pub code: String,
    #[schema(example = 20)]
    pub points: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GenerateCodesRequest {
    #[schema(example = 5)]
    pub count: u32,
    #[schema(example = 20)]
    pub points: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GenerateCodesResponse {
    pub codes: Vec<GeneratedCode>,
    pub broadcast: BroadcastReport,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ImportAccountsRequest {
    /// `login:secret` entries
    pub entries: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}
