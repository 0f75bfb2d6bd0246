use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::BroadcastReport;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommandRequest {
    #[schema(example = "/redeem A1B2C3D4E5")]
    pub text: String,
}

#[derive(Debug, Default, Serialize, ToSchema)]
pub struct CommandResponse {
    pub replies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<BroadcastReport>,
}
