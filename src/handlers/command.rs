use actix_web::{HttpResponse, Result, web};

use crate::bot::{CommandDispatcher, Inbound};
use crate::middlewares::AuthenticatedUser;
use crate::models::*;

/// Runs one chat message through the command dispatcher on behalf of the token's owner.
#[utoipa::path(
    post,
    path = "/commands",
    tag = "bot",
    request_body = CommandRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "命令已处理", body = CommandResponse),
        (status = 401, description = "未授权")
    )
)]
pub async fn run_command(
    dispatcher: web::Data<CommandDispatcher>,
    user: AuthenticatedUser,
    request: web::Json<CommandRequest>,
) -> Result<HttpResponse> {
    let message = Inbound {
        user_id: user.user_id,
        display_name: user.display_name,
        text: request.into_inner().text,
    };

    let response = dispatcher.dispatch(&message).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

pub fn command_config(cfg: &mut web::ServiceConfig) {
    cfg.route("/commands", web::post().to(run_command));
}
