use actix_web::{HttpResponse, ResponseError, Result, web};

use crate::bot::CommandDispatcher;
use crate::error::AppError;
use crate::middlewares::AuthenticatedUser;
use crate::models::*;

#[utoipa::path(
    post,
    path = "/codes/redeem",
    tag = "ledger",
    request_body = RedeemCodeRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "兑换成功", body = RedemptionResult),
        (status = 403, description = "非频道成员"),
        (status = 404, description = "兑换码不存在"),
        (status = 409, description = "兑换码已使用")
    )
)]
pub async fn redeem_code(
    dispatcher: web::Data<CommandDispatcher>,
    user: AuthenticatedUser,
    request: web::Json<RedeemCodeRequest>,
) -> Result<HttpResponse> {
    let caller = dispatcher.caller(user.user_id, user.display_name).await;

    match dispatcher.ledger().redeem_code(&caller, &request.code).await {
        Ok(result) => Ok(HttpResponse::Ok().json(ApiResponse::success(result))),
        Err(e) => Ok(AppError::from(e).error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/accounts/allocate",
    tag = "ledger",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "分配账号成功", body = AllocationResult),
        (status = 400, description = "积分不足"),
        (status = 403, description = "非频道成员"),
        (status = 409, description = "账号池为空")
    )
)]
pub async fn allocate_account(
    dispatcher: web::Data<CommandDispatcher>,
    user: AuthenticatedUser,
) -> Result<HttpResponse> {
    let caller = dispatcher.caller(user.user_id, user.display_name).await;

    match dispatcher.ledger().allocate_account(&caller).await {
        Ok(result) => Ok(HttpResponse::Ok().json(ApiResponse::success(result))),
        Err(e) => Ok(AppError::from(e).error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/users/me/balance",
    tag = "ledger",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "获取余额成功", body = BalanceResponse),
        (status = 403, description = "非频道成员"),
        (status = 404, description = "用户不存在")
    )
)]
pub async fn get_balance(
    dispatcher: web::Data<CommandDispatcher>,
    user: AuthenticatedUser,
) -> Result<HttpResponse> {
    let caller = dispatcher.caller(user.user_id, user.display_name).await;

    match dispatcher.ledger().balance(&caller).await {
        Ok(Some(points)) => Ok(HttpResponse::Ok().json(ApiResponse::success(BalanceResponse {
            user_id: caller.user_id,
            points,
        }))),
        Ok(None) => Ok(AppError::NotFound("User not registered".to_string()).error_response()),
        Err(e) => Ok(AppError::from(e).error_response()),
    }
}

pub fn ledger_config(cfg: &mut web::ServiceConfig) {
    cfg.route("/codes/redeem", web::post().to(redeem_code))
        .route("/accounts/allocate", web::post().to(allocate_account))
        .route("/users/me/balance", web::get().to(get_balance));
}
