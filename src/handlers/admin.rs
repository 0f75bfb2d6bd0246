use actix_web::{HttpResponse, ResponseError, Result, web};

use crate::bot::CommandDispatcher;
use crate::error::AppError;
use crate::middlewares::AuthenticatedUser;
use crate::models::*;

// 管理员接口只校验管理员身份, 不查询频道成员
fn admin_caller(user: AuthenticatedUser) -> Caller {
    Caller {
        user_id: user.user_id,
        display_name: user.display_name,
        is_member: false,
    }
}

#[utoipa::path(
    post,
    path = "/admin/codes",
    tag = "admin",
    request_body = AddCodeRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 201, description = "兑换码已创建"),
        (status = 403, description = "非管理员"),
        (status = 409, description = "兑换码已存在")
    )
)]
pub async fn add_code(
    dispatcher: web::Data<CommandDispatcher>,
    user: AuthenticatedUser,
    request: web::Json<AddCodeRequest>,
) -> Result<HttpResponse> {
    let caller = admin_caller(user);
    let request = request.into_inner();

    match dispatcher
        .ledger()
        .add_code(&caller, &request.code, request.points)
        .await
    {
        Ok(()) => Ok(HttpResponse::Created().json(ApiResponse::success(GeneratedCode {
            code: request.code,
            points: request.points,
        }))),
        Err(e) => Ok(AppError::from(e).error_response()),
    }
}

/// Generates codes and announces them to every known user.
#[utoipa::path(
    post,
    path = "/admin/codes/generate",
    tag = "admin",
    request_body = GenerateCodesRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 201, description = "兑换码已生成", body = GenerateCodesResponse),
        (status = 400, description = "参数错误"),
        (status = 403, description = "非管理员")
    )
)]
pub async fn generate_codes(
    dispatcher: web::Data<CommandDispatcher>,
    user: AuthenticatedUser,
    request: web::Json<GenerateCodesRequest>,
) -> Result<HttpResponse> {
    let caller = admin_caller(user);

    match dispatcher
        .ledger()
        .generate_codes(&caller, request.count, request.points)
        .await
    {
        Ok(codes) => {
            let broadcast = dispatcher.announce_codes(&codes).await;
            Ok(HttpResponse::Created().json(ApiResponse::success(GenerateCodesResponse {
                codes,
                broadcast,
            })))
        }
        Err(e) => Ok(AppError::from(e).error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/admin/accounts/import",
    tag = "admin",
    request_body = ImportAccountsRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "导入完成", body = ImportReport),
        (status = 403, description = "非管理员"),
        (status = 503, description = "存储不可用")
    )
)]
pub async fn import_accounts(
    dispatcher: web::Data<CommandDispatcher>,
    user: AuthenticatedUser,
    request: web::Json<ImportAccountsRequest>,
) -> Result<HttpResponse> {
    let caller = admin_caller(user);

    match dispatcher
        .ledger()
        .import_accounts(&caller, &request.entries)
        .await
    {
        Ok(report) => Ok(HttpResponse::Ok().json(ApiResponse::success(report))),
        Err(e) => Ok(AppError::from(e).error_response()),
    }
}

pub fn admin_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .route("/codes", web::post().to(add_code))
            .route("/codes/generate", web::post().to(generate_codes))
            .route("/accounts/import", web::post().to(import_accounts)),
    );
}
