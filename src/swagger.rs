use actix_web::web;
use utoipa::OpenApi;
use utoipa::{
    Modify,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers;
use crate::models::*;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            )
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::command::run_command,
        handlers::ledger::redeem_code,
        handlers::ledger::allocate_account,
        handlers::ledger::get_balance,
        handlers::admin::add_code,
        handlers::admin::generate_codes,
        handlers::admin::import_accounts,
    ),
    components(
        schemas(
            CommandRequest,
            CommandResponse,
            BroadcastReport,
            RedeemCodeRequest,
            RedemptionResult,
            AllocationResult,
            BalanceResponse,
            AddCodeRequest,
            GenerateCodesRequest,
            GenerateCodesResponse,
            GeneratedCode,
            ImportAccountsRequest,
            ImportReport,
            ImportEntryReport,
            ImportStatus,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "bot", description = "Chat command API"),
        (name = "ledger", description = "Points and account ledger API"),
        (name = "admin", description = "Code and account administration API"),
    ),
    info(
        title = "Points Ledger API",
        version = "0.1.0",
        description = "Redeem codes for points and exchange points for accounts",
    ),
    servers(
        (url = "/api/v1", description = "Local server")
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_ledger_routes() {
        let doc = ApiDoc::openapi();
        for path in ["/codes/redeem", "/accounts/allocate", "/admin/codes/generate"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        assert!(
            doc.components
                .as_ref()
                .is_some_and(|c| c.security_schemes.contains_key("bearer_auth"))
        );
    }
}
