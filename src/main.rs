use actix_web::{App, HttpServer, middleware::Logger, web};
use anyhow::Context;
use chrono::Local; // timestamp in log lines
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter
use std::sync::Arc;

use points_ledger::{
    bot::CommandDispatcher,
    config::{Config, MembershipMode, StoreBackend},
    database::{create_connection, run_migrations},
    external::{
        ChannelMembershipGate, LogNotifier, MembershipGate, Notifier, StaticMembershipGate,
        TelegramClient,
    },
    handlers,
    middlewares::{AuthMiddleware, create_cors},
    services::LedgerService,
    store::{CredentialStore, DatabaseStore, MemoryStore},
    swagger::swagger_config,
    utils::JwtService,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    // 加载配置
    let config =
        Config::from_toml().map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    // 选择存储后端
    let store: Arc<dyn CredentialStore> = match config.store.backend {
        StoreBackend::Database => {
            let pool = create_connection(&config.database)
                .await
                .context("Failed to connect to the database")?;
            run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            Arc::new(DatabaseStore::new(pool))
        }
        StoreBackend::Memory => {
            log::warn!("Using the in-memory store, ledger state is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    if config.ledger.admin_user_id == 0 {
        log::warn!("ledger.admin_user_id is not set, admin commands are disabled");
    }

    // 外部服务: 成员校验方式由 telegram.membership 决定
    let telegram = (!config.telegram.bot_token.is_empty())
        .then(|| TelegramClient::new(config.telegram.clone()));

    let gate: Arc<dyn MembershipGate> = match (config.telegram.membership, &telegram) {
        (MembershipMode::Channel, Some(client)) => {
            Arc::new(ChannelMembershipGate::new(client.clone()))
        }
        (MembershipMode::Channel, None) => {
            anyhow::bail!("telegram.membership = \"channel\" requires telegram.bot_token")
        }
        (MembershipMode::Open, _) => {
            log::warn!("telegram.membership is \"open\", every user is treated as a member");
            Arc::new(StaticMembershipGate::allow_all())
        }
    };

    let notifier: Arc<dyn Notifier> = match telegram {
        Some(client) => Arc::new(client),
        None => {
            log::warn!("telegram.bot_token is empty, broadcasts are only logged");
            Arc::new(LogNotifier)
        }
    };

    let ledger = LedgerService::new(store, config.ledger.clone());
    let dispatcher = CommandDispatcher::new(ledger, gate, notifier, config.telegram.channel.clone());

    let jwt_service = JwtService::new(&config.jwt.secret, config.jwt.access_token_expires_in);

    // 启动HTTP服务器
    log::info!(
        "Starting HTTP server at {}:{}",
        config.server.host,
        config.server.port
    );

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(create_cors())
            .wrap(AuthMiddleware::new(jwt_service.clone()))
            .app_data(web::Data::new(dispatcher.clone()))
            .configure(swagger_config)
            .configure(handlers::health_config)
            .service(
                web::scope("/api/v1")
                    .configure(handlers::command_config)
                    .configure(handlers::ledger_config)
                    .configure(handlers::admin_config),
            )
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    Ok(())
}
