pub mod admin;
pub mod command;
pub mod health;
pub mod ledger;

pub use admin::admin_config;
pub use command::command_config;
pub use health::health_config;
pub use ledger::ledger_config;
