pub mod command;
pub mod common;
pub mod ledger;

pub use command::*;
pub use common::*;
pub use ledger::*;
