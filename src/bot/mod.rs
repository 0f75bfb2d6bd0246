pub mod command;
pub mod dispatcher;
pub mod replies;

pub use command::{Command, ParseError};
pub use dispatcher::{CommandDispatcher, Inbound, SessionMode};
