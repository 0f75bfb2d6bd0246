pub mod membership;
pub mod notifier;
pub mod telegram;

pub use membership::*;
pub use notifier::*;
pub use telegram::*;
