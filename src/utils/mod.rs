pub mod code_generator;
pub mod jwt;

pub use code_generator::generate_redeem_code;
pub use jwt::*;
