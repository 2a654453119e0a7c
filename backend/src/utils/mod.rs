pub mod jwt;
pub mod timeout;

pub use jwt::*;
pub use timeout::*;
