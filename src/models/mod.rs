pub mod auth;
pub mod common;
pub mod coupon;

pub use auth::*;
pub use common::*;
pub use coupon::*;
