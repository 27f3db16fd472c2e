pub mod clock_time;
pub mod coupon_code;
pub mod jwt;
pub mod money;
pub mod pagination;

pub use clock_time::is_valid_clock_time;
pub use coupon_code::{generate_coupon_code, normalize_coupon_code, validate_coupon_code};
pub use jwt::*;
pub use money::format_currency;
pub use pagination::*;
