pub mod coupon;

pub use coupon::coupon_config;
