pub mod discount;
pub mod eligibility;

pub use discount::calculate_discount;
pub use eligibility::{
    IneligibleReason, applies_to_booking, can_customer_use, evaluate, is_currently_valid,
};
