//! Coupon eligibility checks.
//!
//! All functions are pure: the caller supplies the coupon, the customer's
//! ledger count, the booking snapshot and the clock. Checks run in a fixed
//! order and stop at the first failure so the reason shown to a customer is
//! deterministic.

use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;

use crate::models::{BookingContext, Coupon};
use crate::utils::format_currency;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IneligibleReason {
    #[error("Coupon is not valid or has expired")]
    NotCurrentlyValid,

    #[error("You have already used this coupon")]
    AlreadyUsed,

    #[error("Coupon not valid for this vendor")]
    WrongVendor,

    #[error("Coupon not valid for this service category")]
    WrongCategory,

    #[error("Coupon not valid for this service")]
    WrongService,

    #[error("Minimum booking amount of {0} required")]
    BelowMinimum(String),

    #[error("Coupon not valid for this day")]
    WrongDay,

    #[error("Coupon not valid for this time")]
    WrongTime,

    #[error("Coupon is only valid for first-time customers")]
    NotFirstTimeCustomer,

    #[error("Coupon requires a minimum vendor rating of {0:.1}")]
    RatingTooLow(f64),
}

/// 启用、处于有效期内、且未达到总使用次数上限
pub fn is_currently_valid(coupon: &Coupon, now: DateTime<Utc>) -> bool {
    coupon.is_active
        && coupon.start_date <= now
        && now <= coupon.end_date
        && coupon.max_uses.is_none_or(|max| coupon.current_uses < max)
}

/// `customer_uses` 为该顾客在使用记录中的条数
pub fn can_customer_use(coupon: &Coupon, customer_uses: i64) -> bool {
    customer_uses < coupon.max_uses_per_customer
}

/// 范围与条件限制（商家、分类、服务、金额、星期、时段、新客、评分）
pub fn applies_to_booking(
    coupon: &Coupon,
    booking: &BookingContext,
    currency_symbol: &str,
) -> Result<(), IneligibleReason> {
    if coupon
        .vendor_id
        .as_ref()
        .is_some_and(|vendor_id| *vendor_id != booking.vendor_id)
    {
        return Err(IneligibleReason::WrongVendor);
    }

    if !coupon.service_categories.is_empty()
        && !coupon.service_categories.contains(&booking.service_category)
    {
        return Err(IneligibleReason::WrongCategory);
    }

    if !coupon.service_ids.is_empty() && !coupon.service_ids.contains(&booking.service_id) {
        return Err(IneligibleReason::WrongService);
    }

    if let Some(minimum) = coupon
        .minimum_amount
        .filter(|minimum| booking.total_price < *minimum)
    {
        return Err(IneligibleReason::BelowMinimum(format_currency(
            minimum,
            currency_symbol,
        )));
    }

    if !coupon.days_of_week.is_empty() {
        let weekday = booking.datetime.weekday().num_days_from_sunday() as u8;
        if !coupon.days_of_week.contains(&weekday) {
            return Err(IneligibleReason::WrongDay);
        }
    }

    if !coupon.time_slots.is_empty() {
        // HH:MM 零填充，字符串比较等价于时间比较
        let booking_time = booking.datetime.format("%H:%M").to_string();
        let in_slot = coupon.time_slots.iter().any(|slot| {
            slot.start.as_str() <= booking_time.as_str()
                && booking_time.as_str() <= slot.end.as_str()
        });
        if !in_slot {
            return Err(IneligibleReason::WrongTime);
        }
    }

    if coupon.first_time_customers_only && booking.previous_bookings > 0 {
        return Err(IneligibleReason::NotFirstTimeCustomer);
    }

    if let Some(minimum_rating) = coupon.minimum_rating {
        let meets = booking
            .vendor_rating
            .is_some_and(|rating| rating >= minimum_rating);
        if !meets {
            return Err(IneligibleReason::RatingTooLow(minimum_rating));
        }
    }

    Ok(())
}

/// 完整评估：有效性 -> 顾客次数 -> 预约限制
pub fn evaluate(
    coupon: &Coupon,
    customer_uses: i64,
    booking: &BookingContext,
    now: DateTime<Utc>,
    currency_symbol: &str,
) -> Result<(), IneligibleReason> {
    if !is_currently_valid(coupon, now) {
        return Err(IneligibleReason::NotCurrentlyValid);
    }
    if !can_customer_use(coupon, customer_uses) {
        return Err(IneligibleReason::AlreadyUsed);
    }
    applies_to_booking(coupon, booking, currency_symbol)
}
