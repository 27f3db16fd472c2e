use crate::models::{Coupon, CouponType};

/// 计算折扣金额(与 `booking_amount` 同为最小货币单位)，结果不为负且不超过预约金额
pub fn calculate_discount(coupon: &Coupon, booking_amount: i64) -> i64 {
    let amount = booking_amount.max(0);

    match coupon.coupon_type {
        CouponType::Percentage => {
            // 四舍五入(half-up)，i128 防止溢出
            let percent = i128::from(coupon.value.clamp(0, 100));
            let raw = (i128::from(amount) * percent + 50) / 100;
            let discount = i64::try_from(raw).unwrap_or(amount).min(amount);
            match coupon.maximum_discount {
                Some(cap) => discount.min(cap.max(0)),
                None => discount,
            }
        }
        CouponType::FixedAmount => coupon.value.max(0).min(amount),
        CouponType::FreeService => amount,
    }
}
