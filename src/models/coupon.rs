use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};
use crate::models::Role;
use crate::utils::{is_valid_clock_time, normalize_coupon_code, validate_coupon_code};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CouponType {
    Percentage,
    FixedAmount,
    FreeService,
}

impl std::fmt::Display for CouponType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CouponType::Percentage => write!(f, "percentage"),
            CouponType::FixedAmount => write!(f, "fixed_amount"),
            CouponType::FreeService => write!(f, "free_service"),
        }
    }
}

/// 可用时段，`HH:MM` 24 小时制，首尾均包含
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TimeSlot {
    #[schema(example = "09:00")]
    pub start: String,
    #[schema(example = "17:00")]
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CreatedBy {
    pub user_id: String,
    pub role: Role,
}

/// `coupons` 表的一行；列表类字段以 JSON 文本存储
#[derive(Debug, Clone, FromRow)]
pub struct CouponRow {
    pub id: i64,
    pub code: String,
    pub title: String,
    pub description: Option<String>,
    pub coupon_type: CouponType,
    pub value: i64,
    pub minimum_amount: Option<i64>,
    pub maximum_discount: Option<i64>,
    pub vendor_id: Option<String>,
    pub service_categories: String,
    pub service_ids: String,
    pub max_uses: Option<i64>,
    pub max_uses_per_customer: i64,
    pub current_uses: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub first_time_customers_only: bool,
    pub minimum_rating: Option<f64>,
    pub days_of_week: String,
    pub time_slots: String,
    pub created_by_id: String,
    pub created_by_role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Coupon {
    pub id: i64,
    pub code: String,
    pub title: String,
    pub description: Option<String>,
    pub coupon_type: CouponType,
    /// 百分比类型为 0-100，固定金额类型为最小货币单位
    pub value: i64,
    pub minimum_amount: Option<i64>,
    pub maximum_discount: Option<i64>,
    pub vendor_id: Option<String>,
    pub service_categories: Vec<String>,
    pub service_ids: Vec<String>,
    pub max_uses: Option<i64>,
    pub max_uses_per_customer: i64,
    pub current_uses: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub first_time_customers_only: bool,
    pub minimum_rating: Option<f64>,
    pub days_of_week: Vec<u8>,
    pub time_slots: Vec<TimeSlot>,
    pub created_by: CreatedBy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = AppError;

    fn try_from(row: CouponRow) -> AppResult<Self> {
        Ok(Self {
            id: row.id,
            code: row.code,
            title: row.title,
            description: row.description,
            coupon_type: row.coupon_type,
            value: row.value,
            minimum_amount: row.minimum_amount,
            maximum_discount: row.maximum_discount,
            vendor_id: row.vendor_id,
            service_categories: serde_json::from_str(&row.service_categories)?,
            service_ids: serde_json::from_str(&row.service_ids)?,
            max_uses: row.max_uses,
            max_uses_per_customer: row.max_uses_per_customer,
            current_uses: row.current_uses,
            start_date: row.start_date,
            end_date: row.end_date,
            is_active: row.is_active,
            first_time_customers_only: row.first_time_customers_only,
            minimum_rating: row.minimum_rating,
            days_of_week: serde_json::from_str(&row.days_of_week)?,
            time_slots: serde_json::from_str(&row.time_slots)?,
            created_by: CreatedBy {
                user_id: row.created_by_id,
                role: row.created_by_role,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// 使用记录（只追加）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct CouponUsage {
    pub id: i64,
    pub coupon_id: i64,
    pub customer_id: String,
    pub booking_id: String,
    pub used_at: DateTime<Utc>,
    pub discount_amount: i64,
}

/// 待评估预约的只读快照
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BookingContext {
    pub vendor_id: String,
    pub service_id: String,
    pub service_category: String,
    /// 预约总价(最小货币单位)
    pub total_price: i64,
    /// 预约时间，星期与时段按其自带时区计算
    #[schema(value_type = String, example = "2026-10-20T10:00:00+05:30")]
    pub datetime: DateTime<FixedOffset>,
    #[serde(default)]
    pub previous_bookings: u32,
    #[serde(default)]
    pub vendor_rating: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateCouponRequest {
    /// 不填则自动生成
    #[schema(example = "WELCOME20")]
    pub code: Option<String>,
    #[schema(example = "Welcome offer")]
    pub title: String,
    pub description: Option<String>,
    pub coupon_type: CouponType,
    pub value: i64,
    pub minimum_amount: Option<i64>,
    pub maximum_discount: Option<i64>,
    /// 商家创建时忽略，强制为商家本人
    pub vendor_id: Option<String>,
    #[serde(default)]
    pub service_categories: Vec<String>,
    #[serde(default)]
    pub service_ids: Vec<String>,
    pub max_uses: Option<i64>,
    pub max_uses_per_customer: Option<i64>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub first_time_customers_only: bool,
    pub minimum_rating: Option<f64>,
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    #[serde(default)]
    pub time_slots: Vec<TimeSlot>,
}

impl CreateCouponRequest {
    /// 入库前校验，任何一项失败都拒绝写入
    pub fn validate(&self) -> AppResult<()> {
        if let Some(code) = &self.code {
            validate_coupon_code(&normalize_coupon_code(code))?;
        }

        let title_len = self.title.trim().chars().count();
        if title_len == 0 || title_len > 100 {
            return Err(AppError::ValidationError(
                "Title must be between 1 and 100 characters".to_string(),
            ));
        }

        if self.value < 0 {
            return Err(AppError::ValidationError(
                "Coupon value cannot be negative".to_string(),
            ));
        }
        if self.coupon_type == CouponType::Percentage && self.value > 100 {
            return Err(AppError::ValidationError(
                "Percentage discount cannot exceed 100".to_string(),
            ));
        }
        if self.coupon_type == CouponType::FixedAmount && self.value == 0 {
            return Err(AppError::ValidationError(
                "Fixed amount discount must be greater than 0".to_string(),
            ));
        }

        if self.minimum_amount.is_some_and(|v| v < 0) {
            return Err(AppError::ValidationError(
                "Minimum amount cannot be negative".to_string(),
            ));
        }
        if self.maximum_discount.is_some_and(|v| v < 0) {
            return Err(AppError::ValidationError(
                "Maximum discount cannot be negative".to_string(),
            ));
        }

        if self.max_uses.is_some_and(|v| v < 1) {
            return Err(AppError::ValidationError(
                "Max uses must be at least 1".to_string(),
            ));
        }
        if self.max_uses_per_customer.is_some_and(|v| v < 1) {
            return Err(AppError::ValidationError(
                "Max uses per customer must be at least 1".to_string(),
            ));
        }

        if self.end_date <= self.start_date {
            return Err(AppError::ValidationError(
                "End date must be after start date".to_string(),
            ));
        }

        if self.days_of_week.iter().any(|d| *d > 6) {
            return Err(AppError::ValidationError(
                "Days of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }

        for slot in &self.time_slots {
            if !is_valid_clock_time(&slot.start)? || !is_valid_clock_time(&slot.end)? {
                return Err(AppError::ValidationError(
                    "Time slots must use HH:MM format".to_string(),
                ));
            }
            if slot.start > slot.end {
                return Err(AppError::ValidationError(
                    "Time slot start must not be after its end".to_string(),
                ));
            }
        }

        if self
            .minimum_rating
            .is_some_and(|rating| !(0.0..=5.0).contains(&rating))
        {
            return Err(AppError::ValidationError(
                "Minimum rating must be between 0 and 5".to_string(),
            ));
        }

        if self
            .service_categories
            .iter()
            .chain(self.service_ids.iter())
            .any(|s| s.trim().is_empty())
        {
            return Err(AppError::ValidationError(
                "Service scopes cannot contain empty values".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CouponQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub vendor_id: Option<String>,
    /// 只返回当前可用的优惠券
    pub active_only: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EvaluateCouponRequest {
    #[schema(example = "WELCOME20")]
    pub code: String,
    pub booking: BookingContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EvaluateCouponResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApplyCouponRequest {
    #[schema(example = "WELCOME20")]
    pub code: String,
    pub booking_id: String,
    /// 由评估接口得到的折扣金额(最小货币单位)
    pub discount_amount: i64,
}
