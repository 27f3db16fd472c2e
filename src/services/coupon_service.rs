use crate::config::CouponConfig;
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::rules::{self, IneligibleReason};
use crate::utils::{
    PaginatedResponse, PaginationParams, generate_coupon_code, normalize_coupon_code,
};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

const COUPON_COLUMNS: &str = r#"
    id, code, title, description, coupon_type, value,
    minimum_amount, maximum_discount, vendor_id,
    service_categories, service_ids,
    max_uses, max_uses_per_customer, current_uses,
    start_date, end_date, is_active,
    first_time_customers_only, minimum_rating, days_of_week, time_slots,
    created_by_id, created_by_role, created_at, updated_at
"#;

const USAGE_COLUMNS: &str = "id, coupon_id, customer_id, booking_id, used_at, discount_amount";

const CODE_GENERATION_ATTEMPTS: usize = 10;

#[derive(Clone)]
pub struct CouponService {
    pool: SqlitePool,
    currency_symbol: String,
    code_length: usize,
}

impl CouponService {
    pub fn new(pool: SqlitePool, config: &CouponConfig) -> Self {
        Self {
            pool,
            currency_symbol: config.currency_symbol.clone(),
            code_length: config.generated_code_length,
        }
    }

    pub async fn create_coupon(
        &self,
        creator: &AuthUser,
        request: CreateCouponRequest,
    ) -> AppResult<Coupon> {
        // 商家只能创建自己店铺的券，管理员可创建平台券或指定商家的券
        let vendor_id = match creator.role {
            Role::Customer => return Err(AppError::Forbidden),
            Role::Vendor => {
                if request
                    .vendor_id
                    .as_ref()
                    .is_some_and(|v| v.trim() != creator.id)
                {
                    return Err(AppError::Forbidden);
                }
                Some(creator.id.clone())
            }
            Role::Admin => request
                .vendor_id
                .as_ref()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        };

        request.validate()?;

        let code = match &request.code {
            Some(code) => normalize_coupon_code(code),
            None => self.generate_unique_code().await?,
        };

        let mut days_of_week = request.days_of_week.clone();
        days_of_week.sort_unstable();
        days_of_week.dedup();

        let now = Utc::now();
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO coupons (
                code, title, description, coupon_type, value,
                minimum_amount, maximum_discount, vendor_id,
                service_categories, service_ids,
                max_uses, max_uses_per_customer, current_uses,
                start_date, end_date, is_active,
                first_time_customers_only, minimum_rating, days_of_week, time_slots,
                created_by_id, created_by_role, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&code)
        .bind(request.title.trim())
        .bind(&request.description)
        .bind(request.coupon_type)
        .bind(request.value)
        .bind(request.minimum_amount)
        .bind(request.maximum_discount)
        .bind(&vendor_id)
        .bind(serde_json::to_string(&request.service_categories)?)
        .bind(serde_json::to_string(&request.service_ids)?)
        .bind(request.max_uses)
        .bind(request.max_uses_per_customer.unwrap_or(1))
        .bind(request.start_date)
        .bind(request.end_date)
        .bind(request.is_active.unwrap_or(true))
        .bind(request.first_time_customers_only)
        .bind(request.minimum_rating)
        .bind(serde_json::to_string(&days_of_week)?)
        .bind(serde_json::to_string(&request.time_slots)?)
        .bind(&creator.id)
        .bind(creator.role)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        let id = match inserted {
            Ok(id) => id,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(AppError::ValidationError(
                    "Coupon code already exists".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        log::info!(
            "Coupon {code} created by {} {} (vendor: {})",
            creator.role,
            creator.id,
            vendor_id.as_deref().unwrap_or("platform")
        );

        self.find_by_id(id).await
    }

    pub async fn get_coupon(&self, code: &str) -> AppResult<Coupon> {
        let code = normalize_coupon_code(code);
        if code.is_empty() {
            return Err(AppError::ValidationError(
                "Coupon code is required".to_string(),
            ));
        }

        let sql = format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE code = ?");
        let row = sqlx::query_as::<_, CouponRow>(&sql)
            .bind(&code)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Coupon not found".to_string()))?;

        Coupon::try_from(row)
    }

    pub async fn list_coupons(
        &self,
        viewer: &AuthUser,
        query: &CouponQuery,
    ) -> AppResult<PaginatedResponse<Coupon>> {
        let vendor_filter = match viewer.role {
            Role::Customer => return Err(AppError::Forbidden),
            Role::Vendor => {
                if query.vendor_id.as_ref().is_some_and(|v| *v != viewer.id) {
                    return Err(AppError::Forbidden);
                }
                Some(viewer.id.clone())
            }
            Role::Admin => query.vendor_id.clone(),
        };
        let active_at = query.active_only.unwrap_or(false).then(Utc::now);

        let params = PaginationParams::new(query.page, query.per_page);

        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM coupons");
        push_coupon_filters(&mut count_query, &vendor_filter, active_at);
        let total: i64 = count_query
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut list_query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {COUPON_COLUMNS} FROM coupons"));
        push_coupon_filters(&mut list_query, &vendor_filter, active_at);
        list_query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(params.get_limit())
            .push(" OFFSET ")
            .push_bind(params.get_offset());

        let rows = list_query
            .build_query_as::<CouponRow>()
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .into_iter()
            .map(Coupon::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PaginatedResponse::new(items, &params, total))
    }

    pub async fn list_usages(&self, viewer: &AuthUser, code: &str) -> AppResult<Vec<CouponUsage>> {
        let coupon = self.get_coupon(code).await?;
        if !viewer.can_manage_vendor(coupon.vendor_id.as_deref()) {
            return Err(AppError::Forbidden);
        }

        let sql = format!(
            "SELECT {USAGE_COLUMNS} FROM coupon_usages WHERE coupon_id = ? ORDER BY used_at, id"
        );
        let usages = sqlx::query_as::<_, CouponUsage>(&sql)
            .bind(coupon.id)
            .fetch_all(&self.pool)
            .await?;

        Ok(usages)
    }

    /// 预览：只读评估，不写入任何数据
    pub async fn evaluate_coupon(
        &self,
        code: &str,
        customer_id: &str,
        booking: &BookingContext,
    ) -> AppResult<EvaluateCouponResponse> {
        if customer_id.trim().is_empty() {
            return Err(AppError::ValidationError(
                "Customer id is required".to_string(),
            ));
        }
        if booking.total_price < 0 {
            return Err(AppError::ValidationError(
                "Booking amount cannot be negative".to_string(),
            ));
        }

        let coupon = self.get_coupon(code).await?;
        let customer_uses = self.customer_usage_count(coupon.id, customer_id).await?;

        let response = match rules::evaluate(
            &coupon,
            customer_uses,
            booking,
            Utc::now(),
            &self.currency_symbol,
        ) {
            Ok(()) => EvaluateCouponResponse {
                valid: true,
                reason: None,
                discount_amount: Some(rules::calculate_discount(&coupon, booking.total_price)),
            },
            Err(reason) => {
                log::debug!("Coupon {} ineligible for {customer_id}: {reason}", coupon.code);
                EvaluateCouponResponse {
                    valid: false,
                    reason: Some(reason.to_string()),
                    discount_amount: None,
                }
            }
        };

        Ok(response)
    }

    /// 记录一次使用。调用方须已通过评估；有效期和次数上限在同一条条件更新里原子检查。
    pub async fn apply_coupon(
        &self,
        code: &str,
        customer_id: &str,
        booking_id: &str,
        discount_amount: i64,
    ) -> AppResult<CouponUsage> {
        if customer_id.trim().is_empty() || booking_id.trim().is_empty() {
            return Err(AppError::ValidationError(
                "Customer id and booking id are required".to_string(),
            ));
        }
        if discount_amount < 0 {
            return Err(AppError::ValidationError(
                "Discount amount cannot be negative".to_string(),
            ));
        }

        let coupon = self.get_coupon(code).await?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        // 条件更新必须是事务的第一条语句：SQLite 在未持有读锁时会在写锁上排队重试
        let updated = sqlx::query(
            r#"
            UPDATE coupons
            SET current_uses = current_uses + 1, updated_at = ?
            WHERE id = ?
              AND is_active = 1
              AND start_date <= ?
              AND end_date >= ?
              AND (max_uses IS NULL OR current_uses < max_uses)
              AND (
                  SELECT COUNT(*) FROM coupon_usages
                  WHERE coupon_id = ? AND customer_id = ?
              ) < max_uses_per_customer
            "#,
        )
        .bind(now)
        .bind(coupon.id)
        .bind(now)
        .bind(now)
        .bind(coupon.id)
        .bind(customer_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let rejection = classify_rejection(&mut tx, coupon.id, customer_id, now).await?;
            tx.rollback().await?;
            log::warn!(
                "Coupon {} application rejected for {customer_id} (booking {booking_id}): {rejection}",
                coupon.code
            );
            return Err(rejection);
        }

        let sql = format!(
            r#"
            INSERT INTO coupon_usages (coupon_id, customer_id, booking_id, used_at, discount_amount)
            VALUES (?, ?, ?, ?, ?)
            RETURNING {USAGE_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, CouponUsage>(&sql)
            .bind(coupon.id)
            .bind(customer_id)
            .bind(booking_id)
            .bind(now)
            .bind(discount_amount)
            .fetch_one(&mut *tx)
            .await;

        let usage = match inserted {
            Ok(usage) => usage,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await?;
                return Err(AppError::ValidationError(
                    "Booking has already used this coupon".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;

        log::info!(
            "Coupon {} applied by {customer_id} to booking {booking_id}, discount {discount_amount}",
            coupon.code
        );

        Ok(usage)
    }

    pub async fn customer_usage_count(&self, coupon_id: i64, customer_id: &str) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM coupon_usages WHERE coupon_id = ? AND customer_id = ?",
        )
        .bind(coupon_id)
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn find_by_id(&self, id: i64) -> AppResult<Coupon> {
        let sql = format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE id = ?");
        let row = sqlx::query_as::<_, CouponRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Coupon not found".to_string()))?;

        Coupon::try_from(row)
    }

    async fn generate_unique_code(&self) -> AppResult<String> {
        for _ in 0..CODE_GENERATION_ATTEMPTS {
            let code = generate_coupon_code(self.code_length);

            let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM coupons WHERE code = ?")
                .bind(&code)
                .fetch_one(&self.pool)
                .await?;

            if exists == 0 {
                return Ok(code);
            }
        }

        Err(AppError::InternalError(
            "Failed to generate a unique coupon code".to_string(),
        ))
    }
}

fn push_coupon_filters(
    builder: &mut QueryBuilder<'_, Sqlite>,
    vendor_id: &Option<String>,
    active_at: Option<DateTime<Utc>>,
) {
    builder.push(" WHERE 1 = 1");
    if let Some(vendor_id) = vendor_id {
        builder.push(" AND vendor_id = ").push_bind(vendor_id.clone());
    }
    if let Some(now) = active_at {
        builder
            .push(" AND is_active = 1 AND start_date <= ")
            .push_bind(now)
            .push(" AND end_date >= ")
            .push_bind(now)
            .push(" AND (max_uses IS NULL OR current_uses < max_uses)");
    }
}

/// 条件更新未命中时判断原因：已失效、总次数用尽或个人次数用尽
async fn classify_rejection(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    coupon_id: i64,
    customer_id: &str,
    now: DateTime<Utc>,
) -> AppResult<AppError> {
    let (is_active, start_date, end_date, max_uses, current_uses, per_customer): (
        bool,
        DateTime<Utc>,
        DateTime<Utc>,
        Option<i64>,
        i64,
        i64,
    ) = sqlx::query_as(
        r#"
        SELECT is_active, start_date, end_date, max_uses, current_uses, max_uses_per_customer
        FROM coupons WHERE id = ?
        "#,
    )
    .bind(coupon_id)
    .fetch_one(&mut **tx)
    .await?;

    if !is_active || now < start_date || now > end_date {
        return Ok(IneligibleReason::NotCurrentlyValid.into());
    }
    if max_uses.is_some_and(|max| current_uses >= max) {
        return Ok(AppError::CapExceeded(
            "Coupon usage limit has been reached".to_string(),
        ));
    }

    let customer_uses: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM coupon_usages WHERE coupon_id = ? AND customer_id = ?",
    )
    .bind(coupon_id)
    .bind(customer_id)
    .fetch_one(&mut **tx)
    .await?;

    if customer_uses >= per_customer {
        Ok(AppError::CapExceeded(
            "Customer usage limit for this coupon has been reached".to_string(),
        ))
    } else {
        Err(AppError::InternalError(format!(
            "Conditional update on coupon {coupon_id} matched no row without a failing condition"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::database::{create_pool, run_migrations};
    use chrono::{Duration, FixedOffset, TimeZone};
    use futures_util::future::join_all;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, CouponService) {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("coupons.db").display()),
            max_connections: 5,
            busy_timeout_ms: 5_000,
        };
        let pool = create_pool(&config).await.unwrap();
        run_migrations(&pool).await.unwrap();
        (dir, CouponService::new(pool, &CouponConfig::default()))
    }

    fn admin() -> AuthUser {
        AuthUser {
            id: "admin-1".into(),
            role: Role::Admin,
        }
    }

    fn vendor(id: &str) -> AuthUser {
        AuthUser {
            id: id.into(),
            role: Role::Vendor,
        }
    }

    fn request(code: &str) -> CreateCouponRequest {
        let now = Utc::now();
        CreateCouponRequest {
            code: Some(code.into()),
            title: "Festive glow".into(),
            description: Some("20% off any hair service".into()),
            coupon_type: CouponType::Percentage,
            value: 20,
            minimum_amount: None,
            maximum_discount: Some(500),
            vendor_id: None,
            service_categories: vec![],
            service_ids: vec![],
            max_uses: None,
            max_uses_per_customer: None,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(30),
            is_active: None,
            first_time_customers_only: false,
            minimum_rating: None,
            days_of_week: vec![],
            time_slots: vec![],
        }
    }

    fn booking(vendor_id: &str, total_price: i64) -> BookingContext {
        let offset = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
        BookingContext {
            vendor_id: vendor_id.into(),
            service_id: "svc-1".into(),
            service_category: "hair".into(),
            total_price,
            // 星期二 10:00
            datetime: offset.with_ymd_and_hms(2026, 10, 20, 10, 0, 0).unwrap(),
            previous_bookings: 0,
            vendor_rating: None,
        }
    }

    async fn ledger_len(service: &CouponService, coupon_id: i64) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM coupon_usages WHERE coupon_id = ?")
            .bind(coupon_id)
            .fetch_one(&service.pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_coupon() {
        let (_dir, service) = setup().await;

        let mut req = request(" glow20 ");
        req.days_of_week = vec![5, 1, 1, 3];
        let created = service.create_coupon(&admin(), req).await.unwrap();
        assert_eq!(created.code, "GLOW20");
        assert_eq!(created.days_of_week, vec![1, 3, 5]);
        assert_eq!(created.max_uses_per_customer, 1);
        assert_eq!(created.current_uses, 0);
        assert!(created.is_active);
        assert_eq!(created.vendor_id, None);
        assert_eq!(created.created_by.role, Role::Admin);

        let fetched = service.get_coupon("glow20").await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_vendor_coupons_scoped_to_vendor() {
        let (_dir, service) = setup().await;

        let created = service
            .create_coupon(&vendor("vendor-7"), request("SALON7"))
            .await
            .unwrap();
        assert_eq!(created.vendor_id.as_deref(), Some("vendor-7"));

        let mut foreign = request("STEAL");
        foreign.vendor_id = Some("vendor-8".into());
        assert!(matches!(
            service.create_coupon(&vendor("vendor-7"), foreign).await,
            Err(AppError::Forbidden)
        ));

        let customer = AuthUser {
            id: "c-1".into(),
            role: Role::Customer,
        };
        assert!(matches!(
            service.create_coupon(&customer, request("NOPE")).await,
            Err(AppError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_invalid_dates_never_persisted() {
        let (_dir, service) = setup().await;

        let mut req = request("BADDATES");
        req.end_date = req.start_date;
        assert!(matches!(
            service.create_coupon(&admin(), req).await,
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            service.get_coupon("BADDATES").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_code_rejected() {
        let (_dir, service) = setup().await;

        service.create_coupon(&admin(), request("TWICE")).await.unwrap();
        match service.create_coupon(&admin(), request("twice")).await {
            Err(AppError::ValidationError(msg)) => assert_eq!(msg, "Coupon code already exists"),
            other => panic!("expected duplicate rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generated_code_when_omitted() {
        let (_dir, service) = setup().await;

        let mut req = request("IGNORED");
        req.code = None;
        let created = service.create_coupon(&admin(), req).await.unwrap();
        assert_eq!(created.code.len(), 8);
        assert!(created.code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn test_evaluate_is_read_only_and_idempotent() {
        let (_dir, service) = setup().await;
        let coupon = service
            .create_coupon(&admin(), request("PREVIEW"))
            .await
            .unwrap();

        let ctx = booking("vendor-1", 10_000);
        let first = service.evaluate_coupon("PREVIEW", "c-1", &ctx).await.unwrap();
        assert_eq!(
            first,
            EvaluateCouponResponse {
                valid: true,
                reason: None,
                discount_amount: Some(500),
            }
        );

        for _ in 0..3 {
            assert_eq!(
                service.evaluate_coupon("PREVIEW", "c-1", &ctx).await.unwrap(),
                first
            );
        }
        assert_eq!(service.get_coupon("PREVIEW").await.unwrap().current_uses, 0);
        assert_eq!(ledger_len(&service, coupon.id).await, 0);
    }

    #[tokio::test]
    async fn test_evaluate_reports_reason() {
        let (_dir, service) = setup().await;
        let mut req = request("MIN500");
        req.minimum_amount = Some(50_000);
        service.create_coupon(&admin(), req).await.unwrap();

        let result = service
            .evaluate_coupon("MIN500", "c-1", &booking("vendor-1", 10_000))
            .await
            .unwrap();
        assert!(!result.valid);
        assert_eq!(
            result.reason.as_deref(),
            Some("Minimum booking amount of ₹500.00 required")
        );
        assert_eq!(result.discount_amount, None);

        assert!(matches!(
            service
                .evaluate_coupon("MISSING", "c-1", &booking("vendor-1", 10_000))
                .await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_apply_records_usage_and_blocks_second_use() {
        let (_dir, service) = setup().await;
        let coupon = service
            .create_coupon(&admin(), request("ONCE"))
            .await
            .unwrap();

        let usage = service
            .apply_coupon("ONCE", "c-1", "booking-1", 500)
            .await
            .unwrap();
        assert_eq!(usage.coupon_id, coupon.id);
        assert_eq!(usage.customer_id, "c-1");
        assert_eq!(usage.booking_id, "booking-1");
        assert_eq!(usage.discount_amount, 500);

        let after = service.get_coupon("ONCE").await.unwrap();
        assert_eq!(after.current_uses, 1);
        assert_eq!(ledger_len(&service, coupon.id).await, after.current_uses);

        // 同一顾客再次评估：个人次数已用尽
        let second = service
            .evaluate_coupon("ONCE", "c-1", &booking("vendor-1", 10_000))
            .await
            .unwrap();
        assert!(!second.valid);
        assert_eq!(second.reason.as_deref(), Some("You have already used this coupon"));

        // 其他顾客仍可使用
        let other = service
            .evaluate_coupon("ONCE", "c-2", &booking("vendor-1", 10_000))
            .await
            .unwrap();
        assert!(other.valid);

        assert!(matches!(
            service.apply_coupon("ONCE", "c-1", "booking-2", 500).await,
            Err(AppError::CapExceeded(_))
        ));
        assert_eq!(service.get_coupon("ONCE").await.unwrap().current_uses, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_applications_respect_global_cap() {
        let (_dir, service) = setup().await;
        let mut req = request("LASTONE");
        req.max_uses = Some(1);
        let coupon = service.create_coupon(&admin(), req).await.unwrap();

        let attempts = (0..10).map(|i| {
            let service = service.clone();
            async move {
                service
                    .apply_coupon("LASTONE", &format!("c-{i}"), &format!("booking-{i}"), 500)
                    .await
            }
        });
        let results = join_all(attempts).await;

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let capped = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::CapExceeded(_))))
            .count();
        assert_eq!(succeeded, 1);
        assert_eq!(capped, 9);

        let after = service.get_coupon("LASTONE").await.unwrap();
        assert_eq!(after.current_uses, 1);
        assert_eq!(ledger_len(&service, coupon.id).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_double_submit_by_same_customer() {
        let (_dir, service) = setup().await;
        let coupon = service
            .create_coupon(&admin(), request("DOUBLE"))
            .await
            .unwrap();

        let attempts = (0..5).map(|i| {
            let service = service.clone();
            async move {
                service
                    .apply_coupon("DOUBLE", "c-1", &format!("booking-{i}"), 500)
                    .await
            }
        });
        let results = join_all(attempts).await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            match err {
                AppError::CapExceeded(msg) => {
                    assert_eq!(msg, "Customer usage limit for this coupon has been reached")
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
        assert_eq!(ledger_len(&service, coupon.id).await, 1);
        assert_eq!(service.get_coupon("DOUBLE").await.unwrap().current_uses, 1);
    }

    #[tokio::test]
    async fn test_apply_rejections() {
        let (_dir, service) = setup().await;

        assert!(matches!(
            service.apply_coupon("GHOST", "c-1", "b-1", 100).await,
            Err(AppError::NotFound(_))
        ));

        let mut inactive = request("PAUSED");
        inactive.is_active = Some(false);
        service.create_coupon(&admin(), inactive).await.unwrap();
        assert!(matches!(
            service.apply_coupon("PAUSED", "c-1", "b-1", 100).await,
            Err(AppError::Ineligible(IneligibleReason::NotCurrentlyValid))
        ));

        let mut multi = request("MULTI");
        multi.max_uses_per_customer = Some(3);
        service.create_coupon(&admin(), multi).await.unwrap();
        assert!(matches!(
            service.apply_coupon("MULTI", "c-1", "b-1", -1).await,
            Err(AppError::ValidationError(_))
        ));
        service.apply_coupon("MULTI", "c-1", "b-1", 100).await.unwrap();
        match service.apply_coupon("MULTI", "c-1", "b-1", 100).await {
            Err(AppError::ValidationError(msg)) => {
                assert_eq!(msg, "Booking has already used this coupon")
            }
            other => panic!("expected duplicate booking rejection, got {other:?}"),
        }
        // 被拒绝的写入不会留下计数
        assert_eq!(service.get_coupon("MULTI").await.unwrap().current_uses, 1);
    }

    #[tokio::test]
    async fn test_apply_rechecks_window_inside_update() {
        let (_dir, service) = setup().await;
        let coupon = service.create_coupon(&admin(), request("LAPSED")).await.unwrap();

        // 评估之后、写入之前券已过期
        sqlx::query("UPDATE coupons SET end_date = ? WHERE id = ?")
            .bind(Utc::now() - Duration::minutes(5))
            .bind(coupon.id)
            .execute(&service.pool)
            .await
            .unwrap();

        assert!(matches!(
            service.apply_coupon("LAPSED", "c-1", "b-1", 100).await,
            Err(AppError::Ineligible(IneligibleReason::NotCurrentlyValid))
        ));
        assert_eq!(ledger_len(&service, coupon.id).await, 0);
        assert_eq!(service.get_coupon("LAPSED").await.unwrap().current_uses, 0);
    }

    #[tokio::test]
    async fn test_apply_distinguishes_customer_cap_from_global_cap() {
        let (_dir, service) = setup().await;
        let mut req = request("PERSONAL");
        req.max_uses = Some(5);
        service.create_coupon(&admin(), req).await.unwrap();

        service.apply_coupon("PERSONAL", "c-1", "b-1", 100).await.unwrap();
        match service.apply_coupon("PERSONAL", "c-1", "b-2", 100).await {
            Err(AppError::CapExceeded(msg)) => {
                assert_eq!(msg, "Customer usage limit for this coupon has been reached")
            }
            other => panic!("expected per-customer cap, got {other:?}"),
        }
        // 其他顾客不受影响
        service.apply_coupon("PERSONAL", "c-2", "b-3", 100).await.unwrap();
        assert_eq!(service.get_coupon("PERSONAL").await.unwrap().current_uses, 2);
    }

    #[tokio::test]
    async fn test_list_coupons_filters() {
        let (_dir, service) = setup().await;

        service
            .create_coupon(&vendor("vendor-1"), request("V1A"))
            .await
            .unwrap();
        let mut expired = request("V1OLD");
        expired.start_date = Utc::now() - Duration::days(60);
        expired.end_date = Utc::now() - Duration::days(30);
        service
            .create_coupon(&vendor("vendor-1"), expired)
            .await
            .unwrap();
        service
            .create_coupon(&vendor("vendor-2"), request("V2A"))
            .await
            .unwrap();
        service.create_coupon(&admin(), request("PLATFORM")).await.unwrap();

        let query = CouponQuery {
            page: None,
            per_page: None,
            vendor_id: None,
            active_only: None,
        };
        let own = service.list_coupons(&vendor("vendor-1"), &query).await.unwrap();
        assert_eq!(own.pagination.total, 2);
        assert!(own.items.iter().all(|c| c.vendor_id.as_deref() == Some("vendor-1")));

        let active_query = CouponQuery {
            active_only: Some(true),
            ..query
        };
        let active = service
            .list_coupons(&vendor("vendor-1"), &active_query)
            .await
            .unwrap();
        assert_eq!(active.pagination.total, 1);
        assert_eq!(active.items[0].code, "V1A");

        let all = service
            .list_coupons(
                &admin(),
                &CouponQuery {
                    page: Some(1),
                    per_page: Some(3),
                    vendor_id: None,
                    active_only: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(all.pagination.total, 4);
        assert_eq!(all.items.len(), 3);
        assert_eq!(all.pagination.total_pages, 2);

        let snooping = CouponQuery {
            page: None,
            per_page: None,
            vendor_id: Some("vendor-2".into()),
            active_only: None,
        };
        assert!(matches!(
            service.list_coupons(&vendor("vendor-1"), &snooping).await,
            Err(AppError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_list_usages_permissions() {
        let (_dir, service) = setup().await;
        service
            .create_coupon(&vendor("vendor-1"), request("SHOP1"))
            .await
            .unwrap();
        service
            .apply_coupon("SHOP1", "c-1", "booking-1", 250)
            .await
            .unwrap();

        let usages = service
            .list_usages(&vendor("vendor-1"), "SHOP1")
            .await
            .unwrap();
        assert_eq!(usages.len(), 1);
        assert_eq!(usages[0].discount_amount, 250);

        assert_eq!(service.list_usages(&admin(), "SHOP1").await.unwrap().len(), 1);
        assert!(matches!(
            service.list_usages(&vendor("vendor-2"), "SHOP1").await,
            Err(AppError::Forbidden)
        ));
    }
}
