use crate::error::AppError;
use crate::middlewares::current_user;
use crate::models::*;
use crate::services::CouponService;
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};

#[utoipa::path(
    post,
    path = "/coupons",
    tag = "coupon",
    request_body = CreateCouponRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 201, description = "Coupon created", body = Coupon),
        (status = 400, description = "Invalid coupon definition"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Only admins and vendors can create coupons")
    )
)]
pub async fn create_coupon(
    coupon_service: web::Data<CouponService>,
    req: HttpRequest,
    request: web::Json<CreateCouponRequest>,
) -> Result<HttpResponse> {
    let user = match current_user(&req) {
        Ok(user) => user,
        Err(e) => return Ok(e.error_response()),
    };

    match coupon_service
        .create_coupon(&user, request.into_inner())
        .await
    {
        Ok(coupon) => Ok(HttpResponse::Created().json(ApiResponse::success(coupon))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/coupons",
    tag = "coupon",
    params(
        ("page" = Option<u32>, Query, description = "Page number"),
        ("per_page" = Option<u32>, Query, description = "Items per page"),
        ("vendor_id" = Option<String>, Query, description = "Filter by vendor (admins only)"),
        ("active_only" = Option<bool>, Query, description = "Only currently valid coupons")
    ),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Coupon list"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    )
)]
pub async fn list_coupons(
    coupon_service: web::Data<CouponService>,
    req: HttpRequest,
    query: web::Query<CouponQuery>,
) -> Result<HttpResponse> {
    let user = match current_user(&req) {
        Ok(user) => user,
        Err(e) => return Ok(e.error_response()),
    };

    match coupon_service.list_coupons(&user, &query).await {
        Ok(response) => Ok(HttpResponse::Ok().json(ApiResponse::success(response))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/coupons/{code}",
    tag = "coupon",
    params(
        ("code" = String, Path, description = "Coupon code")
    ),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Coupon found", body = Coupon),
        (status = 404, description = "Coupon not found")
    )
)]
pub async fn get_coupon(
    coupon_service: web::Data<CouponService>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    match coupon_service.get_coupon(&path).await {
        Ok(coupon) => Ok(HttpResponse::Ok().json(ApiResponse::success(coupon))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/coupons/{code}/usages",
    tag = "coupon",
    params(
        ("code" = String, Path, description = "Coupon code")
    ),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Usage ledger", body = [CouponUsage]),
        (status = 403, description = "Not the coupon owner"),
        (status = 404, description = "Coupon not found")
    )
)]
pub async fn list_usages(
    coupon_service: web::Data<CouponService>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let user = match current_user(&req) {
        Ok(user) => user,
        Err(e) => return Ok(e.error_response()),
    };

    match coupon_service.list_usages(&user, &path).await {
        Ok(usages) => Ok(HttpResponse::Ok().json(ApiResponse::success(usages))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/coupons/evaluate",
    tag = "coupon",
    request_body = EvaluateCouponRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Evaluation result (valid or with reason)", body = EvaluateCouponResponse),
        (status = 400, description = "Malformed request"),
        (status = 404, description = "Coupon not found")
    )
)]
pub async fn evaluate_coupon(
    coupon_service: web::Data<CouponService>,
    req: HttpRequest,
    request: web::Json<EvaluateCouponRequest>,
) -> Result<HttpResponse> {
    let user = match current_user(&req) {
        Ok(user) => user,
        Err(e) => return Ok(e.error_response()),
    };

    match coupon_service
        .evaluate_coupon(&request.code, &user.id, &request.booking)
        .await
    {
        Ok(response) => Ok(HttpResponse::Ok().json(ApiResponse::success(response))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    post,
    path = "/coupons/apply",
    tag = "coupon",
    request_body = ApplyCouponRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Coupon applied", body = CouponUsage),
        (status = 404, description = "Coupon not found"),
        (status = 409, description = "Usage limit reached"),
        (status = 422, description = "Coupon no longer valid")
    )
)]
pub async fn apply_coupon(
    coupon_service: web::Data<CouponService>,
    req: HttpRequest,
    request: web::Json<ApplyCouponRequest>,
) -> Result<HttpResponse> {
    let user = match current_user(&req) {
        Ok(user) => user,
        Err(e) => return Ok(e.error_response()),
    };

    match coupon_service
        .apply_coupon(
            &request.code,
            &user.id,
            &request.booking_id,
            request.discount_amount,
        )
        .await
    {
        Ok(usage) => Ok(HttpResponse::Ok().json(ApiResponse::success(usage))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn coupon_config(cfg: &mut web::ServiceConfig) {
    // 请求体、查询参数、路径解析失败都走统一的 ValidationError 外壳
    cfg.service(
        web::scope("/coupons")
            .app_data(web::JsonConfig::default().error_handler(|err, _| {
                AppError::ValidationError(err.to_string()).into()
            }))
            .app_data(web::QueryConfig::default().error_handler(|err, _| {
                AppError::ValidationError(err.to_string()).into()
            }))
            .app_data(web::PathConfig::default().error_handler(|err, _| {
                AppError::ValidationError(err.to_string()).into()
            }))
            .route("", web::post().to(create_coupon))
            .route("", web::get().to(list_coupons))
            .route("/evaluate", web::post().to(evaluate_coupon))
            .route("/apply", web::post().to(apply_coupon))
            .route("/{code}", web::get().to(get_coupon))
            .route("/{code}/usages", web::get().to(list_usages)),
    );
}
