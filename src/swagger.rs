use actix_web::web;
use utoipa::OpenApi;
use utoipa::{
    Modify,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers;
use crate::models::*;
use crate::utils::PaginationInfo;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            )
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::coupon::create_coupon,
        handlers::coupon::list_coupons,
        handlers::coupon::get_coupon,
        handlers::coupon::list_usages,
        handlers::coupon::evaluate_coupon,
        handlers::coupon::apply_coupon,
    ),
    components(
        schemas(
            Role,
            Coupon,
            CouponType,
            TimeSlot,
            CreatedBy,
            CouponUsage,
            BookingContext,
            CreateCouponRequest,
            CouponQuery,
            EvaluateCouponRequest,
            EvaluateCouponResponse,
            ApplyCouponRequest,
            PaginationInfo,
            ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "coupon", description = "Coupon definition, evaluation and redemption API"),
    ),
    info(
        title = "Salon Coupons API",
        version = "1.0.0",
        description = "Coupon eligibility and discount engine for salon bookings"
    ),
    servers(
        (url = "/api/v1", description = "Local server")
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}
