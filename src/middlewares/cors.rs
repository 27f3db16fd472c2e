use actix_cors::Cors;

/// 预约前端与商家后台共用同一套跨域规则
pub fn create_cors(allowed_origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_any_header()
        .max_age(3600);

    if allowed_origins.is_empty() {
        // 未配置时放开所有来源，仅用于本地开发
        cors.allow_any_origin()
    } else {
        allowed_origins
            .iter()
            .fold(cors, |cors, origin| cors.allowed_origin(origin))
    }
}
