use crate::error::{AppError, AppResult};
use rand::Rng;
use regex::Regex;

const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// 去除首尾空白并转为大写，查询与入库都使用同一形式
pub fn normalize_coupon_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// 优惠码只允许 3-20 位大写字母和数字
pub fn validate_coupon_code(code: &str) -> AppResult<()> {
    let code_regex = Regex::new(r"^[A-Z0-9]{3,20}$")
        .map_err(|e| AppError::InternalError(format!("Invalid code pattern: {e}")))?;

    if !code_regex.is_match(code) {
        return Err(AppError::ValidationError(
            "Coupon code must be 3-20 letters or digits".to_string(),
        ));
    }

    Ok(())
}

/// 生成随机字母数字优惠码，唯一性由调用方检查
pub fn generate_coupon_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length.clamp(3, 20))
        .map(|_| CODE_CHARS[rng.gen_range(0..CODE_CHARS.len())] as char)
        .collect()
}
