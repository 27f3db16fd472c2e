use crate::error::{AppError, AppResult};
use regex::Regex;

/// 校验零填充的 24 小时制 `HH:MM`，保证字符串比较即时间比较
pub fn is_valid_clock_time(value: &str) -> AppResult<bool> {
    let time_regex = Regex::new(r"^([01]\d|2[0-3]):[0-5]\d$")
        .map_err(|e| AppError::InternalError(format!("Invalid time pattern: {e}")))?;

    Ok(time_regex.is_match(value))
}
