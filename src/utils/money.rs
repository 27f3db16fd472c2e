/// 将最小货币单位格式化为展示金额，例如 `50000` -> `₹500.00`
pub fn format_currency(amount: i64, symbol: &str) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}{symbol}{}.{:02}", abs / 100, abs % 100)
}
