// ==========================================
// 字段解析: 标志位 / 日期时间
// ==========================================
// 空字符串一律视为未提供（None），解析失败返回 Err(原值)

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

const TRUTHY: [&str; 5] = ["1", "Y", "YES", "TRUE", "是"];
const FALSY: [&str; 5] = ["0", "N", "NO", "FALSE", "否"];

/// 解析标志位（大小写不敏感）
pub(super) fn parse_flag(raw: Option<&str>) -> Result<Option<bool>, String> {
    let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let upper = value.to_uppercase();
    if TRUTHY.contains(&upper.as_str()) {
        Ok(Some(true))
    } else if FALSY.contains(&upper.as_str()) {
        Ok(Some(false))
    } else {
        Err(value.to_string())
    }
}

/// 解析时间点
///
/// 支持: RFC 3339 / YYYY-MM-DD / YYYYMMDD / YYYYMMDDHHMMSS / YYYY-MM-DD HH:MM:SS
/// 不带时区的值按 UTC 处理，纯日期取当日 00:00:00
pub(super) fn parse_instant(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%d%H%M%S")
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y%m%d")
                .ok()
                .or_else(|| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| value.to_string())?;

    Ok(Some(Utc.from_utc_datetime(&naive)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        for v in ["1", "y", "Yes", "TRUE", "是"] {
            assert_eq!(parse_flag(Some(v)), Ok(Some(true)), "{}", v);
        }
        for v in ["0", "n", "no", "false", "否"] {
            assert_eq!(parse_flag(Some(v)), Ok(Some(false)), "{}", v);
        }
        assert_eq!(parse_flag(Some("  ")), Ok(None));
        assert_eq!(parse_flag(None), Ok(None));
        assert_eq!(parse_flag(Some("maybe")), Err("maybe".to_string()));
    }

    #[test]
    fn test_parse_instant_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap();
        for v in ["2025-01-15", "20250115", "20250115000000", "2025-01-15 00:00:00", "2025-01-15T08:00:00+08:00"] {
            assert_eq!(parse_instant(Some(v)), Ok(Some(expected)), "{}", v);
        }
        assert_eq!(parse_instant(Some("")), Ok(None));
        assert!(parse_instant(Some("15/01/2025")).is_err());
    }
}
