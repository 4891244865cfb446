//! 参数占位符替换
//!
//! - 命名参数中的 `<%DT_YYYYMMDD%>` 按参考时间展开
//! - 任务参数中的 `<%NAME%>` 替换为任务流的命名参数值

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, FixedOffset, Timelike};

const TAG_OPEN: &str = "<%";
const TAG_CLOSE: &str = "%>";

/// 展开字符串中的日期占位符，其他占位符原样保留
pub fn substitute_date_tags(input: &str, reference: &DateTime<FixedOffset>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find(TAG_OPEN) {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + TAG_OPEN.len()..];
        let Some(close) = after_open.find(TAG_CLOSE) else {
            // 没有闭合标记
            out.push_str(&rest[open..]);
            return out;
        };

        let tag = after_open[..close].trim().to_uppercase();
        match tag.strip_prefix("DT_") {
            Some(format) => out.push_str(&format_date(format, reference)),
            None => out.push_str(&rest[open..open + TAG_OPEN.len() + close + TAG_CLOSE.len()]),
        }
        rest = &after_open[close + TAG_CLOSE.len()..];
    }
    out.push_str(rest);
    out
}

/// 按 YYYY/YY/MM/DD/HH/NN/SS 格式化，其余字符原样输出
pub fn format_date(format: &str, reference: &DateTime<FixedOffset>) -> String {
    let tokens: [(&str, String); 7] = [
        ("YYYY", format!("{:04}", reference.year())),
        ("YY", format!("{:02}", reference.year().rem_euclid(100))),
        ("MM", format!("{:02}", reference.month())),
        ("DD", format!("{:02}", reference.day())),
        ("HH", format!("{:02}", reference.hour())),
        ("NN", format!("{:02}", reference.minute())),
        ("SS", format!("{:02}", reference.second())),
    ];

    let mut out = String::with_capacity(format.len() + 8);
    let mut rest = format;
    'scan: while !rest.is_empty() {
        for (token, value) in &tokens {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(value);
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

/// 将任务参数中的 `<%NAME%>` 替换为命名参数
pub fn apply_named_args(arg: &str, named_args: &BTreeMap<String, String>) -> String {
    named_args
        .iter()
        .fold(arg.to_string(), |acc, (name, value)| {
            acc.replace(&format!("{TAG_OPEN}{name}{TAG_CLOSE}"), value)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-03-07T05:09:02+01:00").unwrap()
    }

    #[test]
    fn test_date_tokens() {
        assert_eq!(format_date("YYYYMMDD", &reference()), "20240307");
        assert_eq!(format_date("YY-MM-DD HH:NN:SS", &reference()), "24-03-07 05:09:02");
    }

    #[test]
    fn test_substitute_date_tags() {
        let value = substitute_date_tags("/data/<% dt_yyyymmdd %>/dump_<%DT_HHNN%>.sql", &reference());
        assert_eq!(value, "/data/20240307/dump_0509.sql");
    }

    #[test]
    fn test_non_date_tags_are_kept() {
        let value = substitute_date_tags("<%HOST%>/<%DT_YYYY%>", &reference());
        assert_eq!(value, "<%HOST%>/2024");

        let value = substitute_date_tags("open <%DT_YYYY", &reference());
        assert_eq!(value, "open <%DT_YYYY");
    }

    #[test]
    fn test_apply_named_args() {
        let mut named = BTreeMap::new();
        named.insert("DAY".to_string(), "20240307".to_string());
        named.insert("TARGET".to_string(), "db01".to_string());
        assert_eq!(
            apply_named_args("--host=<%TARGET%> --day=<%DAY%> <%OTHER%>", &named),
            "--host=db01 --day=20240307 <%OTHER%>"
        );
    }
}
