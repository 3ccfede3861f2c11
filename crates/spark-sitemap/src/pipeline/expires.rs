//! Expires 策略的迷你语言。
//!
//! 语法：`<base> [plus] <N> <unit> [[plus] <N> <unit> ...]`
//!
//! - `<base>`：`now` 或 `access`；`modification` 被接受但按 `now` 处理并告警；
//! - `<unit>`：`years`、`months`、`weeks`、`days`、`hours`、`minutes`、`seconds`，
//!   按固定宽度换算（年 = 365 天，月 = 30 天），不做日历运算；
//! - 关键字区分大小写，单位必须是复数形式。
//!
//! 任何非法记号都只会导致“不设置 Expires 头”，不会向调用方抛错。

use tracing::warn;

const SECOND: u64 = 1_000;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// 策略的时间基准。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpiresBase {
    Now,
    Access,
}

/// 已解析的 Expires 策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpiresPolicy {
    base: ExpiresBase,
    millis: u64,
}

impl ExpiresPolicy {
    /// 解析策略字符串；非法输入返回 `None` 并记录告警。
    pub fn parse(text: &str) -> Option<Self> {
        let mut tokens = text.split_whitespace();
        let base = match tokens.next() {
            Some("now") => ExpiresBase::Now,
            Some("access") => ExpiresBase::Access,
            Some("modification") => {
                warn!(expires = text, "`modification` base is not supported, using `now`");
                ExpiresBase::Now
            }
            _ => {
                warn!(expires = text, "unrecognised expires base, no Expires header will be set");
                return None;
            }
        };

        let mut millis: u64 = 0;
        let mut terms = 0usize;
        while let Some(mut token) = tokens.next() {
            if token == "plus" {
                let Some(next) = tokens.next() else {
                    warn!(expires = text, "dangling `plus` in expires value");
                    return None;
                };
                token = next;
            }
            let Ok(count) = token.parse::<u64>() else {
                warn!(expires = text, token, "malformed number in expires value");
                return None;
            };
            let Some(unit) = tokens.next().and_then(unit_millis) else {
                warn!(expires = text, "missing or unknown unit in expires value");
                return None;
            };
            let Some(total) = count
                .checked_mul(unit)
                .and_then(|term| millis.checked_add(term))
            else {
                warn!(expires = text, "expires value overflows");
                return None;
            };
            millis = total;
            terms += 1;
        }

        if terms == 0 {
            warn!(expires = text, "expires value has no duration");
            return None;
        }
        Some(Self { base, millis })
    }

    pub fn base(&self) -> ExpiresBase {
        self.base
    }

    /// 相对基准的偏移（毫秒）。
    pub fn millis(&self) -> u64 {
        self.millis
    }

    /// 以 `now`（纪元毫秒）为基准的绝对过期时间。
    pub fn expires_at(&self, now: u64) -> u64 {
        now.saturating_add(self.millis)
    }

    /// `Cache-Control: max-age` 使用的秒数。
    pub fn max_age_secs(&self) -> u64 {
        self.millis / SECOND
    }
}

fn unit_millis(unit: &str) -> Option<u64> {
    Some(match unit {
        "years" => 365 * DAY,
        "months" => 30 * DAY,
        "weeks" => 7 * DAY,
        "days" => DAY,
        "hours" => HOUR,
        "minutes" => MINUTE,
        "seconds" => SECOND,
        _ => return None,
    })
}
