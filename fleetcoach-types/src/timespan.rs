//! Telemetry platform TimeSpan values: `"D.HH:MM:SS[.fffffff]"` or `"HH:MM:SS[.fffffff]"`.

use chrono::Duration;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TimeSpan {
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl TimeSpan {
    /// Parse a TimeSpan string. Fractional seconds are dropped.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (days, clock) = match raw.split_once('.') {
            Some((d, rest)) if !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()) => {
                (d.parse().ok()?, rest)
            }
            _ => (0, raw),
        };

        let mut parts = clock.splitn(3, ':');
        let hours = parts.next()?.trim().parse().ok()?;
        let minutes = parts.next()?.trim().parse().ok()?;
        let seconds = parts.next()?.split('.').next()?.trim().parse().ok()?;

        Some(Self {
            days,
            hours,
            minutes,
            seconds,
        })
    }

    pub fn total(&self) -> Duration {
        Duration::seconds(
            i64::from(self.days) * 86_400
                + i64::from(self.hours) * 3_600
                + i64::from(self.minutes) * 60
                + i64::from(self.seconds),
        )
    }

    /// Spans of one or more full days come from monitoring-window rules.
    pub fn is_multi_day(&self) -> bool {
        self.days > 0
    }

    /// Human description used in coaching prompts.
    pub fn describe(&self) -> String {
        if self.days > 0 {
            let total_hours = self
                .days
                .checked_mul(24)
                .and_then(|h| h.checked_add(self.hours));
            return match total_hours {
                Some(h) if h <= 48 => format!("{h} hours {} minutes", self.minutes),
                _ => format!("monitoring period ({} days)", self.days),
            };
        }
        if self.hours > 0 {
            return format!(
                "{} hour{} {} minutes",
                self.hours,
                plural(self.hours),
                self.minutes
            );
        }
        if self.minutes > 0 {
            return format!(
                "{} minute{} {} seconds",
                self.minutes,
                plural(self.minutes),
                self.seconds
            );
        }
        format!("{} second{}", self.seconds, plural(self.seconds))
    }
}

fn plural(n: u32) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Describe an optional raw duration: absent is "brief", unparseable is echoed back.
pub fn format_duration(raw: Option<&str>) -> String {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => "brief".into(),
        Some(s) => TimeSpan::parse(s)
            .map(|span| span.describe())
            .unwrap_or_else(|| s.to_string()),
    }
}
