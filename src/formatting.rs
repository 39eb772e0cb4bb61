// Presentation helpers (pt-BR) shared by listings and the dashboard.

use chrono::{Datelike, NaiveDate, NaiveTime};

const WEEKDAYS: [&str; 7] = [
    "Domingo", "Segunda", "Terça", "Quarta", "Quinta", "Sexta", "Sábado",
];

/// 0 = Sunday .. 6 = Saturday.
pub fn weekday_name(day: i16) -> Option<&'static str> {
    usize::try_from(day).ok().and_then(|d| WEEKDAYS.get(d).copied())
}

pub fn weekday_range_label(from: i16, to: i16) -> String {
    match (weekday_name(from), weekday_name(to)) {
        (Some(f), Some(_)) if from == to => f.to_string(),
        (Some(f), Some(t)) => format!("{f} a {t}"),
        _ => "-".to_string(),
    }
}

pub fn availability_label(from_day: i16, to_day: i16, from: NaiveTime, to: NaiveTime) -> String {
    format!(
        "{}, {} - {}",
        weekday_range_label(from_day, to_day),
        format_time(from),
        format_time(to)
    )
}

pub fn format_time(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

/// Accepts `HH:MM` and `HH:MM:SS`.
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

/// Whole months between two dates, never negative.
fn months_between(from: NaiveDate, to: NaiveDate) -> i32 {
    let mut months = (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    if to.day() < from.day() {
        months -= 1;
    }
    months.max(0)
}

pub fn age_label(birth_date: NaiveDate, today: NaiveDate) -> String {
    let months = months_between(birth_date, today);
    let (years, rest) = (months / 12, months % 12);

    let plural = |n: i32, one: &str, many: &str| {
        if n == 1 {
            format!("1 {one}")
        } else {
            format!("{n} {many}")
        }
    };

    match (years, rest) {
        (0, 0) => "menos de 1 mês".to_string(),
        (0, m) => plural(m, "mês", "meses"),
        (y, 0) => plural(y, "ano", "anos"),
        (y, m) => format!("{} e {}", plural(y, "ano", "anos"), plural(m, "mês", "meses")),
    }
}

/// `123456` -> `R$ 1.234,56`
pub fn format_brl(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    let (units, frac) = (abs / 100, abs % 100);

    let digits = units.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    format!("{sign}R$ {grouped},{frac:02}")
}
