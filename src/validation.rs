// Form validation shared by the write endpoints. Every check records a
// field error instead of returning early so the caller sees all of them.

use chrono::{NaiveDate, NaiveTime};

use crate::error::{ApiError, FieldError};
use crate::formatting::parse_time;

#[derive(Debug, Default)]
pub struct FieldErrors {
    errors: Vec<FieldError>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    /// Trimmed, non-empty text. Returns the trimmed value.
    pub fn required(&mut self, field: &'static str, value: &str) -> String {
        let v = value.trim();
        if v.is_empty() {
            self.push(field, format!("{field} is required"));
        }
        v.to_string()
    }

    pub fn max_len(&mut self, field: &'static str, value: &str, max: usize) {
        if value.chars().count() > max {
            self.push(field, format!("{field} is too long (max {max})"));
        }
    }

    pub fn email(&mut self, field: &'static str, value: &str) -> String {
        let v = self.required(field, value).to_lowercase();
        if !v.is_empty() && !is_email(&v) {
            self.push(field, "invalid e-mail address");
        }
        v
    }

    /// Returns the CPF as 11 bare digits.
    pub fn cpf(&mut self, field: &'static str, value: &str) -> String {
        let digits = only_digits(value);
        if !is_valid_cpf(&digits) {
            self.push(field, "invalid CPF");
        }
        digits
    }

    pub fn phone(&mut self, field: &'static str, value: &str) -> String {
        let digits = only_digits(value);
        if !(10..=11).contains(&digits.len()) {
            self.push(field, "phone must have 10 or 11 digits");
        }
        digits
    }

    pub fn postal_code(&mut self, field: &'static str, value: &str) -> String {
        let digits = only_digits(value);
        if digits.len() != 8 {
            self.push(field, "postal code must have 8 digits");
        }
        digits
    }

    pub fn state_code(&mut self, field: &'static str, value: &str) -> String {
        let v = value.trim().to_ascii_uppercase();
        if v.len() != 2 || !v.chars().all(|c| c.is_ascii_alphabetic()) {
            self.push(field, "state must be a 2-letter code");
        }
        v
    }

    pub fn week_day(&mut self, field: &'static str, value: i16) {
        if !(0..=6).contains(&value) {
            self.push(field, "week day must be between 0 and 6");
        }
    }

    pub fn time(&mut self, field: &'static str, value: &str) -> Option<NaiveTime> {
        let t = parse_time(value);
        if t.is_none() {
            self.push(field, "time must be HH:MM");
        }
        t
    }

    pub fn time_window(&mut self, from: Option<NaiveTime>, to: Option<NaiveTime>) {
        if let (Some(f), Some(t)) = (from, to) {
            if f >= t {
                self.push("to_time", "end time must be after start time");
            }
        }
    }

    pub fn non_negative(&mut self, field: &'static str, value: i64) {
        if value < 0 {
            self.push(field, format!("{field} must not be negative"));
        }
    }

    pub fn positive(&mut self, field: &'static str, value: f64) {
        if !(value.is_finite() && value > 0.0) {
            self.push(field, format!("{field} must be greater than zero"));
        }
    }

    pub fn not_in_future(&mut self, field: &'static str, value: NaiveDate, today: NaiveDate) {
        if value > today {
            self.push(field, format!("{field} cannot be in the future"));
        }
    }

    pub fn finish(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self.errors))
        }
    }
}

pub fn only_digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

pub fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !s.chars().any(char::is_whitespace)
}

/// CPF check-digit validation over 11 bare digits.
pub fn is_valid_cpf(digits: &str) -> bool {
    let d: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();
    if d.len() != 11 || digits.len() != 11 {
        return false;
    }
    if d.iter().all(|&x| x == d[0]) {
        return false;
    }

    let check = |len: usize| -> u32 {
        let sum: u32 = d[..len]
            .iter()
            .enumerate()
            .map(|(i, &x)| x * (len as u32 + 1 - i as u32))
            .sum();
        let r = (sum * 10) % 11;
        if r == 10 { 0 } else { r }
    };

    check(9) == d[9] && check(10) == d[10]
}
