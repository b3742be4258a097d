use std::str::FromStr;

use validator::ValidateEmail;

use crate::{
    app_error::{AppError, AppResult},
    domain::entities::plan::{BillingDuration, PlanCode},
};

/// Validates that the input looks like a valid email address
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    !email.is_empty() && email.validate_email()
}

/// Usage descriptions are stored verbatim on the credit ledger.
pub fn is_valid_description(description: &str) -> bool {
    let trimmed = description.trim();
    !trimmed.is_empty() && trimmed.len() <= 200 && !trimmed.chars().any(char::is_control)
}

/// Plan ids arrive as free text from clients; unknown ones are a validation failure.
pub fn parse_plan(raw: &str) -> AppResult<PlanCode> {
    PlanCode::from_str(raw.trim())
        .map_err(|_| AppError::Validation(format!("unknown plan: {}", raw.trim())))
}

/// A missing duration means one month.
pub fn parse_duration(months: Option<u32>) -> AppResult<BillingDuration> {
    match months {
        None => Ok(BillingDuration::default()),
        Some(months) => BillingDuration::from_months(months).ok_or_else(|| {
            AppError::Validation(format!("unsupported billing duration: {months} months"))
        }),
    }
}
