//! Route handlers, grouped by area.

pub mod cabinet;
pub mod exports;
pub mod invoices;
pub mod office;
pub mod practice;
pub mod time;

use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use crate::auth::TenantContext;
use crate::db::{CabinetSettingsRecord, Database};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex")
});

static PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9_-]{0,15}$").expect("valid prefix regex"));

static CURRENCY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}$").expect("valid currency regex"));

/// Trimmed, non-empty text.
pub(crate) fn required_text(field: &str, value: &str) -> ApiResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Blank strings are treated as absent.
pub(crate) fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// PATCH semantics: absent stays absent, blank or `null` clears.
pub(crate) fn nullable_text(value: Option<Option<String>>) -> Option<Option<String>> {
    value.map(optional_text)
}

pub(crate) fn check_email(value: &str) -> ApiResult<()> {
    if EMAIL_RE.is_match(value.trim()) {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!("invalid email '{value}'")))
    }
}

pub(crate) fn check_prefix(field: &str, value: &str) -> ApiResult<()> {
    if PREFIX_RE.is_match(value) {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "{field} must be 1-16 uppercase letters, digits, '-' or '_'"
        )))
    }
}

pub(crate) fn check_currency(value: &str) -> ApiResult<()> {
    if CURRENCY_RE.is_match(value) {
        Ok(())
    } else {
        Err(ApiError::bad_request(
            "currency must be a three-letter ISO code",
        ))
    }
}

/// Money amounts are non-negative with at most two decimals; `strict`
/// additionally rejects zero.
pub(crate) fn check_money(field: &str, value: Decimal, strict: bool) -> ApiResult<()> {
    if value.round_dp(2) != value {
        return Err(ApiError::bad_request(format!(
            "{field} must have at most 2 decimals"
        )));
    }
    if value < Decimal::ZERO || (strict && value.is_zero()) {
        let bound = if strict { "greater than 0" } else { "0 or more" };
        return Err(ApiError::bad_request(format!("{field} must be {bound}")));
    }
    Ok(())
}

pub(crate) fn check_optional_money(field: &str, value: Option<Decimal>) -> ApiResult<()> {
    value.map_or(Ok(()), |v| check_money(field, v, false))
}

/// VAT rates are percentages between 0 and 100.
pub(crate) fn check_vat_rate(value: Decimal) -> ApiResult<()> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(ApiError::bad_request("vat_rate must be between 0 and 100"));
    }
    Ok(())
}

pub(crate) async fn cabinet_settings(
    db: &dyn Database,
    tenant_id: Uuid,
) -> ApiResult<CabinetSettingsRecord> {
    db.get_cabinet_settings(tenant_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Cabinet settings"))
}

/// The profile must be an active member of the caller's tenant.
pub(crate) async fn require_active_member(
    db: &dyn Database,
    ctx: &TenantContext,
    profile_id: Uuid,
    what: &str,
) -> ApiResult<()> {
    match db.get_membership(ctx.tenant_id, profile_id).await? {
        Some(member) if member.active => Ok(()),
        _ => Err(ApiError::bad_request(format!(
            "{what} is not an active member of this cabinet"
        ))),
    }
}
