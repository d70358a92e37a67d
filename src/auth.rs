//! Roles, permissions, API tokens and per-request tenant context.
//!
//! Tokens have the form `<profile_id>.<secret>`. Only the SHA-256 of the
//! secret is stored; presented secrets are compared in constant time.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::TenantDefaults;
use crate::db::{
    CabinetSettingsParams, CreateProfileParams, CreateTenantParams, Database, ProfileRecord, Role,
    TenantRecord, UpsertMembershipParams, slugify,
};
use crate::error::{AuthError, DatabaseError};

const SECRET_BYTES: usize = 32;

/// Capabilities checked by API handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Cabinet settings and members.
    ManageCabinet,
    /// Clients, matters and assignments.
    ManageClients,
    /// Own timesheet entries and expenses.
    RecordTime,
    /// Timesheet entries and expenses of other members.
    ViewAllTime,
    /// Drafts, issuing, payments, credit notes and purchases.
    ManageInvoices,
    Export,
    /// Documents, messages and todos.
    UseOffice,
}

impl Permission {
    pub const ALL: [Permission; 7] = [
        Self::ManageCabinet,
        Self::ManageClients,
        Self::RecordTime,
        Self::ViewAllTime,
        Self::ManageInvoices,
        Self::Export,
        Self::UseOffice,
    ];

    /// Verb phrase used in 403 messages.
    pub fn action(self) -> &'static str {
        match self {
            Self::ManageCabinet => "manage the cabinet",
            Self::ManageClients => "manage clients and matters",
            Self::RecordTime => "record time",
            Self::ViewAllTime => "view other members' time",
            Self::ManageInvoices => "manage invoices",
            Self::Export => "export data",
            Self::UseOffice => "use office tools",
        }
    }
}

impl Role {
    pub fn allows(self, permission: Permission) -> bool {
        use Permission::*;
        match self {
            Role::Admin => true,
            Role::Lawyer | Role::Assistant => {
                matches!(permission, ManageClients | RecordTime | UseOffice)
            }
            Role::Accountant => {
                matches!(permission, ViewAllTime | ManageInvoices | Export | UseOffice)
            }
        }
    }

    pub fn permissions(self) -> Vec<Permission> {
        Permission::ALL
            .into_iter()
            .filter(|p| self.allows(*p))
            .collect()
    }
}

/// Caller identity resolved for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub profile_id: Uuid,
    pub role: Role,
}

impl TenantContext {
    pub fn can(&self, permission: Permission) -> bool {
        self.role.allows(permission)
    }

    pub fn require(&self, permission: Permission) -> Result<(), AuthError> {
        if self.can(permission) {
            Ok(())
        } else {
            Err(AuthError::Forbidden {
                role: self.role.as_str(),
                action: permission.action(),
            })
        }
    }

    /// Members without `ViewAllTime` only see and touch their own rows.
    pub fn visible_profile(&self, requested: Option<Uuid>) -> Result<Option<Uuid>, AuthError> {
        if self.can(Permission::ViewAllTime) {
            return Ok(requested);
        }
        match requested {
            Some(id) if id != self.profile_id => Err(AuthError::Forbidden {
                role: self.role.as_str(),
                action: Permission::ViewAllTime.action(),
            }),
            _ => Ok(Some(self.profile_id)),
        }
    }
}

pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Split `<profile_id>.<secret>`.
pub fn parse_token(raw: &str) -> Result<(Uuid, &str), AuthError> {
    let (id, secret) = raw.trim().split_once('.').ok_or(AuthError::InvalidToken)?;
    let profile_id = Uuid::parse_str(id).map_err(|_| AuthError::InvalidToken)?;
    if secret.is_empty() {
        return Err(AuthError::InvalidToken);
    }
    Ok((profile_id, secret))
}

/// Extract the token from an `Authorization: Bearer ...` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    header
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)
}

/// Mint a new token for a profile, replacing any previous one.
pub async fn issue_token(db: &dyn Database, profile_id: Uuid) -> Result<String, AuthError> {
    let secret = generate_secret();
    if !db
        .set_profile_token_hash(profile_id, &hash_secret(&secret))
        .await?
    {
        return Err(AuthError::Database(DatabaseError::NotFound {
            entity: "profile".to_string(),
            id: profile_id.to_string(),
        }));
    }
    tracing::info!(%profile_id, "Issued API token");
    Ok(format!("{profile_id}.{secret}"))
}

/// Verify a presented token and return its profile id.
pub async fn authenticate(db: &dyn Database, token: &str) -> Result<Uuid, AuthError> {
    let (profile_id, secret) = parse_token(token)?;
    let Some(stored) = db.get_profile_token_hash(profile_id).await? else {
        tracing::warn!(%profile_id, "Token presented for profile without a token");
        return Err(AuthError::InvalidToken);
    };
    let presented = hash_secret(secret);
    if bool::from(presented.as_bytes().ct_eq(stored.as_bytes())) {
        Ok(profile_id)
    } else {
        tracing::warn!(%profile_id, "Invalid API token presented");
        Err(AuthError::InvalidToken)
    }
}

/// Resolve the caller's role in a tenant; inactive members are refused.
pub async fn resolve_tenant(
    db: &dyn Database,
    profile_id: Uuid,
    tenant_id: Uuid,
) -> Result<TenantContext, AuthError> {
    match db.get_membership(tenant_id, profile_id).await? {
        Some(membership) if membership.active => Ok(TenantContext {
            tenant_id,
            profile_id,
            role: membership.role,
        }),
        _ => Err(AuthError::NotMember(tenant_id)),
    }
}

/// Result of [`bootstrap_tenant`].
#[derive(Debug, Clone)]
pub struct Bootstrapped {
    pub tenant: TenantRecord,
    pub admin: ProfileRecord,
    pub token: String,
}

/// Create a tenant with its first admin and mint the admin's token.
///
/// An existing profile with the same email is reused, so one person can
/// administer several cabinets.
pub async fn bootstrap_tenant(
    db: &dyn Database,
    name: &str,
    admin_email: &str,
    admin_name: Option<&str>,
    defaults: &TenantDefaults,
) -> Result<Bootstrapped, AuthError> {
    let email = admin_email.trim().to_lowercase();
    let slug = slugify(name);
    let tenant = db
        .create_tenant(
            &CreateTenantParams {
                name: name.trim().to_string(),
                slug,
            },
            &CabinetSettingsParams::from_defaults(name, defaults),
        )
        .await?;

    let admin = match db.get_profile_by_email(&email).await? {
        Some(profile) => profile,
        None => {
            let display_name = admin_name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
            db.create_profile(&CreateProfileParams {
                email: email.clone(),
                display_name,
            })
            .await?
        }
    };
    db.upsert_membership(
        tenant.id,
        admin.id,
        &UpsertMembershipParams {
            role: Role::Admin,
            hourly_rate: None,
            active: true,
        },
    )
    .await?;
    let token = issue_token(db, admin.id).await?;

    tracing::info!(
        tenant_id = %tenant.id,
        slug = %tenant.slug,
        admin = %admin.email,
        "Bootstrapped tenant"
    );
    crate::audit::record(
        "tenant_bootstrapped",
        serde_json::json!({ "tenant_id": tenant.id, "admin": admin.id }),
    );
    Ok(Bootstrapped {
        tenant,
        admin,
        token,
    })
}
