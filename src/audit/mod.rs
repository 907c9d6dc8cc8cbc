//! Append-only audit trail.
//!
//! Every guarded operation produces exactly one `AuditEntry`. The recorder
//! mirrors it to the `audit` tracing target and hands it to the configured
//! sink; sink failures are logged and swallowed.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::store::StoreError;

/// Resource id used when one operation touches many rows
pub const MULTIPLE_RESOURCES: &str = "multiple";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "auth.login")]
    Login,
    #[serde(rename = "auth.logout")]
    Logout,
    #[serde(rename = "auth.token_refresh")]
    TokenRefresh,
    #[serde(rename = "auth.login_failed")]
    LoginFailed,

    #[serde(rename = "user.create")]
    UserCreate,
    #[serde(rename = "user.update")]
    UserUpdate,
    #[serde(rename = "user.role_change")]
    UserRoleChange,

    #[serde(rename = "node.create")]
    NodeCreate,
    #[serde(rename = "node.update")]
    NodeUpdate,
    #[serde(rename = "node.delete")]
    NodeDelete,

    #[serde(rename = "block.create")]
    BlockCreate,
    #[serde(rename = "block.update")]
    BlockUpdate,
    #[serde(rename = "block.delete")]
    BlockDelete,
    #[serde(rename = "block.reorder")]
    BlockReorder,

    #[serde(rename = "theme.create")]
    ThemeCreate,
    #[serde(rename = "theme.update")]
    ThemeUpdate,
    #[serde(rename = "theme.delete")]
    ThemeDelete,

    #[serde(rename = "security.violation")]
    SecurityViolation,
    #[serde(rename = "security.rate_limit_exceeded")]
    RateLimitExceeded,
    #[serde(rename = "security.unauthorized_access")]
    UnauthorizedAccess,

    #[serde(rename = "read")]
    Read,
    #[serde(rename = "search")]
    Search,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Login => "auth.login",
            AuditAction::Logout => "auth.logout",
            AuditAction::TokenRefresh => "auth.token_refresh",
            AuditAction::LoginFailed => "auth.login_failed",
            AuditAction::UserCreate => "user.create",
            AuditAction::UserUpdate => "user.update",
            AuditAction::UserRoleChange => "user.role_change",
            AuditAction::NodeCreate => "node.create",
            AuditAction::NodeUpdate => "node.update",
            AuditAction::NodeDelete => "node.delete",
            AuditAction::BlockCreate => "block.create",
            AuditAction::BlockUpdate => "block.update",
            AuditAction::BlockDelete => "block.delete",
            AuditAction::BlockReorder => "block.reorder",
            AuditAction::ThemeCreate => "theme.create",
            AuditAction::ThemeUpdate => "theme.update",
            AuditAction::ThemeDelete => "theme.delete",
            AuditAction::SecurityViolation => "security.violation",
            AuditAction::RateLimitExceeded => "security.rate_limit_exceeded",
            AuditAction::UnauthorizedAccess => "security.unauthorized_access",
            AuditAction::Read => "read",
            AuditAction::Search => "search",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Info => "info",
            AuditLevel::Warning => "warning",
            AuditLevel::Error => "error",
            AuditLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub user_id: Option<Uuid>,
    pub user_email: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub details: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub level: AuditLevel,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            user_id: None,
            user_email: None,
            resource_type: None,
            resource_id: None,
            details: None,
            ip_address: None,
            user_agent: None,
            level: AuditLevel::Info,
            success: true,
            timestamp: Utc::now(),
        }
    }

    /// Authentication outcome. Failures are raised to warning level.
    pub fn auth_event(
        action: AuditAction,
        user_id: Option<Uuid>,
        email: Option<String>,
        success: bool,
        details: Option<Value>,
    ) -> Self {
        let mut entry = Self::new(action).resource("auth", None);
        entry.user_id = user_id;
        entry.user_email = email;
        entry.details = details;
        if !success {
            entry = entry.failed(AuditLevel::Warning);
        }
        entry
    }

    /// Security event; always recorded as unsuccessful.
    pub fn security_event(action: AuditAction, details: Value) -> Self {
        Self::new(action)
            .resource("security", None)
            .details(details)
            .failed(AuditLevel::Warning)
    }

    pub fn actor(mut self, user: &AuthenticatedUser) -> Self {
        self.user_id = Some(user.id);
        self.user_email = user.email.clone();
        self
    }

    pub fn resource(mut self, resource_type: &str, resource_id: Option<String>) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self.resource_id = resource_id;
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn client(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub fn failed(mut self, level: AuditLevel) -> Self {
        self.success = false;
        self.level = level;
        self
    }
}

/// Destination for audit entries
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError>;
}

/// Records audit entries. Never fails.
#[derive(Clone)]
pub struct AuditRecorder {
    sink: Option<Arc<dyn AuditSink>>,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// Log-only recorder, used when persistence is disabled
    pub fn log_only() -> Self {
        Self { sink: None }
    }

    pub async fn record(&self, entry: AuditEntry) {
        tracing::info!(
            target: "audit",
            action = %entry.action,
            user_id = ?entry.user_id,
            resource_type = ?entry.resource_type,
            resource_id = ?entry.resource_id,
            level = entry.level.as_str(),
            success = entry.success,
            ip_address = ?entry.ip_address,
            "Audit log recorded"
        );

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.append(&entry).await {
                tracing::error!(target: "audit", action = %entry.action, error = %e, "Failed to persist audit log");
            }
        }
    }
}
