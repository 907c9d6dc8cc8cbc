// handlers/mod.rs - HTTP handlers grouped per resource
//
// Every guarded handler runs its body inside `Pipeline::run`, which rate
// limits, authenticates, authorizes and sanitizes before the body executes
// and writes the audit record afterwards.

pub mod activity;
pub mod admin;
pub mod auth;
pub mod blocks;
pub mod nodes;
pub mod search;
pub mod system;
pub mod themes;
pub mod users;

use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::security::sanitizer::{sanitize_parameter, ParamKind};

/// `?skip=&limit=` on list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

impl Pagination {
    /// Clamp to `[0, ..)` and `[1, max_page_size]`
    pub fn resolve(&self, api: &ApiConfig) -> (i64, i64) {
        let skip = self.skip.unwrap_or(0).max(0);
        let limit = self
            .limit
            .unwrap_or(api.default_page_size)
            .clamp(1, api.max_page_size);
        (skip, limit)
    }
}

/// Path ids are validated before they reach the datastore
pub fn parse_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    let checked = sanitize_parameter(raw, ParamKind::Uuid)
        .map_err(|_| ApiError::validation(format!("Invalid {} id", what)))?;
    Uuid::parse_str(&checked).map_err(|_| ApiError::validation(format!("Invalid {} id", what)))
}

pub fn message(text: &str) -> Value {
    json!({ "message": text })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, Environment};

    #[test]
    fn pagination_is_clamped() {
        let api = AppConfig::for_environment(Environment::Development).api;
        let page = Pagination {
            skip: Some(-5),
            limit: Some(1_000_000),
        };
        assert_eq!(page.resolve(&api), (0, api.max_page_size));
        assert_eq!(Pagination::default().resolve(&api), (0, api.default_page_size));
    }

    #[test]
    fn ids_must_be_uuids() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string(), "node").unwrap(), id);
        assert!(matches!(parse_id("1 OR 1=1", "node"), Err(ApiError::ValidationFailed(_))));
    }
}
