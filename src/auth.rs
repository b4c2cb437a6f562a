//! Caller identity and the per-record permission rule.

use serde::{Deserialize, Serialize};

use crate::entity::{Record, CREATED_BY};
use crate::error::{ApiError, Result};

/// Authenticated caller, as decoded by the transport layer.
///
/// Machine tokens carry a `sub` and no roles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthUser {
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub roles: Option<Vec<String>>,
}

impl AuthUser {
    pub fn user(handle: impl Into<String>, roles: &[&str]) -> Self {
        Self {
            handle: Some(handle.into()),
            sub: None,
            roles: Some(roles.iter().map(|r| r.to_string()).collect()),
        }
    }

    pub fn machine(sub: impl Into<String>) -> Self {
        Self {
            handle: None,
            sub: Some(sub.into()),
            roles: None,
        }
    }

    /// Handle if present, otherwise the token subject
    pub fn identity(&self) -> Option<&str> {
        self.handle.as_deref().or(self.sub.as_deref())
    }

    /// Case-insensitive role membership against any of `roles`
    pub fn has_any_role(&self, roles: &[String]) -> bool {
        let Some(own) = &self.roles else {
            return false;
        };
        own.iter()
            .any(|r| roles.iter().any(|wanted| wanted.eq_ignore_ascii_case(r)))
    }
}

/// Fail unless the caller may see `record`.
///
/// Callers without roles (machine tokens) and admin-equivalent roles pass;
/// everyone else must be the record's creator.
pub fn permission_check(auth: &AuthUser, record: &Record, admin_roles: &[String]) -> Result<()> {
    if auth.roles.is_none() || auth.has_any_role(admin_roles) {
        return Ok(());
    }

    let creator = record.get(CREATED_BY).and_then(|v| v.as_str());
    match (creator, auth.identity()) {
        (Some(creator), Some(identity)) if creator == identity => Ok(()),
        _ => Err(ApiError::Permission(
            "You are not allowed to perform this action".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn admin_roles() -> Vec<String> {
        vec!["Administrator".to_string(), "u-bahn-admin".to_string()]
    }

    fn record_by(creator: &str) -> Record {
        json!({"id": "1", "createdBy": creator})
            .as_object()
            .unwrap()
            .clone()
    }

    #[test]
    fn test_creator_may_access() {
        let auth = AuthUser::user("alice", &["Topcoder User"]);
        assert!(permission_check(&auth, &record_by("alice"), &admin_roles()).is_ok());
    }

    #[test]
    fn test_other_user_denied() {
        let auth = AuthUser::user("mallory", &["Topcoder User"]);
        let err = permission_check(&auth, &record_by("alice"), &admin_roles()).unwrap_err();
        assert!(matches!(err, ApiError::Permission(_)));
    }

    #[test]
    fn test_admin_role_is_case_insensitive() {
        let auth = AuthUser::user("root", &["administrator"]);
        assert!(permission_check(&auth, &record_by("alice"), &admin_roles()).is_ok());
    }

    #[test]
    fn test_machine_token_passes() {
        let auth = AuthUser::machine("svc@clients");
        assert_eq!(auth.identity(), Some("svc@clients"));
        assert!(permission_check(&auth, &record_by("alice"), &admin_roles()).is_ok());
    }
}
