//! Access control seam
//!
//! Who the caller is arrives as an [`AccessContext`]. Whether the caller may
//! do something is answered by an [`AccessChecker`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{codes, CoreError, CoreResult};

/// Box-level privileges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    Read,
    Write,
    All,
}

impl Privilege {
    /// True when holding `self` grants `wanted`
    pub fn grants(&self, wanted: Privilege) -> bool {
        *self == Privilege::All || *self == wanted
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Privilege::Read => write!(f, "read"),
            Privilege::Write => write!(f, "write"),
            Privilege::All => write!(f, "all"),
        }
    }
}

impl FromStr for Privilege {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Privilege::Read),
            "write" => Ok(Privilege::Write),
            "all" => Ok(Privilege::All),
            other => Err(format!("unknown privilege '{}'", other)),
        }
    }
}

/// Whether a part reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    Account(String),
    /// Unit administrators bypass per-box privileges
    UnitUser,
}

/// The caller of one batch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessContext {
    principal: Principal,
    realm: String,
    privileges: Vec<Privilege>,
}

impl AccessContext {
    pub fn anonymous(realm: impl Into<String>, privileges: Vec<Privilege>) -> Self {
        Self {
            principal: Principal::Anonymous,
            realm: realm.into(),
            privileges,
        }
    }

    pub fn account(
        subject: impl Into<String>,
        realm: impl Into<String>,
        privileges: Vec<Privilege>,
    ) -> Self {
        Self {
            principal: Principal::Account(subject.into()),
            realm: realm.into(),
            privileges,
        }
    }

    pub fn unit_user(realm: impl Into<String>) -> Self {
        Self {
            principal: Principal::UnitUser,
            realm: realm.into(),
            privileges: vec![Privilege::All],
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn privileges(&self) -> &[Privilege] {
        &self.privileges
    }

    pub fn is_anonymous(&self) -> bool {
        self.principal == Principal::Anonymous
    }

    pub fn is_unit_user(&self) -> bool {
        self.principal == Principal::UnitUser
    }

    pub fn holds(&self, wanted: Privilege) -> bool {
        self.privileges.iter().any(|p| p.grants(wanted))
    }
}

/// Privilege evaluation for a box
pub trait AccessChecker: Send + Sync {
    /// May the caller reach the `$batch` endpoint at all?
    fn has_privilege_for_batch(&self, ac: &AccessContext) -> bool;

    /// Privilege needed to read or write an entity set
    fn required_privilege(&self, entity_set: &str, mode: AccessMode) -> Privilege;

    fn has_privilege(&self, ac: &AccessContext, privilege: Privilege) -> bool;

    /// Whole-batch check, run before the body is parsed.
    ///
    /// Anonymous callers get 401 with the realm, others 403.
    fn check_batch(&self, ac: &AccessContext) -> CoreResult<()> {
        if ac.is_unit_user() || self.has_privilege_for_batch(ac) {
            return Ok(());
        }
        if ac.is_anonymous() {
            return Err(CoreError::new(codes::AUTHORIZATION_REQUIRED).with_realm(ac.realm()));
        }
        Err(CoreError::new(codes::NECESSARY_PRIVILEGE_LACKING))
    }

    /// Per-part check for one privilege.
    fn check_privilege(&self, ac: &AccessContext, privilege: Privilege) -> CoreResult<()> {
        if ac.is_unit_user() || self.has_privilege(ac, privilege) {
            Ok(())
        } else {
            Err(CoreError::new(codes::NECESSARY_PRIVILEGE_LACKING))
        }
    }
}

/// Evaluates the privileges carried by the context itself
///
/// Every entity set needs `read` to read and `write` to write.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoxAclChecker;

impl AccessChecker for BoxAclChecker {
    fn has_privilege_for_batch(&self, ac: &AccessContext) -> bool {
        !ac.privileges().is_empty()
    }

    fn required_privilege(&self, _entity_set: &str, mode: AccessMode) -> Privilege {
        match mode {
            AccessMode::Read => Privilege::Read,
            AccessMode::Write => Privilege::Write,
        }
    }

    fn has_privilege(&self, ac: &AccessContext, privilege: Privilege) -> bool {
        ac.holds(privilege)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_anonymous_without_privilege_gets_401_with_realm() {
        let ac = AccessContext::anonymous("https://unit/cell/", vec![]);
        let err = BoxAclChecker.check_batch(&ac).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.realm(), Some("https://unit/cell/"));
    }

    #[test]
    fn test_account_without_privilege_gets_403() {
        let ac = AccessContext::account("me", "https://unit/cell/", vec![]);
        let err = BoxAclChecker.check_batch(&ac).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_anonymous_with_privilege_allowed() {
        let ac = AccessContext::anonymous("r", vec![Privilege::Read]);
        assert!(BoxAclChecker.check_batch(&ac).is_ok());
        assert!(BoxAclChecker.check_privilege(&ac, Privilege::Read).is_ok());
        assert!(BoxAclChecker.check_privilege(&ac, Privilege::Write).is_err());
    }

    #[test]
    fn test_all_grants_everything() {
        let ac = AccessContext::account("me", "r", vec![Privilege::All]);
        assert!(ac.holds(Privilege::Read));
        assert!(ac.holds(Privilege::Write));
    }

    #[test]
    fn test_unit_user_bypasses() {
        let ac = AccessContext::unit_user("r");
        assert!(BoxAclChecker.check_batch(&ac).is_ok());
        assert!(BoxAclChecker.check_privilege(&ac, Privilege::Write).is_ok());
    }

    #[test]
    fn test_privilege_from_str() {
        assert_eq!("write".parse::<Privilege>().unwrap(), Privilege::Write);
        assert!("fly".parse::<Privilege>().is_err());
    }
}
