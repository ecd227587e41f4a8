//! Permission vocabulary: `<resource>.<action>` names and share levels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ArxError;

/// Protected resource classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Secrets,
    Users,
    Roles,
    System,
    Audit,
    Namespaces,
}

impl Resource {
    pub const ALL: [Resource; 6] = [
        Resource::Secrets,
        Resource::Users,
        Resource::Roles,
        Resource::System,
        Resource::Audit,
        Resource::Namespaces,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Secrets => "secrets",
            Self::Users => "users",
            Self::Roles => "roles",
            Self::System => "system",
            Self::Audit => "audit",
            Self::Namespaces => "namespaces",
        }
    }
}

/// Actions on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Delete,
    Admin,
    Assign,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Read,
        Action::Write,
        Action::Delete,
        Action::Admin,
        Action::Assign,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Admin => "admin",
            Self::Assign => "assign",
        }
    }
}

/// A single `<resource>.<action>` permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub resource: Resource,
    pub action: Action,
}

impl Permission {
    pub fn new(resource: Resource, action: Action) -> Self {
        Self { resource, action }
    }

    /// The `<resource>.admin` permission that subsumes this one.
    pub fn admin_of(&self) -> Permission {
        Permission::new(self.resource, Action::Admin)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource.as_str(), self.action.as_str())
    }
}

impl FromStr for Permission {
    type Err = ArxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, action) = s
            .split_once('.')
            .ok_or_else(|| ArxError::invalid_argument(format!("malformed permission: {s}")))?;

        let resource = Resource::ALL
            .into_iter()
            .find(|r| r.as_str() == resource)
            .ok_or_else(|| ArxError::invalid_argument(format!("unknown resource: {resource}")))?;
        let action = Action::ALL
            .into_iter()
            .find(|a| a.as_str() == action)
            .ok_or_else(|| ArxError::invalid_argument(format!("unknown action: {action}")))?;

        Ok(Permission::new(resource, action))
    }
}

/// Permission level granted by a share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharePermission {
    Read,
    Write,
}

impl SharePermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }

    pub fn allows_write(&self) -> bool {
        matches!(self, Self::Write)
    }
}

impl FromStr for SharePermission {
    type Err = ArxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            other => Err(ArxError::invalid_argument(format!(
                "share permission must be read or write, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_round_trip() {
        for resource in Resource::ALL {
            for action in Action::ALL {
                let p = Permission::new(resource, action);
                let parsed: Permission = p.to_string().parse().unwrap();
                assert_eq!(parsed, p);
            }
        }
    }

    #[test]
    fn rejects_malformed_names() {
        assert!("secretsread".parse::<Permission>().is_err());
        assert!("secrets.fly".parse::<Permission>().is_err());
        assert!("planets.read".parse::<Permission>().is_err());
    }

    #[test]
    fn admin_subsumption() {
        let p = Permission::new(Resource::Secrets, Action::Write);
        assert_eq!(p.admin_of().to_string(), "secrets.admin");
    }

    #[test]
    fn share_permission_parse() {
        assert_eq!("read".parse::<SharePermission>().unwrap(), SharePermission::Read);
        assert_eq!("write".parse::<SharePermission>().unwrap(), SharePermission::Write);
        assert!("admin".parse::<SharePermission>().is_err());
    }
}
