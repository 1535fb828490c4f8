use serde::{Deserialize, Serialize};
use std::fmt;

/// Principal identity. The upstream credential checker hands us e-mail
/// addresses, so this is a string key rather than a surrogate id.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct UserEmail(pub String);

impl fmt::Display for UserEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserEmail {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("empty identity".to_string());
        }
        Ok(UserEmail(trimmed.to_string()))
    }
}

impl From<&str> for UserEmail {
    fn from(s: &str) -> Self {
        UserEmail(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum RoleName {
    #[serde(rename = "ADMIN")]
    Admin,
    #[serde(rename = "USER")]
    User,
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleName::Admin => write!(f, "ADMIN"),
            RoleName::User => write!(f, "USER"),
        }
    }
}

impl std::str::FromStr for RoleName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(RoleName::Admin),
            "USER" => Ok(RoleName::User),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}
