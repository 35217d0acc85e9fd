use serde::{Deserialize, Serialize};

use super::string_or_number;

/// Authenticated identity, as issued by the login endpoint or the parent frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct User {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizations: Option<Vec<Organization>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Organization {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl User {
    /// A user record is only usable with a non-blank id and email.
    pub fn is_well_formed(&self) -> bool {
        !self.id.trim().is_empty() && !self.email.trim().is_empty()
    }

    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_and_string_ids() {
        let a: User = serde_json::from_str(r#"{"id": 42, "email": "a@example.com"}"#).unwrap();
        let b: User = serde_json::from_str(r#"{"id": "u-42", "email": "b@example.com"}"#).unwrap();
        assert_eq!(a.id, "42");
        assert_eq!(b.id, "u-42");
    }

    #[test]
    fn test_organizations_parse() {
        let json = r#"{"id": 1, "email": "a@example.com", "name": "Ada",
            "organizations": [{"id": 7, "name": "Acme", "role": "admin"}]}"#;
        let user: User = serde_json::from_str(json).unwrap();
        let orgs = user.organizations.unwrap();
        assert_eq!(orgs[0].id, "7");
        assert_eq!(orgs[0].role.as_deref(), Some("admin"));
    }

    #[test]
    fn test_well_formed_and_display_name() {
        let mut user = User {
            id: "1".to_string(),
            email: "a@example.com".to_string(),
            name: None,
            organizations: None,
        };
        assert!(user.is_well_formed());
        assert_eq!(user.display_name(), "a@example.com");

        user.name = Some("Ada".to_string());
        assert_eq!(user.display_name(), "Ada");

        user.email = "  ".to_string();
        assert!(!user.is_well_formed());
    }
}
