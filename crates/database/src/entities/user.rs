//! User entity definitions

use serde::{Deserialize, Serialize};

/// A user as the messaging core sees it. Accounts are managed elsewhere; the
/// core only reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(skip_serializing)]
    pub id: i64,
    pub public_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: Option<String>,
    pub created_at: String,
}

impl User {
    /// The name shown next to messages: explicit display name, then the full
    /// name, then the email address.
    pub fn display_label(&self) -> String {
        if let Some(name) = self.display_name.as_deref().map(str::trim) {
            if !name.is_empty() {
                return name.to_string();
            }
        }

        let full_name = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let full_name = full_name.trim();
        if full_name.is_empty() {
            self.email.clone()
        } else {
            full_name.to_string()
        }
    }

    pub fn summary(&self) -> SenderSummary {
        SenderSummary {
            id: self.public_id.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            display_name: self.display_label(),
        }
    }
}

/// Denormalized sender information carried on every message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderSummary {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(first: &str, last: &str, display: Option<&str>) -> User {
        User {
            id: 1,
            public_id: "u1".into(),
            email: "ada@example.com".into(),
            first_name: first.into(),
            last_name: last.into(),
            display_name: display.map(str::to_string),
            created_at: String::new(),
        }
    }

    #[test]
    fn display_label_prefers_display_name() {
        assert_eq!(user("Ada", "Lovelace", Some("countess")).display_label(), "countess");
    }

    #[test]
    fn display_label_falls_back_to_full_name_then_email() {
        assert_eq!(user("Ada", "Lovelace", None).display_label(), "Ada Lovelace");
        assert_eq!(user("Ada", "", Some("  ")).display_label(), "Ada");
        assert_eq!(user("", "", None).display_label(), "ada@example.com");
    }

    #[test]
    fn summary_uses_public_id() {
        let summary = user("Ada", "Lovelace", None).summary();
        assert_eq!(summary.id, "u1");
        assert_eq!(summary.display_name, "Ada Lovelace");
    }
}
