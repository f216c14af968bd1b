//! Team roster: which voter emails belong to which submitted game.

use std::collections::BTreeSet;

/// A team that submitted one game. `member_emails` are normalized
/// (lower-cased, duplicates folded) at construction time; the actual
/// roster source (file format, directory layout) is a collaborator input
/// and is out of scope here.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Team {
    pub team_id: String,
    pub display_name: String,
    member_emails: BTreeSet<String>,
}

impl Team {
    pub fn new(
        team_id: impl Into<String>,
        display_name: impl Into<String>,
        member_emails: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            team_id: team_id.into(),
            display_name: display_name.into(),
            member_emails: member_emails
                .into_iter()
                .map(|email| normalize_email(&email.into()))
                .collect(),
        }
    }

    pub fn has_member(&self, email: &str) -> bool {
        self.member_emails.contains(&normalize_email(email))
    }

    pub fn member_emails(&self) -> impl Iterator<Item = &str> {
        self.member_emails.iter().map(String::as_str)
    }
}

/// Normalize an email for membership comparisons: lower-case, trimmed.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{Team, normalize_email};

    #[test]
    fn membership_is_case_insensitive() {
        let team = Team::new("t1", "Team One", ["Voter@Example.com"]);
        assert!(team.has_member("voter@example.com"));
        assert!(team.has_member("VOTER@EXAMPLE.COM"));
    }

    #[test]
    fn duplicate_emails_fold() {
        let team = Team::new("t1", "Team One", ["a@x.com", "A@X.com", "a@x.com "]);
        assert_eq!(team.member_emails().count(), 1);
    }

    #[test]
    fn normalize_trims_and_lowercases() {
        assert_eq!(normalize_email("  Foo@Bar.com "), "foo@bar.com");
    }
}
