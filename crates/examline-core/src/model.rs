//! Core data model: whitelist records, applicants, questions, and answers.
//!
//! Persisted records keep the JSON field names of the original snapshot
//! files, and questions keep the Chinese field names used by the remote
//! question banks, so existing data files load unchanged.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Date format used in registration input and persisted records.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Role of a whitelisted user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

/// A whitelisted (authorized) user, keyed by identity token.
///
/// Invariant: `role == Admin` records carry the unrestricted window
/// (`2000-01-01..2099-12-31`), so the validity check never locks an
/// administrator out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// The stable identity token of the messaging transport.
    pub line_id: String,
    pub role: Role,
    pub school: String,
    pub name: String,
    pub student_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl UserRecord {
    /// Build the self-promoted administrator record for an identity.
    pub fn admin(line_id: &str) -> Self {
        Self {
            line_id: line_id.to_string(),
            role: Role::Admin,
            school: "System".to_string(),
            name: "管理者".to_string(),
            student_id: "admin".to_string(),
            start_date: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2099, 12, 31).unwrap(),
        }
    }

    /// Whether the validity window contains `date` (inclusive both ends).
    pub fn is_valid_on(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    /// Render one whitelist line: name, student id, validity window.
    pub fn summary_line(&self) -> String {
        format!(
            "{} | {} | {}~{}",
            self.name, self.student_id, self.start_date, self.end_date
        )
    }
}

/// A pending applicant, keyed by identity token.
///
/// Created as an empty shell on first contact; the five registration fields
/// are filled in once the user submits a well-formed line. Dates stay `None`
/// until then, which is what `is_complete` keys off.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Applicant {
    pub line_id: String,
    #[serde(default)]
    pub school: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub student_id: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl Applicant {
    /// The shell stored when an unknown identity first sends a message.
    pub fn shell(line_id: &str) -> Self {
        Self {
            line_id: line_id.to_string(),
            ..Self::default()
        }
    }

    /// A shell becomes complete only through a valid five-field submission.
    pub fn is_complete(&self) -> bool {
        self.start_date.is_some() && self.end_date.is_some()
    }

    /// Promote to a whitelist record with the given role.
    pub fn into_user(self, role: Role) -> Option<UserRecord> {
        Some(UserRecord {
            line_id: self.line_id,
            role,
            school: self.school,
            name: self.name,
            student_id: self.student_id,
            start_date: self.start_date?,
            end_date: self.end_date?,
        })
    }

    /// Render one pending line: name, student id, validity window.
    pub fn summary_line(&self) -> String {
        let window = match (self.start_date, self.end_date) {
            (Some(s), Some(e)) => format!("{s}~{e}"),
            _ => "未完成".to_string(),
        };
        format!("{} | {} | {}", self.name, self.student_id, window)
    }
}

/// One multiple-choice question as stored in the remote banks.
///
/// `seq` is the session-local sequence number (1-based), assigned when the
/// question is drawn into a session; it is 0 in the raw bank files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "題目")]
    pub text: String,
    #[serde(rename = "選項")]
    pub options: Vec<String>,
    #[serde(rename = "正解")]
    pub answer: String,
    /// Absolute image URL, resolved by the question-source adapter.
    #[serde(rename = "圖片連結", default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(rename = "題號", default)]
    pub seq: u32,
}

/// One recorded answer inside a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Session-local question sequence number.
    pub seq: u32,
    /// Normalized submitted choice.
    pub submitted: String,
    /// Normalized canonical correct choice.
    pub correct: String,
    pub is_correct: bool,
    /// Carried for later explanation rendering.
    pub image: Option<String>,
}

/// The four accepted choice tokens.
pub const CHOICES: [&str; 4] = ["A", "B", "C", "D"];

/// Normalize a submitted answer: trim, drop dot separators and inner
/// whitespace, map full-width Latin letters to half-width, uppercase.
pub fn normalize_answer(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, '.' | '．') && !c.is_whitespace())
        .map(|c| match c {
            'Ａ' | 'ａ' => 'A',
            'Ｂ' | 'ｂ' => 'B',
            'Ｃ' | 'ｃ' => 'C',
            'Ｄ' | 'ｄ' => 'D',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

/// Whether a normalized answer is one of the four accepted tokens.
pub fn is_valid_choice(normalized: &str) -> bool {
    CHOICES.contains(&normalized)
}

/// Parse a registration date in `%Y-%m-%d` form.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}
