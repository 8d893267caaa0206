//! Subject catalog and name resolution.
//!
//! Maps human subject names to their question-bank source locators. Input
//! goes through the alias table first (common abbreviations), then fuzzy
//! matching against the canonical names with a fixed cutoff, so "免疫" and a
//! slightly misspelled full name both land on the same catalog entry.

use std::collections::HashMap;

/// Minimum similarity for a fuzzy subject match.
const FUZZY_CUTOFF: f64 = 0.4;

/// One catalog entry: canonical subject name and its source locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub name: String,
    /// Question-bank repository name passed to the question source.
    pub locator: String,
}

/// Static subject configuration; not mutated at runtime.
#[derive(Debug, Clone)]
pub struct SubjectCatalog {
    subjects: Vec<Subject>,
    aliases: HashMap<String, String>,
}

impl Default for SubjectCatalog {
    fn default() -> Self {
        let subjects = [
            ("臨床血清免疫學", "examimmun"),
            ("臨床血液與血庫學", "exmablood"),
            ("臨床生物化學", "exambiochemicy"),
            ("醫學分子檢驗與鏡檢學", "exammolecu"),
            ("臨床生理與病理學", "exampatho"),
            ("臨床微生物學", "exammicrbiog"),
        ]
        .into_iter()
        .map(|(name, locator)| Subject {
            name: name.to_string(),
            locator: locator.to_string(),
        })
        .collect();

        let aliases = [
            ("微生物", "臨床微生物學"),
            ("微生", "臨床微生物學"),
            ("血庫", "臨床血液與血庫學"),
            ("血液", "臨床血液與血庫學"),
            ("分子", "醫學分子檢驗與鏡檢學"),
            ("免疫", "臨床血清免疫學"),
            ("生化", "臨床生物化學"),
            ("病理", "臨床生理與病理學"),
        ]
        .into_iter()
        .map(|(a, c)| (a.to_string(), c.to_string()))
        .collect();

        Self { subjects, aliases }
    }
}

impl SubjectCatalog {
    pub fn new(subjects: Vec<Subject>, aliases: HashMap<String, String>) -> Self {
        Self { subjects, aliases }
    }

    /// All canonical subject names, for help texts.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.subjects.iter().map(|s| s.name.as_str())
    }

    /// Resolve user input to a catalog entry: alias lookup first, then the
    /// best fuzzy match over canonical names that clears the cutoff.
    pub fn resolve(&self, input: &str) -> Option<&Subject> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        let canonical = self.aliases.get(input).map(String::as_str).unwrap_or(input);

        self.subjects
            .iter()
            .map(|s| (strsim::normalized_levenshtein(canonical, &s.name), s))
            .filter(|(score, _)| *score >= FUZZY_CUTOFF)
            .max_by(|(a, _), (b, _)| a.total_cmp(b))
            .map(|(_, s)| s)
    }
}
