//! Supported source languages and their file extensions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Language {
    Java,
    Python,
    Cpp,
    Go,
    Ruby,
    Ada,
    JavaScript,
    TypeScript,
}

impl Language {
    pub const ALL: [Language; 8] = [
        Language::Java,
        Language::Python,
        Language::Cpp,
        Language::Go,
        Language::Ruby,
        Language::Ada,
        Language::JavaScript,
        Language::TypeScript,
    ];

    /// Canonical upper-case tag, as stored and as accepted on input.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Java => "JAVA",
            Language::Python => "PYTHON",
            Language::Cpp => "CPP",
            Language::Go => "GO",
            Language::Ruby => "RUBY",
            Language::Ada => "ADA",
            Language::JavaScript => "JAVASCRIPT",
            Language::TypeScript => "TYPESCRIPT",
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::Java => &[".java"],
            Language::Python => &[".py", ".ipynb"],
            Language::Cpp => &[".cpp", ".h", ".hpp"],
            Language::Go => &[".go"],
            Language::Ruby => &[".rb"],
            Language::Ada => &[".ada", ".adb", ".ads"],
            Language::JavaScript => &[".js"],
            Language::TypeScript => &[".ts"],
        }
    }

    /// Whether `file_name` carries one of this language's extensions
    /// (case-insensitive).
    pub fn accepts_file_name(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.extensions().iter().any(|ext| lower.ends_with(ext))
    }

    /// Comma-separated list of every supported tag, for error messages.
    pub fn supported_list() -> String {
        Language::ALL
            .iter()
            .map(|l| l.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Language::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == upper)
            .ok_or_else(|| {
                Error::invalid(format!(
                    "Unsupported language: {}. Supported languages: {}",
                    s,
                    Language::supported_list()
                ))
            })
    }
}

/// Parse an optional language filter. Blank filters mean "no filter".
pub fn parse_filter(filter: Option<&str>) -> Result<Option<Language>, Error> {
    match filter.map(str::trim) {
        None | Some("") => Ok(None),
        Some(tag) => tag.parse().map(Some),
    }
}
