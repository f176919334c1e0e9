//! Content normalization.
//!
//! Reduces source text to a token-poor, lower-case string so that trigram
//! similarity reflects structure and vocabulary rather than comments,
//! naming style, literals, or formatting.
//!
//! # Pipeline
//!
//! 1. Blank input → `""`.
//! 2. Strip comments using the language's [`CommentStyle`].
//! 3. Split camelCase at lower→upper boundaries (`fooBar` → `foo_Bar`).
//! 4. Collapse whitespace, lower-case.
//! 5. Blank out `{}();[]`, stop words, `true/false/null/none/nil`,
//!    `=` and operator characters, and I/O call names.
//! 6. Blank out digits and anything outside `[a-z_ ]`, collapse, trim.
//!
//! Stop words cover visibility modifiers, control flow, primitive type
//! names and receivers. Declaration keywords (`class`, `def`, `struct`,
//! `import`, ...) are kept as structural vocabulary.

use std::borrow::Cow;
use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::language::Language;

/// How a language spells its comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// `# ...` to end of line (Python, Ruby).
    Hash,
    /// `// ...` to end of line and `/* ... */` blocks (C++, Java, JS, TS, Go).
    CFamily,
    /// `-- ...` to end of line (Ada).
    DoubleDash,
}

static HASH_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"#[^\n]*(?:\n|$)").unwrap());
// Leftmost match wins, so `/*` inside a line comment never opens a block.
static C_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)//[^\n]*(?:\n|$)|/\*.*?\*/").unwrap());
static DASH_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"--[^\n]*(?:\n|$)").unwrap());

static CAMEL_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z])([A-Z])").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static STRUCTURAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[{}();\[\]]").unwrap());
static STOP_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:public|private|protected|static|final|abstract|void|int|float|double|str|string|bool|boolean|if|else|for|while|do|return|break|continue|try|catch|throw|new|self|this|super)\b",
    )
    .unwrap()
});
static LITERALS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:true|false|null|none|nil)\b").unwrap());
static OPERATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[=+\-*/%><!&|]").unwrap());
static IO_CALLS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:print|println|cout|printf|puts|put|write|log|console)\b").unwrap()
});
static NON_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z_\s]").unwrap());

impl CommentStyle {
    /// Remove comments, replacing each with a single space.
    pub fn strip<'a>(&self, content: &'a str) -> Cow<'a, str> {
        match self {
            CommentStyle::Hash => HASH_COMMENT.replace_all(content, " "),
            CommentStyle::CFamily => C_COMMENT.replace_all(content, " "),
            CommentStyle::DoubleDash => DASH_COMMENT.replace_all(content, " "),
        }
    }
}

/// Language → comment rule dispatch table plus the shared token pipeline.
#[derive(Debug, Clone)]
pub struct Normalizer {
    comment_rules: HashMap<Language, CommentStyle>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::empty()
            .with_rule(Language::Python, CommentStyle::Hash)
            .with_rule(Language::Ruby, CommentStyle::Hash)
            .with_rule(Language::Cpp, CommentStyle::CFamily)
            .with_rule(Language::Java, CommentStyle::CFamily)
            .with_rule(Language::JavaScript, CommentStyle::CFamily)
            .with_rule(Language::TypeScript, CommentStyle::CFamily)
            .with_rule(Language::Go, CommentStyle::CFamily)
            .with_rule(Language::Ada, CommentStyle::DoubleDash)
    }
}

impl Normalizer {
    /// A normalizer with no comment rules at all.
    pub fn empty() -> Self {
        Self {
            comment_rules: HashMap::new(),
        }
    }

    pub fn with_rule(mut self, language: Language, style: CommentStyle) -> Self {
        self.comment_rules.insert(language, style);
        self
    }

    pub fn comment_style(&self, language: Language) -> Option<CommentStyle> {
        self.comment_rules.get(&language).copied()
    }

    pub fn normalize(&self, content: &str, language: Language) -> String {
        if content.trim().is_empty() {
            warn!(%language, "empty content provided for normalization");
            return String::new();
        }

        let stripped = match self.comment_style(language) {
            Some(style) => style.strip(content),
            None => {
                warn!(%language, "no comment rule for language, skipping comment stripping");
                Cow::Borrowed(content)
            }
        };

        let split = CAMEL_BOUNDARY.replace_all(&stripped, "${1}_${2}");
        let mut text = WHITESPACE.replace_all(&split, " ").to_lowercase();

        for pattern in [&*STRUCTURAL, &*STOP_WORDS, &*LITERALS, &*OPERATORS, &*IO_CALLS] {
            text = pattern.replace_all(&text, " ").into_owned();
        }

        let text = NON_TOKEN.replace_all(&text, " ");
        let normalized = WHITESPACE.replace_all(&text, " ").trim().to_string();

        debug!(%language, len = normalized.len(), "normalized content");
        normalized
    }
}

static DEFAULT_NORMALIZER: Lazy<Normalizer> = Lazy::new(Normalizer::default);

/// Normalize with the default rule table.
pub fn normalize(content: &str, language: Language) -> String {
    DEFAULT_NORMALIZER.normalize(content, language)
}

/// Hex SHA-256 of normalized content, the deduplication key.
pub fn content_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}
