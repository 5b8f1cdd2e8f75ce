//! Detection rules: content matchers and file-type indicators.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use hiddenvault_common::{Error, Result};

/// Risk attached to a detection. Ordered so that `High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        };
        f.write_str(s)
    }
}

/// What was detected in or about a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SsnOrIdNumber,
    CreditCardNumber,
    BankAccountNumber,
    PassportNumber,
    PrivateKey,
    PasswordOrSecret,
    ApiToken,
    FinancialDocument,
    OfficeDocument,
    ImageFile,
    KeyFile,
    ConfigFile,
}

impl Category {
    pub fn risk(&self) -> RiskLevel {
        match self {
            Category::ImageFile | Category::PassportNumber => RiskLevel::Medium,
            Category::OfficeDocument => RiskLevel::Low,
            _ => RiskLevel::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::SsnOrIdNumber => "ssn_or_id_number",
            Category::CreditCardNumber => "credit_card_number",
            Category::BankAccountNumber => "bank_account_number",
            Category::PassportNumber => "passport_number",
            Category::PrivateKey => "private_key",
            Category::PasswordOrSecret => "password_or_secret",
            Category::ApiToken => "api_token",
            Category::FinancialDocument => "financial_document",
            Category::OfficeDocument => "office_document",
            Category::ImageFile => "image_file",
            Category::KeyFile => "key_file",
            Category::ConfigFile => "config_file",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const CONTENT_PATTERNS: &[(Category, &str)] = &[
    (Category::SsnOrIdNumber, r"\b\d{3}-\d{2}-\d{4}\b"),
    (
        Category::BankAccountNumber,
        r"\b[A-Z]{2}\d{2}(?: ?[A-Z0-9]{4}){2,7}(?: ?[A-Z0-9]{1,3})?\b",
    ),
    (
        Category::PassportNumber,
        r"(?i)passport(?:\s*(?:no\.?|number|#))?[\s:#]*[A-Z]{1,2}\d{6,9}\b",
    ),
    (
        Category::PrivateKey,
        r"-----BEGIN (?:RSA |EC |DSA |OPENSSH |PGP |ENCRYPTED )?PRIVATE KEY",
    ),
    (
        Category::PasswordOrSecret,
        r#"(?i)\b(?:password|passwd|pwd|secret)\s*[=:]\s*["']?[^\s"']+"#,
    ),
    (
        Category::ApiToken,
        r"AKIA[0-9A-Z]{16}|gh[ps]_[A-Za-z0-9_]{36,}|github_pat_[A-Za-z0-9_]{22,}|sk_(?:live|test)_[A-Za-z0-9]{24,}|xox[bpas]-[A-Za-z0-9\-]{10,}|sk-ant-[A-Za-z0-9\-]{20,}",
    ),
];

/// Card-number candidates; each is confirmed with a Luhn check.
const CARD_PATTERN: &str = r"\b(?:\d{4}[ -]?){3}\d{4}\b";

/// Compiled content matchers.
pub struct ContentRules {
    patterns: Vec<(Category, Regex)>,
    card: Regex,
}

impl ContentRules {
    /// Compile every matcher.
    ///
    /// # Errors
    /// - `InvalidInput` if a pattern fails to compile
    pub fn new() -> Result<Self> {
        let patterns = CONTENT_PATTERNS
            .iter()
            .map(|(category, pattern)| compile(pattern).map(|re| (*category, re)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            card: compile(CARD_PATTERN)?,
        })
    }

    /// Categories matched anywhere in `text`.
    pub fn matches(&self, text: &str) -> Vec<Category> {
        let mut found: Vec<Category> = self
            .patterns
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(category, _)| *category)
            .collect();

        if self.card.find_iter(text).any(|m| luhn_valid(m.as_str())) {
            found.push(Category::CreditCardNumber);
        }
        found
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::InvalidInput(format!("Invalid scanner pattern: {}", e)))
}

/// Luhn checksum over the digits of `candidate`.
fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Categories implied by a file's name or extension alone.
pub fn name_indicators(path: &Path) -> Vec<Category> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if name.starts_with(".env") || name == "config.json" || name == "credentials" {
        return vec![Category::ConfigFile];
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" | "xlsx" => vec![Category::FinancialDocument],
        "xls" | "csv" | "docx" | "doc" => vec![Category::OfficeDocument],
        "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "heic" => vec![Category::ImageFile],
        "pem" | "key" | "ppk" | "p12" | "pfx" | "kdbx" => vec![Category::KeyFile],
        "env" => vec![Category::ConfigFile],
        _ => Vec::new(),
    }
}

/// Whether the extension marks a file as text worth scanning.
pub fn is_text_extension(path: &Path) -> bool {
    let ext = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        None => return false,
    };
    matches!(
        ext.as_str(),
        "txt" | "csv" | "json" | "xml" | "log" | "conf" | "config" | "env" | "pem" | "key"
            | "pub" | "sh" | "py" | "rs" | "js" | "ts" | "java" | "cpp" | "c" | "h" | "sql"
            | "yaml" | "yml" | "toml" | "ini" | "md"
    )
}
