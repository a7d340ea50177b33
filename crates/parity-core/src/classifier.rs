//! Error classifier: maps failed-stage stderr onto taxonomy labels.
//!
//! The rule table is data. The default table ships embedded in
//! `classifier_rules.toml`; additional rule files are appended at startup.
//! Every matching rule contributes its label, since compiler output often
//! reports several independent diagnostics at once.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::{ClassifiedError, RuleError, Stage};

/// Label assigned when no rule matches.
pub const UNCLASSIFIED: &str = "Unclassified";

const DEFAULT_RULES: &str = include_str!("classifier_rules.toml");

/// Longest message kept on a [`ClassifiedError`].
const MAX_MESSAGE_CHARS: usize = 200;

/// One (label, pattern) entry of the rule table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifierRule {
    /// Taxonomy label.
    pub label: String,

    /// Regular expression matched against ANSI-stripped stderr.
    pub pattern: String,

    /// Stages the rule applies to; empty means all.
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl ClassifierRule {
    pub fn new(label: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            pattern: pattern.into(),
            stages: Vec::new(),
        }
    }

    /// Restrict the rule to the given stages.
    pub fn for_stages(mut self, stages: &[Stage]) -> Self {
        self.stages = stages.to_vec();
        self
    }
}

#[derive(Debug, Deserialize)]
struct RuleTable {
    #[serde(default, rename = "rule")]
    rules: Vec<ClassifierRule>,
}

#[derive(Debug)]
struct CompiledRule {
    label: String,
    regex: Regex,
    stages: Vec<Stage>,
}

impl CompiledRule {
    fn compile(rule: ClassifierRule) -> Result<Self, RuleError> {
        if rule.label.trim().is_empty() {
            return Err(RuleError::EmptyLabel(rule.pattern));
        }
        let regex = Regex::new(&rule.pattern).map_err(|source| RuleError::InvalidPattern {
            label: rule.label.clone(),
            source,
        })?;
        Ok(Self {
            label: rule.label,
            regex,
            stages: rule.stages,
        })
    }

    fn applies_to(&self, stage: Stage) -> bool {
        self.stages.is_empty() || self.stages.contains(&stage)
    }
}

/// Ordered, data-driven failure classifier.
#[derive(Debug)]
pub struct ErrorClassifier {
    rules: Vec<CompiledRule>,
    ansi: Regex,
    error_code: Regex,
}

impl ErrorClassifier {
    /// Classifier with no rules; everything is [`UNCLASSIFIED`].
    pub fn empty() -> Result<Self, RuleError> {
        let helper = |pattern: &str| {
            Regex::new(pattern).map_err(|source| RuleError::InvalidPattern {
                label: "builtin".to_string(),
                source,
            })
        };
        Ok(Self {
            rules: Vec::new(),
            ansi: helper(r"\x1b\[[0-9;?]*[A-Za-z]")?,
            error_code: helper(r"error\[(E\d{4})\]")?,
        })
    }

    /// Classifier loaded with the embedded default table.
    pub fn with_default_rules() -> Result<Self, RuleError> {
        let mut classifier = Self::empty()?;
        classifier.extend_from_toml(DEFAULT_RULES)?;
        Ok(classifier)
    }

    /// Classifier built from explicit rules only.
    pub fn from_rules(rules: Vec<ClassifierRule>) -> Result<Self, RuleError> {
        let mut classifier = Self::empty()?;
        classifier.extend(rules)?;
        Ok(classifier)
    }

    /// Append rules after the existing ones.
    pub fn extend(&mut self, rules: Vec<ClassifierRule>) -> Result<(), RuleError> {
        for rule in rules {
            self.rules.push(CompiledRule::compile(rule)?);
        }
        Ok(())
    }

    /// Append rules from a TOML table of `[[rule]]` entries.
    pub fn extend_from_toml(&mut self, text: &str) -> Result<(), RuleError> {
        let table: RuleTable = toml::from_str(text).map_err(|e| RuleError::Parse(e.to_string()))?;
        self.extend(table.rules)
    }

    /// Append rules from a TOML file.
    pub fn extend_from_file(&mut self, path: &Path) -> Result<(), RuleError> {
        let text = std::fs::read_to_string(path).map_err(|source| RuleError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.extend_from_toml(&text)
    }

    /// Number of loaded rules.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Labels in table order (duplicates preserved).
    pub fn labels(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.label.as_str()).collect()
    }

    /// Classify the stderr of a failed stage.
    pub fn classify(&self, stage: Stage, stderr: &str) -> ClassifiedError {
        let clean = self.strip_ansi(stderr);

        let mut categories: Vec<String> = Vec::new();
        for rule in self.rules.iter().filter(|r| r.applies_to(stage)) {
            if rule.regex.is_match(&clean) && !categories.contains(&rule.label) {
                categories.push(rule.label.clone());
            }
        }
        if categories.is_empty() {
            categories.push(UNCLASSIFIED.to_string());
        }

        let mut error_codes: Vec<String> = Vec::new();
        for caps in self.error_code.captures_iter(&clean) {
            let code = caps[1].to_string();
            if !error_codes.contains(&code) {
                error_codes.push(code);
            }
        }

        ClassifiedError {
            categories,
            error_codes,
            message: first_error_line(&clean),
        }
    }

    /// Remove terminal color escape sequences.
    pub fn strip_ansi(&self, text: &str) -> String {
        self.ansi.replace_all(text, "").into_owned()
    }
}

/// First line mentioning an error, else the first non-blank line.
fn first_error_line(text: &str) -> String {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let first = lines.clone().next();
    let line = lines
        .find(|l| {
            let lower = l.to_ascii_lowercase();
            lower.starts_with("error") || lower.contains("error:") || lower.contains("panicked at")
        })
        .or(first)
        .unwrap_or("");
    line.chars().take(MAX_MESSAGE_CHARS).collect()
}
