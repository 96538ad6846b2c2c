//! Threat pattern matching
//!
//! Stateless, rule-based classification of payloads against known attack
//! signatures (SQL injection, script injection, path traversal, shell
//! metacharacters). Patterns are registered per instance; matching has no
//! side effects.

use aho_corasick::AhoCorasick;
use common::constants::security;
use common::{clamp_unit, EngineError, SecuritySeverity};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// A registered attack signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatPattern {
    pub id: String,
    pub name: String,
    pub severity: SecuritySeverity,
    /// Substring signatures, matched case-insensitively
    pub signatures: Vec<String>,
    /// Optional regular expression for signatures substrings cannot express
    pub regex: Option<String>,
    pub description: String,
    pub mitigation: String,
}

/// Result of evaluating a payload against the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatEvaluation {
    pub is_threat: bool,
    pub risk_score: f64,
    /// Most severe matched pattern, if any
    pub matched_pattern: Option<String>,
    /// All matched pattern IDs
    pub matched_patterns: Vec<String>,
}

struct CompiledPattern {
    pattern: ThreatPattern,
    scanner: AhoCorasick,
    regex: Option<regex::Regex>,
}

struct Registry {
    patterns: Vec<CompiledPattern>,
    threshold: f64,
}

/// Rule-based matcher over a registry of [`ThreatPattern`]s
pub struct ThreatMatcher {
    registry: RwLock<Registry>,
}

fn severity_weight(severity: SecuritySeverity) -> f64 {
    match severity {
        SecuritySeverity::Low => 0.2,
        SecuritySeverity::Medium => 0.4,
        SecuritySeverity::High => 0.6,
        SecuritySeverity::Critical => 1.0,
    }
}

fn compile(pattern: ThreatPattern) -> Result<CompiledPattern, EngineError> {
    let scanner = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(&pattern.signatures)
        .map_err(|e| EngineError::InvalidInput {
            message: format!("pattern {}: {e}", pattern.id),
        })?;

    let regex = match &pattern.regex {
        Some(source) => Some(
            RegexBuilder::new(source)
                .case_insensitive(true)
                .build()
                .map_err(|e| EngineError::InvalidInput {
                    message: format!("pattern {}: {e}", pattern.id),
                })?,
        ),
        None => None,
    };

    Ok(CompiledPattern {
        pattern,
        scanner,
        regex,
    })
}

fn builtin_patterns() -> Vec<ThreatPattern> {
    vec![
        ThreatPattern {
            id: "sql-injection".to_string(),
            name: "SQL injection".to_string(),
            severity: SecuritySeverity::Critical,
            signatures: vec![
                "union select".to_string(),
                "drop table".to_string(),
                "insert into".to_string(),
                "delete from".to_string(),
                "' or '1'='1".to_string(),
                "or 1=1".to_string(),
                "xp_cmdshell".to_string(),
                "waitfor delay".to_string(),
            ],
            regex: None,
            description: "SQL keywords and tautologies in request data".to_string(),
            mitigation: "Use parameterized queries; reject the request".to_string(),
        },
        ThreatPattern {
            id: "script-injection".to_string(),
            name: "Script injection".to_string(),
            severity: SecuritySeverity::High,
            signatures: vec![
                "<script".to_string(),
                "javascript:".to_string(),
                "onerror=".to_string(),
                "onload=".to_string(),
                "document.cookie".to_string(),
                "<iframe".to_string(),
                "eval(".to_string(),
            ],
            regex: None,
            description: "Markup or script fragments aimed at the rendering layer".to_string(),
            mitigation: "Encode output and strip active content".to_string(),
        },
        ThreatPattern {
            id: "path-traversal".to_string(),
            name: "Path traversal".to_string(),
            severity: SecuritySeverity::High,
            signatures: vec![
                "../".to_string(),
                "..\\".to_string(),
                "%2e%2e%2f".to_string(),
                "%2e%2e/".to_string(),
                "....//".to_string(),
            ],
            regex: None,
            description: "Directory-escape sequences in paths or parameters".to_string(),
            mitigation: "Canonicalize paths and enforce a base-directory check".to_string(),
        },
        ThreatPattern {
            id: "shell-metacharacters".to_string(),
            name: "Shell metacharacters".to_string(),
            severity: SecuritySeverity::Medium,
            signatures: vec![
                "; rm ".to_string(),
                "$(".to_string(),
                "`".to_string(),
                "| sh".to_string(),
                "| bash".to_string(),
                "; wget ".to_string(),
                "; curl ".to_string(),
                "/etc/passwd".to_string(),
            ],
            regex: None,
            description: "Command-chaining and substitution sequences".to_string(),
            mitigation: "Never pass request data to a shell; use exec-style APIs".to_string(),
        },
    ]
}

impl ThreatMatcher {
    pub fn new() -> Self {
        Self::with_threshold(security::THREAT_SCORE_THRESHOLD)
    }

    pub fn with_threshold(threshold: f64) -> Self {
        let patterns = builtin_patterns()
            .into_iter()
            .map(|p| compile(p).unwrap())
            .collect();
        Self {
            registry: RwLock::new(Registry {
                patterns,
                threshold,
            }),
        }
    }

    /// Evaluate a payload against every registered pattern.
    ///
    /// A match on a critical-severity pattern is a threat unconditionally;
    /// lower-severity matches accumulate toward the threat threshold.
    pub async fn evaluate(&self, payload: &str) -> ThreatEvaluation {
        let registry = self.registry.read().await;

        let mut score = 0.0;
        let mut critical_hit = false;
        let mut matched: Vec<(&str, SecuritySeverity)> = Vec::new();

        for compiled in &registry.patterns {
            let hit = compiled.scanner.is_match(payload)
                || compiled
                    .regex
                    .as_ref()
                    .map(|r| r.is_match(payload))
                    .unwrap_or(false);
            if hit {
                score += severity_weight(compiled.pattern.severity);
                critical_hit |= compiled.pattern.severity == SecuritySeverity::Critical;
                matched.push((compiled.pattern.id.as_str(), compiled.pattern.severity));
            }
        }

        let risk_score = clamp_unit(score);
        let matched_pattern = matched
            .iter()
            .max_by_key(|(_, severity)| *severity)
            .map(|(id, _)| (*id).to_string());

        ThreatEvaluation {
            is_threat: critical_hit || risk_score >= registry.threshold,
            risk_score,
            matched_pattern,
            matched_patterns: matched.into_iter().map(|(id, _)| id.to_string()).collect(),
        }
    }

    /// Register a pattern, replacing any existing pattern with the same ID
    pub async fn register_pattern(&self, pattern: ThreatPattern) -> Result<(), EngineError> {
        let compiled = compile(pattern)?;
        let mut registry = self.registry.write().await;
        registry
            .patterns
            .retain(|p| p.pattern.id != compiled.pattern.id);
        registry.patterns.push(compiled);
        Ok(())
    }

    pub async fn remove_pattern(&self, id: &str) -> bool {
        let mut registry = self.registry.write().await;
        let before = registry.patterns.len();
        registry.patterns.retain(|p| p.pattern.id != id);
        registry.patterns.len() != before
    }

    pub async fn list_patterns(&self) -> Vec<ThreatPattern> {
        let registry = self.registry.read().await;
        registry.patterns.iter().map(|p| p.pattern.clone()).collect()
    }

    pub async fn set_threshold(&self, threshold: f64) {
        let mut registry = self.registry.write().await;
        registry.threshold = clamp_unit(threshold);
    }

    /// Restore the built-in pattern set
    pub async fn reset(&self) {
        let mut registry = self.registry.write().await;
        registry.patterns = builtin_patterns()
            .into_iter()
            .map(|p| compile(p).unwrap())
            .collect();
    }
}

impl Default for ThreatMatcher {
    fn default() -> Self {
        Self::new()
    }
}
