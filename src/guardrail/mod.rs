//! Guardrail engine (C10): a plug-in registry of rules evaluated against a proposed change set
//! before rollout.
//!
//! Rules are registered as trait objects (`Box<dyn GuardrailRule>`) rather than an enum, so new
//! rules extend the set by registration instead of a match-arm edit.

use std::collections::HashSet;

use thiserror::Error;
use tracing::warn;

use crate::rpki::ValidationState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strictness {
    Low,
    Medium,
    High,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Autonomous,
    OperatorConfirmed,
}

#[derive(Error, Debug)]
pub enum GuardrailError {
    #[error("rpki is enabled but the mandatory 'rpki_validation' rule is not in the active rule set")]
    MissingMandatoryRpkiRule,
}

/// The prefixes a proposed rollout adds or removes, plus the RPKI state of anything added.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub as_number: u32,
    pub added_prefixes: Vec<String>,
    pub removed_prefixes: Vec<String>,
    pub rpki_states: Vec<(String, ValidationState, bool)>,
    pub sessions_affected_estimate: usize,
}

#[derive(Debug, Clone)]
pub struct RuleContext {
    pub rpki_enabled: bool,
    pub prefix_count_threshold: usize,
    pub bogon_prefixes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub rule_name: &'static str,
    pub ok: bool,
    pub issues: Vec<String>,
    pub risk_contribution: RiskLevel,
}

pub trait GuardrailRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn strictness(&self) -> Strictness;
    fn mandatory(&self) -> bool {
        false
    }
    fn evaluate(&self, change_set: &ChangeSet, context: &RuleContext) -> RuleOutcome;
}

pub struct PrefixCountRule;
impl GuardrailRule for PrefixCountRule {
    fn name(&self) -> &'static str {
        "prefix_count"
    }
    fn strictness(&self) -> Strictness {
        Strictness::Medium
    }
    fn evaluate(&self, change_set: &ChangeSet, context: &RuleContext) -> RuleOutcome {
        let count = change_set.added_prefixes.len();
        if count > context.prefix_count_threshold {
            RuleOutcome {
                rule_name: self.name(),
                ok: false,
                issues: vec![format!("{count} prefixes exceeds threshold {}", context.prefix_count_threshold)],
                risk_contribution: RiskLevel::Medium,
            }
        } else {
            RuleOutcome { rule_name: self.name(), ok: true, issues: vec![], risk_contribution: RiskLevel::Low }
        }
    }
}

pub struct BogonCheckRule;
impl GuardrailRule for BogonCheckRule {
    fn name(&self) -> &'static str {
        "bogon_check"
    }
    fn strictness(&self) -> Strictness {
        Strictness::High
    }
    fn evaluate(&self, change_set: &ChangeSet, context: &RuleContext) -> RuleOutcome {
        let bogons: HashSet<&str> = context.bogon_prefixes.iter().map(String::as_str).collect();
        let hits: Vec<String> = change_set.added_prefixes.iter().filter(|p| bogons.contains(p.as_str())).cloned().collect();
        if hits.is_empty() {
            RuleOutcome { rule_name: self.name(), ok: true, issues: vec![], risk_contribution: RiskLevel::Low }
        } else {
            RuleOutcome {
                rule_name: self.name(),
                ok: false,
                issues: hits.into_iter().map(|p| format!("{p} intersects the bogon list")).collect(),
                risk_contribution: RiskLevel::Critical,
            }
        }
    }
}

pub struct RpkiValidationRule;
impl GuardrailRule for RpkiValidationRule {
    fn name(&self) -> &'static str {
        "rpki_validation"
    }
    fn strictness(&self) -> Strictness {
        Strictness::Strict
    }
    fn mandatory(&self) -> bool {
        true
    }
    fn evaluate(&self, change_set: &ChangeSet, _context: &RuleContext) -> RuleOutcome {
        let invalid_unshielded: Vec<String> = change_set
            .rpki_states
            .iter()
            .filter(|(_, state, allowlisted)| *state == ValidationState::Invalid && !allowlisted)
            .map(|(prefix, _, _)| prefix.clone())
            .collect();
        if invalid_unshielded.is_empty() {
            RuleOutcome { rule_name: self.name(), ok: true, issues: vec![], risk_contribution: RiskLevel::Low }
        } else {
            RuleOutcome {
                rule_name: self.name(),
                ok: false,
                issues: invalid_unshielded.into_iter().map(|p| format!("{p} is RPKI INVALID and not allowlisted")).collect(),
                risk_contribution: RiskLevel::High,
            }
        }
    }
}

pub struct SessionImpactRule {
    pub threshold: usize,
}
impl GuardrailRule for SessionImpactRule {
    fn name(&self) -> &'static str {
        "session_impact"
    }
    fn strictness(&self) -> Strictness {
        Strictness::Medium
    }
    fn evaluate(&self, change_set: &ChangeSet, _context: &RuleContext) -> RuleOutcome {
        if change_set.sessions_affected_estimate > self.threshold {
            RuleOutcome {
                rule_name: self.name(),
                ok: false,
                issues: vec![format!("estimated {} sessions affected exceeds {}", change_set.sessions_affected_estimate, self.threshold)],
                risk_contribution: RiskLevel::Medium,
            }
        } else {
            RuleOutcome { rule_name: self.name(), ok: true, issues: vec![], risk_contribution: RiskLevel::Low }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuardrailReport {
    pub safe: bool,
    pub risk_level: RiskLevel,
    pub issues: Vec<String>,
    pub auto_apply: bool,
}

pub struct GuardrailEngine {
    rules: Vec<Box<dyn GuardrailRule>>,
}

impl GuardrailEngine {
    pub fn new(rules: Vec<Box<dyn GuardrailRule>>) -> Self {
        Self { rules }
    }

    /// Rejects the configuration before the engine ever runs if RPKI is enabled but the
    /// mandatory `rpki_validation` rule is absent from the active set.
    pub fn validate_config(&self, rpki_enabled: bool) -> Result<(), GuardrailError> {
        if rpki_enabled && !self.rules.iter().any(|r| r.name() == "rpki_validation") {
            return Err(GuardrailError::MissingMandatoryRpkiRule);
        }
        Ok(())
    }

    pub fn evaluate(&self, change_set: &ChangeSet, context: &RuleContext, mode: Mode) -> GuardrailReport {
        let mut issues = Vec::new();
        let mut risk_level = RiskLevel::Low;
        let mut mandatory_passed = true;

        for rule in &self.rules {
            let outcome = rule.evaluate(change_set, context);
            if !outcome.ok {
                issues.extend(outcome.issues.clone());
                if rule.mandatory() {
                    mandatory_passed = false;
                }
                warn!(rule = outcome.rule_name, issues = ?outcome.issues, "guardrail rule flagged issues");
            }
            risk_level = risk_level.max(outcome.risk_contribution);
        }

        let safe = issues.is_empty();
        let auto_apply = safe && risk_level == RiskLevel::Low && mode == Mode::Autonomous && mandatory_passed;

        GuardrailReport { safe, risk_level, issues, auto_apply }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RuleContext {
        RuleContext { rpki_enabled: true, prefix_count_threshold: 100, bogon_prefixes: vec!["0.0.0.0/8".to_string()] }
    }

    fn default_rules() -> Vec<Box<dyn GuardrailRule>> {
        vec![Box::new(PrefixCountRule), Box::new(BogonCheckRule), Box::new(RpkiValidationRule), Box::new(SessionImpactRule { threshold: 50 })]
    }

    #[test]
    fn missing_mandatory_rpki_rule_is_a_config_error() {
        let engine = GuardrailEngine::new(vec![Box::new(PrefixCountRule)]);
        assert!(matches!(engine.validate_config(true), Err(GuardrailError::MissingMandatoryRpkiRule)));
        assert!(engine.validate_config(false).is_ok());
    }

    #[test]
    fn clean_change_set_is_safe_and_auto_applies_in_autonomous_mode() {
        let engine = GuardrailEngine::new(default_rules());
        let change_set = ChangeSet { as_number: 65001, added_prefixes: vec!["203.0.113.0/24".to_string()], ..Default::default() };
        let report = engine.evaluate(&change_set, &context(), Mode::Autonomous);
        assert!(report.safe);
        assert_eq!(report.risk_level, RiskLevel::Low);
        assert!(report.auto_apply);
    }

    #[test]
    fn bogon_prefix_is_never_auto_applied() {
        let engine = GuardrailEngine::new(default_rules());
        let change_set = ChangeSet { as_number: 65001, added_prefixes: vec!["0.0.0.0/8".to_string()], ..Default::default() };
        let report = engine.evaluate(&change_set, &context(), Mode::Autonomous);
        assert!(!report.safe);
        assert_eq!(report.risk_level, RiskLevel::Critical);
        assert!(!report.auto_apply);
    }

    #[test]
    fn unshielded_invalid_rpki_blocks_mandatory_rule() {
        let engine = GuardrailEngine::new(default_rules());
        let change_set = ChangeSet {
            as_number: 65001,
            added_prefixes: vec!["203.0.113.0/24".to_string()],
            rpki_states: vec![("203.0.113.0/24".to_string(), ValidationState::Invalid, false)],
            ..Default::default()
        };
        let report = engine.evaluate(&change_set, &context(), Mode::Autonomous);
        assert!(!report.auto_apply);
    }

    #[test]
    fn operator_confirmed_mode_never_auto_applies() {
        let engine = GuardrailEngine::new(default_rules());
        let change_set = ChangeSet { as_number: 65001, added_prefixes: vec!["203.0.113.0/24".to_string()], ..Default::default() };
        let report = engine.evaluate(&change_set, &context(), Mode::OperatorConfirmed);
        assert!(report.safe);
        assert!(!report.auto_apply);
    }
}
