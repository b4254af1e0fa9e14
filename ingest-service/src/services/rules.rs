//! Rule evaluation: classifies one canonical record against the
//! system-of-record and the duplicate counters.
//!
//! Pure logic, no I/O. Rules are walked in ascending priority and the
//! first rule whose condition holds determines the outcome, which makes
//! every classification reproducible and explainable.

use crate::models::{CanonicalInput, MatchRule, MatchStatus, RuleConfig, RuleType, SystemRecord};

/// Default relative amount variance for partial matches.
pub const DEFAULT_AMOUNT_VARIANCE: f64 = 0.02;

/// Result of evaluating the rule set for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub status: MatchStatus,
    pub mismatches: Vec<String>,
}

fn unmatched() -> Evaluation {
    Evaluation {
        status: MatchStatus::Unmatched,
        mismatches: vec!["transactionId".to_string(), "amount".to_string()],
    }
}

fn field_equal(candidate: &CanonicalInput, system: &SystemRecord, field: &str) -> bool {
    match field {
        "transactionId" => candidate.transaction_id == system.transaction_id,
        "amount" => candidate.amount == system.amount,
        "referenceNumber" => candidate.reference_number == system.reference_number,
        "date" => candidate.date == system.record_date,
        _ => false,
    }
}

/// Evaluate `rules` (active, ascending priority) for one candidate.
///
/// `duplicate_count` counts records sharing the duplicate tuple within the
/// candidate's own job; `duplicate_count_global` counts them across all
/// jobs. Both include the candidate itself.
///
/// Total: every record receives exactly one status. If no rule fires
/// (a misconfigured rule set without an active unmatched fallback), the
/// engine itself falls back to unmatched.
pub fn evaluate(
    candidate: &CanonicalInput,
    system: Option<&SystemRecord>,
    duplicate_count: i64,
    duplicate_count_global: i64,
    rules: &[MatchRule],
) -> Evaluation {
    for rule in rules {
        match rule.rule_type() {
            RuleType::Duplicate => {
                if duplicate_count > 1 || duplicate_count_global > 1 {
                    return Evaluation {
                        status: MatchStatus::Duplicate,
                        mismatches: vec![],
                    };
                }
            }
            RuleType::Exact => {
                let Some(system) = system else { continue };
                let fields = rule.config.match_fields.as_deref().unwrap_or_default();
                if fields.iter().all(|f| field_equal(candidate, system, f)) {
                    return Evaluation {
                        status: MatchStatus::Exact,
                        mismatches: vec![],
                    };
                }
            }
            RuleType::Partial => {
                let Some(system) = system else { continue };
                let Some(match_field) = rule.config.match_field.as_deref() else {
                    continue;
                };
                let tolerance = rule
                    .config
                    .amount_variance_percent
                    .unwrap_or(DEFAULT_AMOUNT_VARIANCE);
                if field_equal(candidate, system, match_field) {
                    let divisor = if system.amount == 0.0 { 1.0 } else { system.amount };
                    let variance = (candidate.amount - system.amount).abs() / divisor;
                    if variance <= tolerance {
                        return Evaluation {
                            status: MatchStatus::Partial,
                            mismatches: vec!["amount".to_string()],
                        };
                    }
                }
            }
            RuleType::Unmatched => return unmatched(),
        }
    }

    unmatched()
}

/// Seed definition for one of the default rules.
#[derive(Debug, Clone)]
pub struct RuleSeed {
    pub name: &'static str,
    pub rule_type: RuleType,
    pub priority: i64,
    pub config: RuleConfig,
}

/// The rule set installed when the rules table is empty: duplicate
/// detection first, exact match on transaction id + amount, partial match
/// on reference number within 2%, and the mandatory unmatched fallback.
pub fn default_rules() -> Vec<RuleSeed> {
    vec![
        RuleSeed {
            name: "Duplicate Transaction ID",
            rule_type: RuleType::Duplicate,
            priority: 1,
            config: RuleConfig::default(),
        },
        RuleSeed {
            name: "Exact Match (Transaction ID + Amount)",
            rule_type: RuleType::Exact,
            priority: 2,
            config: RuleConfig {
                match_fields: Some(vec!["transactionId".to_string(), "amount".to_string()]),
                ..Default::default()
            },
        },
        RuleSeed {
            name: "Partial Match (Reference Number, Amount ±2%)",
            rule_type: RuleType::Partial,
            priority: 3,
            config: RuleConfig {
                match_field: Some("referenceNumber".to_string()),
                amount_variance_percent: Some(DEFAULT_AMOUNT_VARIANCE),
                ..Default::default()
            },
        },
        RuleSeed {
            name: "Unmatched Fallback",
            rule_type: RuleType::Unmatched,
            priority: 99,
            config: RuleConfig::default(),
        },
    ]
}
