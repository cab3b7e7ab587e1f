//! The small assertion DSL the LLM-assisted verifier cross-checks its own
//! verdict against (spec §4.6). Four ops: `regex_contains`, `contains`,
//! `not_contains`, `number_delta`.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// One entry of an LLM-proposed assertion program.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Assertion {
    RegexContains {
        pattern: String,
        #[serde(default)]
        flags: Vec<String>,
    },
    Contains {
        #[serde(alias = "string")]
        pattern: String,
    },
    NotContains {
        #[serde(alias = "string")]
        pattern: String,
    },
    NumberDelta {
        pattern_before: String,
        pattern_after: String,
        #[serde(default)]
        flags: Vec<String>,
        #[serde(default)]
        comparator: Comparator,
        #[serde(default)]
        delta: f64,
    },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    Lt,
    Gt,
    #[default]
    Eq,
}

/// Result of running one assertion against a log.
#[derive(Debug, Clone, PartialEq)]
pub struct AssertionOutcome {
    pub success: bool,
    pub op: String,
    pub details: String,
}

fn build_regex(pattern: &str, flags: &[String]) -> Option<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags {
        match flag.as_str() {
            "i" => {
                builder.case_insensitive(true);
            }
            "m" => {
                builder.multi_line(true);
            }
            "s" => {
                builder.dot_matches_new_line(true);
            }
            _ => {}
        }
    }
    builder.build().ok()
}

fn extract_numeric(re: &Regex, log_text: &str) -> Option<f64> {
    let caps = re.captures(log_text)?;
    for idx in 1..caps.len() {
        if let Some(m) = caps.get(idx) {
            if let Ok(v) = m.as_str().parse::<f64>() {
                return Some(v);
            }
        }
    }
    caps.get(0)?.as_str().parse::<f64>().ok()
}

/// Evaluates one assertion against `log_text`, returning pass/fail plus a
/// human-readable evidence line.
pub fn run_assertion(log_text: &str, assertion: &Assertion) -> AssertionOutcome {
    match assertion {
        Assertion::RegexContains { pattern, flags } => {
            let Some(re) = build_regex(pattern, flags) else {
                return AssertionOutcome {
                    success: false,
                    op: "regex_contains".to_string(),
                    details: format!("invalid regex pattern: {pattern}"),
                };
            };
            let found = re.is_match(log_text);
            AssertionOutcome {
                success: found,
                op: "regex_contains".to_string(),
                details: format!(
                    "pattern={}: {pattern}",
                    if found { "found" } else { "missing" }
                ),
            }
        }
        Assertion::Contains { pattern } => {
            let success = log_text.contains(pattern.as_str());
            AssertionOutcome {
                success,
                op: "contains".to_string(),
                details: format!("substring={}", if success { "found" } else { "missing" }),
            }
        }
        Assertion::NotContains { pattern } => {
            let success = !log_text.contains(pattern.as_str());
            AssertionOutcome {
                success,
                op: "not_contains".to_string(),
                details: format!("substring={}", if success { "absent" } else { "present" }),
            }
        }
        Assertion::NumberDelta {
            pattern_before,
            pattern_after,
            flags,
            comparator,
            delta,
        } => {
            let op = "number_delta".to_string();
            let (Some(before_re), Some(after_re)) =
                (build_regex(pattern_before, flags), build_regex(pattern_after, flags))
            else {
                return AssertionOutcome {
                    success: false,
                    op,
                    details: "invalid regex in number_delta".to_string(),
                };
            };
            let before = extract_numeric(&before_re, log_text);
            let after = extract_numeric(&after_re, log_text);
            let (Some(before), Some(after)) = (before, after) else {
                return AssertionOutcome {
                    success: false,
                    op,
                    details: "unable to parse numeric values".to_string(),
                };
            };
            let observed = after - before;
            let success = match comparator {
                Comparator::Lt => observed < *delta,
                Comparator::Gt => observed > *delta,
                Comparator::Eq => observed == *delta,
            };
            AssertionOutcome {
                success,
                op,
                details: format!(
                    "delta={observed} comparator={comparator:?} target={delta}",
                    comparator = comparator
                ),
            }
        }
    }
}

/// Runs a whole proposed assertion program; empty programs trivially pass
/// (mirrors the Python reference: `if not program: return True, []`).
pub fn run_assertions(log_text: &str, program: &[Assertion]) -> (bool, Vec<AssertionOutcome>) {
    if program.is_empty() {
        return (true, Vec::new());
    }
    let outcomes: Vec<AssertionOutcome> =
        program.iter().map(|a| run_assertion(log_text, a)).collect();
    let overall = outcomes.iter().all(|o| o.success);
    (overall, outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_passes_when_substring_present() {
        let outcome = run_assertion("exploit succeeded: FLAG{abc}", &Assertion::Contains {
            pattern: "FLAG{abc}".to_string(),
        });
        assert!(outcome.success);
    }

    #[test]
    fn not_contains_fails_when_substring_present() {
        let outcome = run_assertion("error: denied", &Assertion::NotContains {
            pattern: "denied".to_string(),
        });
        assert!(!outcome.success);
    }

    #[test]
    fn regex_contains_respects_case_insensitive_flag() {
        let outcome = run_assertion("UNION select * from users", &Assertion::RegexContains {
            pattern: "union select".to_string(),
            flags: vec!["i".to_string()],
        });
        assert!(outcome.success);
    }

    #[test]
    fn number_delta_lt_detects_decrease() {
        let log = "balance_before=100\nbalance_after=40";
        let outcome = run_assertion(
            log,
            &Assertion::NumberDelta {
                pattern_before: r"balance_before=(\d+)".to_string(),
                pattern_after: r"balance_after=(\d+)".to_string(),
                flags: vec![],
                comparator: Comparator::Lt,
                delta: -30.0,
            },
        );
        assert!(outcome.success, "{outcome:?}");
    }

    #[test]
    fn number_delta_eq_defaults_to_zero_target() {
        let log = "count_before=5\ncount_after=5";
        let outcome = run_assertion(
            log,
            &Assertion::NumberDelta {
                pattern_before: r"count_before=(\d+)".to_string(),
                pattern_after: r"count_after=(\d+)".to_string(),
                flags: vec![],
                comparator: Comparator::Eq,
                delta: 0.0,
            },
        );
        assert!(outcome.success);
    }

    #[test]
    fn empty_program_trivially_passes() {
        let (ok, outcomes) = run_assertions("anything", &[]);
        assert!(ok);
        assert!(outcomes.is_empty());
    }

    #[test]
    fn overall_fails_if_any_assertion_fails() {
        let program = vec![
            Assertion::Contains { pattern: "ok".to_string() },
            Assertion::Contains { pattern: "missing-thing".to_string() },
        ];
        let (ok, outcomes) = run_assertions("ok", &program);
        assert!(!ok);
        assert_eq!(outcomes.len(), 2);
    }
}
