//! The declarative assertion language evaluated against observations.
//!
//! An assertion set is an ordered list of predicates; an observation passes
//! when every predicate holds. Predicates referencing data that is absent
//! (no leaf stored, analyzer never ran) evaluate false with a
//! `"<kind>: data unavailable"` diagnostic rather than erroring.

use crate::certificate::Certificate;
use crate::observation::Observation;
use crate::TlscopeError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Comparison operator of a validity predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
}

impl CmpOp {
    fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Gt => ">",
            CmpOp::Lt => "<",
            CmpOp::Ge => ">=",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
        }
    }
}

/// A comparator expression such as `">75d"`: an operator followed by an
/// integer duration with one of the units s, m, h, d, w.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparator {
    pub op: CmpOp,
    pub duration: Duration,
}

impl Comparator {
    /// Apply the comparator to a measured time delta.
    pub fn holds(&self, delta: Duration) -> bool {
        match self.op {
            CmpOp::Gt => delta > self.duration,
            CmpOp::Lt => delta < self.duration,
            CmpOp::Ge => delta >= self.duration,
            CmpOp::Le => delta <= self.duration,
            CmpOp::Eq => delta == self.duration,
        }
    }

    fn unit_and_count(&self) -> (i64, char) {
        let secs = self.duration.num_seconds();
        for (div, unit) in [(604_800, 'w'), (86_400, 'd'), (3_600, 'h'), (60, 'm')] {
            if secs != 0 && secs % div == 0 {
                return (secs / div, unit);
            }
        }
        (secs, 's')
    }
}

impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (count, unit) = self.unit_and_count();
        write!(f, "{}{}{}", self.op.as_str(), count, unit)
    }
}

impl FromStr for Comparator {
    type Err = TlscopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (op, rest) = if let Some(rest) = s.strip_prefix(">=") {
            (CmpOp::Ge, rest)
        } else if let Some(rest) = s.strip_prefix("<=") {
            (CmpOp::Le, rest)
        } else if let Some(rest) = s.strip_prefix("==") {
            (CmpOp::Eq, rest)
        } else if let Some(rest) = s.strip_prefix('>') {
            (CmpOp::Gt, rest)
        } else if let Some(rest) = s.strip_prefix('<') {
            (CmpOp::Lt, rest)
        } else {
            return Err(TlscopeError::AssertionSyntax(format!(
                "comparator {:?} must start with one of >, <, >=, <=, ==",
                s
            )));
        };

        let split = rest.len().saturating_sub(1);
        if !rest.is_char_boundary(split) {
            return Err(TlscopeError::AssertionSyntax(format!(
                "invalid duration unit in {:?} (expected one of s, m, h, d, w)",
                s
            )));
        }
        let (digits, unit) = rest.split_at(split);
        let count: i64 = digits.parse().map_err(|_| {
            TlscopeError::AssertionSyntax(format!("invalid duration count in {:?}", s))
        })?;
        let duration = match unit {
            "s" => Duration::try_seconds(count),
            "m" => Duration::try_minutes(count),
            "h" => Duration::try_hours(count),
            "d" => Duration::try_days(count),
            "w" => Duration::try_weeks(count),
            _ => {
                return Err(TlscopeError::AssertionSyntax(format!(
                    "invalid duration unit in {:?} (expected one of s, m, h, d, w)",
                    s
                )))
            }
        }
        .ok_or_else(|| {
            TlscopeError::AssertionSyntax(format!("duration out of range in {:?}", s))
        })?;

        Ok(Comparator { op, duration })
    }
}

impl Serialize for Comparator {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Comparator {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let s = String::deserialize(de)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One predicate, tagged by the key it carries in the assertion file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Assertion {
    /// `(notAfter − now) <op> duration`.
    #[serde(rename = "certificate.validity.notafter")]
    ValidityNotAfter(Comparator),
    /// `(now − notBefore) <op> duration`.
    #[serde(rename = "certificate.validity.notbefore")]
    ValidityNotBefore(Comparator),
    #[serde(rename = "certificate.subject.cn")]
    SubjectCn(String),
    #[serde(rename = "certificate.issuer.cn")]
    IssuerCn(String),
    /// Every listed name must appear in the leaf's SAN.
    #[serde(rename = "certificate.san")]
    San(Vec<String>),
    /// The named analyzer's output on this observation must contain every
    /// key/value of `result`; extra keys in the output are ignored.
    #[serde(rename = "analysis")]
    Analysis {
        analyzer: String,
        #[serde(deserialize_with = "deserialize_json_result")]
        result: serde_json::Value,
    },
}

impl Assertion {
    /// The assertion-file key, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Assertion::ValidityNotAfter(_) => "certificate.validity.notafter",
            Assertion::ValidityNotBefore(_) => "certificate.validity.notbefore",
            Assertion::SubjectCn(_) => "certificate.subject.cn",
            Assertion::IssuerCn(_) => "certificate.issuer.cn",
            Assertion::San(_) => "certificate.san",
            Assertion::Analysis { .. } => "analysis",
        }
    }
}

/// `result` may be inline structure or a string containing JSON.
fn deserialize_json_result<'de, D: serde::Deserializer<'de>>(
    de: D,
) -> Result<serde_json::Value, D::Error> {
    let value = serde_json::Value::deserialize(de)?;
    match value {
        serde_json::Value::String(s) => serde_json::from_str(&s).map_err(serde::de::Error::custom),
        other => Ok(other),
    }
}

/// Outcome of one predicate against one observation.
#[derive(Debug, Clone, Serialize)]
pub struct AssertionVerdict {
    pub kind: String,
    pub pass: bool,
    /// Empty on success.
    pub diagnostic: String,
}

impl AssertionVerdict {
    fn pass(kind: &str) -> Self {
        AssertionVerdict {
            kind: kind.to_string(),
            pass: true,
            diagnostic: String::new(),
        }
    }

    fn fail(kind: &str, diagnostic: impl Into<String>) -> Self {
        AssertionVerdict {
            kind: kind.to_string(),
            pass: false,
            diagnostic: diagnostic.into(),
        }
    }

    fn unavailable(kind: &str) -> Self {
        AssertionVerdict {
            kind: kind.to_string(),
            pass: false,
            diagnostic: format!("{}: data unavailable", kind),
        }
    }
}

/// Evaluate one predicate against an observation and its stored leaf.
pub fn evaluate_assertion(
    assertion: &Assertion,
    leaf: Option<&Certificate>,
    observation: &Observation,
    now: DateTime<Utc>,
) -> AssertionVerdict {
    let kind = assertion.kind();

    match assertion {
        Assertion::Analysis { analyzer, result } => {
            match observation.analysis.get(analyzer) {
                Some(output) => {
                    if json_subset(result, output) {
                        AssertionVerdict::pass(kind)
                    } else {
                        AssertionVerdict::fail(
                            kind,
                            format!("{} output does not contain expected result", analyzer),
                        )
                    }
                }
                None => AssertionVerdict::unavailable(kind),
            }
        }
        _ => {
            let Some(leaf) = leaf else {
                return AssertionVerdict::unavailable(kind);
            };
            evaluate_leaf_assertion(assertion, leaf, now)
        }
    }
}

fn evaluate_leaf_assertion(
    assertion: &Assertion,
    leaf: &Certificate,
    now: DateTime<Utc>,
) -> AssertionVerdict {
    let kind = assertion.kind();
    match assertion {
        Assertion::ValidityNotAfter(cmp) => {
            let delta = leaf.validity.not_after - now;
            if cmp.holds(delta) {
                AssertionVerdict::pass(kind)
            } else {
                AssertionVerdict::fail(
                    kind,
                    format!(
                        "notAfter − now is {}s, want {}",
                        delta.num_seconds(),
                        cmp
                    ),
                )
            }
        }
        Assertion::ValidityNotBefore(cmp) => {
            let delta = now - leaf.validity.not_before;
            if cmp.holds(delta) {
                AssertionVerdict::pass(kind)
            } else {
                AssertionVerdict::fail(
                    kind,
                    format!(
                        "now − notBefore is {}s, want {}",
                        delta.num_seconds(),
                        cmp
                    ),
                )
            }
        }
        Assertion::SubjectCn(cn) => {
            if leaf.subject.common_name == *cn {
                AssertionVerdict::pass(kind)
            } else {
                AssertionVerdict::fail(
                    kind,
                    format!("subject CN is {:?}, want {:?}", leaf.subject.common_name, cn),
                )
            }
        }
        Assertion::IssuerCn(cn) => {
            if leaf.issuer.common_name == *cn {
                AssertionVerdict::pass(kind)
            } else {
                AssertionVerdict::fail(
                    kind,
                    format!("issuer CN is {:?}, want {:?}", leaf.issuer.common_name, cn),
                )
            }
        }
        Assertion::San(names) => {
            let san = &leaf.extensions.subject_alternative_name;
            let missing: Vec<&String> = names.iter().filter(|n| !san.contains(n)).collect();
            if missing.is_empty() {
                AssertionVerdict::pass(kind)
            } else {
                AssertionVerdict::fail(
                    kind,
                    format!(
                        "missing from SAN: {}",
                        missing
                            .iter()
                            .map(|s| s.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                )
            }
        }
        Assertion::Analysis { .. } => unreachable!("analysis handled by evaluate_assertion"),
    }
}

/// Evaluate every predicate; the observation passes when all hold.
pub fn evaluate_all(
    assertions: &[Assertion],
    leaf: Option<&Certificate>,
    observation: &Observation,
    now: DateTime<Utc>,
) -> (bool, Vec<AssertionVerdict>) {
    let verdicts: Vec<AssertionVerdict> = assertions
        .iter()
        .map(|a| evaluate_assertion(a, leaf, observation, now))
        .collect();
    let pass = verdicts.iter().all(|v| v.pass);
    (pass, verdicts)
}

/// Structural subset: every key/value of `expected` must be present with an
/// equal value in `actual`; objects recurse, everything else compares by
/// equality. Extra keys in `actual` are ignored.
fn json_subset(expected: &serde_json::Value, actual: &serde_json::Value) -> bool {
    match (expected, actual) {
        (serde_json::Value::Object(want), serde_json::Value::Object(have)) => want
            .iter()
            .all(|(k, v)| have.get(k).map(|a| json_subset(v, a)).unwrap_or(false)),
        (want, have) => want == have,
    }
}
