//! Scan runs: configuration, scheduling seams, and the per-target task
//! pipeline.
//!
//! A run is `(targets, assertions, cron, notifications)`. The cron engine
//! and the notification transport are external; this module validates the
//! cron expression, drives one scan task per target with a deadline, and
//! hands failed assertions to the [`NotificationSink`].

use crate::assertion::{evaluate_all, Assertion, AssertionVerdict};
use crate::certificate::Chain;
use crate::observation::{CertificateStore, Observation, ObservationBuilder};
use crate::truststore::TrustStoreSet;
use crate::util;
use crate::validate::validate_chain;
use crate::TlscopeError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A validated 5-field cron expression. Scheduling itself is delegated to
/// an external timer; only the shape is checked here so that a bad run
/// definition fails at load time rather than at the first tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr(String);

impl CronExpr {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CronExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CronExpr {
    type Err = TlscopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(TlscopeError::AssertionSyntax(format!(
                "cron expression {:?} must have 5 fields, has {}",
                s,
                fields.len()
            )));
        }
        for field in &fields {
            if !field
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | '/' | ',' | '-'))
            {
                return Err(TlscopeError::AssertionSyntax(format!(
                    "invalid cron field {:?} in {:?}",
                    field, s
                )));
            }
        }
        Ok(CronExpr(fields.join(" ")))
    }
}

impl Serialize for CronExpr {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CronExpr {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let s = String::deserialize(de)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailNotification {
    #[serde(default)]
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notifications {
    #[serde(default)]
    pub email: EmailNotification,
}

/// One scheduled scan run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub targets: Vec<String>,
    pub assertions: Vec<Assertion>,
    pub cron: CronExpr,
    #[serde(default)]
    pub notifications: Notifications,
}

/// The top-level assertion file: a list of runs.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RunConfig {
    pub runs: Vec<Run>,
    /// Parse failures for individual runs, reported and skipped. A bad run
    /// never takes the others down.
    #[serde(skip)]
    pub skipped: Vec<String>,
}

impl RunConfig {
    /// Parse an assertion file. Each run is decoded independently so a
    /// syntax error is fatal only to its enclosing run.
    pub fn from_yaml(data: &str) -> Result<RunConfig, TlscopeError> {
        #[derive(Deserialize)]
        struct RawConfig {
            #[serde(default)]
            runs: Vec<serde_yaml::Value>,
        }

        let raw: RawConfig = serde_yaml::from_str(data)?;
        let mut config = RunConfig::default();

        for (i, value) in raw.runs.into_iter().enumerate() {
            match serde_yaml::from_value::<Run>(value).map_err(TlscopeError::from) {
                Ok(mut run) => match decode_recipients(&mut run.notifications.email.recipients) {
                    Ok(()) => config.runs.push(run),
                    Err(e) => {
                        warn!("skipping run {}: {}", i, e);
                        config.skipped.push(format!("run {}: {}", i, e));
                    }
                },
                Err(e) => {
                    warn!("skipping run {}: {}", i, e);
                    config.skipped.push(format!("run {}: {}", i, e));
                }
            }
        }

        Ok(config)
    }
}

/// Load and parse an assertion file from disk.
pub fn load_run_config(path: &Path) -> Result<RunConfig, TlscopeError> {
    let data = std::fs::read_to_string(path)?;
    RunConfig::from_yaml(&data)
}

/// Decode `b64:`-prefixed recipient addresses in place.
fn decode_recipients(recipients: &mut [String]) -> Result<(), TlscopeError> {
    for recipient in recipients.iter_mut() {
        if let Some(encoded) = recipient.strip_prefix("b64:") {
            let decoded = util::base64_decode(encoded).map_err(|e| {
                TlscopeError::AssertionSyntax(format!("recipient {:?}: {}", recipient, e))
            })?;
            *recipient = String::from_utf8(decoded).map_err(|e| {
                TlscopeError::AssertionSyntax(format!("recipient is not UTF-8: {}", e))
            })?;
        }
    }
    Ok(())
}

/// The external scanner: opens the TLS connection and returns the observed
/// chain for a target.
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn scan(&self, target: &str) -> Result<Chain, TlscopeError>;
}

/// The external notification transport.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), TlscopeError>;
}

/// Result of one (target, scan) task.
#[derive(Debug, Serialize)]
pub struct ScanOutcome {
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<Observation>,
    /// None when the scan never got as far as evaluation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<bool>,
    pub verdicts: Vec<AssertionVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Drives scan runs: one parallel task per target, each with a deadline.
pub struct Runner {
    scanner: Arc<dyn Scanner>,
    store: Arc<dyn CertificateStore>,
    sink: Arc<dyn NotificationSink>,
    trust_stores: Arc<TrustStoreSet>,
    deadline: Duration,
}

impl Runner {
    pub fn new(
        scanner: Arc<dyn Scanner>,
        store: Arc<dyn CertificateStore>,
        sink: Arc<dyn NotificationSink>,
        trust_stores: Arc<TrustStoreSet>,
        deadline: Duration,
    ) -> Self {
        Runner {
            scanner,
            store,
            sink,
            trust_stores,
            deadline,
        }
    }

    /// Execute one run: scan every target in parallel, evaluate the run's
    /// assertions against each observation, notify on failures. One
    /// target's failure never prevents the others.
    pub async fn execute_run(&self, run: &Run) -> Vec<ScanOutcome> {
        let mut tasks = tokio::task::JoinSet::new();

        for target in &run.targets {
            let target = target.clone();
            let assertions = run.assertions.clone();
            let scanner = Arc::clone(&self.scanner);
            let store = Arc::clone(&self.store);
            let trust_stores = Arc::clone(&self.trust_stores);
            let deadline = self.deadline;

            tasks.spawn(async move {
                let deadline_secs = deadline.as_secs();
                match tokio::time::timeout(
                    deadline,
                    scan_target(&target, &assertions, &*scanner, &*store, &trust_stores),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    // Expiry cancels the task at its next suspension point;
                    // persistence happens after the last one, so nothing
                    // partial is ever durable.
                    Err(_) => ScanOutcome {
                        target: target.clone(),
                        observation: None,
                        pass: None,
                        verdicts: Vec::new(),
                        error: Some(
                            TlscopeError::Timeout {
                                target,
                                seconds: deadline_secs,
                            }
                            .to_string(),
                        ),
                    },
                }
            });
        }

        let mut outcomes = Vec::with_capacity(run.targets.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("scan task panicked: {}", e),
            }
        }

        for outcome in &outcomes {
            if outcome.pass == Some(false) {
                self.notify_failure(run, outcome).await;
            }
        }

        outcomes
    }

    async fn notify_failure(&self, run: &Run, outcome: &ScanOutcome) {
        let recipients = &run.notifications.email.recipients;
        if recipients.is_empty() {
            return;
        }
        let subject = format!("assertions failed for {}", outcome.target);
        let body = serde_json::to_string_pretty(&outcome.verdicts).unwrap_or_default();
        if let Err(e) = self.sink.notify(recipients, &subject, &body).await {
            warn!(target = %outcome.target, "failed to deliver notification: {}", e);
        }
    }
}

/// The sequential per-target pipeline: scan, validate, record, evaluate.
async fn scan_target(
    target: &str,
    assertions: &[Assertion],
    scanner: &dyn Scanner,
    store: &dyn CertificateStore,
    trust_stores: &TrustStoreSet,
) -> ScanOutcome {
    let fail = |error: String| ScanOutcome {
        target: target.to_string(),
        observation: None,
        pass: None,
        verdicts: Vec::new(),
        error: Some(error),
    };

    let chain = match scanner.scan(target).await {
        Ok(chain) => chain,
        Err(e) => return fail(e.to_string()),
    };

    let now = Utc::now();
    let validated = match validate_chain(&chain, trust_stores, now) {
        Ok(validated) => validated,
        Err(e) => return fail(e.to_string()),
    };

    let observation = match ObservationBuilder::new(store).record(&chain, &validated) {
        Ok(observation) => observation,
        Err(e) => return fail(e.to_string()),
    };

    let leaf = match store.get(&observation.leaf_sha256) {
        Ok(leaf) => leaf,
        Err(e) => return fail(e.to_string()),
    };

    let (pass, verdicts) = evaluate_all(assertions, leaf.as_ref(), &observation, now);
    info!(target, pass, verdicts = verdicts.len(), "scan complete");

    ScanOutcome {
        target: target.to_string(),
        observation: Some(observation),
        pass: Some(pass),
        verdicts,
        error: None,
    }
}
