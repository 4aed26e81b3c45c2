//! Environment configuration and the per-invocation input.

use std::path::PathBuf;

use serde::Deserialize;

use crate::parse::Marketplace;
use crate::{Error, Result, DEFAULT_LEDGER_CAPACITY};

/// SMTP credentials for the email notifier.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub source_email: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub marketplace: Marketplace,
    pub ledger_dir: PathBuf,
    pub ledger_capacity: usize,
    pub analytics_dir: PathBuf,
    pub smtp: Option<SmtpConfig>,
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Marketplace::default();

        let marketplace = Marketplace {
            search_base: var("MARKETPLACE_BASE_URL").unwrap_or(defaults.search_base),
            link_base: var("MARKETPLACE_LINK_BASE").unwrap_or(defaults.link_base),
            currency_symbol: var("CURRENCY_SYMBOL").unwrap_or(defaults.currency_symbol),
            ..defaults
        };

        let ledger_capacity = match var("LEDGER_CAPACITY") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| {
                    Error::Config(format!("LEDGER_CAPACITY must be a positive integer, got {raw:?}"))
                })?,
            None => DEFAULT_LEDGER_CAPACITY,
        };

        let smtp = match (
            var("SMTP_HOST"),
            var("SMTP_USER"),
            var("SMTP_PASS"),
            var("SOURCE_EMAIL"),
        ) {
            (Some(host), Some(user), Some(password), Some(source_email)) => Some(SmtpConfig {
                host,
                user,
                password,
                source_email,
            }),
            _ => None,
        };

        Ok(Self {
            marketplace,
            ledger_dir: var("LEDGER_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".offerwatch/ledger")),
            ledger_capacity,
            analytics_dir: var("ANALYTICS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".offerwatch/analytics")),
            smtp,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Email,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NotificationTarget {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub targets: Vec<String>,
}

/// What one run should do, as handed over by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationInput {
    pub search_query: String,
    #[serde(default)]
    pub notifications: Vec<NotificationTarget>,
    #[serde(default)]
    pub notification_targets: Vec<String>,
    #[serde(default)]
    pub rate_in_minutes: Option<String>,
    #[serde(default)]
    pub store_for_analytics: bool,
    #[serde(default, alias = "analyticsS3Prefix")]
    pub analytics_prefix: Option<String>,
}

impl InvocationInput {
    pub fn from_json(raw: &str) -> Result<Self> {
        let input: Self = serde_json::from_str(raw)?;
        input.validate()?;
        Ok(input)
    }

    pub fn validate(&self) -> Result<()> {
        if self.search_query.trim().is_empty() {
            return Err(Error::InvalidInput("searchQuery must not be empty".into()));
        }
        if let Some(group) = self.notifications.iter().position(|n| n.targets.is_empty()) {
            return Err(Error::InvalidInput(format!(
                "notifications[{group}].targets must not be empty"
            )));
        }
        Ok(())
    }

    /// Every email destination of this run, first occurrence kept.
    pub fn notification_targets(&self) -> Vec<String> {
        let grouped = self
            .notifications
            .iter()
            .filter(|n| n.kind == NotificationKind::Email)
            .flat_map(|n| n.targets.iter());

        let mut targets: Vec<String> = Vec::new();
        for target in grouped.chain(self.notification_targets.iter()) {
            let target = target.trim();
            if !target.is_empty() && !targets.iter().any(|t| t == target) {
                targets.push(target.to_string());
            }
        }
        targets
    }
}
