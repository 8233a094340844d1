//! Job launch parameters.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::LaunchError;

/// Mandatory parameter of every daily job.
pub const PROCESSING_DATE: &str = "processing_date";

/// Typed parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum JobParameterValue {
    String(String),
    Long(i64),
    Date(NaiveDate),
}

impl JobParameterValue {
    fn type_tag(&self) -> &'static str {
        match self {
            JobParameterValue::String(_) => "string",
            JobParameterValue::Long(_) => "long",
            JobParameterValue::Date(_) => "date",
        }
    }

    /// Infer the type of a raw command-line value: a date, then an integer,
    /// then a plain string.
    pub fn infer(raw: &str) -> Self {
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            JobParameterValue::Date(date)
        } else if let Ok(n) = raw.parse::<i64>() {
            JobParameterValue::Long(n)
        } else {
            JobParameterValue::String(raw.to_string())
        }
    }
}

impl core::fmt::Display for JobParameterValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            JobParameterValue::String(s) => f.write_str(s),
            JobParameterValue::Long(n) => write!(f, "{n}"),
            JobParameterValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// A parameter and whether it takes part in the instance identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: JobParameterValue,
    pub identifying: bool,
}

/// Flat, ordered key → typed value map.
///
/// Identifying parameters define the job instance: two launches with the same
/// job name and the same identifying parameters address the same instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameters {
    params: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    fn with(mut self, key: impl Into<String>, value: JobParameterValue, identifying: bool) -> Self {
        self.params.insert(key.into(), JobParameter { value, identifying });
        self
    }

    pub fn with_string(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(key, JobParameterValue::String(value.into()), true)
    }

    pub fn with_long(self, key: impl Into<String>, value: i64) -> Self {
        self.with(key, JobParameterValue::Long(value), true)
    }

    pub fn with_date(self, key: impl Into<String>, value: NaiveDate) -> Self {
        self.with(key, JobParameterValue::Date(value), true)
    }

    pub fn with_processing_date(self, value: NaiveDate) -> Self {
        self.with_date(PROCESSING_DATE, value)
    }

    /// Add a parameter that is passed to the job but does not change its identity.
    pub fn with_non_identifying(self, key: impl Into<String>, value: JobParameterValue) -> Self {
        self.with(key, value, false)
    }

    /// Parse a `key=value` assignment, inferring the value type.
    pub fn with_assignment(self, assignment: &str) -> Result<Self, LaunchError> {
        let (key, raw) = assignment
            .split_once('=')
            .filter(|(k, _)| !k.trim().is_empty())
            .ok_or_else(|| LaunchError::InvalidParameter {
                name: assignment.to_string(),
                reason: "expected key=value".to_string(),
            })?;
        Ok(self.with(key.trim(), JobParameterValue::infer(raw.trim()), true))
    }

    pub fn get(&self, key: &str) -> Option<&JobParameterValue> {
        self.params.get(key).map(|p| &p.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobParameter)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(JobParameterValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn long(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(JobParameterValue::Long(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn date(&self, key: &str) -> Option<NaiveDate> {
        match self.get(key) {
            Some(JobParameterValue::Date(d)) => Some(*d),
            _ => None,
        }
    }

    /// A date parameter the job cannot run without.
    pub fn require_date(&self, key: &str) -> Result<NaiveDate, LaunchError> {
        match self.get(key) {
            Some(JobParameterValue::Date(d)) => Ok(*d),
            Some(other) => Err(LaunchError::InvalidParameter {
                name: key.to_string(),
                reason: format!("expected a date, got {} '{}'", other.type_tag(), other),
            }),
            None => Err(LaunchError::MissingParameter(key.to_string())),
        }
    }

    pub fn processing_date(&self) -> Result<NaiveDate, LaunchError> {
        self.require_date(PROCESSING_DATE)
    }

    /// Canonical form of the identifying parameters, used as the instance key.
    ///
    /// Keys are sorted; each entry is `key=(type)value`, entries joined by `,`.
    pub fn identifying_key(&self) -> String {
        self.params
            .iter()
            .filter(|(_, p)| p.identifying)
            .map(|(k, p)| format!("{k}=({}){}", p.value.type_tag(), p.value))
            .collect::<Vec<_>>()
            .join(",")
    }
}
