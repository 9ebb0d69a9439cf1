//! Core type definitions for gridrun

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Job/Task priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    /// Get the string representation of the priority
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }

    /// Get the numeric value for ordering (higher = more urgent)
    pub fn as_u8(&self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
        }
    }

    /// All priorities, most urgent first
    pub fn all() -> &'static [Priority] {
        &[Priority::High, Priority::Normal, Priority::Low]
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            _ => Err(ParseError::InvalidPriority(s.to_string())),
        }
    }
}

/// In-process task kinds understood by the worker dispatcher.
///
/// The set is closed: every variant must have a registered handler before a
/// dispatcher can be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Summary statistics (min, max, mean, total, peak index) of a load series
    ProfileSummary,
    /// Scale a load series so that it sums to a target total
    ScaleProfile,
    /// Resample a load series by summing fixed-size buckets
    ResampleProfile,
}

impl TaskKind {
    /// Every task kind, in declaration order
    pub const ALL: &'static [TaskKind] = &[
        TaskKind::ProfileSummary,
        TaskKind::ScaleProfile,
        TaskKind::ResampleProfile,
    ];

    /// Get the string representation of the task kind
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ProfileSummary => "profile_summary",
            TaskKind::ScaleProfile => "scale_profile",
            TaskKind::ResampleProfile => "resample_profile",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "profile_summary" => Ok(TaskKind::ProfileSummary),
            "scale_profile" => Ok(TaskKind::ScaleProfile),
            "resample_profile" => Ok(TaskKind::ResampleProfile),
            _ => Err(ParseError::InvalidTaskKind(s.to_string())),
        }
    }
}

/// Errors that can occur when parsing types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid priority: '{0}'. Supported priorities are: low, normal, high")]
    InvalidPriority(String),

    #[error("Invalid task kind: '{0}'. Supported kinds are: profile_summary, scale_profile, resample_profile")]
    InvalidTaskKind(String),

    #[error("Invalid job id: '{0}'")]
    InvalidJobId(String),

    #[error("Invalid job state: '{0}'")]
    InvalidJobState(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
        assert_eq!(Priority::all()[0], Priority::High);
    }

    #[test]
    fn test_priority_parsing() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("low".parse::<Priority>().unwrap(), Priority::Low);
        assert!(matches!(
            "urgent".parse::<Priority>(),
            Err(ParseError::InvalidPriority(_))
        ));
    }

    #[test]
    fn test_task_kind_parsing() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), *kind);
        }
        assert_eq!(
            "scale-profile".parse::<TaskKind>().unwrap(),
            TaskKind::ScaleProfile
        );
        assert!("optimise_network".parse::<TaskKind>().is_err());
    }

    #[test]
    fn test_task_kind_serde_matches_as_str() {
        let json = serde_json::to_string(&TaskKind::ResampleProfile).unwrap();
        assert_eq!(json, "\"resample_profile\"");
    }
}
