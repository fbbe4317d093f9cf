// SPDX-License-Identifier: GPL-3.0-only

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often an automatic backup should run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    Hourly,
    Daily,
    Weekly,
    #[default]
    Disabled,
}

impl Schedule {
    pub const ALL: [Schedule; 4] = [
        Schedule::Hourly,
        Schedule::Daily,
        Schedule::Weekly,
        Schedule::Disabled,
    ];

    pub fn seconds(self) -> u64 {
        match self {
            Schedule::Hourly => 3_600,
            Schedule::Daily => 86_400,
            Schedule::Weekly => 604_800,
            Schedule::Disabled => 0,
        }
    }

    pub fn interval(self) -> Option<Duration> {
        match self {
            Schedule::Disabled => None,
            other => Some(Duration::from_secs(other.seconds())),
        }
    }

    pub fn is_enabled(self) -> bool {
        self != Schedule::Disabled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Schedule::Hourly => "hourly",
            Schedule::Daily => "daily",
            Schedule::Weekly => "weekly",
            Schedule::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleParseError(pub String);

impl std::fmt::Display for ScheduleParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown schedule '{}', expected hourly, daily, weekly or disabled",
            self.0
        )
    }
}

impl std::error::Error for ScheduleParseError {}

impl FromStr for Schedule {
    type Err = ScheduleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_ascii_lowercase();
        Schedule::ALL
            .into_iter()
            .find(|schedule| schedule.as_str() == value)
            .ok_or_else(|| ScheduleParseError(s.to_string()))
    }
}
