//! Execution policy: when a workflow is allowed to fire.
//!
//! Suppression is a normal outcome, not an error. The trigger evaluator asks
//! [`check_firing`] and skips the event when told to.

use crate::definition::WorkflowStatus;
use crate::error::PolicyError;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Quarter hours past midnight searched for the first valid local time.
const DAY_START_SEARCH_STEPS: i64 = 12;

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Per-workflow execution policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Minimum minutes between two firings. Zero disables the cooldown.
    #[serde(default)]
    pub cooldown_minutes: u32,
    /// Firings allowed per local calendar day. `None` is unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_executions_per_day: Option<u32>,
    /// Local time window in which firing is allowed. `None` is always.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_hours: Option<ActiveHours>,
    /// IANA timezone name for active hours and the daily cap.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            cooldown_minutes: 0,
            max_executions_per_day: None,
            active_hours: None,
            timezone: default_timezone(),
        }
    }
}

impl ExecutionSettings {
    /// Checks that the settings can be enforced.
    pub fn validate(&self) -> Result<(), Report<PolicyError>> {
        match self.problem() {
            Some(error) => Err(Report::new(error)),
            None => Ok(()),
        }
    }

    pub(crate) fn problem(&self) -> Option<PolicyError> {
        if self.timezone.parse::<Tz>().is_err() {
            return Some(PolicyError::InvalidTimezone {
                timezone: self.timezone.clone(),
            });
        }
        if self.max_executions_per_day == Some(0) {
            return Some(PolicyError::ZeroDailyCap);
        }
        None
    }

    /// The configured timezone. Unparseable names fall back to UTC;
    /// [`ExecutionSettings::validate`] keeps them out of stored workflows.
    #[must_use]
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }

    /// The UTC instant at which the local calendar day containing `now` began.
    #[must_use]
    pub fn day_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let tz = self.tz();
        let midnight = now.with_timezone(&tz).date_naive().and_time(NaiveTime::MIN);
        // Zones that skip midnight for DST start the day where the gap ends.
        (0..=DAY_START_SEARCH_STEPS)
            .map(|step| midnight + Duration::minutes(15 * step))
            .find_map(|local| tz.from_local_datetime(&local).earliest())
            .map_or(now, |start| start.with_timezone(&Utc))
    }

    /// When the cooldown after a firing at `last_triggered_at` ends.
    #[must_use]
    pub fn cooldown_until(&self, last_triggered_at: DateTime<Utc>) -> DateTime<Utc> {
        last_triggered_at + Duration::minutes(i64::from(self.cooldown_minutes))
    }

    /// Returns true when `now` falls inside the active hours.
    #[must_use]
    pub fn within_active_hours(&self, now: DateTime<Utc>) -> bool {
        match &self.active_hours {
            None => true,
            Some(hours) => hours.contains(now.with_timezone(&self.tz()).time()),
        }
    }
}

/// A daily window of local wall-clock time, `[start, end)`.
///
/// A window whose start is after its end spans midnight. Equal bounds cover
/// the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveHours {
    #[serde(with = "clock")]
    pub start: NaiveTime,
    #[serde(with = "clock")]
    pub end: NaiveTime,
}

impl ActiveHours {
    #[must_use]
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        use std::cmp::Ordering;
        match self.start.cmp(&self.end) {
            Ordering::Equal => true,
            Ordering::Less => self.start <= time && time < self.end,
            Ordering::Greater => time >= self.start || time < self.end,
        }
    }
}

/// `HH:MM` wall-clock times, as the settings form produces them.
mod clock {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(|e| D::Error::custom(format!("invalid time '{raw}': {e}")))
    }
}

/// Why a firing was suppressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuppressionReason {
    /// The workflow is not active.
    NotActive { status: WorkflowStatus },
    /// The previous firing is too recent.
    Cooldown { until: DateTime<Utc> },
    /// Today's executions already reached the cap.
    DailyCapReached { count: u32, limit: u32 },
    /// The local time is outside the active hours.
    OutsideActiveHours,
}

impl SuppressionReason {
    /// Short machine-readable name, used as a log field.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotActive { .. } => "not_active",
            Self::Cooldown { .. } => "cooldown",
            Self::DailyCapReached { .. } => "daily_cap_reached",
            Self::OutsideActiveHours => "outside_active_hours",
        }
    }
}

impl fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotActive { status } => write!(f, "workflow is {status}"),
            Self::Cooldown { until } => write!(f, "cooling down until {until}"),
            Self::DailyCapReached { count, limit } => {
                write!(f, "daily cap reached ({count} of {limit})")
            }
            Self::OutsideActiveHours => write!(f, "outside active hours"),
        }
    }
}

/// Result of the firing policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FiringDecision {
    Fire,
    Suppress(SuppressionReason),
}

impl FiringDecision {
    #[must_use]
    pub fn is_fire(&self) -> bool {
        matches!(self, Self::Fire)
    }
}

/// Applies the firing policy.
///
/// Checks run in a fixed order and the first failing one wins: status,
/// cooldown, daily cap, active hours. `executions_today` counts executions
/// created since [`ExecutionSettings::day_start`].
#[must_use]
pub fn check_firing(
    status: WorkflowStatus,
    settings: &ExecutionSettings,
    last_triggered_at: Option<DateTime<Utc>>,
    executions_today: u32,
    now: DateTime<Utc>,
) -> FiringDecision {
    if status != WorkflowStatus::Active {
        return FiringDecision::Suppress(SuppressionReason::NotActive { status });
    }

    if let Some(last) = last_triggered_at {
        let until = settings.cooldown_until(last);
        if now < until {
            return FiringDecision::Suppress(SuppressionReason::Cooldown { until });
        }
    }

    if let Some(limit) = settings.max_executions_per_day
        && executions_today >= limit
    {
        return FiringDecision::Suppress(SuppressionReason::DailyCapReached {
            count: executions_today,
            limit,
        });
    }

    if !settings.within_active_hours(now) {
        return FiringDecision::Suppress(SuppressionReason::OutsideActiveHours);
    }

    FiringDecision::Fire
}
