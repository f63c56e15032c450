use std::collections::BTreeMap;

use serde::Serialize;

/// One LaunchAgent definition, as written to and read from a plist file.
///
/// Optional fields are only emitted when set. `environment_variables` keeps
/// the difference between "not set" (`None`) and "set but empty"
/// (`Some(empty)`), which survives a generate/parse round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskConfig {
    pub label: String,
    pub program_arguments: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_variables: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard_out_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard_error_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_at_load: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// Run every `seconds` seconds (`StartInterval`).
    Interval { seconds: u64 },
    /// Run when every populated field matches (`StartCalendarInterval`).
    Calendar(CalendarInterval),
}

/// Calendar trigger fields. launchd treats a missing field as a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CalendarInterval {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minute: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,
    /// Day of month.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
    /// 0 and 7 are both Sunday.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekday: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
}

impl CalendarInterval {
    pub fn daily_at(hour: u32, minute: u32) -> Self {
        Self {
            minute: Some(minute),
            hour: Some(hour),
            ..Self::default()
        }
    }
}

impl TaskConfig {
    pub fn new(label: impl Into<String>, program_arguments: Vec<String>) -> Self {
        Self {
            label: label.into(),
            program_arguments,
            environment_variables: None,
            working_directory: None,
            schedule: None,
            standard_out_path: None,
            standard_error_path: None,
            run_at_load: None,
        }
    }

    pub fn with_environment(mut self, vars: BTreeMap<String, String>) -> Self {
        self.environment_variables = Some(vars);
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_standard_out_path(mut self, path: impl Into<String>) -> Self {
        self.standard_out_path = Some(path.into());
        self
    }

    pub fn with_standard_error_path(mut self, path: impl Into<String>) -> Self {
        self.standard_error_path = Some(path.into());
        self
    }

    pub fn with_run_at_load(mut self, value: bool) -> Self {
        self.run_at_load = Some(value);
        self
    }

    /// The executable the agent runs, if any arguments are present.
    pub fn program(&self) -> Option<&str> {
        self.program_arguments.first().map(String::as_str)
    }

    /// Short human-readable schedule description used in listings.
    pub fn schedule_summary(&self) -> String {
        match &self.schedule {
            None => "unscheduled".to_string(),
            Some(Schedule::Interval { seconds }) => format!("every {seconds}s"),
            Some(Schedule::Calendar(cal)) => {
                let mut parts = Vec::new();
                match (cal.hour, cal.minute) {
                    (Some(hour), Some(minute)) => parts.push(format!("at {hour:02}:{minute:02}")),
                    (Some(hour), None) => parts.push(format!("every minute of hour {hour:02}")),
                    (None, Some(minute)) => parts.push(format!("at minute {minute} of every hour")),
                    (None, None) => parts.push("every minute".to_string()),
                }
                if let Some(day) = cal.day {
                    parts.push(format!("on day {day}"));
                }
                if let Some(weekday) = cal.weekday {
                    parts.push(format!("on weekday {weekday}"));
                }
                if let Some(month) = cal.month {
                    parts.push(format!("in month {month}"));
                }
                parts.join(" ")
            }
        }
    }
}
