//! XML property-list codec for [`TaskConfig`].
//!
//! Generation builds a `plist::Dictionary` in a fixed key order (the
//! dictionary preserves insertion order) so equal configs always produce the
//! same bytes. Parsing walks the root dictionary key by key, checking the
//! type of every key it knows and ignoring the rest.

use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::path::Path;

use ::plist::{Dictionary, Value};
use thiserror::Error;

use crate::task::{CalendarInterval, Schedule, TaskConfig};

pub const KEY_LABEL: &str = "Label";
pub const KEY_PROGRAM_ARGUMENTS: &str = "ProgramArguments";
pub const KEY_ENVIRONMENT_VARIABLES: &str = "EnvironmentVariables";
pub const KEY_WORKING_DIRECTORY: &str = "WorkingDirectory";
pub const KEY_START_INTERVAL: &str = "StartInterval";
pub const KEY_START_CALENDAR_INTERVAL: &str = "StartCalendarInterval";
pub const KEY_STANDARD_OUT_PATH: &str = "StandardOutPath";
pub const KEY_STANDARD_ERROR_PATH: &str = "StandardErrorPath";
pub const KEY_RUN_AT_LOAD: &str = "RunAtLoad";

const CAL_MINUTE: &str = "Minute";
const CAL_HOUR: &str = "Hour";
const CAL_DAY: &str = "Day";
const CAL_WEEKDAY: &str = "Weekday";
const CAL_MONTH: &str = "Month";

#[derive(Debug, Error)]
pub enum PlistError {
    #[error("Malformed plist document: {0}")]
    MalformedDocument(String),
    #[error("Failed to encode plist: {0}")]
    Encode(String),
    #[error("Plist IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn malformed(message: impl Into<String>) -> PlistError {
    PlistError::MalformedDocument(message.into())
}

pub fn generate(config: &TaskConfig) -> Result<String, PlistError> {
    let mut root = Dictionary::new();
    root.insert(KEY_LABEL.to_string(), Value::String(config.label.clone()));
    root.insert(
        KEY_PROGRAM_ARGUMENTS.to_string(),
        Value::Array(
            config
                .program_arguments
                .iter()
                .map(|arg| Value::String(arg.clone()))
                .collect(),
        ),
    );
    if let Some(vars) = &config.environment_variables {
        let mut env = Dictionary::new();
        for (key, value) in vars {
            env.insert(key.clone(), Value::String(value.clone()));
        }
        root.insert(
            KEY_ENVIRONMENT_VARIABLES.to_string(),
            Value::Dictionary(env),
        );
    }
    if let Some(dir) = &config.working_directory {
        root.insert(
            KEY_WORKING_DIRECTORY.to_string(),
            Value::String(dir.clone()),
        );
    }
    match &config.schedule {
        Some(Schedule::Interval { seconds }) => {
            root.insert(
                KEY_START_INTERVAL.to_string(),
                Value::Integer((*seconds).into()),
            );
        }
        Some(Schedule::Calendar(cal)) => {
            root.insert(
                KEY_START_CALENDAR_INTERVAL.to_string(),
                Value::Dictionary(calendar_to_dict(cal)),
            );
        }
        None => {}
    }
    if let Some(path) = &config.standard_out_path {
        root.insert(
            KEY_STANDARD_OUT_PATH.to_string(),
            Value::String(path.clone()),
        );
    }
    if let Some(path) = &config.standard_error_path {
        root.insert(
            KEY_STANDARD_ERROR_PATH.to_string(),
            Value::String(path.clone()),
        );
    }
    if let Some(run_at_load) = config.run_at_load {
        root.insert(KEY_RUN_AT_LOAD.to_string(), Value::Boolean(run_at_load));
    }

    let mut buf = Vec::new();
    Value::Dictionary(root)
        .to_writer_xml(&mut buf)
        .map_err(|err| PlistError::Encode(err.to_string()))?;
    let mut xml = String::from_utf8(buf).map_err(|err| PlistError::Encode(err.to_string()))?;
    if !xml.ends_with('\n') {
        xml.push('\n');
    }
    Ok(xml)
}

fn calendar_to_dict(cal: &CalendarInterval) -> Dictionary {
    let mut dict = Dictionary::new();
    let fields = [
        (CAL_MINUTE, cal.minute),
        (CAL_HOUR, cal.hour),
        (CAL_DAY, cal.day),
        (CAL_WEEKDAY, cal.weekday),
        (CAL_MONTH, cal.month),
    ];
    for (key, value) in fields {
        if let Some(value) = value {
            dict.insert(key.to_string(), Value::Integer(u64::from(value).into()));
        }
    }
    dict
}

pub fn parse(xml: &str) -> Result<TaskConfig, PlistError> {
    let value = Value::from_reader_xml(Cursor::new(xml.as_bytes()))
        .map_err(|err| malformed(format!("not a readable XML property list: {err}")))?;
    let root = value
        .as_dictionary()
        .ok_or_else(|| malformed("root element is not a dict"))?;

    let label = required_string(root, KEY_LABEL)?;
    let program_arguments = match root.get(KEY_PROGRAM_ARGUMENTS) {
        None => return Err(malformed(format!("missing required key {KEY_PROGRAM_ARGUMENTS}"))),
        Some(value) => string_array(value, KEY_PROGRAM_ARGUMENTS)?,
    };
    if program_arguments.is_empty() {
        return Err(malformed(format!("{KEY_PROGRAM_ARGUMENTS} is empty")));
    }

    let environment_variables = match root.get(KEY_ENVIRONMENT_VARIABLES) {
        None => None,
        Some(value) => Some(string_map(value, KEY_ENVIRONMENT_VARIABLES)?),
    };

    let interval = root.get(KEY_START_INTERVAL);
    let calendar = root.get(KEY_START_CALENDAR_INTERVAL);
    let schedule = match (interval, calendar) {
        (Some(_), Some(_)) => {
            return Err(malformed(format!(
                "both {KEY_START_INTERVAL} and {KEY_START_CALENDAR_INTERVAL} are set"
            )))
        }
        (Some(value), None) => {
            let seconds = value
                .as_unsigned_integer()
                .ok_or_else(|| malformed(format!("{KEY_START_INTERVAL} is not a non-negative integer")))?;
            Some(Schedule::Interval { seconds })
        }
        (None, Some(value)) => Some(Schedule::Calendar(calendar_from_value(value)?)),
        (None, None) => None,
    };

    Ok(TaskConfig {
        label,
        program_arguments,
        environment_variables,
        working_directory: optional_string(root, KEY_WORKING_DIRECTORY)?,
        schedule,
        standard_out_path: optional_string(root, KEY_STANDARD_OUT_PATH)?,
        standard_error_path: optional_string(root, KEY_STANDARD_ERROR_PATH)?,
        run_at_load: match root.get(KEY_RUN_AT_LOAD) {
            None => None,
            Some(value) => Some(
                value
                    .as_boolean()
                    .ok_or_else(|| malformed(format!("{KEY_RUN_AT_LOAD} is not a boolean")))?,
            ),
        },
    })
}

fn required_string(dict: &Dictionary, key: &str) -> Result<String, PlistError> {
    optional_string(dict, key)?.ok_or_else(|| malformed(format!("missing required key {key}")))
}

fn optional_string(dict: &Dictionary, key: &str) -> Result<Option<String>, PlistError> {
    match dict.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_string()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| malformed(format!("{key} is not a string"))),
    }
}

fn string_array(value: &Value, key: &str) -> Result<Vec<String>, PlistError> {
    let items = value
        .as_array()
        .ok_or_else(|| malformed(format!("{key} is not an array")))?;
    items
        .iter()
        .map(|item| {
            item.as_string()
                .map(str::to_string)
                .ok_or_else(|| malformed(format!("{key} contains a non-string element")))
        })
        .collect()
}

fn string_map(value: &Value, key: &str) -> Result<BTreeMap<String, String>, PlistError> {
    let dict = value
        .as_dictionary()
        .ok_or_else(|| malformed(format!("{key} is not a dict")))?;
    let mut map = BTreeMap::new();
    for (name, item) in dict.iter() {
        let item = item
            .as_string()
            .ok_or_else(|| malformed(format!("{key}.{name} is not a string")))?;
        map.insert(name.to_string(), item.to_string());
    }
    Ok(map)
}

fn calendar_from_value(value: &Value) -> Result<CalendarInterval, PlistError> {
    let dict = value
        .as_dictionary()
        .ok_or_else(|| malformed(format!("{KEY_START_CALENDAR_INTERVAL} is not a dict")))?;
    let field = |key: &str| -> Result<Option<u32>, PlistError> {
        match dict.get(key) {
            None => Ok(None),
            Some(item) => item
                .as_unsigned_integer()
                .and_then(|n| u32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| {
                    malformed(format!(
                        "{KEY_START_CALENDAR_INTERVAL}.{key} is not a small non-negative integer"
                    ))
                }),
        }
    };
    Ok(CalendarInterval {
        minute: field(CAL_MINUTE)?,
        hour: field(CAL_HOUR)?,
        day: field(CAL_DAY)?,
        weekday: field(CAL_WEEKDAY)?,
        month: field(CAL_MONTH)?,
    })
}

pub fn read_plist_file(path: &Path) -> Result<TaskConfig, PlistError> {
    let text = fs::read_to_string(path)?;
    parse(&text)
}

pub fn write_plist_file(path: &Path, config: &TaskConfig) -> Result<(), PlistError> {
    let xml = generate(config)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, xml)?;
    Ok(())
}
