use std::fs;
use std::io::ErrorKind;
use std::time::Duration;

use log::{info, warn, LevelFilter};

use crate::error::{IpfixError, Result};
use crate::utils::check_message_size;

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1400;
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

/// When an exporter re-announces templates it has already sent.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TemplateRefresh {
    /// Announce once, before first use.
    #[default]
    Never,
    /// Announce again in every message that uses the template.
    EveryMessage,
    Interval(Duration),
    /// Announce again after this many data records.
    Records(u64),
}

/// What a stream reader does after yielding a per-set error.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop after the first error.
    Strict,
    #[default]
    BestEffort,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExporterSettings {
    pub max_message_size: usize,
    pub template_refresh: TemplateRefresh,
    pub domain_id: u32,
    /// Fixed export time for every message; wall clock when unset.
    pub export_time: Option<u32>,
}

impl Default for ExporterSettings {
    fn default() -> Self {
        ExporterSettings {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            template_refresh: TemplateRefresh::Never,
            domain_id: 0,
            export_time: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectorSettings {
    pub error_policy: ErrorPolicy,
    pub check_sequence: bool,
    pub read_chunk_size: usize,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        CollectorSettings {
            error_policy: ErrorPolicy::BestEffort,
            check_sequence: true,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub exporter: ExporterSettings,
    pub collector: CollectorSettings,
    pub log_level: LevelFilter,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            exporter: ExporterSettings::default(),
            collector: CollectorSettings::default(),
            log_level: LevelFilter::Info,
        }
    }
}

impl Settings {
    /// Reads settings from `file`; a missing file means defaults.
    pub fn from_file(file: &str) -> Result<Self> {
        match fs::read_to_string(file) {
            Ok(config_string) => parse_config_string(&config_string),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("{file} not found, using default settings");
                Ok(Settings::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn bad_value(key: &str, value: &str) -> IpfixError {
    IpfixError::Config(format!("bad value {value:?} for {key}"))
}

fn parse_refresh(value: &str) -> Result<TemplateRefresh> {
    let bad = || bad_value("template_refresh_interval", value);
    match value {
        "never" => Ok(TemplateRefresh::Never),
        "every_message" => Ok(TemplateRefresh::EveryMessage),
        _ => {
            if let Some(count) = value.strip_suffix("records") {
                let count: u64 = count.trim().parse().map_err(|_| bad())?;
                Ok(TemplateRefresh::Records(count))
            } else if let Some(secs) = value.strip_suffix('s') {
                let secs: u64 = secs.trim().parse().map_err(|_| bad())?;
                Ok(TemplateRefresh::Interval(Duration::from_secs(secs)))
            } else {
                Err(bad())
            }
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "yes" | "on" => Ok(true),
        "false" | "no" | "off" => Ok(false),
        _ => Err(bad_value(key, value)),
    }
}

/// Parses `key: value` pairs separated by commas or newlines; unset keys
/// keep their defaults.
pub fn parse_config_string(config_string: &str) -> Result<Settings> {
    let mut settings = Settings::default();

    for entry in config_string.trim().split([',', '\n'].as_slice()) {
        let entry = entry.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        let (key, value) = entry
            .split_once(':')
            .ok_or_else(|| IpfixError::Config(format!("expected key: value, got {entry:?}")))?;
        let (key, value) = (key.trim(), value.trim());

        match key {
            "max_message_size" => {
                let size: usize = value.parse().map_err(|_| bad_value(key, value))?;
                check_message_size(size)?;
                settings.exporter.max_message_size = size;
            }
            "template_refresh_interval" => {
                settings.exporter.template_refresh = parse_refresh(value)?;
            }
            "domain_id" => {
                settings.exporter.domain_id = value.parse().map_err(|_| bad_value(key, value))?;
            }
            "export_time" => {
                settings.exporter.export_time = match value {
                    "now" => None,
                    _ => Some(value.parse().map_err(|_| bad_value(key, value))?),
                };
            }
            "error_policy" => {
                settings.collector.error_policy = match value {
                    "strict" => ErrorPolicy::Strict,
                    "best_effort" => ErrorPolicy::BestEffort,
                    _ => return Err(bad_value(key, value)),
                };
            }
            "check_sequence" => {
                settings.collector.check_sequence = parse_bool(key, value)?;
            }
            "read_chunk_size" => {
                let size: usize = value.parse().map_err(|_| bad_value(key, value))?;
                if size == 0 {
                    return Err(bad_value(key, value));
                }
                settings.collector.read_chunk_size = size;
            }
            "log_level" => {
                settings.log_level = value.parse().map_err(|_| bad_value(key, value))?;
            }
            unknown => warn!("ignoring unknown setting {unknown}"),
        }
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = parse_config_string("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.exporter.max_message_size, 1400);
        assert_eq!(settings.exporter.template_refresh, TemplateRefresh::Never);
        assert_eq!(settings.collector.error_policy, ErrorPolicy::BestEffort);
    }

    #[test]
    fn test_parse_all_keys() {
        let config = "max_message_size: 9000,\n\
                      template_refresh_interval: 30s,\n\
                      domain_id: 8304,\n\
                      export_time: 1700000000,\n\
                      error_policy: strict,\n\
                      check_sequence: false,\n\
                      read_chunk_size: 512,\n\
                      log_level: debug";
        let settings = parse_config_string(config).unwrap();
        assert_eq!(settings.exporter.max_message_size, 9000);
        assert_eq!(
            settings.exporter.template_refresh,
            TemplateRefresh::Interval(Duration::from_secs(30))
        );
        assert_eq!(settings.exporter.domain_id, 8304);
        assert_eq!(settings.exporter.export_time, Some(1_700_000_000));
        assert_eq!(settings.collector.error_policy, ErrorPolicy::Strict);
        assert!(!settings.collector.check_sequence);
        assert_eq!(settings.collector.read_chunk_size, 512);
        assert_eq!(settings.log_level, LevelFilter::Debug);
    }

    #[test]
    fn test_one_setting_per_line() {
        let settings = parse_config_string("# exporter\ndomain_id: 7\ntemplate_refresh_interval: 100 records\n").unwrap();
        assert_eq!(settings.exporter.domain_id, 7);
        assert_eq!(settings.exporter.template_refresh, TemplateRefresh::Records(100));
    }

    #[test]
    fn test_refresh_forms() {
        assert_eq!(parse_refresh("never").unwrap(), TemplateRefresh::Never);
        assert_eq!(parse_refresh("every_message").unwrap(), TemplateRefresh::EveryMessage);
        assert_eq!(parse_refresh("100 records").unwrap(), TemplateRefresh::Records(100));
        assert_eq!(parse_refresh("5s").unwrap(), TemplateRefresh::Interval(Duration::from_secs(5)));
        assert!(parse_refresh("sometimes").is_err());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse_config_string("max_message_size: 16").is_err());
        assert!(parse_config_string("max_message_size: lots").is_err());
        assert!(parse_config_string("error_policy: maybe").is_err());
        assert!(parse_config_string("read_chunk_size: 0").is_err());
        assert!(parse_config_string("domain_id").is_err());
        //unknown keys only warn
        assert!(parse_config_string("colour: blue").is_ok());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let settings = Settings::from_file("/nonexistent/ez_ipfix.ini").unwrap();
        assert_eq!(settings, Settings::default());
    }
}
