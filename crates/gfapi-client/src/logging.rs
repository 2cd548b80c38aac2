//! Log target handling.
//!
//! Verbosity uses the GlusterFS numbering: 0 disables logging, 1 to 4 are
//! error-class levels, 5 is warning, 6 and 7 are info/notice, 8 is debug and
//! anything above is trace.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing::level_filters::LevelFilter;
use tracing::{debug, info};

use crate::backend::LogTarget;
use crate::error::{ClientError, Result};

/// Default log destination when none is configured.
pub const DEFAULT_LOG_FILE: &str = "/dev/stderr";

/// Maps a GlusterFS log level to a tracing filter.
pub fn level_filter(level: u32) -> LevelFilter {
    match level {
        0 => LevelFilter::OFF,
        1..=4 => LevelFilter::ERROR,
        5 => LevelFilter::WARN,
        6 | 7 => LevelFilter::INFO,
        8 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Opens `path` for appending, creating it if missing.
pub fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ClientError::config(format!("log file {}: {}", path.display(), e)))
}

/// Validates a user supplied target without installing it.
pub fn validate(path: &Path, level: i32) -> Result<LogTarget> {
    let level = u32::try_from(level)
        .map_err(|_| ClientError::invalid(format!("log level {} is negative", level)))?;
    open_log_file(path)?;
    Ok(LogTarget {
        path: path.to_path_buf(),
        level,
    })
}

/// Installs a process-wide subscriber writing to the target file.
///
/// Only the first subscriber in a process takes effect; returns `false`
/// when one was already installed.
pub fn install(target: &LogTarget) -> Result<bool> {
    let file = open_log_file(&target.path)?;
    let installed = tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_max_level(level_filter(target.level))
        .try_init()
        .is_ok();
    if installed {
        info!(path = %target.path.display(), level = target.level, "logging installed");
    } else {
        debug!(
            path = %target.path.display(),
            "global subscriber already set, keeping it"
        );
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(level_filter(0), LevelFilter::OFF);
        assert_eq!(level_filter(1), LevelFilter::ERROR);
        assert_eq!(level_filter(4), LevelFilter::ERROR);
        assert_eq!(level_filter(5), LevelFilter::WARN);
        assert_eq!(level_filter(7), LevelFilter::INFO);
        assert_eq!(level_filter(8), LevelFilter::DEBUG);
        assert_eq!(level_filter(9), LevelFilter::TRACE);
        assert_eq!(level_filter(u32::MAX), LevelFilter::TRACE);
    }

    #[test]
    fn test_validate_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.log");
        let target = validate(&path, 7).unwrap();
        assert_eq!(target.level, 7);
        assert!(path.exists());
    }

    #[test]
    fn test_validate_negative_level() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate(&dir.path().join("client.log"), -1).unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument { .. }));
    }

    #[test]
    fn test_validate_unwritable_path() {
        let err = validate(Path::new("/nonexistent-dir/client.log"), 7).unwrap_err();
        assert!(matches!(err, ClientError::Configuration { .. }));
    }

    #[test]
    fn test_validate_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate(dir.path(), 7).is_err());
    }

    #[test]
    fn test_install_twice_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let target = LogTarget {
            path: dir.path().join("client.log"),
            level: 7,
        };
        install(&target).unwrap();
        assert!(!install(&target).unwrap());
    }
}
