use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::NaiveDateTime;
use thiserror::Error;

pub const LOG_DIR_NAME: &str = "ssh_Tunnel";
pub const LOG_FILE_NAME: &str = "vnc_tunnel_log.txt";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum LogError {
    #[error("cannot write connection log {path}: {msg}", path = .2.display(), msg = .1)]
    Io(std::io::Error, String, PathBuf),
}

/// Append-only record of the intermediaries we tunneled through, readable by the owner only.
pub(crate) struct ConnectionLog {
    path: PathBuf,
}

/// `<desktop>/ssh_Tunnel/vnc_tunnel_log.txt`
pub fn default_path() -> PathBuf {
    dirs::desktop_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Desktop")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(LOG_DIR_NAME)
        .join(LOG_FILE_NAME)
}

pub fn format_entry(host: &str, at: NaiveDateTime) -> String {
    format!("{} - {}\n", at.format(TIMESTAMP_FORMAT), host)
}

impl ConnectionLog {
    pub fn new(path: PathBuf) -> Self {
        ConnectionLog { path }
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    pub fn append(&self, host: &str, at: NaiveDateTime) -> Result<(), LogError> {
        self.write_entry(&format_entry(host, at)).map_err(|e| {
            let str_value = e.to_string();
            LogError::Io(e, str_value, self.path.clone())
        })?;
        tracing::info!("logged {host} to {}", self.path.display());
        Ok(())
    }

    fn write_entry(&self, entry: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        file.write_all(entry.as_bytes())?;
        // files created by older versions may have looser permissions
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn is_entry(line: &str, host: &str) -> bool {
        let Some((stamp, logged_host)) = line.split_once(" - ") else {
            return false;
        };
        logged_host == host && NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).is_ok()
    }

    #[test]
    fn entry_format() {
        assert_eq!(format_entry("10.0.0.5", at(9, 5, 1)), "2024-03-07 09:05:01 - 10.0.0.5\n");
    }

    #[test]
    fn entries_are_appended_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConnectionLog::new(dir.path().join("nested").join(LOG_FILE_NAME));
        log.append("10.0.0.5", at(10, 0, 0)).unwrap();
        log.append("10.0.0.6", chrono::Local::now().naive_local()).unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "2024-03-07 10:00:00 - 10.0.0.5");
        assert!(is_entry(lines[0], "10.0.0.5"));
        assert!(is_entry(lines[1], "10.0.0.6"));
        assert!(contents.ends_with('\n'));
    }

    #[cfg(unix)]
    #[test]
    fn log_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        std::fs::write(&path, "").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        ConnectionLog::new(path.clone())
            .append("10.0.0.5", at(1, 2, 3))
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn new_log_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let log = ConnectionLog::new(dir.path().join(LOG_DIR_NAME).join(LOG_FILE_NAME));
        log.append("10.0.0.5", at(1, 2, 3)).unwrap();
        let mode = std::fs::metadata(log.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn unwritable_location_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();
        let log = ConnectionLog::new(blocker.join(LOG_FILE_NAME));
        let result = log.append("10.0.0.5", at(1, 2, 3));
        assert!(matches!(result, Err(LogError::Io(..))));
        let message = result.unwrap_err().to_string();
        assert!(
            message.starts_with(&format!("cannot write connection log {}: ", log.path().display())),
            "{message}"
        );
    }

    #[test]
    fn default_path_ends_with_log_file() {
        assert!(default_path().ends_with(Path::new(LOG_DIR_NAME).join(LOG_FILE_NAME)));
    }
}
