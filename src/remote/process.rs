use super::RemoteOperations;
use crate::error::{AppError, AppResult};
use crate::ssh::shell_quote;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static PROCESS_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap());

/// Process names are interpolated into a shell command; only plain names pass
pub fn validate_process_name(name: &str) -> AppResult<()> {
    if PROCESS_NAME.is_match(name) {
        Ok(())
    } else {
        Err(AppError::ConfigurationFormat(format!(
            "invalid process name '{}'",
            name
        )))
    }
}

/// Parse the NUL separated contents of `/proc/<pid>/environ`
pub fn parse_environ(raw: &str) -> HashMap<String, String> {
    raw.split('\0')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

impl RemoteOperations {
    /// Environment of the first process named `name` owned by the remote
    /// user. Empty when no such process runs. An unreachable device fails
    /// with `RemoteUnreachable` before anything else runs.
    pub async fn remote_process_environment(&self, name: &str) -> AppResult<HashMap<String, String>> {
        validate_process_name(name)?;
        self.check_connection().await?;
        let user = self.settings().username().to_string();

        let mut session = self.copier.create_command_session().await?;
        let pid = session
            .execute_command(&format!(
                "pgrep -u {} -x \"{}\" | head -n 1",
                shell_quote(&user),
                name
            ))
            .await?;
        let pid = pid.trim();
        if pid.is_empty() {
            self.narrate(&format!("No process named {} is running", name));
            return Ok(HashMap::new());
        }
        if !pid.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::session(format!("Unexpected pgrep output '{}'", pid)));
        }

        let environ = session
            .execute_command(&format!("cat /proc/{}/environ", pid))
            .await?;
        Ok(parse_environ(&environ))
    }
}
