use super::RemoteOperations;
use crate::error::{AppError, AppResult};
use crate::ssh::quote_path;

/// Parse `755`/`0755` or `rwxr-xr-x` into a mode value
pub fn convert_permissions(value: &str) -> AppResult<u32> {
    let value = value.trim();
    let invalid = || AppError::ConfigurationFormat(format!("invalid permissions '{}'", value));

    if value.chars().all(|c| c.is_ascii_digit()) {
        if !(3..=4).contains(&value.len()) {
            return Err(invalid());
        }
        return u32::from_str_radix(value, 8).map_err(|_| invalid());
    }

    let chars: Vec<char> = value.chars().collect();
    if chars.len() != 9 {
        return Err(invalid());
    }

    let mut mode = 0u32;
    for block in chars.chunks(3) {
        let mut digit = 0u32;
        for (c, (letter, bit)) in block.iter().zip([('r', 4), ('w', 2), ('x', 1)]) {
            match *c {
                '-' => {}
                c if c == letter => digit += bit,
                _ => return Err(invalid()),
            }
        }
        mode = mode * 8 + digit;
    }
    Ok(mode)
}

impl RemoteOperations {
    /// `chmod <octal> <path>` on the device
    pub async fn change_permissions(&self, path: &str, permissions: &str) -> AppResult<()> {
        let mode = convert_permissions(permissions)?;
        self.narrate(&format!("Setting permissions of {} to {:o}", path, mode));
        let result = self
            .copier
            .execute_single_command(&format!("chmod {:o} {}", mode, quote_path(path)))
            .await
            .map(|_| ());
        self.report("Permission change", result)
    }
}
