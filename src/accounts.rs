//! Credential list loading.
//!
//! One credential per line. In `password` mode a line is `email:password`
//! (split on the first `:`, both sides trimmed); in `token` mode every
//! non-empty line is a pre-issued bearer token. Malformed lines are skipped
//! rather than failing the whole list — the position of each surviving entry
//! is the account's identity for the run.

use crate::config::AuthMode;

/// One account's credential, index-addressed by position in the source list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Password { email: String, password: String },
    Token(String),
}

impl Credential {
    /// Short label for log lines (the email, or a truncated token).
    pub fn label(&self) -> String {
        match self {
            Credential::Password { email, .. } => email.clone(),
            Credential::Token(token) => {
                let head: String = token.chars().take(8).collect();
                format!("token {head}…")
            }
        }
    }
}

/// Read and parse the credential list at `path`.
pub fn load_credentials(path: &str, mode: AuthMode) -> Result<Vec<Credential>, String> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read account list {path}: {e}"))?;
    Ok(parse_credentials(&data, mode))
}

/// Parse credential lines; blank and malformed lines are dropped.
pub fn parse_credentials(data: &str, mode: AuthMode) -> Vec<Credential> {
    data.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            match mode {
                AuthMode::Token => Some(Credential::Token(line.to_string())),
                AuthMode::Password => {
                    let (email, password) = line.split_once(':')?;
                    let (email, password) = (email.trim(), password.trim());
                    if email.is_empty() || password.is_empty() {
                        return None;
                    }
                    Some(Credential::Password {
                        email: email.to_string(),
                        password: password.to_string(),
                    })
                }
            }
        })
        .collect()
}
