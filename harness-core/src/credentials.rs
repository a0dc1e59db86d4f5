//! Operator identity for password grants and Basic-auth probes.
//!
//! Resolved once per run from `CFUSER` / `CFPASSWORD`, falling back to an
//! interactive prompt for whichever is missing.

use crate::error::{HarnessError, HarnessResult};
use secrecy::{ExposeSecret, SecretString};
use std::io::{BufRead, Write};

pub const USERNAME_ENV: &str = "CFUSER";
pub const PASSWORD_ENV: &str = "CFPASSWORD";

/// Source of interactive answers.
pub trait Prompt {
    fn ask(&self, question: &str) -> HarnessResult<String>;

    fn ask_secret(&self, question: &str) -> HarnessResult<SecretString> {
        self.ask(question).map(SecretString::new)
    }
}

/// Reads answers line by line from stdin; secrets are read with echo off.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn ask(&self, question: &str) -> HarnessResult<String> {
        let mut stdout = std::io::stdout();
        write!(stdout, "{question}")?;
        stdout.flush()?;

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Reads from the terminal without echo.
    fn ask_secret(&self, question: &str) -> HarnessResult<SecretString> {
        let answer = rpassword::prompt_password(question)?;
        Ok(SecretString::new(answer))
    }
}

#[derive(Clone)]
pub struct OperatorCredentials {
    pub username: String,
    pub password: SecretString,
}

impl std::fmt::Debug for OperatorCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorCredentials")
            .field("username", &self.username)
            .finish()
    }
}

impl OperatorCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }

    /// Resolves from the process environment, prompting for what is missing.
    pub fn resolve(prompt: &dyn Prompt) -> HarnessResult<Self> {
        Self::resolve_with(|name| std::env::var(name).ok(), prompt)
    }

    pub fn resolve_with<L>(lookup: L, prompt: &dyn Prompt) -> HarnessResult<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let username = match lookup(USERNAME_ENV) {
            Some(username) => username,
            None => prompt.ask("Username: ")?,
        };
        let password = match lookup(PASSWORD_ENV) {
            Some(password) => SecretString::new(password),
            None => prompt.ask_secret("Password: ")?,
        };

        if username.trim().is_empty() {
            return Err(HarnessError::Config(anyhow::anyhow!(
                "operator username must not be empty"
            )));
        }

        Ok(Self { username, password })
    }

    /// Password with the second-factor code appended, as expected by
    /// landscapes with bimodal authentication.
    pub fn password_with_second_factor(&self, code: &str) -> SecretString {
        SecretString::new(format!("{}{}", self.password.expose_secret(), code))
    }
}

/// Asks for a 2FA code when bimodal auth is enabled; empty otherwise.
pub fn second_factor_code(prompt: &dyn Prompt, enabled: bool) -> HarnessResult<String> {
    if !enabled {
        return Ok(String::new());
    }
    Ok(prompt.ask("2-Factor Authenticator Code: ")?.trim().to_string())
}

/// Pauses for a manual step (e.g. a role assignment only possible in the
/// cockpit). Returns false without prompting when user input is disabled.
pub fn confirm_manual_step(prompt: &dyn Prompt, message: &str, enabled: bool) -> HarnessResult<bool> {
    if !enabled {
        return Ok(false);
    }
    prompt.ask(&format!("{message}\nOnce done press enter to proceed with the test."))?;
    Ok(true)
}
