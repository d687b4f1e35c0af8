//! Configuration loading and persistence.
//!
//! Handles reading and writing the shellmate configuration file and the
//! per-session terminal environment. The config lives at
//! `<config_dir>/shellmate/config.json` (override the directory with
//! `SHELLMATE_CONFIG_DIR`, which tests use to avoid touching the real one).
//!
//! The terminal environment is an explicit [`TerminalEnv`] struct applied to
//! each spawned shell rather than process-global `std::env` mutation, so
//! concurrent sessions can never interfere with each other.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use portable_pty::CommandBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{fs, path::PathBuf};

use crate::constants;
use crate::pty::spawn::default_shell;

/// Configuration for the shellmate daemon.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    /// Port for the WebSocket endpoints (bound on 127.0.0.1 only).
    pub port: u16,
    /// Shell executable to spawn. `None` uses the platform default
    /// (`$SHELL` falling back to `/bin/bash`; PowerShell on Windows).
    pub shell: Option<String>,
    /// Arguments for a configured shell. `None` uses the platform default
    /// invocation (`--login -i` on Unix). Shells that reject GNU-style
    /// long options (dash as `/bin/sh`) need this set explicitly.
    pub shell_args: Option<Vec<String>>,
    /// Working directory for spawned shells. `None` uses the home directory.
    pub cwd: Option<String>,
    /// Base URL of the local Ollama server.
    pub ollama_url: String,
    /// Default model for completion requests.
    pub model: String,
    /// Initial terminal height in rows.
    pub rows: u16,
    /// Initial terminal width in columns.
    pub cols: u16,
    /// Scrollback lines retained by the shadow terminal surface.
    pub scrollback_lines: usize,
    /// Environment applied to each spawned shell.
    pub terminal_env: TerminalEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: constants::DEFAULT_PORT,
            shell: None,
            shell_args: None,
            cwd: None,
            ollama_url: constants::DEFAULT_OLLAMA_URL.to_string(),
            model: constants::DEFAULT_MODEL.to_string(),
            rows: constants::DEFAULT_ROWS,
            cols: constants::DEFAULT_COLS,
            scrollback_lines: constants::DEFAULT_SCROLLBACK_LINES,
            terminal_env: TerminalEnv::default(),
        }
    }
}

impl Config {
    /// Load the configuration from disk, falling back to defaults if the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?;
            Ok(serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", config_path.display()))?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the configuration to disk.
    ///
    /// The file is written with mode 0600 on Unix.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("writing {}", config_path.display()))?;

        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Directory holding the config file, created if missing.
    ///
    /// `SHELLMATE_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = match std::env::var("SHELLMATE_CONFIG_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::config_dir()
                .context("could not determine config directory")?
                .join("shellmate"),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating {}", dir.display()))?;
        Ok(dir)
    }

    /// Resolve the shell command and its arguments for this config.
    ///
    /// A configured shell is tilde-expanded; without configured args it is
    /// launched with the interactive/login flags the platform default
    /// would use, so user prompt and alias customization is honored
    /// either way.
    #[must_use]
    pub fn resolved_shell(&self) -> (String, Vec<String>) {
        let (default_cmd, default_args) = default_shell();
        let cmd = match &self.shell {
            Some(shell) => shellexpand::tilde(shell).into_owned(),
            None => default_cmd,
        };
        let args = self.shell_args.clone().unwrap_or(default_args);
        (cmd, args)
    }

    /// Resolve the working directory for spawned shells.
    #[must_use]
    pub fn resolved_cwd(&self) -> PathBuf {
        match &self.cwd {
            Some(cwd) => PathBuf::from(shellexpand::tilde(cwd).into_owned()),
            None => dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

/// Terminal environment applied to a spawned shell.
///
/// Scoped per session: two sessions with different settings never observe
/// each other's values, unlike process-global environment mutation.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct TerminalEnv {
    /// `TERM` value advertised to the shell.
    pub term: String,
    /// `COLORTERM` value advertised to the shell.
    pub colorterm: String,
    /// `LANG` override. `None` inherits the daemon's `LANG`, falling back
    /// to `en_US.UTF-8` when unset.
    pub lang: Option<String>,
    /// `PS1` override for shells that honor an inherited prompt.
    pub ps1: Option<String>,
    /// Additional variables to set verbatim.
    pub extra: HashMap<String, String>,
}

impl Default for TerminalEnv {
    fn default() -> Self {
        Self {
            term: "xterm-256color".to_string(),
            colorterm: "truecolor".to_string(),
            lang: None,
            ps1: Some("\\u@\\h:\\w\\$ ".to_string()),
            extra: HashMap::new(),
        }
    }
}

impl TerminalEnv {
    /// Apply this environment to a command about to be spawned.
    pub fn apply(&self, cmd: &mut CommandBuilder) {
        cmd.env("TERM", &self.term);
        cmd.env("COLORTERM", &self.colorterm);

        let lang = self
            .lang
            .clone()
            .or_else(|| std::env::var("LANG").ok())
            .unwrap_or_else(|| "en_US.UTF-8".to_string());
        cmd.env("LANG", lang);

        if let Some(ps1) = &self.ps1 {
            cmd.env("PS1", ps1);
        }

        for (key, value) in &self.extra {
            cmd.env(key, value);
        }
    }
}
