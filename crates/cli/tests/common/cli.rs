//! Helpers for running the `snapvault` binary in an isolated environment
//!
//! Every command gets its own `HOME`, `XDG_CONFIG_HOME` and `PATH` so the
//! host's config file, OpenStack variables and tools never leak in.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// `snapvault` invocation builder
pub struct SnapvaultCommand {
    sandbox: TempDir,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl SnapvaultCommand {
    pub fn new() -> Result<Self> {
        let sandbox = TempDir::new().context("Failed to create sandbox")?;
        std::fs::create_dir_all(sandbox.path().join("bin"))?;
        std::fs::create_dir_all(sandbox.path().join("config"))?;
        Ok(Self {
            sandbox,
            args: Vec::new(),
            env: HashMap::new(),
        })
    }

    /// Sandbox root, usable as a work directory
    pub fn sandbox(&self) -> &Path {
        self.sandbox.path()
    }

    /// Add command arguments
    pub fn args(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    /// Set environment variable
    pub fn env(&mut self, key: &str, value: &str) -> &mut Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Put an executable shell script on the sandbox `PATH`
    #[cfg(unix)]
    pub fn tool(&mut self, name: &str, script: &str) -> Result<&mut Self> {
        use std::os::unix::fs::PermissionsExt;

        let path = self.sandbox.path().join("bin").join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(self)
    }

    /// Write the default config file
    pub fn config_file(&mut self, content: &str) -> Result<PathBuf> {
        let dir = self.sandbox.path().join("config").join("snapvault");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("config.toml");
        std::fs::write(&path, content)?;
        Ok(path)
    }

    pub fn execute(&self) -> Result<CommandResult> {
        let output = Command::new(env!("CARGO_BIN_EXE_snapvault"))
            .args(&self.args)
            .env_clear()
            .env("HOME", self.sandbox.path())
            .env("XDG_CONFIG_HOME", self.sandbox.path().join("config"))
            .env("PATH", self.sandbox.path().join("bin"))
            .env("RUST_LOG", "info")
            .envs(&self.env)
            .output()
            .context("Failed to execute snapvault")?;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Execute and expect failure
    pub fn assert_failure(&self) -> Result<CommandResult> {
        let result = self.execute()?;

        if result.success() {
            anyhow::bail!(
                "Command should have failed but succeeded:\nArgs: {:?}\nStdout: {}",
                self.args,
                result.stdout
            );
        }

        Ok(result)
    }
}

/// Command execution result
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn contains_stdout(&self, text: &str) -> bool {
        self.stdout.contains(text)
    }

    pub fn contains_stderr(&self, text: &str) -> bool {
        self.stderr.contains(text)
    }
}
