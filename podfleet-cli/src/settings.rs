//! Immutable run settings built once from the command line

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use podfleet_core::{CredentialSource, parse_comma_separated_params};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::Cli;

/// Top-level command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Command {
    /// Install or upgrade addons on every selected cluster
    Install,
    /// Remove addons from every selected cluster
    Remove,
    /// List addons and their recorded versions
    List,
    /// Validate fleet files without touching any cluster
    Test,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Install => "install",
            Command::Remove => "remove",
            Command::List => "list",
            Command::Test => "test",
        }
    }

    /// Whether the command changes cluster state
    pub fn mutates(self) -> bool {
        matches!(self, Command::Install | Command::Remove)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where Vault lives and how to authenticate to it.
#[derive(Clone)]
pub struct VaultSettings {
    pub addr: String,
    pub token: String,
}

impl fmt::Debug for VaultSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSettings")
            .field("addr", &self.addr)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub command: Command,
    /// Fleet file, or the test path for `test`
    pub path: PathBuf,
    pub credential_source: CredentialSource,
    pub user_agent: String,
    /// Absent when no token was given
    pub vault: Option<VaultSettings>,
    pub namespace: String,
    /// `--match-addons`; `None` selects every addon
    pub addon_filter: Option<Regex>,
    pub context_params: BTreeMap<String, String>,
    pub dry_run: bool,
    pub kube_diff: bool,
    /// Working directory for addon commands
    pub base_dir: PathBuf,
    pub report: Option<PathBuf>,
}

impl Settings {
    /// Defaults for `command` against `path`: no filter, no context,
    /// default credentials.
    pub fn new(command: Command, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            command,
            base_dir: base_dir_for(&path),
            path,
            credential_source: CredentialSource::DefaultApplicationCredential,
            user_agent: podfleet_core::user_agent(),
            vault: None,
            namespace: "default".to_string(),
            addon_filter: None,
            context_params: BTreeMap::new(),
            dry_run: false,
            kube_diff: false,
            report: None,
        }
    }

    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let Some(command) = cli.command else {
            bail!("missing command, expected one of: install, remove, list, test");
        };

        let path = match (&cli.path, command) {
            (Some(path), _) => expand(path),
            (None, Command::Test) => PathBuf::from("."),
            (None, _) => bail!("`{command}' needs a fleet file"),
        };

        let addon_filter = if cli.match_addons.is_empty() {
            None
        } else {
            let filter = Regex::new(&cli.match_addons).with_context(|| {
                format!("Invalid --match-addons pattern `{}'", cli.match_addons)
            })?;
            Some(filter)
        };
        let context_params =
            parse_comma_separated_params(&cli.context).context("Invalid --context")?;

        let vault = cli
            .vault_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|token| VaultSettings {
                addr: cli.vault_addr.trim_end_matches('/').to_string(),
                token: token.to_string(),
            });
        if vault.is_none() && command.mutates() && !cli.dry_run {
            bail!("--vault-token (or VAULT_TOKEN) is required for `{command}'");
        }

        let base_dir = cli
            .rel_path
            .as_deref()
            .map_or_else(|| base_dir_for(&path), expand);

        Ok(Self {
            command,
            credential_source: CredentialSource::from_key_path(cli.sa_key.as_deref().map(expand)),
            user_agent: podfleet_core::user_agent(),
            vault,
            namespace: cli.namespace.clone(),
            addon_filter,
            context_params,
            dry_run: cli.dry_run,
            kube_diff: cli.kube_diff,
            base_dir,
            report: cli.report.as_deref().map(expand),
            path,
        })
    }

    /// Whether `--match-addons` selects `name`
    pub fn selects(&self, name: &str) -> bool {
        self.addon_filter.as_ref().is_none_or(|f| f.is_match(name))
    }
}

/// Directory holding the fleet file, `.` for bare file names
fn base_dir_for(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn expand(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).as_ref())
}
