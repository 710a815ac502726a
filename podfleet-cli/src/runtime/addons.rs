//! Addon workload runtime
//!
//! Runs each addon's install or remove command against one cluster. The
//! command sees a temporary kubeconfig holding a fresh bearer token, the
//! cluster's addon context as `PODFLEET_CTX_*` variables and any Vault
//! secrets it asked for.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use podfleet_core::ClientConfiguration;
use regex::Regex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::fleet::{AddonEntry, FleetFile};
use super::{AddonContext, WorkloadRuntime};
use crate::settings::{Command, Settings};
use crate::store::{AddonRecord, MetadataStore};
use crate::vault::SecretsStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Install,
    Remove,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Action::Install => "install",
            Action::Remove => "remove",
        }
    }
}

pub struct AddonRuntime {
    path: PathBuf,
    base_dir: PathBuf,
    namespace: String,
    filter: Option<Regex>,
    dry_run: bool,
    kube_diff: bool,
    config: ClientConfiguration,
    secrets: Option<Arc<dyn SecretsStore>>,
    store: Option<Arc<dyn MetadataStore>>,
    addons: Vec<AddonEntry>,
}

impl AddonRuntime {
    pub fn new(settings: &Settings, config: ClientConfiguration) -> Self {
        Self {
            path: settings.path.clone(),
            base_dir: settings.base_dir.clone(),
            namespace: settings.namespace.clone(),
            filter: settings.addon_filter.clone(),
            dry_run: settings.dry_run,
            kube_diff: settings.kube_diff,
            config,
            secrets: None,
            store: None,
            addons: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_secrets(mut self, secrets: Arc<dyn SecretsStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn selected(&self) -> impl DoubleEndedIterator<Item = &AddonEntry> {
        self.addons
            .iter()
            .filter(|a| self.filter.as_ref().is_none_or(|f| f.is_match(&a.name)))
    }

    async fn list(&self, ctx: &AddonContext) -> Result<()> {
        for row in self.list_rows(ctx).await? {
            println!("{row}");
        }
        Ok(())
    }

    /// `cluster<TAB>addon<TAB>wanted<TAB>installed`, `-` for unknown versions
    async fn list_rows(&self, ctx: &AddonContext) -> Result<Vec<String>> {
        let cluster = ctx.cluster();
        let mut rows = Vec::new();
        for addon in self.selected() {
            let installed = match &self.store {
                Some(store) => store.get(&addon.name).await?.map(|r| r.version),
                None => None,
            };
            rows.push(format!(
                "{cluster}\t{}\t{}\t{}",
                addon.name,
                display_version(&addon.version),
                installed.as_deref().map_or("-", display_version)
            ));
        }
        Ok(rows)
    }

    async fn apply(&self, action: Action, ctx: &AddonContext) -> Result<()> {
        let addons: Vec<&AddonEntry> = match action {
            Action::Install => self.selected().collect(),
            Action::Remove => self
                .selected()
                .rev()
                .filter(|a| {
                    if a.remove.is_empty() {
                        debug!(addon = %a.name, "no remove command, skipping");
                    }
                    !a.remove.is_empty()
                })
                .collect(),
        };
        if addons.is_empty() {
            info!(cluster = ctx.cluster(), action = action.as_str(), "no addons selected");
            return Ok(());
        }

        let kubeconfig = if self.dry_run {
            None
        } else {
            Some(self.write_kubeconfig().await?)
        };

        for addon in addons {
            let argv = match action {
                Action::Install => &addon.install,
                Action::Remove => &addon.remove,
            };
            self.exec(addon, argv, ctx, kubeconfig.as_ref().map(NamedTempFile::path))
                .await
                .with_context(|| format!("Failed to {} addon `{}'", action.as_str(), addon.name))?;

            if self.dry_run {
                continue;
            }
            if let Some(store) = &self.store {
                match action {
                    Action::Install => {
                        store
                            .record(&AddonRecord::new(&addon.name, &addon.version, ctx.cluster()))
                            .await?;
                    }
                    Action::Remove => store.forget(&addon.name).await?,
                }
            }
        }
        Ok(())
    }

    /// Kubeconfig for external tools; deleted when the handle drops
    async fn write_kubeconfig(&self) -> Result<NamedTempFile> {
        let token = self
            .config
            .bearer_token()
            .await
            .context("Failed to obtain a bearer token")?;
        let yaml = self
            .config
            .render_kubeconfig(Some(&token), Some(&self.namespace))?;
        let mut file = tempfile::Builder::new()
            .prefix("podfleet-kubeconfig-")
            .suffix(".yaml")
            .tempfile()
            .context("Failed to create temporary kubeconfig")?;
        file.write_all(yaml.as_bytes())
            .and_then(|()| file.flush())
            .context("Failed to write temporary kubeconfig")?;
        Ok(file)
    }

    async fn exec(
        &self,
        addon: &AddonEntry,
        argv: &[String],
        ctx: &AddonContext,
        kubeconfig: Option<&Path>,
    ) -> Result<()> {
        let Some((program, args)) = argv.split_first() else {
            bail!("empty command");
        };
        let rendered = argv.join(" ");

        if self.dry_run {
            info!(addon = %addon.name, command = %rendered, "dry run, not executing");
            println!("[dry-run] {}: {rendered}", addon.name);
            return Ok(());
        }

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(&self.base_dir)
            .kill_on_drop(true)
            .envs(self.environment(addon, ctx));
        if let Some(path) = kubeconfig {
            cmd.env("KUBECONFIG", path);
        }
        for (var, value) in self.resolve_secrets(addon).await? {
            cmd.env(var, value);
        }

        info!(addon = %addon.name, cluster = ctx.cluster(), command = %rendered, "running addon command");
        let status = cmd
            .status()
            .await
            .with_context(|| format!("Failed to execute `{program}'"))?;
        if !status.success() {
            bail!("`{rendered}' exited with {status}");
        }
        Ok(())
    }

    fn environment(&self, addon: &AddonEntry, ctx: &AddonContext) -> Vec<(String, String)> {
        let mut env = vec![
            ("PODFLEET_CLUSTER".to_string(), ctx.cluster().to_string()),
            ("PODFLEET_ADDON".to_string(), addon.name.clone()),
            ("PODFLEET_ADDON_VERSION".to_string(), addon.version.clone()),
            ("PODFLEET_NAMESPACE".to_string(), self.namespace.clone()),
            ("PODFLEET_DRY_RUN".to_string(), self.dry_run.to_string()),
            ("PODFLEET_KUBE_DIFF".to_string(), self.kube_diff.to_string()),
        ];
        env.extend(
            ctx.iter()
                .map(|(k, v)| (format!("PODFLEET_CTX_{}", env_key(k)), v.to_string())),
        );
        env
    }

    async fn resolve_secrets(&self, addon: &AddonEntry) -> Result<Vec<(String, String)>> {
        if addon.secrets.is_empty() {
            return Ok(Vec::new());
        }
        let Some(store) = &self.secrets else {
            bail!(
                "addon `{}' needs secrets but no Vault token was given",
                addon.name
            );
        };
        let mut resolved = Vec::with_capacity(addon.secrets.len());
        for (var, reference) in &addon.secrets {
            let value = store
                .read(reference)
                .await
                .with_context(|| format!("Failed to read secret {var} for addon `{}'", addon.name))?;
            resolved.push((var.clone(), value));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl WorkloadRuntime for AddonRuntime {
    async fn load(&mut self) -> Result<()> {
        let fleet = FleetFile::load(&self.path).await?;
        let problems = fleet.addon_problems();
        if !problems.is_empty() {
            bail!("{}: {}", self.path.display(), problems.join("; "));
        }
        self.addons = fleet.addons;
        Ok(())
    }

    async fn run(&self, command: Command, ctx: &AddonContext) -> Result<()> {
        match command {
            Command::List => self.list(ctx).await,
            Command::Install => self.apply(Action::Install, ctx).await,
            Command::Remove => self.apply(Action::Remove, ctx).await,
            Command::Test => bail!("`test' does not run against clusters"),
        }
    }
}

fn display_version(version: &str) -> &str {
    if version.is_empty() { "-" } else { version }
}

/// `cert-manager.io` -> `CERT_MANAGER_IO`
fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use podfleet_core::StaticTokenSource;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<HashMap<String, AddonRecord>>,
    }

    #[async_trait]
    impl MetadataStore for MemoryStore {
        async fn record(&self, record: &AddonRecord) -> Result<()> {
            self.records
                .lock()
                .unwrap()
                .insert(record.addon.clone(), record.clone());
            Ok(())
        }

        async fn forget(&self, addon: &str) -> Result<()> {
            self.records.lock().unwrap().remove(addon);
            Ok(())
        }

        async fn get(&self, addon: &str) -> Result<Option<AddonRecord>> {
            Ok(self.records.lock().unwrap().get(addon).cloned())
        }
    }

    struct FixedSecrets;

    #[async_trait]
    impl SecretsStore for FixedSecrets {
        async fn read(&self, reference: &str) -> Result<String> {
            Ok(format!("value-of-{reference}"))
        }
    }

    fn config() -> ClientConfiguration {
        ClientConfiguration::new(
            "https://10.0.0.1",
            b"ca".to_vec(),
            Arc::new(StaticTokenSource::new("ya29.test")),
            "podfleet/test",
        )
    }

    fn ctx() -> AddonContext {
        AddonContext::new()
            .with(AddonContext::CLUSTER, "prod")
            .with("cert-manager.io", "yes")
    }

    /// Fleet file inside a temp dir that doubles as the base dir
    fn fixture(fleet: &str, command: Command) -> (TempDir, Settings) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::write(&path, fleet).unwrap();
        let settings = Settings::new(command, path);
        assert_eq!(settings.base_dir, dir.path());
        (dir, settings)
    }

    async fn loaded(settings: &Settings) -> AddonRuntime {
        let mut runtime = AddonRuntime::new(settings, config());
        runtime.load().await.unwrap();
        runtime
    }

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("cert-manager.io"), "CERT_MANAGER_IO");
        assert_eq!(env_key("domain"), "DOMAIN");
    }

    #[test]
    fn test_environment() {
        let (_dir, settings) = fixture("", Command::Install);
        let runtime = AddonRuntime::new(&settings, config());
        let addon = AddonEntry {
            name: "ingress".into(),
            version: "1.0".into(),
            install: vec!["true".into()],
            remove: Vec::new(),
            secrets: Default::default(),
        };
        let env: HashMap<_, _> = runtime.environment(&addon, &ctx()).into_iter().collect();
        assert_eq!(env["PODFLEET_CLUSTER"], "prod");
        assert_eq!(env["PODFLEET_ADDON"], "ingress");
        assert_eq!(env["PODFLEET_CTX_CERT_MANAGER_IO"], "yes");
        assert_eq!(env["PODFLEET_DRY_RUN"], "false");
        assert_eq!(env["PODFLEET_KUBE_DIFF"], "false");
    }

    #[tokio::test]
    async fn test_load_rejects_duplicate_addons() {
        let (_dir, settings) = fixture(
            "[[addons]]\nname = \"a\"\ninstall = [\"true\"]\n[[addons]]\nname = \"a\"\ninstall = [\"true\"]\n",
            Command::Install,
        );
        let mut runtime = AddonRuntime::new(&settings, config());
        let err = runtime.load().await.unwrap_err();
        assert!(err.to_string().contains("duplicate addon"));
    }

    #[tokio::test]
    async fn test_dry_run_executes_nothing() {
        let (dir, mut settings) = fixture(
            "[[addons]]\nname = \"a\"\ninstall = [\"touch\", \"ran\"]\n",
            Command::Install,
        );
        settings.dry_run = true;
        let store = Arc::new(MemoryStore::default());
        let runtime = loaded(&settings).await.with_store(store.clone());

        runtime.run(Command::Install, &ctx()).await.unwrap();
        assert!(!dir.path().join("ran").exists());
        assert!(store.records.lock().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_runs_in_order_and_records() {
        let (dir, settings) = fixture(
            r#"
[[addons]]
name = "first"
version = "1.0"
install = ["sh", "-c", "echo $PODFLEET_ADDON:$PODFLEET_CLUSTER >> order.txt; test -s \"$KUBECONFIG\""]

[[addons]]
name = "second"
version = "2.0"
install = ["sh", "-c", "echo $PODFLEET_ADDON:$PODFLEET_CLUSTER >> order.txt"]
"#,
            Command::Install,
        );
        let store = Arc::new(MemoryStore::default());
        let runtime = loaded(&settings).await.with_store(store.clone());

        runtime.run(Command::Install, &ctx()).await.unwrap();

        let order = std::fs::read_to_string(dir.path().join("order.txt")).unwrap();
        assert_eq!(order, "first:prod\nsecond:prod\n");
        let records = store.records.lock().unwrap();
        assert_eq!(records["first"].version, "1.0");
        assert_eq!(records["second"].cluster, "prod");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remove_runs_in_reverse_and_skips_missing() {
        let (dir, settings) = fixture(
            r#"
[[addons]]
name = "first"
install = ["true"]
remove = ["sh", "-c", "echo first >> order.txt"]

[[addons]]
name = "middle"
install = ["true"]

[[addons]]
name = "last"
install = ["true"]
remove = ["sh", "-c", "echo last >> order.txt"]
"#,
            Command::Remove,
        );
        let store = Arc::new(MemoryStore::default());
        store
            .record(&AddonRecord::new("first", "1", "prod"))
            .await
            .unwrap();
        let runtime = loaded(&settings).await.with_store(store.clone());

        runtime.run(Command::Remove, &ctx()).await.unwrap();

        let order = std::fs::read_to_string(dir.path().join("order.txt")).unwrap();
        assert_eq!(order, "last\nfirst\n");
        assert!(store.records.lock().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_addon_stops_cluster_run() {
        let (dir, settings) = fixture(
            r#"
[[addons]]
name = "broken"
install = ["sh", "-c", "exit 3"]

[[addons]]
name = "after"
install = ["touch", "after-ran"]
"#,
            Command::Install,
        );
        let store = Arc::new(MemoryStore::default());
        let runtime = loaded(&settings).await.with_store(store.clone());

        let err = runtime.run(Command::Install, &ctx()).await.unwrap_err();
        assert!(format!("{err:#}").contains("addon `broken'"));
        assert!(!dir.path().join("after-ran").exists());
        assert!(store.records.lock().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_match_filter_and_secrets() {
        let (dir, mut settings) = fixture(
            r#"
[[addons]]
name = "ingress"
install = ["sh", "-c", "echo $TLS_KEY > secret.txt"]
secrets = { TLS_KEY = "secret/data/ingress#key" }

[[addons]]
name = "monitoring"
install = ["touch", "monitoring-ran"]
"#,
            Command::Install,
        );
        settings.addon_filter = Some(Regex::new("^ingress$").unwrap());
        let runtime = loaded(&settings).await.with_secrets(Arc::new(FixedSecrets));

        runtime.run(Command::Install, &ctx()).await.unwrap();

        let secret = std::fs::read_to_string(dir.path().join("secret.txt")).unwrap();
        assert_eq!(secret.trim(), "value-of-secret/data/ingress#key");
        assert!(!dir.path().join("monitoring-ran").exists());
    }

    #[tokio::test]
    async fn test_secrets_without_vault_fail() {
        let (_dir, settings) = fixture(
            "[[addons]]\nname = \"ingress\"\ninstall = [\"true\"]\nsecrets = { K = \"kv/a#b\" }\n",
            Command::Install,
        );
        let runtime = loaded(&settings).await;
        let err = runtime.run(Command::Install, &ctx()).await.unwrap_err();
        assert!(format!("{err:#}").contains("no Vault token"));
    }

    const LIST_FLEET: &str = r#"
[[addons]]
name = "ingress"
version = "2.0"
install = ["true"]

[[addons]]
name = "monitoring"
install = ["true"]
"#;

    #[tokio::test]
    async fn test_list_rows_read_store() {
        let (_dir, settings) = fixture(LIST_FLEET, Command::List);
        let store = Arc::new(MemoryStore::default());
        store
            .record(&AddonRecord::new("ingress", "1.9", "prod"))
            .await
            .unwrap();
        let runtime = loaded(&settings).await.with_store(store);

        let rows = runtime.list_rows(&ctx()).await.unwrap();
        assert_eq!(rows, vec!["prod\tingress\t2.0\t1.9", "prod\tmonitoring\t-\t-"]);
        runtime.run(Command::List, &ctx()).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_rows_without_store() {
        let (_dir, settings) = fixture(LIST_FLEET, Command::List);
        let runtime = loaded(&settings).await;

        let rows = runtime.list_rows(&ctx()).await.unwrap();
        assert_eq!(rows, vec!["prod\tingress\t2.0\t-", "prod\tmonitoring\t-\t-"]);
    }

    #[tokio::test]
    async fn test_list_rows_follow_filter() {
        let (_dir, mut settings) = fixture(LIST_FLEET, Command::List);
        settings.addon_filter = Some(Regex::new("^mon").unwrap());
        let store = Arc::new(MemoryStore::default());
        store
            .record(&AddonRecord::new("monitoring", "", "prod"))
            .await
            .unwrap();
        let runtime = loaded(&settings).await.with_store(store);

        let rows = runtime.list_rows(&ctx()).await.unwrap();
        assert_eq!(rows, vec!["prod\tmonitoring\t-\t-"]);
    }

    #[tokio::test]
    async fn test_test_command_rejected() {
        let (_dir, settings) = fixture("", Command::Test);
        let runtime = loaded(&settings).await;
        assert!(runtime.run(Command::Test, &ctx()).await.is_err());
    }
}
