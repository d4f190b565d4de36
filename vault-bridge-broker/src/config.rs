//! Layered configuration: built-in defaults, then a TOML file, then the
//! process environment, then command-line overrides. Later layers win.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use vault_bridge_vault::VaultConfig;

pub const ENV_PREFIX: &str = "BRIDGE__";
pub const DEFAULT_ENVIRONMENT: &str = "dev";
const REDACTED: &str = "***";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Vault,
    Memory,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "vault" => Ok(BackendKind::Vault),
            "memory" | "mem" => Ok(BackendKind::Memory),
            other => Err(anyhow!("unknown backend `{other}` (expected vault or memory)")),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Vault => "vault",
            BackendKind::Memory => "memory",
        })
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub environment: String,
    pub http: HttpConfig,
    pub backend: BackendKind,
    pub vault: VaultSettings,
    pub auth: AuthConfig,
    pub influx: InfluxConfig,
    pub tracing: TracingConfig,
    pub alerting: AlertingConfig,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct VaultSettings {
    pub addr: String,
    pub token: Option<String>,
    pub namespace: Option<String>,
    pub timeout_secs: u64,
    pub token_ttl: String,
    pub token_num_uses: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub hmac_secret: Option<String>,
    /// Raw Ed25519 public key, base64url without padding.
    pub ed25519_public_key: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub enabled: bool,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: String,
    pub precision: String,
    pub retention_policy: Option<String>,
    pub write_consistency: Option<String>,
    pub counter_table: String,
    pub histogram_table: String,
    pub flush_interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub enabled: bool,
    pub service_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct AlertingConfig {
    pub webhook_url: Option<String>,
    pub environment: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENVIRONMENT.to_string(),
            http: HttpConfig {
                bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            },
            backend: BackendKind::Vault,
            vault: VaultSettings {
                addr: vault_bridge_vault::DEFAULT_ADDR.to_string(),
                token: None,
                namespace: None,
                timeout_secs: 15,
                token_ttl: vault_bridge_vault::DEFAULT_TOKEN_TTL.to_string(),
                token_num_uses: vault_bridge_vault::DEFAULT_TOKEN_NUM_USES,
            },
            auth: AuthConfig::default(),
            influx: InfluxConfig {
                enabled: false,
                url: "http://127.0.0.1:8086".to_string(),
                username: None,
                password: None,
                database: "metrics".to_string(),
                precision: "ms".to_string(),
                retention_policy: None,
                write_consistency: None,
                counter_table: "vault_counter".to_string(),
                histogram_table: "vault_histogram".to_string(),
                flush_interval_ms: 1000,
            },
            tracing: TracingConfig {
                enabled: true,
                service_name: "vault_bridge".to_string(),
            },
            alerting: AlertingConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Copy with every credential replaced, suitable for logging.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let hide = |value: &mut Option<String>| {
            if value.is_some() {
                *value = Some(REDACTED.to_string());
            }
        };
        hide(&mut copy.vault.token);
        hide(&mut copy.auth.hmac_secret);
        hide(&mut copy.influx.password);
        hide(&mut copy.alerting.webhook_url);
        copy
    }

    pub fn vault_client_config(&self) -> Result<VaultConfig> {
        let token = self
            .vault
            .token
            .clone()
            .filter(|token| !token.is_empty())
            .context("vault.token (or VAULT_TOKEN) is required for the vault backend")?;
        let mut config = VaultConfig::new(self.vault.addr.clone(), token);
        config.namespace = self.vault.namespace.clone();
        config.timeout = Duration::from_secs(self.vault.timeout_secs.max(1));
        config.token_ttl = self.vault.token_ttl.clone();
        config.token_num_uses = self.vault.token_num_uses;
        Ok(config)
    }

    pub fn alert_environment(&self) -> &str {
        self.alerting
            .environment
            .as_deref()
            .unwrap_or(&self.environment)
    }

    /// Rejects unusable combinations and returns non-fatal warnings.
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        match (&self.auth.hmac_secret, &self.auth.ed25519_public_key) {
            (None, None) => bail!("auth.hmac_secret or auth.ed25519_public_key must be configured"),
            (Some(_), Some(_)) => {
                bail!("only one of auth.hmac_secret or auth.ed25519_public_key may be set")
            }
            (Some(secret), None) if secret.len() < 32 => {
                warnings.push("auth.hmac_secret is shorter than 32 bytes".to_string());
            }
            _ => {}
        }
        if self.backend == BackendKind::Vault {
            self.vault_client_config()?;
        } else if self.environment != DEFAULT_ENVIRONMENT {
            warnings.push(format!(
                "memory backend selected in `{}`; data is lost on restart",
                self.environment
            ));
        }
        if self.influx.enabled && self.influx.url.trim().is_empty() {
            bail!("influx.enabled is set but influx.url is empty");
        }
        if self.influx.enabled && self.influx.flush_interval_ms == 0 {
            bail!("influx.flush_interval_ms must be greater than zero");
        }
        Ok(warnings)
    }

    fn apply(&mut self, layer: ConfigLayer) -> Result<()> {
        if let Some(value) = layer.environment {
            self.environment = value;
        }
        if let Some(http) = layer.http {
            if let Some(bind) = http.bind {
                self.http.bind = bind
                    .parse()
                    .with_context(|| format!("invalid http.bind `{bind}`"))?;
            }
        }
        if let Some(backend) = layer.backend {
            if let Some(kind) = backend.kind {
                self.backend = kind.parse()?;
            }
        }
        if let Some(vault) = layer.vault {
            set(&mut self.vault.addr, vault.addr);
            set_opt(&mut self.vault.token, vault.token);
            set_opt(&mut self.vault.namespace, vault.namespace);
            set(&mut self.vault.timeout_secs, vault.timeout_secs);
            set(&mut self.vault.token_ttl, vault.token_ttl);
            set(&mut self.vault.token_num_uses, vault.token_num_uses);
        }
        if let Some(auth) = layer.auth {
            set_opt(&mut self.auth.hmac_secret, auth.hmac_secret);
            set_opt(&mut self.auth.ed25519_public_key, auth.ed25519_public_key);
            set_opt(&mut self.auth.issuer, auth.issuer);
            set_opt(&mut self.auth.audience, auth.audience);
        }
        if let Some(influx) = layer.influx {
            set(&mut self.influx.enabled, influx.enabled);
            set(&mut self.influx.url, influx.url);
            set_opt(&mut self.influx.username, influx.username);
            set_opt(&mut self.influx.password, influx.password);
            set(&mut self.influx.database, influx.database);
            set(&mut self.influx.precision, influx.precision);
            set_opt(&mut self.influx.retention_policy, influx.retention_policy);
            set_opt(&mut self.influx.write_consistency, influx.write_consistency);
            set(&mut self.influx.counter_table, influx.counter_table);
            set(&mut self.influx.histogram_table, influx.histogram_table);
            set(&mut self.influx.flush_interval_ms, influx.flush_interval_ms);
        }
        if let Some(tracing) = layer.tracing {
            set(&mut self.tracing.enabled, tracing.enabled);
            set(&mut self.tracing.service_name, tracing.service_name);
        }
        if let Some(alerting) = layer.alerting {
            set_opt(&mut self.alerting.webhook_url, alerting.webhook_url);
            set_opt(&mut self.alerting.environment, alerting.environment);
        }
        Ok(())
    }
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

/// Empty strings clear an optional setting.
fn set_opt(target: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value {
        *target = Some(value).filter(|value| !value.is_empty());
    }
}

#[derive(Default, Debug, Clone, Deserialize)]
pub struct ConfigLayer {
    pub environment: Option<String>,
    pub http: Option<HttpLayer>,
    pub backend: Option<BackendLayer>,
    pub vault: Option<VaultLayer>,
    pub auth: Option<AuthLayer>,
    pub influx: Option<InfluxLayer>,
    pub tracing: Option<TracingLayer>,
    pub alerting: Option<AlertingLayer>,
}

#[derive(Default, Debug, Clone, Deserialize)]
pub struct HttpLayer {
    pub bind: Option<String>,
}

#[derive(Default, Debug, Clone, Deserialize)]
pub struct BackendLayer {
    pub kind: Option<String>,
}

#[derive(Default, Debug, Clone, Deserialize)]
pub struct VaultLayer {
    pub addr: Option<String>,
    pub token: Option<String>,
    pub namespace: Option<String>,
    pub timeout_secs: Option<u64>,
    pub token_ttl: Option<String>,
    pub token_num_uses: Option<u64>,
}

#[derive(Default, Debug, Clone, Deserialize)]
pub struct AuthLayer {
    pub hmac_secret: Option<String>,
    pub ed25519_public_key: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Default, Debug, Clone, Deserialize)]
pub struct InfluxLayer {
    pub enabled: Option<bool>,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub precision: Option<String>,
    pub retention_policy: Option<String>,
    pub write_consistency: Option<String>,
    pub counter_table: Option<String>,
    pub histogram_table: Option<String>,
    pub flush_interval_ms: Option<u64>,
}

#[derive(Default, Debug, Clone, Deserialize)]
pub struct TracingLayer {
    pub enabled: Option<bool>,
    pub service_name: Option<String>,
}

#[derive(Default, Debug, Clone, Deserialize)]
pub struct AlertingLayer {
    pub webhook_url: Option<String>,
    pub environment: Option<String>,
}

/// Values given on the command line.
#[derive(Default, Debug, Clone)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub environment: Option<String>,
    pub bind: Option<String>,
    pub backend: Option<String>,
}

#[derive(Debug)]
pub struct ResolvedConfig {
    pub config: BridgeConfig,
    /// Config file that was applied, if any.
    pub source: Option<PathBuf>,
    pub warnings: Vec<String>,
}

pub struct ConfigLoader {
    overrides: CliOverrides,
    vars: Vec<(String, String)>,
}

impl ConfigLoader {
    /// Loader reading the current process environment.
    pub fn new(overrides: CliOverrides) -> Self {
        Self::with_vars(overrides, std::env::vars())
    }

    pub fn with_vars(
        overrides: CliOverrides,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            overrides,
            vars: vars.into_iter().collect(),
        }
    }

    pub fn load(&self) -> Result<ResolvedConfig> {
        let mut config = BridgeConfig::default();
        let (env_layer, mut warnings) = env_layer(&self.vars);

        let environment = self
            .overrides
            .environment
            .clone()
            .or_else(|| env_layer.environment.clone())
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());

        let source = match &self.overrides.config_path {
            Some(path) => {
                config.apply(load_from_file(path)?)?;
                Some(path.clone())
            }
            None => {
                let path = default_config_path(&environment);
                if path.exists() {
                    config.apply(load_from_file(&path)?)?;
                    Some(path)
                } else {
                    None
                }
            }
        };

        config.apply(env_layer)?;
        config.apply(cli_layer(&self.overrides))?;
        config.environment = environment;

        warnings.extend(config.validate()?);
        Ok(ResolvedConfig {
            config,
            source,
            warnings,
        })
    }
}

pub fn default_config_path(environment: &str) -> PathBuf {
    PathBuf::from("conf")
        .join(environment)
        .join("vault_bridge.toml")
}

pub fn load_from_file(path: &Path) -> Result<ConfigLayer> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&data).with_context(|| format!("invalid toml config {}", path.display()))
}

/// Builds a layer from `VAULT_ADDR`/`VAULT_TOKEN`/`VAULT_NAMESPACE` and then
/// `BRIDGE__<SECTION>__<KEY>` variables. Unparseable values are skipped with
/// a warning.
pub fn env_layer(vars: &[(String, String)]) -> (ConfigLayer, Vec<String>) {
    let mut layer = ConfigLayer::default();
    let mut warnings = Vec::new();

    for (name, value) in vars {
        match name.as_str() {
            "VAULT_ADDR" => layer_vault(&mut layer).addr = Some(value.clone()),
            "VAULT_TOKEN" => layer_vault(&mut layer).token = Some(value.clone()),
            "VAULT_NAMESPACE" => layer_vault(&mut layer).namespace = Some(value.clone()),
            _ => {}
        }
    }

    for (name, value) in vars {
        let Some(key) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let key = key.to_ascii_lowercase();
        if let Err(err) = apply_env_var(&mut layer, &key, value) {
            warnings.push(format!("ignoring {name}: {err}"));
        }
    }

    (layer, warnings)
}

fn layer_vault(layer: &mut ConfigLayer) -> &mut VaultLayer {
    layer.vault.get_or_insert_with(Default::default)
}

fn apply_env_var(layer: &mut ConfigLayer, key: &str, value: &str) -> Result<()> {
    let text = || Some(value.to_string());
    let (section, field) = match key.split_once("__") {
        Some((section, field)) => (section, field),
        None if key == "environment" => {
            layer.environment = text();
            return Ok(());
        }
        None => bail!("unknown setting"),
    };

    match section {
        "http" => {
            let http = layer.http.get_or_insert_with(Default::default);
            match field {
                "bind" => http.bind = text(),
                _ => bail!("unknown setting"),
            }
        }
        "backend" => {
            let backend = layer.backend.get_or_insert_with(Default::default);
            match field {
                "kind" => backend.kind = text(),
                _ => bail!("unknown setting"),
            }
        }
        "vault" => {
            let vault = layer_vault(layer);
            match field {
                "addr" => vault.addr = text(),
                "token" => vault.token = text(),
                "namespace" => vault.namespace = text(),
                "timeout_secs" => vault.timeout_secs = Some(parse(value)?),
                "token_ttl" => vault.token_ttl = text(),
                "token_num_uses" => vault.token_num_uses = Some(parse(value)?),
                _ => bail!("unknown setting"),
            }
        }
        "auth" => {
            let auth = layer.auth.get_or_insert_with(Default::default);
            match field {
                "hmac_secret" => auth.hmac_secret = text(),
                "ed25519_public_key" => auth.ed25519_public_key = text(),
                "issuer" => auth.issuer = text(),
                "audience" => auth.audience = text(),
                _ => bail!("unknown setting"),
            }
        }
        "influx" => {
            let influx = layer.influx.get_or_insert_with(Default::default);
            match field {
                "enabled" => influx.enabled = Some(parse_bool(value)?),
                "url" => influx.url = text(),
                "username" => influx.username = text(),
                "password" => influx.password = text(),
                "database" => influx.database = text(),
                "precision" => influx.precision = text(),
                "retention_policy" => influx.retention_policy = text(),
                "write_consistency" => influx.write_consistency = text(),
                "counter_table" => influx.counter_table = text(),
                "histogram_table" => influx.histogram_table = text(),
                "flush_interval_ms" => influx.flush_interval_ms = Some(parse(value)?),
                _ => bail!("unknown setting"),
            }
        }
        "tracing" => {
            let tracing = layer.tracing.get_or_insert_with(Default::default);
            match field {
                "enabled" => tracing.enabled = Some(parse_bool(value)?),
                "service_name" => tracing.service_name = text(),
                _ => bail!("unknown setting"),
            }
        }
        "alerting" => {
            let alerting = layer.alerting.get_or_insert_with(Default::default);
            match field {
                "webhook_url" => alerting.webhook_url = text(),
                "environment" => alerting.environment = text(),
                _ => bail!("unknown setting"),
            }
        }
        _ => bail!("unknown section `{section}`"),
    }
    Ok(())
}

fn parse<T>(value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value `{value}`"))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("invalid boolean `{value}`")),
    }
}

fn cli_layer(overrides: &CliOverrides) -> ConfigLayer {
    ConfigLayer {
        http: overrides.bind.clone().map(|bind| HttpLayer { bind: Some(bind) }),
        backend: overrides
            .backend
            .clone()
            .map(|kind| BackendLayer { kind: Some(kind) }),
        ..ConfigLayer::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn memory_auth() -> Vec<(String, String)> {
        vars(&[
            ("BRIDGE__BACKEND__KIND", "memory"),
            ("BRIDGE__AUTH__HMAC_SECRET", "0123456789abcdef0123456789abcdef"),
        ])
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = BridgeConfig::default();
        assert_eq!(config.http.bind.to_string(), "127.0.0.1:8080");
        assert_eq!(config.influx.counter_table, "vault_counter");
        assert_eq!(config.influx.histogram_table, "vault_histogram");
        assert_eq!(config.influx.database, "metrics");
        assert_eq!(config.influx.precision, "ms");
        assert_eq!(config.tracing.service_name, "vault_bridge");
        assert_eq!(config.vault.token_ttl, "60s");
        assert!(config.alerting.webhook_url.is_none());
    }

    #[test]
    fn env_layer_reads_prefixed_and_conventional_vars() {
        let (layer, warnings) = env_layer(&vars(&[
            ("VAULT_ADDR", "http://vault:8200"),
            ("VAULT_TOKEN", "root"),
            ("BRIDGE__VAULT__ADDR", "http://override:8200"),
            ("BRIDGE__INFLUX__ENABLED", "true"),
            ("BRIDGE__INFLUX__FLUSH_INTERVAL_MS", "soon"),
            ("BRIDGE__NOPE__X", "1"),
            ("UNRELATED", "x"),
        ]));
        let vault = layer.vault.unwrap();
        assert_eq!(vault.addr.as_deref(), Some("http://override:8200"));
        assert_eq!(vault.token.as_deref(), Some("root"));
        assert_eq!(layer.influx.unwrap().enabled, Some(true));
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn file_then_env_then_cli() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[http]
bind = "0.0.0.0:9000"

[backend]
kind = "memory"

[auth]
hmac_secret = "from-file-0123456789abcdef0123456789"

[influx]
database = "bridge"
"#
        )
        .unwrap();

        let overrides = CliOverrides {
            config_path: Some(file.path().to_path_buf()),
            bind: Some("127.0.0.1:7000".into()),
            ..Default::default()
        };
        let resolved = ConfigLoader::with_vars(
            overrides,
            vars(&[("BRIDGE__INFLUX__DATABASE", "from-env")]),
        )
        .load()
        .unwrap();

        assert_eq!(resolved.config.http.bind.to_string(), "127.0.0.1:7000");
        assert_eq!(resolved.config.backend, BackendKind::Memory);
        assert_eq!(resolved.config.influx.database, "from-env");
        assert_eq!(resolved.source.as_deref(), Some(file.path()));
    }

    #[test]
    fn missing_default_file_is_skipped() {
        let overrides = CliOverrides {
            environment: Some("no-such-env".into()),
            ..Default::default()
        };
        let resolved = ConfigLoader::with_vars(overrides, memory_auth()).load().unwrap();
        assert!(resolved.source.is_none());
        assert_eq!(resolved.config.environment, "no-such-env");
        assert!(!resolved.warnings.is_empty());
    }

    #[test]
    fn malformed_file_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[http\nbind = ").unwrap();
        let overrides = CliOverrides {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(ConfigLoader::with_vars(overrides, memory_auth()).load().is_err());
    }

    #[test]
    fn vault_backend_requires_token() {
        let err = ConfigLoader::with_vars(
            CliOverrides::default(),
            vars(&[("BRIDGE__AUTH__HMAC_SECRET", "0123456789abcdef0123456789abcdef")]),
        )
        .load()
        .unwrap_err();
        assert!(err.to_string().contains("vault.token"));
    }

    #[test]
    fn auth_key_material_is_required() {
        let err = ConfigLoader::with_vars(
            CliOverrides::default(),
            vars(&[("BRIDGE__BACKEND__KIND", "memory")]),
        )
        .load()
        .unwrap_err();
        assert!(err.to_string().contains("auth.hmac_secret"));
    }

    #[test]
    fn redaction_hides_credentials() {
        let mut config = BridgeConfig::default();
        config.vault.token = Some("root".into());
        config.auth.hmac_secret = Some("secret".into());
        config.influx.password = Some("pw".into());
        config.alerting.webhook_url = Some("https://hooks.example/abc".into());
        let rendered = format!("{:?}", config.redacted());
        for secret in ["root", "\"secret\"", "\"pw\"", "hooks.example"] {
            assert!(!rendered.contains(secret), "{secret} leaked: {rendered}");
        }
    }

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("Memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!("vault".parse::<BackendKind>().unwrap(), BackendKind::Vault);
        assert!("consul".parse::<BackendKind>().is_err());
    }
}
