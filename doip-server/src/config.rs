//! Configuration: CLI flags, an optional `config.yaml`, environment
//! overrides. Precedence is CLI > environment > file > built-in default.

use std::fs;
use std::path::Path;

use clap::Parser;
use serde::Deserialize;

pub const DEFAULT_FDO_API: &str = "https://fdo.portal.mardi4nfdi.de/fdo/";
pub const DEFAULT_MEDIAWIKI_API: &str = "https://www.wikidata.org/w/api.php";

const CONFIG_FILE: &str = "config.yaml";

/// DOIP server for the MaRDI object portal.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Cli {
    /// TCP port of the strict listener (the compat listener binds port + 1)
    #[arg(long, env = "DOIP_PORT", default_value_t = doip_wire::consts::DEFAULT_PORT)]
    pub port: u16,

    /// Base URL of the FDO manifest registry
    #[arg(long = "fdo-api", env = "FDO_API", default_value = DEFAULT_FDO_API)]
    pub fdo_api: String,
}

/// Optional `config.yaml` contents. Only populated keys take effect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub lakefs: LakeFsFile,
    #[serde(default)]
    pub ollama: OllamaFile,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LakeFsFile {
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub signature_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OllamaFile {
    pub api_key: Option<String>,
}

/// Immutable configuration snapshot shared by all subsystems.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub fdo_api: String,
    pub mediawiki_api: String,
    pub lakefs: LakeFsSettings,
    /// Passed through to the workflow collaborator; unused by the core.
    pub ollama_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LakeFsSettings {
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub repo: Option<String>,
    pub branch: String,
    pub signature_version: String,
}

impl Default for LakeFsSettings {
    fn default() -> Self {
        Self {
            url: None,
            user: None,
            password: None,
            repo: None,
            branch: "main".to_string(),
            signature_version: "s3v4".to_string(),
        }
    }
}

impl Config {
    /// Resolve the full configuration from CLI, environment and file.
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let file = load_file(Path::new(CONFIG_FILE))?;
        Self::resolve(cli, file)
    }

    fn resolve(cli: &Cli, file: FileConfig) -> anyhow::Result<Self> {
        let lakefs = LakeFsSettings {
            url: env_var("LAKEFS_URL")
                .or(file.lakefs.url)
                .map(|u| normalize_endpoint(&u)),
            user: env_var("LAKEFS_USER").or(file.lakefs.user),
            password: env_var("LAKEFS_PASSWORD").or(file.lakefs.password),
            repo: env_var("LAKEFS_REPO").or(file.lakefs.repo),
            branch: file.lakefs.branch.unwrap_or_else(|| "main".to_string()),
            signature_version: file
                .lakefs
                .signature_version
                .unwrap_or_else(|| "s3v4".to_string()),
        };
        if lakefs.signature_version != "s3v4" {
            anyhow::bail!(
                "unsupported lakefs.signature_version '{}': only s3v4 is supported",
                lakefs.signature_version
            );
        }
        Ok(Self {
            port: cli.port,
            fdo_api: ensure_trailing_slash(&cli.fdo_api),
            mediawiki_api: env_var("MEDIAWIKI_API")
                .unwrap_or_else(|| DEFAULT_MEDIAWIKI_API.to_string()),
            lakefs,
            ollama_api_key: env_var("OLLAMA_API_KEY").or(file.ollama.api_key),
        })
    }
}

fn load_file(path: &Path) -> anyhow::Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let raw = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&raw)?)
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Prefix `https://` when the endpoint carries no scheme.
fn normalize_endpoint(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

fn ensure_trailing_slash(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}
