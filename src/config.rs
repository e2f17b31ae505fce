use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::rename::RenameVerification;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: SocketAddr,
    /// Checkout of the peers repository.
    pub peers_dir: PathBuf,
    /// fastd instance to reload, as in `fastd@<site>.service`.
    pub site: String,
    pub remote: String,
    pub review_branch: String,
    pub production_branch: String,
    /// Command prefix; the unit name is appended.
    pub reload_command: Vec<String>,
    /// Build state that allows a deploy.
    pub success_state: String,
    pub rename_verification: RenameVerification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
}

/// How the deploy webhook is authenticated.
#[derive(Clone, Deserialize, Serialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum AuthConfig {
    SharedSecret {
        secret: String,
    },
    Signature {
        #[serde(default = "default_public_key_url")]
        public_key_url: String,
        /// JSON pointer to the PEM in the response; empty means the body is
        /// the PEM itself.
        #[serde(default = "default_json_pointer")]
        json_pointer: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    LegacyDigest {
        repo_slug: String,
        token: String,
    },
}

// Secrets stay out of the startup log line.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthConfig::SharedSecret { .. } => f.write_str("SharedSecret { .. }"),
            AuthConfig::Signature {
                public_key_url,
                json_pointer,
                timeout_secs,
            } => f
                .debug_struct("Signature")
                .field("public_key_url", public_key_url)
                .field("json_pointer", json_pointer)
                .field("timeout_secs", timeout_secs)
                .finish(),
            AuthConfig::LegacyDigest { repo_slug, .. } => f
                .debug_struct("LegacyDigest")
                .field("repo_slug", repo_slug)
                .finish_non_exhaustive(),
        }
    }
}

fn default_public_key_url() -> String {
    "https://api.travis-ci.org/config".into()
}

fn default_json_pointer() -> Option<String> {
    Some("/config/notifications/webhook/public_key".into())
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 8080)),
            peers_dir: PathBuf::from("/etc/fastd/site/peers"),
            site: "site".into(),
            remote: "origin".into(),
            review_branch: "master".into(),
            production_branch: "deploy".into(),
            reload_command: vec!["sudo".into(), "systemctl".into(), "reload".into()],
            success_state: "passed".into(),
            rename_verification: RenameVerification::Disabled,
            auth: None,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("peergate.toml"))
                .merge(Json::file("peergate.json"))
                .merge(Env::prefixed("PEERGATE_").split("__")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Support Docker-style secrets
        match &mut config.auth {
            Some(AuthConfig::SharedSecret { secret }) => {
                if let Ok(path) = std::env::var("PEERGATE_SHARED_SECRET_FILE") {
                    *secret = std::fs::read_to_string(path)?.trim().to_string();
                }
            }
            Some(AuthConfig::LegacyDigest { token, .. }) => {
                if let Ok(path) = std::env::var("PEERGATE_LEGACY_TOKEN_FILE") {
                    *token = std::fs::read_to_string(path)?.trim().to_string();
                }
            }
            Some(AuthConfig::Signature { .. }) => {}
            None => anyhow::bail!("no deploy authentication configured (set auth.strategy)"),
        }

        Ok(config)
    }

    /// systemd unit of the fastd instance for this site.
    pub fn reload_unit(&self) -> String {
        format!("fastd@{}.service", self.site)
    }
}
