//! レジストリ認証処理
//!
//! Docker config.json（`auths`、`credHelpers`、`credsStore`）から
//! レジストリホストごとの認証情報を取得します。

use base64::Engine;
use dockwright_core::{CoreError, CredentialsStore, UserPasswordAuth};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// レジストリホスト未指定時のレジストリ
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Docker Hub が config.json に記録されるときのキー
const DOCKER_HUB_INDEX: &str = "https://index.docker.io/v1/";

/// Docker config.json の構造
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfig {
    /// 認証情報 (レジストリ -> AuthEntry)
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    /// レジストリごとの credential helper
    #[serde(default)]
    cred_helpers: HashMap<String, String>,
    /// credential helper 名 (例: "osxkeychain", "desktop")
    #[serde(default)]
    creds_store: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthEntry {
    /// Base64エンコードされた "username:password"
    auth: Option<String>,
}

/// credential helper からのレスポンス
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialResponse {
    username: String,
    secret: String,
}

/// Docker config.json を参照する認証情報ストア
#[derive(Debug, Clone)]
pub struct DockerConfigCredentials {
    config_path: PathBuf,
}

impl Default for DockerConfigCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerConfigCredentials {
    /// `$DOCKER_CONFIG/config.json`、なければ `~/.docker/config.json` を使用
    pub fn new() -> Self {
        let config_path = std::env::var("DOCKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".docker"))
                    .unwrap_or_else(|| PathBuf::from(".docker"))
            })
            .join("config.json");

        Self { config_path }
    }

    pub fn with_config_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn load_docker_config(&self, registry: &str) -> Result<DockerConfig, CoreError> {
        let content = std::fs::read_to_string(&self.config_path).map_err(|e| {
            unavailable(
                registry,
                format!("Failed to read {}: {}", self.config_path.display(), e),
            )
        })?;

        serde_json::from_str(&content).map_err(|e| {
            unavailable(
                registry,
                format!("Failed to parse {}: {}", self.config_path.display(), e),
            )
        })
    }

    /// credential helper から認証情報を取得
    ///
    /// helper がこのレジストリの認証情報を持っていない場合は `None`。
    fn get_from_helper(
        &self,
        helper: &str,
        server: &str,
        registry: &str,
    ) -> Result<Option<UserPasswordAuth>, CoreError> {
        let helper_cmd = format!("docker-credential-{}", helper);

        let mut child = Command::new(&helper_cmd)
            .arg("get")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| unavailable(registry, format!("Failed to run {}: {}", helper_cmd, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(server.as_bytes()).ok();
        }

        let output = child
            .wait_with_output()
            .map_err(|e| unavailable(registry, format!("Credential helper failed: {}", e)))?;

        if !output.status.success() {
            tracing::debug!(
                registry,
                helper = %helper_cmd,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Credential helper has no entry"
            );
            return Ok(None);
        }

        let response: CredentialResponse = serde_json::from_slice(&output.stdout).map_err(|e| {
            unavailable(
                registry,
                format!("Failed to parse credential helper response: {}", e),
            )
        })?;

        Ok(Some(UserPasswordAuth::new(response.username, response.secret)))
    }
}

impl CredentialsStore for DockerConfigCredentials {
    fn get(&self, registry_host: &str) -> Result<UserPasswordAuth, CoreError> {
        let registry = normalize_registry(registry_host);

        // config.json が存在しない場合は匿名アクセス
        if !self.config_path.exists() {
            tracing::debug!(path = %self.config_path.display(), "Docker config.json not found");
            return Err(CoreError::CredentialsNotFound(registry));
        }

        let config = self.load_docker_config(&registry)?;

        // 1. auths セクション
        let entry = config
            .auths
            .iter()
            .find(|(server, _)| normalize_registry(server) == registry);
        if let Some((server, AuthEntry { auth: Some(auth_b64) })) = entry {
            tracing::debug!(registry = %registry, server = %server, "Found credentials in auths");
            return decode_auth(auth_b64, &registry);
        }

        // 2. credHelpers、3. credsStore
        let helper = config
            .cred_helpers
            .iter()
            .find(|(server, _)| normalize_registry(server) == registry)
            .map(|(_, helper)| helper)
            .or(config.creds_store.as_ref());
        if let Some(helper) = helper {
            let server = entry
                .map(|(server, _)| server.clone())
                .unwrap_or_else(|| helper_server(&registry));
            if let Some(auth) = self.get_from_helper(helper, &server, &registry)? {
                tracing::debug!(registry = %registry, helper = %helper, "Found credentials in credential helper");
                return Ok(auth);
            }
        }

        tracing::debug!(registry = %registry, "No credentials found");
        Err(CoreError::CredentialsNotFound(registry))
    }
}

/// レジストリ指定をホスト名に正規化
///
/// # Examples
/// - `""` -> `docker.io`
/// - `https://index.docker.io/v1/` -> `docker.io`
/// - `https://ghcr.io` -> `ghcr.io`
/// - `localhost:5000` -> `localhost:5000`
pub fn normalize_registry(registry: &str) -> String {
    let host = registry
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or_default();

    match host {
        "" | "index.docker.io" | "registry-1.docker.io" => DEFAULT_REGISTRY.to_string(),
        other => other.to_string(),
    }
}

/// credential helper に渡すサーバー名
fn helper_server(registry: &str) -> String {
    if registry == DEFAULT_REGISTRY {
        DOCKER_HUB_INDEX.to_string()
    } else {
        registry.to_string()
    }
}

/// Base64エンコードされた認証情報をデコード
fn decode_auth(auth_b64: &str, registry: &str) -> Result<UserPasswordAuth, CoreError> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth_b64.trim())
        .map_err(|e| unavailable(registry, format!("Failed to decode auth: {}", e)))?;

    let auth_str = String::from_utf8(decoded)
        .map_err(|e| unavailable(registry, format!("Invalid UTF-8 in auth: {}", e)))?;

    auth_str
        .split_once(':')
        .map(|(username, password)| UserPasswordAuth::new(username, password))
        .ok_or_else(|| unavailable(registry, "auth is not in user:password form".to_string()))
}

fn unavailable(registry: &str, message: String) -> CoreError {
    CoreError::CredentialsUnavailable {
        registry: registry.to_string(),
        message,
    }
}
