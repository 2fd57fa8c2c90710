//! Credential store
//!
//! Persists the runner identity established at registration: the RSA
//! private key (PKCS#1 DER, owner-only permissions), the agent record the
//! server assigned, and the registration handoff. `run` refuses to start
//! without all three.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use gantry_core::agent::{GitHubAuthResult, TaskAgent};

use crate::config::RunnerSettings;

/// The identity loaded back from disk for `run`.
#[derive(Debug, Clone)]
pub struct RunnerIdentity {
    pub key_der: Vec<u8>,
    pub agent: TaskAgent,
    pub auth: GitHubAuthResult,
}

/// File-backed store for the registration artifacts.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    settings: RunnerSettings,
}

impl CredentialStore {
    pub fn new(settings: RunnerSettings) -> Self {
        Self { settings }
    }

    /// Persists the private key. Created with owner-only permissions.
    pub fn store_key(&self, der: &[u8]) -> Result<()> {
        write_file(&self.settings.key_path, der)?;
        restrict_permissions(&self.settings.key_path)?;
        Ok(())
    }

    /// Persists the server-assigned agent record.
    pub fn store_agent(&self, agent: &TaskAgent) -> Result<()> {
        let json = serde_json::to_vec_pretty(agent).context("failed to encode agent record")?;
        write_file(&self.settings.agent_path, &json)
    }

    /// Persists the registration handoff.
    pub fn store_auth(&self, auth: &GitHubAuthResult) -> Result<()> {
        let json = serde_json::to_vec_pretty(auth).context("failed to encode auth result")?;
        write_file(&self.settings.auth_path, &json)
    }

    /// Loads the complete identity; any missing or corrupt file is fatal.
    pub fn load(&self) -> Result<RunnerIdentity> {
        let key_der = fs::read(&self.settings.key_path).with_context(|| {
            format!(
                "failed to read private key from {} (is this runner configured?)",
                self.settings.key_path.display()
            )
        })?;

        let agent = fs::read(&self.settings.agent_path)
            .with_context(|| format!("failed to read {}", self.settings.agent_path.display()))?;
        let agent: TaskAgent = serde_json::from_slice(&agent).with_context(|| {
            format!("corrupt agent record at {}", self.settings.agent_path.display())
        })?;

        let auth = fs::read(&self.settings.auth_path)
            .with_context(|| format!("failed to read {}", self.settings.auth_path.display()))?;
        let auth: GitHubAuthResult = serde_json::from_slice(&auth).with_context(|| {
            format!("corrupt auth result at {}", self.settings.auth_path.display())
        })?;

        Ok(RunnerIdentity {
            key_der,
            agent,
            auth,
        })
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("failed to restrict permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::agent::{AgentAuthorization, AgentLabel};

    fn scratch_store() -> (CredentialStore, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("gantry-test-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        (CredentialStore::new(RunnerSettings::in_dir(&dir)), dir)
    }

    fn sample_agent() -> TaskAgent {
        TaskAgent {
            id: 12,
            name: "runner-a".to_string(),
            version: "3.0.0".to_string(),
            os_description: "rust".to_string(),
            provisioning_state: "Provisioned".to_string(),
            created_on: "2021-05-22T00:00:00".to_string(),
            max_parallelism: 1,
            labels: vec![AgentLabel::system("self-hosted")],
            authorization: AgentAuthorization::default(),
        }
    }

    #[test]
    fn test_round_trips_identity() {
        let (store, dir) = scratch_store();

        store.store_key(&[0x30, 0x82, 0x01]).unwrap();
        store.store_agent(&sample_agent()).unwrap();
        store
            .store_auth(&GitHubAuthResult {
                tenant_url: "https://pipelines.example.test/t".to_string(),
                token_schema: "OAuthAccessToken".to_string(),
                token: "tenant-token".to_string(),
            })
            .unwrap();

        let identity = store.load().unwrap();
        assert_eq!(identity.key_der, vec![0x30, 0x82, 0x01]);
        assert_eq!(identity.agent.id, 12);
        assert_eq!(identity.auth.token, "tenant-token");

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_load_fails_without_key() {
        let (store, dir) = scratch_store();
        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("cred.pkcs1"));
        fs::remove_dir_all(dir).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let (store, dir) = scratch_store();
        store.store_key(b"key").unwrap();
        let mode = fs::metadata(dir.join("cred.pkcs1")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        fs::remove_dir_all(dir).unwrap();
    }
}
