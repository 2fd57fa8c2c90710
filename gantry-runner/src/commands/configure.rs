//! Runner enrollment
//!
//! One-shot registration: trade the registration token for a tenant
//! bearer, generate the RSA identity, create the agent record in the
//! self-hosted pool, and persist all three artifacts. Any failing HTTP
//! exchange aborts enrollment; nothing past the failing step is persisted.

use anyhow::{Context, Result};
use base64::Engine;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gantry_client::auth::exchange_registration_token;
use gantry_client::TenantClient;
use gantry_core::agent::{AgentAuthorization, AgentLabel, AgentPublicKey, TaskAgent};
use gantry_core::timeline::timestamp;

use crate::config::RunnerSettings;
use crate::credentials::CredentialStore;

pub async fn configure(
    settings: &RunnerSettings,
    url: String,
    token: String,
    labels: Vec<String>,
    name: Option<String>,
) -> Result<()> {
    let store = CredentialStore::new(settings.clone());
    let http = reqwest::Client::new();

    info!("registering runner with {url}");
    let auth = exchange_registration_token(&http, &url, &token)
        .await
        .context("failed to register runner")?;
    store.store_auth(&auth)?;

    let client = TenantClient::connect(http, &auth.tenant_url)
        .await
        .context("failed to fetch tenant connection data")?;
    match client.list_pools(&auth.token).await {
        Ok(pools) => debug!("tenant offers {} agent pool(s)", pools.len()),
        Err(e) => warn!("could not list agent pools: {e}"),
    }

    info!("generating RSA key pair");
    let mut rng = rand::thread_rng();
    let key = RsaPrivateKey::new(&mut rng, 2048).context("failed to generate key pair")?;
    let der = key
        .to_pkcs1_der()
        .context("failed to encode private key")?;
    store.store_key(der.as_bytes())?;

    let agent = build_agent(&key, labels, name);
    let created = client
        .create_agent(&auth.token, settings.pool_id, &agent)
        .await
        .context("failed to create agent record")?;
    store.store_agent(&created)?;

    info!("runner {} registered with id {}", created.name, created.id);
    Ok(())
}

fn build_agent(key: &RsaPrivateKey, labels: Vec<String>, name: Option<String>) -> TaskAgent {
    let mut agent_labels = vec![AgentLabel::system("self-hosted")];
    agent_labels.extend(labels.into_iter().map(AgentLabel::user));

    TaskAgent {
        id: 0,
        name: name.unwrap_or_else(|| format!("gantry_{}", Uuid::new_v4())),
        version: "3.0.0".to_string(),
        os_description: "rust".to_string(),
        provisioning_state: "Provisioned".to_string(),
        created_on: timestamp(),
        max_parallelism: 1,
        labels: agent_labels,
        authorization: AgentAuthorization {
            authorization_url: None,
            client_id: None,
            public_key: public_key_material(key),
        },
    }
}

/// Encodes the public key the way the service stores it: base64 of the
/// big-endian exponent with leading zero bytes stripped, and base64 of the
/// big-endian modulus.
fn public_key_material(key: &RsaPrivateKey) -> AgentPublicKey {
    let exponent = key
        .e()
        .to_bytes_be()
        .iter()
        .fold(0u32, |acc, &byte| (acc << 8) | u32::from(byte));
    AgentPublicKey {
        exponent: encode_exponent(exponent),
        modulus: base64::engine::general_purpose::STANDARD.encode(key.n().to_bytes_be()),
    }
}

fn encode_exponent(exponent: u32) -> String {
    let bytes = exponent.to_be_bytes();
    // At most three leading zeros are stripped; zero still encodes one byte.
    let first = bytes.iter().take(3).take_while(|&&byte| byte == 0).count();
    base64::engine::general_purpose::STANDARD.encode(&bytes[first..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponent_encoding_strips_leading_zeros() {
        assert_eq!(encode_exponent(65537), "AQAB");
        assert_eq!(encode_exponent(3), "Aw==");
        assert_eq!(encode_exponent(0), "AA==");
        assert_eq!(encode_exponent(0x0101_0101), "AQEBAQ==");
    }

    #[test]
    fn test_agent_labels_start_with_self_hosted() {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 512).unwrap();
        let agent = build_agent(
            &key,
            vec!["gpu".to_string(), "eu-west".to_string()],
            Some("runner-a".to_string()),
        );

        assert_eq!(agent.name, "runner-a");
        assert_eq!(agent.max_parallelism, 1);
        assert_eq!(agent.labels[0].name, "self-hosted");
        assert_eq!(agent.labels[0].label_type, "system");
        assert_eq!(agent.labels[1].name, "gpu");
        assert_eq!(agent.labels[1].label_type, "user");
        assert_eq!(agent.labels[2].name, "eu-west");
    }

    #[test]
    fn test_public_key_has_no_leading_zero_modulus() {
        use base64::Engine;
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 512).unwrap();
        let material = public_key_material(&key);

        assert_eq!(material.exponent, "AQAB");
        let modulus = base64::engine::general_purpose::STANDARD
            .decode(material.modulus)
            .unwrap();
        assert_ne!(modulus[0], 0);
    }
}
