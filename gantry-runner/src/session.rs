//! Session management and envelope decryption
//!
//! Creating a session yields an RSA-wrapped AES-256 key; every queued
//! message body is AES-CBC ciphertext under that key, PKCS#7-padded and
//! sometimes UTF-8-BOM-prefixed. Depadding is tolerant: a final byte that
//! is not a valid pad count leaves the buffer intact, which favours
//! interop over strictness on corrupt input.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};
use anyhow::{Context, Result};
use base64::Engine;
use rsa::{Oaep, RsaPrivateKey};
use sha2::Sha256;
use uuid::Uuid;

use gantry_client::TenantClient;
use gantry_core::agent::TaskAgent;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const BLOCK_SIZE: usize = 16;
const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// An open message-queue session plus its unwrapped message key.
#[derive(Debug, Clone)]
pub struct RunnerSession {
    pub session_id: Uuid,
    pub aes_key: Vec<u8>,
}

/// Creates a session and unwraps its AES key with the agent private key
/// (RSA-OAEP over SHA-256, no label).
pub async fn create_session(
    client: &TenantClient,
    token: &str,
    pool_id: u32,
    agent: TaskAgent,
    key: &RsaPrivateKey,
) -> Result<RunnerSession> {
    let session = client
        .create_session(token, pool_id, agent)
        .await
        .context("failed to create session")?;
    let session_id = session
        .session_id
        .context("session create response carried no session id")?;
    let wrapped = base64::engine::general_purpose::STANDARD
        .decode(&session.encryption_key.value)
        .context("session key is not valid base64")?;
    let aes_key = key
        .decrypt(Oaep::new::<Sha256>(), &wrapped)
        .context("failed to unwrap session key")?;
    anyhow::ensure!(
        aes_key.len() == 32,
        "unwrapped session key has unexpected length {}",
        aes_key.len()
    );
    Ok(RunnerSession {
        session_id,
        aes_key,
    })
}

/// Decrypts one message envelope into its JSON payload bytes.
///
/// Steps: base64-decode iv and body, AES-256-CBC decrypt in place, strip a
/// valid PKCS#7 pad, then a leading UTF-8 BOM.
pub fn decrypt_envelope(aes_key: &[u8], iv_b64: &str, body_b64: &str) -> Result<Vec<u8>> {
    let engine = &base64::engine::general_purpose::STANDARD;
    let iv = engine.decode(iv_b64).context("message iv is not valid base64")?;
    let mut body = engine
        .decode(body_b64)
        .context("message body is not valid base64")?;

    Aes256CbcDec::new_from_slices(aes_key, &iv)
        .map_err(|e| anyhow::anyhow!("bad key or iv length: {e}"))?
        .decrypt_padded_mut::<NoPadding>(&mut body)
        .map_err(|e| anyhow::anyhow!("ciphertext is not block-aligned: {e}"))?;

    let mut valid = body.len();
    if let Some(&last) = body.last() {
        let pad = last as usize;
        // A pad count of BLOCK_SIZE or more is treated as data, not padding.
        if pad < BLOCK_SIZE {
            let tail_matches = (2..=pad).all(|i| body[body.len() - i] == last);
            if tail_matches {
                valid -= pad;
            }
        }
    }

    let start = if body.len() >= UTF8_BOM.len() && body[..UTF8_BOM.len()] == UTF8_BOM {
        UTF8_BOM.len().min(valid)
    } else {
        0
    };
    Ok(body[start..valid].to_vec())
}
