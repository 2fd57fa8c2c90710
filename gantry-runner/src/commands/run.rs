//! The job service loop
//!
//! Loads the persisted identity, authorizes, opens a session, and hands
//! control to the message pump. SIGINT stops the intake of new jobs; the
//! job already running finishes first. The session is deleted on the way
//! out whatever happened; a failing delete is reported but never blocks
//! exit.

use std::sync::Arc;

use anyhow::{Context, Result};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::RsaPrivateKey;
use tokio::sync::watch;
use tracing::{info, warn};

use gantry_client::auth::Authorizer;
use gantry_client::TenantClient;
use gantry_engine::ShellExecutor;

use crate::config::RunnerSettings;
use crate::credentials::CredentialStore;
use crate::job::{HttpPlaneProvider, JobDispatch};
use crate::pump::MessagePump;
use crate::session::create_session;
use crate::token::SharedToken;

pub async fn run(settings: &RunnerSettings, once: bool) -> Result<()> {
    settings.validate()?;

    let store = CredentialStore::new(settings.clone());
    let identity = store.load()?;
    let key = RsaPrivateKey::from_pkcs1_der(&identity.key_der).context("corrupt private key")?;

    let client_id = identity
        .agent
        .authorization
        .client_id
        .clone()
        .context("agent record carries no client id")?;
    let authorization_url = identity
        .agent
        .authorization
        .authorization_url
        .clone()
        .context("agent record carries no authorization url")?;
    let authorizer = Arc::new(Authorizer::new(
        client_id,
        authorization_url,
        &identity.key_der,
    )?);

    let http = reqwest::Client::new();
    let token = SharedToken::new(authorizer.authorize(&http).await?);
    let client = TenantClient::connect(http.clone(), &identity.auth.tenant_url)
        .await
        .context("failed to reach tenant")?;

    let session = create_session(
        &client,
        &token.bearer(),
        settings.pool_id,
        identity.agent.clone(),
        &key,
    )
    .await?;
    info!("session {} created", session.session_id);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping accepting new jobs");
            let _ = shutdown_tx.send(true);
        }
    });

    let pump = MessagePump {
        dispatch: JobDispatch {
            settings: settings.clone(),
            runner_client: client.clone(),
            http: http.clone(),
            token: token.clone(),
            authorizer,
            executor: Arc::new(ShellExecutor::new()),
            planes: Arc::new(HttpPlaneProvider::new(http, client.clone())),
        },
        session: session.clone(),
        run_once: once,
    };
    let pump_result = pump.run(shutdown_rx).await;

    if let Err(e) = client
        .delete_session(&token.bearer(), settings.pool_id, session.session_id)
        .await
    {
        warn!("failed to delete session: {e}");
    } else {
        info!("session deleted");
    }

    pump_result
}
