use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result},
    courier_config::{CourierConfig, data_dir},
    courier_gateway::{GatewayState, resolve_auth, start_gateway},
    courier_whatsapp::{CredentialStore, FileCredentialStore, Session, SessionConfig, SimulatedClient},
    tracing::{error, info, warn},
};

/// Upper bound on session teardown once the server has stopped.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the device credential lives when `whatsapp.store_path` is unset.
pub fn default_store_path() -> PathBuf {
    data_dir().join("whatsapp").join("device.json")
}

pub async fn run_gateway(mut config: CourierConfig, bind: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let store_path = config
        .whatsapp
        .store_path
        .clone()
        .unwrap_or_else(default_store_path);
    let store = Arc::new(FileCredentialStore::new(store_path.clone()));
    let account = store
        .get()
        .await
        .with_context(|| format!("failed to open credential store at {}", store_path.display()))?
        .and_then(|identity| identity.account);

    // The wire protocol is provided externally; the bundled transport is the
    // in-process simulator.
    warn!("using the simulated whatsapp transport");
    let (client, events) = SimulatedClient::with_auto_events(account);

    let session = Session::start(client, events, store, SessionConfig::from(&config.whatsapp))
        .await
        .context("failed to start whatsapp session")?;

    if session.is_paired() {
        if let Err(e) = session.connect().await {
            warn!(error = %e, "initial whatsapp connect failed, POST /session/connect to retry");
        }
    } else {
        info!("device not paired, GET /auth/qr to start pairing");
    }

    let state = GatewayState::new(session.clone(), resolve_auth(config.server.token.clone()));
    let served = start_gateway(state, &config.server, shutdown_signal()).await;

    info!("server stopping");
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, session.close()).await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => error!(error = %e, "failed to close whatsapp session"),
        Err(_) => warn!("timed out closing whatsapp session"),
    }
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
