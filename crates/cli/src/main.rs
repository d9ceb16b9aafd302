//! nsc entry point.
//!
//! This binary is the composition root for the whole client. Responsibilities:
//!
//! 1. **Wire observability**: install the `tracing-subscriber` JSON layer and,
//!    when configured, the OpenTelemetry OTLP exporter. Every span and event
//!    emitted by the workspace crates flows through it.
//! 2. **Load configuration**: read and validate the `NSM_*` variables before
//!    any network I/O.
//! 3. **Construct infrastructure**: load the identity, open the
//!    [`transport::SecureChannel`], and compose the [`chain::Chain`] in front
//!    of it.
//! 4. **Run the lifecycle**: request every configured network service in
//!    order, hold the connections until a shutdown signal arrives, then close
//!    them newest-first.
//!
//! ## Exit codes
//!
//! - `0`: shutdown was requested and every open connection was drained.
//! - `1`: a fatal startup error. Connections already established are drained
//!   before exit.

mod config;
mod nsurl;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chain::elements::{
    Authorize, DeviceToken, KernelMechanism, MechanismHandler, MechanismSelector, UpdatePath,
    UpdateToken, VfioMechanism,
};
use chain::{Chain, ChainElement, Lifecycle, NscClient};
use networkservice::{NetworkServiceClient, NscError, TokenGenerator};
use transport::{open_channel, FileIdentitySource, IdentitySource, SignedTokenGenerator};

use crate::config::Config;
use crate::telemetry::Telemetry;

#[tokio::main]
async fn main() -> ExitCode {
    let telemetry = match Telemetry::init() {
        Ok(telemetry) => telemetry,
        Err(err) => {
            eprintln!("failed to initialise telemetry: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let code = match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "network service client failed");
            ExitCode::FAILURE
        }
    };

    telemetry.shutdown();
    code
}

async fn run() -> anyhow::Result<()> {
    tracing::info!("starting network service client");
    let config = Config::from_env()
        .map_err(NscError::from)
        .context("invalid configuration")?;
    tracing::info!(?config, "configuration loaded");

    let identity = Arc::new(
        FileIdentitySource::load(config.identity.clone(), transport::default_provider())
            .map_err(NscError::from)
            .context("failed to load identity")?,
    );
    tracing::info!(subject = identity.current().subject(), "identity loaded");

    let tokens: Arc<dyn TokenGenerator> = Arc::new(SignedTokenGenerator::new(
        identity.clone(),
        config.max_token_lifetime,
    ));
    let channel = open_channel(
        &config.connect_to,
        identity,
        tokens.clone(),
        config.max_token_lifetime,
        config.dial_timeout,
    )
    .await?;

    let chain = build_chain(&config, Arc::new(channel), tokens);
    tracing::debug!(elements = ?chain.element_names(), "chain composed");
    let client = NscClient::new(config.name.clone(), Arc::new(chain));

    let lifecycle = Lifecycle::new();
    let _signals = lifecycle
        .listen_for_signals()
        .context("failed to install signal handlers")?;

    if let Err(err) = client
        .start(
            &config.network_services,
            config.request_timeout,
            &lifecycle.token(),
        )
        .await
    {
        lifecycle.drain(&client, config.request_timeout).await;
        return Err(err).context("startup failed");
    }

    if lifecycle.is_shutting_down() {
        tracing::info!("shutdown requested before startup completed");
    } else {
        tracing::info!(
            connections = client.registry().len(),
            "all network services connected; waiting for shutdown"
        );
    }
    lifecycle
        .run_until_shutdown(&client, config.request_timeout)
        .await;
    Ok(())
}

/// Composes the chain in front of `terminal`.
fn build_chain(
    config: &Config,
    terminal: Arc<dyn NetworkServiceClient>,
    tokens: Arc<dyn TokenGenerator>,
) -> Chain {
    let handlers: Vec<Arc<dyn MechanismHandler>> = vec![
        Arc::new(KernelMechanism::default()),
        Arc::new(VfioMechanism::new(config.cgroup_dir.clone())),
    ];

    let mut elements: Vec<Arc<dyn ChainElement>> = vec![
        Arc::new(Authorize::default()),
        Arc::new(UpdatePath::new(config.name.clone())),
        Arc::new(DeviceToken::new(config.sriov_tokens.clone())),
        Arc::new(MechanismSelector::new(handlers)),
    ];
    #[cfg(unix)]
    elements.push(Arc::new(chain::elements::SendFd::new()));
    elements.push(Arc::new(UpdateToken::new(tokens, config.max_token_lifetime)));

    Chain::new(elements, terminal)
}
