use cfn_flux_controller::{
    config::ControllerConfig, controller::run_controller, init_tracing,
};
use envconfig::Envconfig;
use kube::Client;
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    if let Err(e) = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::aws_lc_rs::default_provider(),
    ) {
        tracing::debug!(?e, "CryptoProvider already installed; proceeding");
    }

    let cfg = ControllerConfig::init_from_env()?;
    info!(?cfg, "starting cfn-flux-controller");

    let sdk = aws_config::load_from_env().await;
    let client = Client::try_default().await?;
    run_controller(client, cfg, sdk).await
}
