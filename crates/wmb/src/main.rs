use std::sync::Arc;

use wmb_chromium::ChromiumRenderer;
use wmb_core::{
    config::{Config, CredentialStore},
    report::ReportPipeline,
    supervisor::Supervisor,
    whatap::WhatapClient,
};
use wmb_whatsapp::WhatsAppGateway;

#[tokio::main]
async fn main() -> Result<(), wmb_core::Error> {
    wmb_core::logging::init("wmb")?;

    let cfg = Arc::new(Config::load()?);
    let creds = Arc::new(CredentialStore::new(
        cfg.env_file.clone(),
        cfg.app_password.clone(),
    ));

    let source = Arc::new(WhatapClient::new(cfg.clone(), creds.clone()));
    let renderer = Arc::new(ChromiumRenderer::new(
        cfg.reports_dir.clone(),
        cfg.render_timeout,
    ));
    let pipeline = Arc::new(ReportPipeline::new(cfg.clone(), source, renderer));

    let gateway = Arc::new(WhatsAppGateway::new(
        cfg.gateway_url.clone(),
        cfg.auth_state_file.clone(),
    ));

    let supervisor = Supervisor::new(cfg, gateway, pipeline, creds);
    supervisor.run().await?;

    // run() returns only after a terminal logout.
    println!("[BOT] session ended: logged out. Remove the credential snapshot and restart to pair again.");
    Ok(())
}
