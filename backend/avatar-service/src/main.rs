/// Avatar Service - HTTP Server
///
/// Serves avatars by hash and accepts confirmed uploads.
use actix_web::{middleware as actix_middleware, web, App, HttpServer};
use anyhow::Context;
use avatar_service::handlers;
use avatar_service::models::{AVATAR_DIR, UNCONFIRMED_DIR};
use avatar_service::services::{
    AvatarProcessor, FileStorage, MailQueue, Mailer, OutgoingMail, RemoteFallbackClient,
    ResolutionCascade, SmtpMailer, UploadWorkflow,
};
use avatar_service::Config;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How often expired uploads are swept when a confirmation TTL is set
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("avatar_service=info,actix_web=info")),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let storage = Arc::new(FileStorage::new(&config.storage.data_dir));
    storage
        .ensure_dirs(&[AVATAR_DIR, UNCONFIRMED_DIR])
        .await
        .context("Failed to prepare data directory")?;
    info!(data_dir = %storage.root().display(), "Storage ready");

    let processor = Arc::new(AvatarProcessor::with_defaults());

    let remote = RemoteFallbackClient::new(config.remote.urls.clone(), config.remote.timeout)
        .context("Failed to create remote client")?;
    for url in &config.remote.urls {
        info!(remote = %url, "Missing avatars will be looked up remotely");
    }
    info!(default = ?config.remote.default_image, "Default avatar configured");

    let cascade = ResolutionCascade::new(
        storage.clone(),
        processor.clone(),
        remote,
        config.remote.default_image.clone(),
    );

    let mail_queue = match SmtpMailer::from_config(&config.email)
        .context("Failed to configure SMTP transport")?
    {
        Some(mailer) => {
            let mailer: Arc<dyn Mailer> = Arc::new(mailer);
            if let Some(recipient) = &config.email.test_recipient {
                info!(recipient = %recipient, "Sending test email to verify email configuration");
                if let Err(e) = mailer.send(&OutgoingMail::test(recipient)).await {
                    warn!(error = %e, "Test email could not be delivered");
                }
            }
            let (queue, _worker) = MailQueue::spawn(mailer, config.email.queue_capacity);
            Some(queue)
        }
        None => {
            warn!("SMTP host not configured; uploads will be confirmed without email");
            None
        }
    };

    let workflow = web::Data::new(UploadWorkflow::new(
        storage.clone(),
        processor.clone(),
        mail_queue,
        config.upload.clone(),
        config.app.public_url.clone(),
    ));

    if let Some(ttl) = config.upload.confirmation_ttl {
        info!(ttl_secs = ttl.as_secs(), "Unconfirmed uploads expire");
        let purge_workflow = workflow.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);
            loop {
                interval.tick().await;
                purge_workflow.purge_expired().await;
            }
        });
    }

    let bind_address = format!("{}:{}", config.app.host, config.app.port);
    info!(address = %bind_address, "Avatar service starting HTTP server");

    let cascade = web::Data::new(cascade);
    let config = web::Data::new(config);

    HttpServer::new(move || {
        App::new()
            .app_data(config.clone())
            .app_data(cascade.clone())
            .app_data(workflow.clone())
            .wrap(actix_middleware::Logger::default())
            .configure(handlers::configure)
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {bind_address}"))?
    .run()
    .await
    .context("HTTP server error")?;

    info!("Avatar service shutting down");
    Ok(())
}
