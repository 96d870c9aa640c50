//! Disk bridge server binary.
//!
//! Serves the OAuth login flow, hands out storage upload URLs, accepts
//! multipart uploads that are streamed into the cloud disk folder tree, and
//! mirrors tracker issue attachments into the disk on webhook calls.

mod auth;
mod config;
mod cookies;
mod disk;
mod ensure;
mod error;
mod http;
mod logging;
mod mail;
mod naming;
mod path;
mod router;
mod tls;
mod tracker;
mod upload;
mod webhook;

use axum_server::Handle;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::Args;
use crate::disk::YandexDisk;
use crate::ensure::VisibilityPoll;
use crate::mail::{Mailer, SmtpMailer};
use crate::naming::RandomSuffix;
use crate::router::{Services, build_router};
use crate::tracker::{TrackerApi, YandexTracker};
use crate::upload::Uploader;
use crate::webhook::WebhookContext;

/// Starts the bridge server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let invalid_input =
        |msg: String| std::io::Error::new(std::io::ErrorKind::InvalidInput, msg);

    let oauth = Arc::new(args.oauth_config());
    let disk_config = args
        .disk_config()
        .map_err(|err| invalid_input(err.to_string()))?;
    let tracker_config = Arc::new(args.tracker_config());
    let upload_config = Arc::new(args.upload_config());
    let mail_config = args.mail_config();

    let client = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| std::io::Error::other(err.to_string()))?;

    let uploader = Arc::new(Uploader::new(
        Arc::new(YandexDisk::new(client.clone(), disk_config.api_url.clone())),
        Arc::new(RandomSuffix::new(disk_config.suffix_len)),
        disk_config.root.clone(),
        VisibilityPoll {
            attempts: disk_config.visibility_attempts,
            backoff: disk_config.visibility_backoff,
        },
    ));
    let tracker: Arc<dyn TrackerApi> = Arc::new(YandexTracker::new(
        client.clone(),
        tracker_config.api_url.clone(),
    ));
    let mailer: Option<Arc<dyn Mailer>> = match SmtpMailer::from_config(&mail_config) {
        Ok(Some(mailer)) => Some(Arc::new(mailer)),
        Ok(None) => {
            warn!("mail is not configured, webhook notifications are disabled");
            None
        }
        Err(err) => {
            error!(error = %err, "invalid mail configuration, webhook notifications are disabled");
            None
        }
    };
    let webhook = Arc::new(WebhookContext {
        tracker: tracker.clone(),
        uploader: uploader.clone(),
        mailer,
        tracker_token: tracker_config.service_token.clone(),
        org_id: tracker_config.org_id.clone(),
        disk_token: disk_config.service_token.clone(),
        link_mode: tracker_config.link_mode,
    });
    info!(root = %disk_config.root, "uploads go to disk root");

    let app = build_router(
        Services {
            oauth,
            client,
            uploader,
            tracker,
            tracker_config,
            webhook,
            upload: upload_config,
        },
        args.static_dir.as_deref(),
        args.cors_origins.as_deref(),
    );

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| invalid_input(err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let handle = Handle::new();

    info!("🚀 Starting HTTP server at {}", http_addr);
    let http_server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(app.clone().into_make_service_with_connect_info::<SocketAddr>());

    match args.https_port {
        Some(https_port) => {
            let https_addr = SocketAddr::new(host, https_port);
            let tls_config =
                tls::build_rustls_config(args.tls_cert.as_deref(), args.tls_key.as_deref(), host)
                    .await?;
            info!("🔒 Starting HTTPS server at {}", https_addr);
            let https_server = axum_server::bind_rustls(https_addr, tls_config)
                .handle(handle.clone())
                .serve(app.into_make_service_with_connect_info::<SocketAddr>());
            tokio::select! {
                result = http_server => result?,
                result = https_server => result?,
                _ = shutdown_signal(handle) => {}
            }
        }
        None => {
            tokio::select! {
                result = http_server => result?,
                _ = shutdown_signal(handle) => {}
            }
        }
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
