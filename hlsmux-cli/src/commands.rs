//! Subcommand execution.

use std::path::PathBuf;
use std::time::Duration;

use hlsmux_engine::{
    CatalogListing, Collaborators, DownloadError, DownloadRequest, DownloadSession, ErrorKind,
    RetentionPolicy, SessionId,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::{ApiServer, ApiServerConfig, AppState};
use crate::cli::{Args, Commands};
use crate::error::Result;
use crate::input::{ctrl_c_handler, input_handler};

pub async fn run(args: Args) -> Result<()> {
    let config = args.engine_config()?;

    match args.command {
        Commands::List { manifest_url, json } => {
            let collaborators = Collaborators::from_config(&config)?;
            let mut session = DownloadSession::new(config, collaborators);
            session.resolve(&manifest_url).await?;
            print_listing(&session.list_catalog(), json)?;
        }

        Commands::Download {
            manifest_url,
            resolution,
            language,
            concurrency,
            resume,
            retries,
            parallel_tracks,
        } => {
            let mut config = config;
            config.fetcher.retry = config.fetcher.retry.with_max_retries(retries);
            config.fetcher.parallel_tracks = parallel_tracks;

            let collaborators = Collaborators::from_config(&config)?;
            let session = match resume {
                Some(id) => DownloadSession::resume(config, collaborators, SessionId::parse(&id)?),
                None => DownloadSession::new(config, collaborators),
            };
            let request = DownloadRequest {
                resolution,
                language,
                concurrency,
            };

            let output = download(session, &manifest_url, request).await?;
            println!("{}", output.display());
        }

        Commands::Serve {
            bind,
            request_timeout,
            retain,
        } => {
            let mut config = config;
            config.session.retention = if retain {
                RetentionPolicy::Retain
            } else {
                RetentionPolicy::Purge
            };
            let request_timeout = Duration::from_secs(request_timeout);
            let state = AppState::from_config(config, request_timeout)?;
            let server = ApiServer::new(
                ApiServerConfig {
                    bind_address: bind,
                    request_timeout,
                },
                state,
            );

            let shutdown = server.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    shutdown.cancel();
                }
            });
            server.run().await?;
        }
    }

    Ok(())
}

async fn download(
    mut session: DownloadSession,
    manifest_url: &str,
    request: DownloadRequest,
) -> Result<PathBuf> {
    let token = session.cancellation_token();
    // Fired by `q` or Ctrl-C, and again at the end to stop the listeners.
    let listeners = CancellationToken::new();
    let input = tokio::spawn(input_handler(listeners.clone()));
    let ctrl_c = tokio::spawn(ctrl_c_handler(listeners.clone()));
    let forward = {
        let listeners = listeners.clone();
        let token = token.clone();
        tokio::spawn(async move {
            listeners.cancelled().await;
            token.cancel();
        })
    };

    info!(
        session = %session.id(),
        dir = %session.working_dir().display(),
        "Session started (press 'q' to cancel)"
    );

    let result = async {
        session.resolve(manifest_url).await?;
        session.download(request).await
    }
    .await;

    forward.abort();
    listeners.cancel();
    let _ = input.await;
    let _ = ctrl_c.await;

    if let Err(err) = &result {
        report_failure(&session, err);
    }
    Ok(result?)
}

fn report_failure(session: &DownloadSession, err: &DownloadError) {
    error!(session = %session.id(), kind = %err.kind(), "Download failed: {err}");
    if matches!(err.kind(), ErrorKind::SegmentFetch | ErrorKind::Cancelled | ErrorKind::Mux) {
        eprintln!(
            "Completed segments were kept in {}. Re-run with `--resume {}` to continue.",
            session.working_dir().display(),
            session.id()
        );
    }
}

fn print_listing(listing: &CatalogListing, json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(listing)?;
        println!("{text}");
        return Ok(());
    }

    println!("Resolutions:");
    for resolution in &listing.resolutions {
        println!("  {resolution}");
    }
    println!("Audio tracks:");
    for language in &listing.languages {
        println!("  {language}");
    }
    Ok(())
}
