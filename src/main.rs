//! Binary entrypoint for the picture frame.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use clap::{ArgAction, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use picture_frame::client::ApiClient;
use picture_frame::config::Configuration;
use picture_frame::repository::{FsRepository, ImageRepository};
use picture_frame::slideshow::http::{HeadlessSurface, HttpImageSource};
use picture_frame::slideshow::{self, ControllerOptions};
use picture_frame::store::ImageStore;
use picture_frame::web;

#[derive(Debug, Parser)]
#[command(name = "picture-frame", version, about = "Digital picture frame server and client")]
struct Cli {
    /// Path to YAML config file; built-in defaults are used when it is missing
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Serve the image API and uploaded images (default)
    Serve {
        /// Override the listen address
        #[arg(long, value_name = "ADDR")]
        bind: Option<SocketAddr>,
        /// Override the image storage directory
        #[arg(long, value_name = "DIR")]
        uploads: Option<PathBuf>,
    },
    /// Run the slideshow without a screen, logging each displayed image
    Show {
        /// Override the server base URL
        #[arg(long, value_name = "URL")]
        server: Option<String>,
    },
    /// Upload, list, or delete images on a running server
    Manage {
        /// Override the server base URL
        #[arg(long, value_name = "URL")]
        server: Option<String>,
        #[command(subcommand)]
        action: ManageAction,
    },
}

#[derive(Debug, Subcommand)]
enum ManageAction {
    /// List stored images
    List,
    /// Upload image files, one request per file
    Upload {
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },
    /// Delete images by id
    Delete {
        #[arg(required = true, value_name = "ID")]
        ids: Vec<String>,
    },
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(format!("picture_frame={level}").parse()?)
        .add_directive("hyper=warn".parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

fn load_config(path: &Path) -> Result<Configuration> {
    let cfg = if path.exists() {
        Configuration::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?
    } else {
        info!(path = %path.display(), "no configuration file; using defaults");
        Configuration::default()
    };
    cfg.validated().context("invalid configuration values")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut cfg = load_config(&cli.config)?;
    let cancel = CancellationToken::new();
    spawn_shutdown_watcher(cancel.clone());

    match cli.command.unwrap_or(Mode::Serve {
        bind: None,
        uploads: None,
    }) {
        Mode::Serve { bind, uploads } => {
            if let Some(bind) = bind {
                cfg.bind_address = bind;
            }
            if let Some(uploads) = uploads {
                cfg.uploads_path = uploads;
            }
            run_server(cfg, cancel).await
        }
        Mode::Show { server } => {
            if let Some(server) = server {
                cfg.slideshow.server_url = server;
            }
            run_headless_slideshow(cfg, cancel).await
        }
        Mode::Manage { server, action } => {
            let server = server.unwrap_or(cfg.slideshow.server_url);
            run_manage(ApiClient::new(server), action).await
        }
    }
}

async fn run_server(cfg: Configuration, cancel: CancellationToken) -> Result<()> {
    let repo = FsRepository::new(&cfg.uploads_path);
    repo.ensure_ready().with_context(|| {
        format!(
            "failed to prepare image storage at {}",
            cfg.uploads_path.display()
        )
    })?;
    info!(
        uploads = %cfg.uploads_path.display(),
        prefix = %cfg.public_prefix,
        max_file_bytes = cfg.upload.max_file_bytes,
        max_files = cfg.upload.max_files,
        "image storage ready"
    );
    let store = ImageStore::new(Arc::new(repo), cfg.upload.limits(), cfg.public_prefix.clone());
    web::run(store, cfg.bind_address, cancel).await
}

async fn run_headless_slideshow(cfg: Configuration, cancel: CancellationToken) -> Result<()> {
    let source = Arc::new(HttpImageSource::new(cfg.slideshow.server_url.clone()));
    let surface = Arc::new(HeadlessSurface::default());
    let handle = slideshow::spawn(
        source,
        surface,
        ControllerOptions::from(&cfg.slideshow),
        cancel.clone(),
    );
    info!(server = %cfg.slideshow.server_url, "headless slideshow running");

    let mut snapshots = handle.subscribe();
    let mut last_shown: Option<String> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    warn!("slideshow controller exited");
                    break;
                }
                let snap = snapshots.borrow_and_update().clone();
                let shown = snap.current.as_ref().map(|img| img.id.clone());
                if shown != last_shown {
                    match &snap.current {
                        Some(img) => info!(
                            id = %img.id,
                            url = %img.url,
                            index = snap.current_index,
                            count = snap.image_count,
                            "displaying"
                        ),
                        None => info!(phase = ?snap.phase, "nothing to display"),
                    }
                    last_shown = shown;
                }
            }
        }
    }
    handle.shutdown().await;
    Ok(())
}

/// Prints one line per item; failures carry the server's own message.
async fn run_manage(api: ApiClient, action: ManageAction) -> Result<()> {
    match action {
        ManageAction::List => {
            let images = api
                .list_images()
                .await
                .with_context(|| format!("failed to list images on {}", api.base_url()))?;
            for image in &images {
                println!("{}\t{}", image.id, image.url);
            }
            info!(count = images.len(), "listed images");
            Ok(())
        }
        ManageAction::Upload { files } => {
            let mut failed = 0;
            for path in &files {
                match api.upload_path(path).await {
                    Ok(record) => println!("{}: uploaded as {}", path.display(), record.id),
                    Err(err) => {
                        failed += 1;
                        eprintln!("{}: {:#}", path.display(), anyhow::Error::from(err));
                    }
                }
            }
            ensure!(failed == 0, "{failed} of {} uploads failed", files.len());
            Ok(())
        }
        ManageAction::Delete { ids } => {
            let mut failed = 0;
            for (id, outcome) in api.delete_images(&ids).await {
                if outcome.success {
                    println!("{id}: deleted");
                } else {
                    failed += 1;
                    eprintln!("{id}: {}", outcome.error.as_deref().unwrap_or("delete failed"));
                }
            }
            ensure!(failed == 0, "{failed} of {} deletes failed", ids.len());
            Ok(())
        }
    }
}

fn spawn_shutdown_watcher(cancel: CancellationToken) {
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("ctrl-c handler failed: {err}");
                return;
            }
            info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = term.recv() => {
                        info!("SIGTERM received; initiating shutdown");
                        cancel.cancel();
                    }
                }
            }
            Err(err) => warn!("failed to register SIGTERM handler: {err}"),
        }
    });
}
