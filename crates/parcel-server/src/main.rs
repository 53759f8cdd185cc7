//! parcel-server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), overlaid by
//! `PARCEL_*` environment variables, opens the SQLite store and the blob
//! directory, and serves the records API over HTTP.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for `bootstrap_admin_password_hash`:
//!
//! ```
//! cargo run -p parcel-server -- --hash-password
//! ```

mod settings;

use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use clap::Parser;
use parcel_api::AppState;
use parcel_store_sqlite::{FsBlobStore, SqliteStore};
use rand_core::OsRng;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::settings::{ServerConfig, expand_tilde};

#[derive(Parser)]
#[command(author, version, about = "Parcel property-records server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Helper mode: hash a password and exit.
  if cli.hash_password {
    let password = read_password()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(());
  }

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("PARCEL"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let blob_dir = expand_tilde(&server_cfg.blob_dir);
  let blobs = FsBlobStore::open(&blob_dir)
    .await
    .with_context(|| format!("failed to open blob directory {blob_dir:?}"))?;

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path, blobs)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match server_cfg.bootstrap_admin() {
    Some((username, hash)) => {
      store
        .ensure_administrator(username, hash)
        .await
        .with_context(|| format!("failed to bootstrap administrator {username:?}"))?;
    }
    None if server_cfg.bootstrap_admin_username.is_some()
      || server_cfg.bootstrap_admin_password_hash.is_some() =>
    {
      tracing::warn!(
        "bootstrap administrator needs both a username and a password hash; skipping"
      );
    }
    None => {}
  }

  let state = AppState::new(store, server_cfg.api());
  let app = parcel_api::router(state).layer(TraceLayer::new_for_http());
  let address = server_cfg.address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
    .await
    .context("server error")?;

  Ok(())
}

/// Read a password from stdin.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}
