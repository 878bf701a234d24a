//! managed-http command line client.
//!
//! Sends one request through [`ManagedHandler`] and streams the response body
//! to stdout.
//!
//! # Data Flow
//! ```text
//! args + optional TOML config
//!     → ClientConfig (overrides applied)
//!     → ManagedHandler::from_config
//!     → send_cancellable (Ctrl-C cancels)
//!     → stdout
//! ```

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use http::Method;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use managed_http::config::{load_config, ClientConfig};
use managed_http::observability::{logging, metrics};
use managed_http::{ManagedHandler, RedirectMode, Request, Response};

#[derive(Parser)]
#[command(name = "managed-http")]
#[command(about = "HTTP/1.1 client with proxy, tunnel and redirect handling", long_about = None)]
struct Cli {
    /// Absolute http or https URL
    url: String,

    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request header as "Name: value"; may be repeated
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body
    #[arg(short = 'd', long)]
    data: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Proxy URL, overrides the configuration and environment
    #[arg(long)]
    proxy: Option<String>,

    /// Never use a proxy
    #[arg(long, conflicts_with = "proxy")]
    no_proxy: bool,

    #[arg(long)]
    max_redirects: Option<u32>,

    #[arg(long, value_enum)]
    redirect_mode: Option<CliRedirectMode>,

    /// Connect every request to this Unix domain socket
    #[cfg(unix)]
    #[arg(long)]
    unix_socket: Option<PathBuf>,

    /// Print the response head before the body
    #[arg(short, long)]
    include: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliRedirectMode {
    None,
    NoDowngrade,
    All,
}

impl From<CliRedirectMode> for RedirectMode {
    fn from(mode: CliRedirectMode) -> Self {
        match mode {
            CliRedirectMode::None => RedirectMode::None,
            CliRedirectMode::NoDowngrade => RedirectMode::NoDowngrade,
            CliRedirectMode::All => RedirectMode::All,
        }
    }
}

impl Cli {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(proxy) = &self.proxy {
            config.proxy.enabled = true;
            config.proxy.url = Some(proxy.clone());
        }
        if self.no_proxy {
            config.proxy.enabled = false;
        }
        if let Some(max) = self.max_redirects {
            config.redirects.max_automatic = max;
        }
        if let Some(mode) = self.redirect_mode {
            config.redirects.mode = mode.into();
        }
    }

    fn request(&self) -> Result<Request, Box<dyn std::error::Error>> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())?;
        let mut request = Request::new(method, self.url.as_str());

        for header in &self.headers {
            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| format!("header {:?} is not \"Name: value\"", header))?;
            request = request.header(name.trim(), value.trim())?;
        }

        if let Some(data) = &self.data {
            request = request.body(data.clone());
        }
        Ok(request)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };
    cli.apply(&mut config);

    logging::init_logging(&config.observability);
    metrics::set_enabled(config.observability.metrics_enabled);

    tracing::debug!(
        proxy_enabled = config.proxy.enabled,
        max_redirects = config.redirects.max_automatic,
        "Configuration loaded"
    );

    #[allow(unused_mut)]
    let mut handler = ManagedHandler::from_config(&config)?;
    #[cfg(unix)]
    if let Some(path) = &cli.unix_socket {
        handler = handler.opener(managed_http::net::opener::UnixSocketOpener::new(path));
    }

    let request = cli.request()?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling request");
            on_interrupt.cancel();
        }
    });

    let mut response = handler.send_cancellable(request, &cancel).await?;

    let mut stdout = tokio::io::stdout();
    if cli.include {
        stdout.write_all(format_head(&response).as_bytes()).await?;
    }
    response.content_mut().copy_to(&mut stdout).await?;
    stdout.flush().await?;

    Ok(())
}

fn format_head(response: &Response) -> String {
    let mut head = format!(
        "{:?} {} {}\r\n",
        response.version,
        response.status.as_u16(),
        response.reason.as_deref().unwrap_or("")
    );
    for (name, value) in response.headers().iter().chain(response.content_headers().iter()) {
        head.push_str(name.as_str());
        head.push_str(": ");
        head.push_str(&String::from_utf8_lossy(value.as_bytes()));
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    head
}
