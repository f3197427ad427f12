use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;
use url::Url;

#[derive(Parser)]
#[command(name = "egress-cli")]
#[command(about = "Operator CLI for the egress guard admin API", long_about = None)]
struct Cli {
    /// Admin API base URL
    #[arg(short, long, env = "EGRESS_ADMIN_URL", default_value = "http://127.0.0.1:8081")]
    url: Url,

    /// Admin API key
    #[arg(short, long, env = "EGRESS_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overall status and breaker counts
    Status,
    /// Configuration and stored state of every host
    Hosts,
    /// Reset a host to CLOSED with a full bucket
    Reset {
        /// Host key as configured
        host: String,
    },
}

impl Commands {
    fn endpoint(&self) -> (Method, String) {
        match self {
            Commands::Status => (Method::GET, "admin/status".to_string()),
            Commands::Hosts => (Method::GET, "admin/hosts".to_string()),
            Commands::Reset { host } => (Method::POST, format!("admin/hosts/{}/reset", host)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key)).context("admin key is not a valid header value")?,
    );

    let (method, path) = cli.command.endpoint();
    let url = cli.url.join(&path).with_context(|| format!("building URL for {}", path))?;

    let res = client
        .request(method, url.clone())
        .headers(headers)
        .send()
        .await
        .with_context(|| format!("calling {}", url))?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> anyhow::Result<()> {
    let status = res.status();
    if !status.is_success() {
        let text = res.text().await.unwrap_or_default();
        bail!("admin API returned {}: {}", status, text);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
