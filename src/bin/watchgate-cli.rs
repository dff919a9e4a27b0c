use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "watchgate-cli")]
#[command(about = "Management CLI for the watchgate security gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gateway status summary
    Overview,
    /// Merged guard metrics
    Metrics,
    /// Recent security events
    Events {
        /// Maximum number of events
        #[arg(short, long)]
        limit: Option<usize>,
        /// Filter by severity (low, medium, high, critical)
        #[arg(short, long)]
        severity: Option<String>,
    },
    /// Per-component health roll-up
    Health,
    /// Aggregate report over a timeframe
    Report {
        /// hour, day, week, or month
        #[arg(default_value = "hour")]
        timeframe: String,
    },
    /// Quarantine management
    Quarantine {
        #[command(subcommand)]
        action: QuarantineAction,
    },
    /// Add an identity to the allow list
    Allow { identity: String },
    /// Add an identity to the deny list
    Deny { identity: String },
    /// Remove an identity from both lists
    Clear { identity: String },
    /// Reset the event log and all guard counters
    Reset,
}

#[derive(Subcommand)]
enum QuarantineAction {
    /// List quarantined files
    List,
    /// Release a quarantined file back to storage
    Release { id: String },
    /// Delete a quarantined file and its metadata
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let url = &cli.url;
    match cli.command {
        Commands::Overview => {
            let res = client
                .get(format!("{url}/admin/overview"))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Metrics => {
            let res = client
                .get(format!("{url}/admin/metrics"))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Events { limit, severity } => {
            let mut query = Vec::new();
            if let Some(limit) = limit {
                query.push(("limit", limit.to_string()));
            }
            if let Some(severity) = severity {
                query.push(("severity", severity));
            }
            let res = client
                .get(format!("{url}/admin/events"))
                .query(&query)
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Health => {
            let res = client
                .get(format!("{url}/admin/health"))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Report { timeframe } => {
            let res = client
                .get(format!("{url}/admin/report"))
                .query(&[("timeframe", timeframe)])
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Quarantine { action } => match action {
            QuarantineAction::List => {
                let res = client
                    .get(format!("{url}/admin/quarantine"))
                    .headers(headers)
                    .send()
                    .await?;
                print_response(res).await?;
            }
            QuarantineAction::Release { id } => {
                let res = client
                    .post(format!("{url}/admin/quarantine/{id}/release"))
                    .headers(headers)
                    .send()
                    .await?;
                print_response(res).await?;
            }
            QuarantineAction::Delete { id } => {
                let res = client
                    .delete(format!("{url}/admin/quarantine/{id}"))
                    .headers(headers)
                    .send()
                    .await?;
                print_response(res).await?;
            }
        },
        Commands::Allow { identity } => {
            let res = client
                .post(format!("{url}/admin/access-list"))
                .headers(headers)
                .json(&json!({ "identity": identity, "action": "allow" }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Deny { identity } => {
            let res = client
                .post(format!("{url}/admin/access-list"))
                .headers(headers)
                .json(&json!({ "identity": identity, "action": "deny" }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Clear { identity } => {
            let res = client
                .post(format!("{url}/admin/access-list"))
                .headers(headers)
                .json(&json!({ "identity": identity, "action": "clear" }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Reset => {
            let res = client
                .post(format!("{url}/admin/metrics/reset"))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
