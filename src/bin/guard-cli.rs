use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for upstream-guard", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Version, uptime and registered breakers and policies
    Status,
    /// Aggregate health verdict
    Health,
    /// Cache, breaker and pool metrics
    Metrics,
    /// Force circuit breakers back to closed
    ResetBreakers {
        /// Only reset this service breaker
        #[arg(short, long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)).send().await?,
        Commands::Health => client.get(format!("{}/health", base)).send().await?,
        Commands::Metrics => client.get(format!("{}/metrics", base)).send().await?,
        Commands::ResetBreakers { name } => {
            let mut req = client.post(format!("{}/admin/breakers/reset", base));
            if let Some(name) = name {
                req = req.query(&[("name", name)]);
            }
            req.send().await?
        }
    };
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    // Health answers 503 with a full JSON report; print it either way.
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    if !status.is_success() {
        eprintln!("Error: admin API returned status {}", status);
        std::process::exit(1);
    }
    Ok(())
}
