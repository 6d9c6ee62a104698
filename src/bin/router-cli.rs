use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "router-cli")]
#[command(about = "Management CLI for the event router", long_about = None)]
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
    /// Check router status and registry revision
    Status,
    /// List live rules in evaluation order
    Rules,
    /// Show one rule
    Rule { route_id: String },
    /// Add a rule from a JSON file holding a rule definition
    Add {
        #[arg(short, long)]
        file: PathBuf,
        /// Replace an existing rule with the same id
        #[arg(long)]
        replace: bool,
    },
    /// Update an existing rule in place from a JSON file
    Update {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Remove a rule
    Remove { route_id: String },
    /// Show routing counters
    Stats,
    /// Dry-run routing of a sample event
    Route {
        #[arg(short, long)]
        subject: String,
        /// JSON payload
        #[arg(short, long, default_value = "{}")]
        payload: String,
        /// Header as name=value, repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let client = reqwest::Client::builder().default_headers(headers).build()?;
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")).send().await?,
        Commands::Rules => client.get(format!("{base}/admin/rules")).send().await?,
        Commands::Rule { route_id } => {
            client.get(format!("{base}/admin/rules/{route_id}")).send().await?
        }
        Commands::Add { file, replace } => {
            let mut body = read_rule(&file)?;
            body["op"] = json!("add");
            body["replace"] = json!(replace);
            client.post(format!("{base}/admin/rules")).json(&body).send().await?
        }
        Commands::Update { file } => {
            let mut body = read_rule(&file)?;
            body["op"] = json!("update");
            client.post(format!("{base}/admin/rules")).json(&body).send().await?
        }
        Commands::Remove { route_id } => {
            client.delete(format!("{base}/admin/rules/{route_id}")).send().await?
        }
        Commands::Stats => client.get(format!("{base}/admin/stats")).send().await?,
        Commands::Route { subject, payload, headers } => {
            let payload: Value = serde_json::from_str(&payload)?;
            let mut header_map = serde_json::Map::new();
            for h in headers {
                let (name, value) = h
                    .split_once('=')
                    .ok_or_else(|| format!("header `{h}` must be name=value"))?;
                header_map.insert(name.to_string(), json!(value));
            }
            let body = json!({ "subject": subject, "headers": header_map, "payload": payload });
            client.post(format!("{base}/admin/route")).json(&body).send().await?
        }
    };

    print_response(res).await
}

fn read_rule(path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text)?;
    if !value.is_object() {
        return Err(format!("{} must contain a JSON object", path.display()).into());
    }
    Ok(value)
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
