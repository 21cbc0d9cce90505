use clap::{Parser, Subcommand};
use proxy_pass::admin::handlers::{SystemStatus, TargetView};

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Inspect a running proxy-pass through its admin listener", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: String,

    /// Print raw JSON instead of a table
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show routing mode and overall health
    Status,
    /// List targets with health, latency and request counts
    Targets,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{}/admin/status", cli.url)).send().await?;
            let Some(res) = check(res).await else {
                return Ok(());
            };
            let status: SystemStatus = res.json().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
        Commands::Targets => {
            let res = client.get(format!("{}/admin/targets", cli.url)).send().await?;
            let Some(res) = check(res).await else {
                return Ok(());
            };
            let targets: Vec<TargetView> = res.json().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&targets)?);
            } else {
                print_targets(&targets);
            }
        }
    }

    Ok(())
}

async fn check(res: reqwest::Response) -> Option<reqwest::Response> {
    let status = res.status();
    if status.is_success() {
        return Some(res);
    }
    eprintln!("Error: Admin API returned status {}", status);
    if let Ok(text) = res.text().await {
        eprintln!("Response: {}", text);
    }
    None
}

fn print_status(status: &SystemStatus) {
    println!("proxy-pass {} ({})", status.version, status.status);
    println!("  mode:            {}", status.mode);
    match status.healthy_targets {
        Some(healthy) => println!("  targets:         {healthy}/{} healthy", status.targets),
        None => println!("  targets:         {}", status.targets),
    }
    if let Some(generation) = status.generation {
        println!("  health pass:     #{generation}");
    }
    println!("  monitor running: {}", status.monitor_running);
    println!("  active sessions: {}", status.active_sessions);
}

fn print_targets(targets: &[TargetView]) {
    println!("{:<32} {:<9} {:>10} {:>9} {:>9}", "HOST", "HEALTHY", "LATENCY", "FAILURES", "REQUESTS");
    for target in targets {
        let healthy = target.healthy.map_or("-".to_string(), |h| if h { "yes" } else { "no" }.to_string());
        let latency = target.latency_ms.map_or("-".to_string(), |ms| format!("{ms:.1}ms"));
        let failures = target.consecutive_failures.map_or("-".to_string(), |n| n.to_string());
        println!(
            "{:<32} {:<9} {:>10} {:>9} {:>9}",
            target.host, healthy, latency, failures, target.requests
        );
        if let Some(error) = &target.last_error {
            println!("    last error: {error}");
        }
    }
}
