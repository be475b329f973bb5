use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use proxy_roster::{
    default_concurrency, store, upload::RosterUploader, ConnectivityProbe, EndpointParser,
    GeoClassifier, MergePolicy, ProbeConfig, ProbeOrchestrator, Roster, RosterReconciler,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// A proxy validator that maintains a roster of working proxies
#[derive(Parser)]
#[command(name = "proxy-roster")]
#[command(about = "Validates proxy endpoints and maintains a roster of working proxies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe candidates, reconcile with the active roster, and persist it
    Check {
        /// File of new candidate proxies, one host:port[:user:pass] per line
        input: PathBuf,
        /// Active roster file; `.json` selects the structured format
        #[arg(short, long, default_value = "Active_Proxies.json")]
        roster: PathBuf,
        /// Merge policy (additive, replace)
        #[arg(short, long, default_value = "additive")]
        merge: String,
        /// Number of concurrent probes (default scales with CPUs, 5-50)
        #[arg(short = 'n', long)]
        concurrency: Option<usize>,
        /// Per-attempt probe timeout in seconds
        #[arg(long, default_value = "3")]
        timeout: u64,
        /// host:port used as the liveness oracle
        #[arg(long, default_value = "www.google.com:80")]
        probe_target: String,
        /// Webhook URL to POST the reconciled roster to
        #[arg(long)]
        webhook: Option<String>,
    },
    /// Parse and normalize a candidate file without probing
    Parse {
        /// Input file containing proxy lines
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            input,
            roster,
            merge,
            concurrency,
            timeout,
            probe_target,
            webhook,
        } => {
            let policy = parse_merge_policy(&merge)?;
            let (target_host, target_port) = parse_probe_target(&probe_target)?;

            let content = store::read_candidates(&input)?;
            let prior = store::load_roster(&roster);

            let probe_config = ProbeConfig::new()
                .with_target(target_host, target_port)
                .with_timeout(Duration::from_secs(timeout));
            let concurrency = concurrency.unwrap_or_else(default_concurrency);
            let orchestrator = ProbeOrchestrator::new(
                ConnectivityProbe::with_config(probe_config),
                GeoClassifier::new(),
                concurrency,
            );

            println!(
                "Loaded {} prior entries from {:?}, probing with {} workers",
                prior.len(),
                roster,
                concurrency
            );

            let reconciled = match policy {
                // Prior entries not re-tested this run are retained as-is
                MergePolicy::Additive => {
                    let outcomes = orchestrator.run_lines(&content).await;
                    RosterReconciler::reconcile(outcomes, prior, MergePolicy::Additive)
                }
                // Everything must be re-proven live this run, prior roster
                // included; new candidates keep priority over re-tests
                MergePolicy::Replacing => {
                    let mut endpoints = EndpointParser::parse_lines(&content);
                    endpoints.extend(
                        prior
                            .entries()
                            .iter()
                            .filter_map(|e| EndpointParser::parse_line(&e.proxy).ok()),
                    );
                    let outcomes = orchestrator.run(endpoints).await;
                    RosterReconciler::reconcile(outcomes, Roster::new(), MergePolicy::Replacing)
                }
            };

            store::save_roster(&roster, &reconciled)?;
            println!(
                "Updated {:?} with {} working proxies",
                roster,
                reconciled.len()
            );

            if let Some(url) = webhook {
                RosterUploader::new(url)?.upload(&reconciled).await;
            }
        }
        Commands::Parse { input } => {
            let content = store::read_candidates(&input)?;
            let endpoints = EndpointParser::parse_lines(&content);
            println!("Parsed {} endpoints from {:?}", endpoints.len(), input);
            for endpoint in &endpoints {
                println!("{}", endpoint);
            }
        }
    }

    Ok(())
}

fn parse_merge_policy(s: &str) -> Result<MergePolicy> {
    match s.to_lowercase().as_str() {
        "additive" => Ok(MergePolicy::Additive),
        "replace" | "replacing" => Ok(MergePolicy::Replacing),
        _ => Err(anyhow!("Invalid merge policy: {}. Use: additive, replace", s)),
    }
}

fn parse_probe_target(s: &str) -> Result<(String, u16)> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Invalid probe target: {}. Use host:port", s))?;
    let port: u16 = port
        .parse()
        .map_err(|_| anyhow!("Invalid probe target port: {}", port))?;
    Ok((host.to_string(), port))
}
