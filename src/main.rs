use clap::{Parser, ValueEnum};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use jobfleet::config::{HostConfig, NodeConfig, PartitionConfig, PeerConfig, SyncConfig};
use jobfleet::host::Host;
use jobfleet::node::{peer_host, Node};
use jobfleet::shutdown::install_shutdown_handler;
use jobfleet::sync::SyncReport;

#[derive(Parser, Debug)]
#[command(name = "jobfleet")]
#[command(version)]
#[command(about = "Fleet-wide batch job placement, replication and chaining")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a fleet host
    Server(ServerArgs),

    /// Show this host's identity
    Host {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// List every registered host
    Hosts {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// List jobs loaded on the host
    Jobs {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Show details of one job
    Job {
        #[command(flatten)]
        client: ClientArgs,

        /// Job name
        name: String,
    },

    /// Push a job to every other host in the fleet
    Deploy {
        #[command(flatten)]
        client: ClientArgs,

        /// Job name
        name: String,
    },

    /// Run a job now on the host
    Run {
        #[command(flatten)]
        client: ClientArgs,

        /// Job name
        name: String,
    },

    /// Give every host every job it is missing
    Sync {
        #[command(flatten)]
        client: ClientArgs,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Host name (defaults to $HOSTNAME)
    #[arg(long)]
    name: Option<String>,

    /// Address peers use to reach this host
    #[arg(long, default_value = "127.0.0.1")]
    ip: IpAddr,

    /// Port to serve the transport and admin API on
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Interface to bind (defaults to --ip)
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Directory holding one sub-directory per job
    #[arg(long, default_value = "jobs")]
    job_root: PathBuf,

    /// Peer hosts (comma-separated, format: "name:ip:port")
    /// Example: "worker-2:10.0.0.2:8080,worker-3:10.0.0.3:8080"
    #[arg(long, default_value = "")]
    peers: String,

    /// Extra attempts for retrying pushes
    #[arg(long, default_value = "2")]
    retry_count: u32,

    /// Base delay between push attempts
    #[arg(long, default_value = "500")]
    retry_delay_ms: u64,

    /// Run a full fleet sync every N seconds
    #[arg(long)]
    sync_interval: Option<u64>,

    /// How long a drained partition reader waits for its siblings
    #[arg(long, default_value = "60000")]
    partition_timeout_ms: u64,

    /// Peer ("name:ip:port") to pull all jobs from after startup
    #[arg(long)]
    pull_from: Option<String>,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Host API address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8080")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Deserialize)]
struct JobDetailsOutput {
    name: String,
    directory: String,
    dependencies: Vec<String>,
    cron_expression: Option<String>,
    next_fire_time: Option<String>,
    hosts: Vec<Host>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_peer(peer: &str) -> Option<PeerConfig> {
    let parts: Vec<&str> = peer.trim().split(':').collect();
    if parts.len() == 3 && !parts[0].is_empty() {
        Some(PeerConfig {
            name: parts[0].to_string(),
            addr: format!("{}:{}", parts[1], parts[2]),
        })
    } else {
        tracing::warn!(peer, "Invalid peer format, expected name:ip:port");
        None
    }
}

fn parse_peers(peers_str: &str) -> Vec<PeerConfig> {
    if peers_str.is_empty() {
        return Vec::new();
    }
    peers_str.split(',').filter_map(parse_peer).collect()
}

struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    fn new(args: &ClientArgs) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .build()?,
            base: args.addr.trim_end_matches('/').to_string(),
        })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, Box<dyn std::error::Error>> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(format!("{}: {}", status, body.trim()).into())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Box<dyn std::error::Error>> {
        let response = self
            .send(self.http.get(format!("{}{}", self.base, path)))
            .await?;
        Ok(response.json().await?)
    }

    async fn post(&self, path: &str) -> Result<reqwest::Response, Box<dyn std::error::Error>> {
        self.send(self.http.post(format!("{}{}", self.base, path)))
            .await
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_hosts(hosts: &[Host]) {
    if hosts.is_empty() {
        println!("No hosts registered.");
        return;
    }
    println!("{:<24} {:<22}", "NAME", "ADDRESS");
    println!("{}", "-".repeat(46));
    for host in hosts {
        println!("{:<24} {:<22}", host.name, host.addr());
    }
}

fn print_report(report: &SyncReport, output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => print_json(report)?,
        OutputFormat::Table => {
            if report.attempted() == 0 {
                println!("Nothing to push.");
                return Ok(());
            }
            println!("{:<24} {:<24} {:<8} REASON", "JOB", "HOST", "RESULT");
            println!("{}", "-".repeat(70));
            for pushed in &report.pushed {
                println!("{:<24} {:<24} {:<8}", pushed.job, pushed.host.key(), "ok");
            }
            for failure in &report.failures {
                println!(
                    "{:<24} {:<24} {:<8} {}",
                    failure.job,
                    failure.host.key(),
                    "failed",
                    failure.reason
                );
            }
            println!();
            println!(
                "{} pushed, {} failed",
                report.pushed.len(),
                report.failures.len()
            );
        }
    }
    Ok(())
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr = SocketAddr::new(args.bind.unwrap_or(args.ip), args.port);
    let pull_from = match args.pull_from.as_deref() {
        Some(peer) => {
            let peer = parse_peer(peer).ok_or("--pull-from expects name:ip:port")?;
            Some(peer_host(&peer)?)
        }
        None => None,
    };

    let config = NodeConfig {
        host: HostConfig {
            name: args.name,
            ip: Some(args.ip),
            port: Some(args.port),
        },
        listen_addr,
        job_root: args.job_root,
        peers: parse_peers(&args.peers),
        sync: SyncConfig {
            retry_count: args.retry_count,
            retry_delay_ms: args.retry_delay_ms,
            interval_secs: args.sync_interval,
        },
        partition: PartitionConfig {
            read_timeout_ms: args.partition_timeout_ms,
        },
        ..NodeConfig::default()
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        job_root = %config.job_root.display(),
        peers = ?config.peers.iter().map(|p| format!("{}@{}", p.name, p.addr)).collect::<Vec<_>>(),
        "Starting jobfleet host"
    );

    let node = Node::new(config)?;
    node.start().await?;

    if let Some(source) = pull_from {
        let sync = node.sync.clone();
        tokio::spawn(async move {
            if let Err(e) = sync.pull_request(&source).await {
                tracing::warn!(source = %source, error = %e, "Pull request failed");
            }
        });
    }

    let shutdown = install_shutdown_handler()?;
    node.run(shutdown).await?;

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_host(client: &ApiClient, output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let host: Host = client.get("/api/host").await?;
    match output_format {
        OutputFormat::Json => print_json(&host)?,
        OutputFormat::Table => print_hosts(&[host]),
    }
    Ok(())
}

async fn handle_hosts(client: &ApiClient, output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let hosts: Vec<Host> = client.get("/api/hosts").await?;
    match output_format {
        OutputFormat::Json => print_json(&hosts)?,
        OutputFormat::Table => print_hosts(&hosts),
    }
    Ok(())
}

async fn handle_jobs(client: &ApiClient, output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let jobs: BTreeSet<String> = client.get("/api/jobs").await?;
    match output_format {
        OutputFormat::Json => print_json(&jobs)?,
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs loaded.");
            } else {
                for job in &jobs {
                    println!("{}", job);
                }
                println!();
                println!("{} jobs", jobs.len());
            }
        }
    }
    Ok(())
}

async fn handle_job(
    client: &ApiClient,
    name: &str,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = format!("/api/jobs/{}", name);
    match output_format {
        OutputFormat::Json => {
            let details: serde_json::Value = client.get(&path).await?;
            print_json(&details)?;
        }
        OutputFormat::Table => {
            let details: JobDetailsOutput = client.get(&path).await?;
            println!("Job:          {}", details.name);
            println!("Directory:    {}", details.directory);
            println!(
                "Schedule:     {}",
                details.cron_expression.as_deref().unwrap_or("-")
            );
            println!(
                "Next fire:    {}",
                details.next_fire_time.as_deref().unwrap_or("-")
            );
            if !details.dependencies.is_empty() {
                println!("Dependencies:");
                for dep in &details.dependencies {
                    println!("  {}", dep);
                }
            }
            println!("Hosts:");
            for host in &details.hosts {
                println!("  {} ({})", host.key(), host.addr());
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Host { client: args } => {
            handle_host(&ApiClient::new(&args)?, &args.output).await?;
        }
        Commands::Hosts { client: args } => {
            handle_hosts(&ApiClient::new(&args)?, &args.output).await?;
        }
        Commands::Jobs { client: args } => {
            handle_jobs(&ApiClient::new(&args)?, &args.output).await?;
        }
        Commands::Job { client: args, name } => {
            handle_job(&ApiClient::new(&args)?, &name, &args.output).await?;
        }
        Commands::Deploy { client: args, name } => {
            let report: SyncReport = ApiClient::new(&args)?
                .post(&format!("/api/jobs/{}/deploy", name))
                .await?
                .json()
                .await?;
            print_report(&report, &args.output)?;
        }
        Commands::Run { client: args, name } => {
            ApiClient::new(&args)?
                .post(&format!("/api/jobs/{}/run", name))
                .await?;
            println!("Job {} started.", name);
        }
        Commands::Sync { client: args } => {
            let report: SyncReport = ApiClient::new(&args)?.post("/api/sync").await?.json().await?;
            print_report(&report, &args.output)?;
        }
    }

    Ok(())
}
