//! # munin-probe
//!
//! Command-line probe for a munin node.
//!
//! ```bash
//! munin-probe --host 10.0.0.5 version
//! munin-probe list
//! munin-probe config cpu load
//! munin-probe --json fetch            # every listed service
//! RUST_LOG=munin_client=debug munin-probe fetch cpu
//! ```

mod output;

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use serde::Serialize;
use tracing::info;

use munin_client::{ClientConfig, NodeClient, DEFAULT_PORT};

#[derive(FromArgs)]
/// query a munin node
struct Cli {
    /// node host
    #[argh(option, default = "\"127.0.0.1\".into()")]
    host: String,

    /// node port
    #[argh(option, short = 'p', default = "DEFAULT_PORT")]
    port: u16,

    /// do not reopen the connection once it is closed
    #[argh(switch, long = "no-reconnect")]
    no_reconnect: bool,

    /// socket timeout in seconds, 0 disables it
    #[argh(option, default = "10")]
    timeout: u64,

    /// print JSON instead of key/value lines
    #[argh(switch)]
    json: bool,

    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Version(VersionArgs),
    List(ListArgs),
    Nodes(NodesArgs),
    Config(ConfigArgs),
    Fetch(FetchArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "version")]
/// print the node version
struct VersionArgs {}

#[derive(FromArgs)]
#[argh(subcommand, name = "list")]
/// list services
struct ListArgs {
    /// host served by the node, defaults to the node itself
    #[argh(option)]
    node: Option<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "nodes")]
/// list hosts the node answers for
struct NodesArgs {}

#[derive(FromArgs)]
#[argh(subcommand, name = "config")]
/// print service configuration
struct ConfigArgs {
    /// services to query, all listed services when omitted
    #[argh(positional)]
    services: Vec<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "fetch")]
/// print current service values
struct FetchArgs {
    /// services to query, all listed services when omitted
    #[argh(positional)]
    services: Vec<String>,
}

fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    let cli: Cli = argh::from_env();
    let timeout = (cli.timeout > 0).then(|| Duration::from_secs(cli.timeout));
    let target = format!("{}:{}", cli.host, cli.port);
    let mut node = NodeClient::with_config(ClientConfig {
        host: cli.host,
        port: cli.port,
        auto_reconnect: !cli.no_reconnect,
        connect_timeout: timeout,
        read_timeout: timeout,
        write_timeout: timeout,
        ..ClientConfig::default()
    });

    run(&mut node, cli.command, cli.json).with_context(|| format!("querying node {}", target))
}

fn run(node: &mut NodeClient, command: Commands, json: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        Commands::Version(_) => {
            let version = node.version()?;
            if json {
                print_json(&mut out, &*version)?;
            } else {
                writeln!(out, "{}", version)?;
            }
        }
        Commands::List(args) => {
            let names = match args.node {
                Some(host) => node.list_node(&host)?,
                None => node.list()?,
            };
            if json {
                print_json(&mut out, &*names)?;
            } else {
                output::write_names(&mut out, &names)?;
            }
        }
        Commands::Nodes(_) => {
            let names = node.nodes()?;
            if json {
                print_json(&mut out, &*names)?;
            } else {
                output::write_names(&mut out, &names)?;
            }
        }
        Commands::Config(args) => {
            let services = services_or_all(node, args.services)?;
            let report = node.config_report(services)?;
            report_failures(report.failed());
            if json {
                print_json(&mut out, &report)?;
            } else {
                output::write_configs(&mut out, &report)?;
            }
        }
        Commands::Fetch(args) => {
            let services = services_or_all(node, args.services)?;
            let report = node.fetch_report(services)?;
            report_failures(report.failed());
            if json {
                print_json(&mut out, &report)?;
            } else {
                output::write_values(&mut out, &report)?;
            }
        }
    }

    out.flush()?;
    Ok(())
}

fn services_or_all(node: &mut NodeClient, services: Vec<String>) -> Result<Vec<String>> {
    if !services.is_empty() {
        return Ok(services);
    }
    let listed = node.list().context("listing services")?;
    info!(count = listed.len(), "querying every listed service");
    Ok(listed.to_vec())
}

fn report_failures<'a>(failed: impl Iterator<Item = (&'a str, munin_client::ServiceFailure)>) {
    for (service, failure) in failed {
        eprintln!("{}: {:?}", service, failure);
    }
}

fn print_json<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
