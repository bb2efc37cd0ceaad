//! Run the crawler against a live network, persisting what it learns.

use bitcoin::Network;
use clap::Parser;
use log::LevelFilter;
use peer_seeder::{is_dialable, AddressManager, CrawlerBuilder};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address of a node to bootstrap from.
    #[arg(short, long)]
    seed: Vec<String>,

    /// Network to crawl: bitcoin, testnet, signet or regtest.
    #[arg(short, long, default_value = "bitcoin")]
    network: String,

    /// Directory holding the address store.
    #[arg(short, long, default_value = "seeder-data")]
    data_dir: PathBuf,

    /// Timeout for each of connect, handshake and address exchange.
    #[arg(long, default_value = "3")]
    node_timeout_secs: u64,

    /// How long before an attempted address is probed again.
    #[arg(long, default_value = "600", value_parser = clap::value_parser!(u64).range(1..))]
    address_timeout_secs: u64,

    /// Custom user agent (optional).
    #[arg(short, long)]
    user_agent: Option<String>,

    /// Cap on concurrent probes per round, unbounded if unset.
    #[arg(short, long)]
    max_concurrent_tasks: Option<usize>,

    /// Log level.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} - {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log_level)
        .chain(std::io::stderr())
        .apply()?;

    let network = match args.network.to_lowercase().as_str() {
        "bitcoin" | "mainnet" => Network::Bitcoin,
        "testnet" => Network::Testnet,
        "signet" => Network::Signet,
        "regtest" => Network::Regtest,
        other => return Err(format!("Unknown network: {other}").into()),
    };

    let seeds = args
        .seed
        .iter()
        .map(|seed| {
            let ip = seed
                .parse::<IpAddr>()
                .map_err(|_| format!("Invalid IP address: {seed}"))?;
            if !is_dialable(ip) {
                return Err(format!("Seed address can not be dialed: {seed}"));
            }
            Ok(ip)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let manager = Arc::new(
        AddressManager::load(
            &args.data_dir,
            Duration::from_secs(args.address_timeout_secs),
        )
        .await?,
    );
    let added = manager.add_addresses(seeds).await;
    log::info!("Starting with {} ({added} new seeds)", manager.stats().await);

    let mut builder = CrawlerBuilder::new(network, manager.clone())
        .with_node_timeout(Duration::from_secs(args.node_timeout_secs));
    if let Some(user_agent) = args.user_agent.clone() {
        log::debug!("Using custom user agent: {user_agent}");
        builder = builder.with_user_agent(user_agent)?;
    }
    if let Some(max_tasks) = args.max_concurrent_tasks {
        log::debug!("Using at most {max_tasks} concurrent tasks");
        builder = builder.with_max_concurrent_tasks(max_tasks);
    }
    let crawler = builder.build();

    // Stand-in for the directory server reading the good pool.
    let reader = manager.clone();
    let directory = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            log::info!("{} good addresses available", reader.good_addresses().await.len());
        }
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Unable to listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
    };
    crawler.run_until(shutdown).await;
    directory.abort();

    log::info!("Stopped with {}", manager.stats().await);
    Ok(())
}
