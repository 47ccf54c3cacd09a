use clap::{Arg, Command};
use dswh_pipeline::config::Config;
use dswh_pipeline::pipeline::EventPipeline;
use dswh_pipeline::provider::{ProviderRegistry, WebApiProvider, WebhookEndpoint};
use dswh_pipeline::return_path::ReturnPath;
use dswh_pipeline::store::{MemoryStore, SubscriberStatus};
use log::LevelFilter;
use serde_json::json;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let matches = Command::new("dswh-pipeline")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Delivery server webhook pipeline for bounce and complaint processing")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/dswh-pipeline.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("process")
                .long("process")
                .value_name("FILE")
                .help("Process a webhook payload file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("server")
                .long("server")
                .value_name("ID")
                .help("Delivery server id the payload is addressed to")
                .default_value("1"),
        )
        .arg(
            Arg::new("demo")
                .long("demo")
                .help("Process a built-in demo payload")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        let config = Config::default();
        match config.to_file(generate_path) {
            Ok(()) => println!("Configuration written to {generate_path}"),
            Err(e) => {
                eprintln!("Error writing configuration: {e}");
                process::exit(1);
            }
        }
        return;
    }

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = match Config::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    let store = Arc::new(MemoryStore::from_config(&config));
    let pipeline = EventPipeline::new(store.clone(), store.clone(), store.clone(), store.clone());
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(WebApiProvider::new(pipeline)));

    if matches.get_flag("test-config") {
        println!("Delivery servers: {}", config.servers.len());
        for server in &config.servers {
            if registry.get(&server.server_type).is_some() {
                println!("  ✅ server {} ({})", server.server_id, server.server_type);
            } else {
                println!(
                    "  ❌ server {} ({}): no handler registered",
                    server.server_id, server.server_type
                );
            }
        }
        println!("Campaigns: {}", config.campaigns.len());
        println!("Subscribers: {}", config.subscribers.len());
        return;
    }

    let server_id: i64 = match matches.get_one::<String>("server").unwrap().parse() {
        Ok(id) => id,
        Err(_) => {
            eprintln!("Invalid server id");
            process::exit(1);
        }
    };

    let body: Vec<u8> = if matches.get_flag("demo") {
        match demo_payload(&config) {
            Some(body) => body,
            None => {
                eprintln!("Demo mode needs at least one campaign and one confirmed subscriber in the configuration");
                process::exit(1);
            }
        }
    } else if let Some(path) = matches.get_one::<String>("process") {
        match std::fs::read(path) {
            Ok(body) => body,
            Err(e) => {
                eprintln!("Error reading payload file {path}: {e}");
                process::exit(1);
            }
        }
    } else {
        eprintln!("Nothing to do. Use --process <FILE> or --demo.");
        process::exit(1);
    };

    let endpoint = WebhookEndpoint::new(store.clone(), registry);
    endpoint.handle_request(server_id, &body).await;

    // The endpoint itself answers nothing; summarize what it committed.
    let bounces = store.bounces();
    let blacklist = store.blacklist();
    println!("Processed webhook for server {server_id}");
    println!("Bounce records: {}", bounces.len());
    for record in &bounces {
        println!(
            "  campaign {} subscriber {} [{:?}]: {}",
            record.campaign_id, record.subscriber_id, record.bounce_type, record.message
        );
    }
    println!("Blacklist entries: {}", blacklist.len());
    for entry in &blacklist {
        println!("  {}: {}", entry.email, entry.reason);
    }
}

/// Build a demo batch against the first campaign and confirmed subscriber
/// from the configuration. Exercises a soft bounce, a duplicate-suppressed
/// hard bounce for the same pair, and a transactional event.
fn demo_payload(config: &Config) -> Option<Vec<u8>> {
    let campaign = config.campaigns.first()?;
    let subscriber = config
        .subscribers
        .iter()
        .find(|s| s.list_id == campaign.list_id && s.status == SubscriberStatus::Confirmed)?;

    let from = ReturnPath::Campaign {
        campaign_uid: campaign.campaign_uid.clone(),
        subscriber_uid: subscriber.subscriber_uid.clone(),
    }
    .format("mail.example.com");
    let transactional = ReturnPath::Transactional.format("mail.example.com");

    let body = json!({
        "events": [
            {
                "type": "delivery.dsn-temp-fail",
                "data": {"from": from, "details": "451 4.7.1 greylisted, try again later"}
            },
            {
                "type": "delivery.dsn-perm-fail",
                "data": {"from": from, "details": ["550 5.1.1 user unknown"]}
            },
            {
                "type": "delivery.failed",
                "data": {"from": transactional, "reason": "relay timed out"}
            },
        ]
    });
    Some(body.to_string().into_bytes())
}
