// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Rendezvous master query CLI
//!
//! # Usage
//!
//! ```bash
//! # Every registered client
//! rdvctl clients
//!
//! # Nodes publishing a topic
//! rdvctl --master 10.0.0.5:8881 nodes --publishing camera/image
//!
//! # One service
//! rdvctl services --service add
//! ```

use clap::{Args as ClapArgs, Parser, Subcommand};
use colored::Colorize;
use rendezvous::info::{ClientFilter, NodeFilter, ServiceFilter, TopicFilter};
use rendezvous::rpc::{
    ListClientsRequest, ListNodesRequest, ListServicesRequest, ListTopicsRequest,
    MasterClientExt, TcpMasterClient,
};
use rendezvous::ChannelSettings;
use std::net::SocketAddr;
use std::time::Duration;

/// Rendezvous master query CLI
#[derive(Parser, Debug)]
#[command(name = "rdvctl")]
#[command(about = "Query a rendezvous master")]
#[command(version)]
struct Args {
    /// Master address
    #[arg(short, long, default_value = "127.0.0.1:8881")]
    master: SocketAddr,

    /// RPC timeout in seconds
    #[arg(long, default_value = "5")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered clients
    Clients {
        /// Only the client with this id
        #[arg(long)]
        id: Option<u32>,
    },

    /// List nodes
    Nodes(NodesArgs),

    /// List published topics
    Topics {
        #[arg(long)]
        topic: Option<String>,
    },

    /// List served services
    Services {
        #[arg(long)]
        service: Option<String>,
    },
}

#[derive(ClapArgs, Debug)]
#[group(multiple = false)]
struct NodesArgs {
    /// Nodes publishing this topic
    #[arg(long)]
    publishing: Option<String>,

    /// Nodes subscribing to this topic
    #[arg(long)]
    subscribing: Option<String>,

    /// Nodes with this name
    #[arg(long)]
    name: Option<String>,
}

impl NodesArgs {
    fn filter(self) -> NodeFilter {
        if let Some(topic) = self.publishing {
            NodeFilter::PublishingTopic(topic)
        } else if let Some(topic) = self.subscribing {
            NodeFilter::SubscribingTopic(topic)
        } else if let Some(name) = self.name {
            NodeFilter::Name(name)
        } else {
            NodeFilter::All
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let client = TcpMasterClient::connect(
        args.master,
        &ChannelSettings::default(),
        Duration::from_secs(args.timeout),
    )
    .await?;

    match args.command {
        Commands::Clients { id } => {
            let filter = id.map_or(ClientFilter::All, ClientFilter::Id);
            let resp = client.list_clients(ListClientsRequest { filter }).await?;
            for info in resp.client_infos {
                println!(
                    "{:>5}  heart_beat={}  notification={}  period={}ms",
                    info.id,
                    info.heart_beat_signaller_source,
                    info.master_notification_watcher_source,
                    info.heart_beat_duration_ms
                );
            }
        }
        Commands::Nodes(nodes) => {
            let filter = nodes.filter();
            let resp = client.list_nodes(ListNodesRequest { filter }).await?;
            for info in resp.node_infos {
                let kind = if info.watcher { "watcher" } else { "node" };
                println!("{:>5}  {:<7}  {}", info.client_id, kind, info.name);
            }
        }
        Commands::Topics { topic } => {
            let filter = topic.map_or(TopicFilter::All, TopicFilter::Topic);
            let resp = client.list_topics(ListTopicsRequest { filter }).await?;
            for info in resp.topic_infos {
                println!("{}  [{}]  {}", info.topic, type_or_dash(&info.type_name), info.source);
            }
        }
        Commands::Services { service } => {
            let filter = service.map_or(ServiceFilter::All, ServiceFilter::Service);
            let resp = client.list_services(ListServicesRequest { filter }).await?;
            for info in resp.service_infos {
                println!(
                    "{}  [{}]  {}",
                    info.service,
                    type_or_dash(&info.type_name),
                    info.source
                );
            }
        }
    }

    Ok(())
}

fn type_or_dash(type_name: &str) -> &str {
    if type_name.is_empty() {
        "-"
    } else {
        type_name
    }
}
