use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use onion_circuit::logging::{self, LogLevel};
use onion_circuit::relay_protocol::SendMessageBody;
use onion_circuit::{LocalNetwork, NetworkConfig, NetworkLayout};

#[derive(Parser)]
#[command(name = "onion-circuit", about = "Run or drive a local onion routing overlay")]
struct Cli {
    /// Repeat for more detail (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a directory, relays and users in this process until Ctrl-C.
    Launch {
        #[arg(long, default_value_t = 10)]
        relays: u16,
        #[arg(long, default_value_t = 2)]
        users: u16,
        #[arg(long)]
        circuit_length: Option<usize>,
        #[arg(long)]
        rsa_bits: Option<usize>,
        #[arg(long)]
        hop_timeout_ms: Option<u64>,
    },
    /// Ask a running user node to send a message through a circuit.
    Send {
        #[arg(long)]
        from: u16,
        #[arg(long)]
        to: u16,
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(match cli.verbose {
        0 => LogLevel::Info,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    });

    let mut config = NetworkConfig::from_env()?;

    match cli.command {
        Command::Launch {
            relays,
            users,
            circuit_length,
            rsa_bits,
            hop_timeout_ms,
        } => {
            if let Some(length) = circuit_length {
                config = config.with_circuit_length(length);
            }
            if let Some(bits) = rsa_bits {
                config = config.with_rsa_key_bits(bits);
            }
            if let Some(millis) = hop_timeout_ms {
                config = config.with_hop_timeout(Duration::from_millis(millis));
            }

            let network = LocalNetwork::launch(config, NetworkLayout::new(relays, users)).await?;
            info!(relays, users, "network up, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            network.shutdown();
        }
        Command::Send { from, to, message } => {
            let url = config.url(config.user_port(from)?, "/sendMessage");
            let response = reqwest::Client::new()
                .post(&url)
                .json(&SendMessageBody {
                    message,
                    destination_user_id: to,
                })
                .send()
                .await?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                anyhow::bail!("send failed ({}): {}", status, body);
            }
            info!(from, to, "{}", body);
        }
    }

    Ok(())
}
