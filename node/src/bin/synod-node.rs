// Synod node entry point.
//
// Reads configuration from CLI flags (optionally overlaid with a JSON file
// via `--config-file`), generates or loads a node keypair, and runs the
// supervisor until ctrl-c or a fatal error.

use clap::Parser;
use log::{error, info};
use std::process::ExitCode;

use synod_common::{crypto::KeyPair, time::get_current_time_in_millis};
use synod_node::config::NodeConfig;
use synod_node::supervisor::{InboundEvent, Supervisor};
use synod_node::transport::{accept_loop, OutboundRegistry};
use tokio::sync::mpsc;

const INBOUND_QUEUE_CAPACITY: usize = 1_024;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli_config = NodeConfig::parse();
    let config = match &cli_config.config_file {
        Some(path) => match NodeConfig::from_json_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("invalid configuration file {}: {e}", path.display());
                return ExitCode::from(1);
            }
        },
        None => cli_config,
    };
    if let Err(e) = config.validate() {
        error!("invalid configuration: {e}");
        return ExitCode::from(1);
    }

    let keys = match &config.key_seed {
        Some(hex_seed) => match hex::decode(hex_seed) {
            Ok(bytes) if bytes.len() == 32 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&bytes);
                KeyPair::from_seed(seed)
            }
            _ => {
                error!("--key-seed must be 32 bytes of hex");
                return ExitCode::from(1);
            }
        },
        None => {
            let mut rng = rand::thread_rng();
            let keys = KeyPair::generate(&mut rng);
            info!("generated a fresh node key; address {}", keys.address());
            keys
        }
    };

    info!("starting synod-node, network {}, role {:?}, address {}", config.network_id, config.role, keys.address());
    let listen_address = config.listen_address.clone();

    let supervisor = match Supervisor::new(config, keys) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!("fatal error during startup: {e}");
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    let shutdown = supervisor.shutdown_handle();
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundEvent>(INBOUND_QUEUE_CAPACITY);
    let outbound = OutboundRegistry::new();

    tokio::spawn(accept_loop(listen_address, shutdown.clone(), inbound_tx, outbound.clone()));

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("ctrl-c received, shutting down");
        shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
    });

    match supervisor.run(inbound_rx, outbound, get_current_time_in_millis).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal error: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
