use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use wg_outbound_core::config;
use wg_outbound_core::device::Device;
use wg_outbound_core::timers::{ChangeNetwork, NullPeerTimers};
use wg_outbound_core::tun::PlatformTun;

fn get_log_path() -> std::path::PathBuf {
    std::env::temp_dir().join("wg-outbound-cored.log")
}

fn log_to_file(msg: &str) {
    let log_path = get_log_path();
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&log_path) {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let _ = writeln!(file, "[{timestamp}] {msg}");
    }
}

/// Default `changeNetwork` hook: logs the event. A real deployment wires
/// this to whatever owns network-path selection (Non-goal: this crate does
/// not perform roaming itself, spec §1).
struct LoggingChangeNetwork;

#[async_trait::async_trait]
impl ChangeNetwork for LoggingChangeNetwork {
    async fn change_network(&self, peer: &wg_outbound_core::peer::Peer) {
        log::warn!("changeNetwork invoked for peer '{}'", peer.name);
    }
}

#[tokio::main]
async fn main() {
    let log_path = get_log_path();
    let _ = std::fs::write(&log_path, "");

    std::panic::set_hook(Box::new(|panic_info| {
        let msg = format!("PANIC: {panic_info}");
        log_to_file(&msg);
        eprintln!("{msg}");
    }));

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log_to_file("env_logger initialized");
    log::info!("starting outbound pipeline daemon");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/wireguard/wg0.conf".to_string());

    let text = match std::fs::read_to_string(&config_path) {
        Ok(text) => text,
        Err(err) => {
            log::error!("failed to read config {config_path}: {err}");
            std::process::exit(1);
        }
    };

    let device_config = match config::parse_device_config(&text) {
        Ok(cfg) => cfg,
        Err(err) => {
            log::error!("failed to parse config {config_path}: {err}");
            std::process::exit(1);
        }
    };

    let bind_addr: std::net::SocketAddr = format!(
        "0.0.0.0:{}",
        device_config.listen_port.unwrap_or(51820)
    )
    .parse()
    .expect("constructed bind address is always valid");

    let tun = match PlatformTun::create("wg0", None) {
        Ok(tun) => Arc::new(tun) as Arc<dyn wg_outbound_core::tun::TunHandle>,
        Err(err) => {
            log::error!("failed to create TUN device: {err}");
            std::process::exit(1);
        }
    };

    let device = match Device::bind(
        bind_addr,
        tun,
        Arc::new(LoggingChangeNetwork),
        Arc::new(NullPeerTimers),
    )
    .await
    {
        Ok(device) => device,
        Err(err) => {
            log::error!("failed to bind device: {err}");
            std::process::exit(1);
        }
    };

    config::apply_to_device(&device_config, &device);
    device.spawn();

    log::info!("pipeline running with {} peers", device_config.peers.len());

    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for ctrl-c: {err}");
    }

    log::info!("shutting down");
    device.shutdown().await;
}
