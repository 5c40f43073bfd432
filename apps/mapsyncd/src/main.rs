use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use mapcore::MemoryWorld;
use mapsync::{SyncConfig, SyncServer};
use tracing::{Level, info, warn};

mod control;

#[derive(Clone, Debug)]
struct Config {
    bind: SocketAddr,
    control_bind: SocketAddr,
    world: PathBuf,
    ping_interval: Duration,
}

fn usage_and_exit() -> ! {
    eprintln!(
        "mapsyncd\n\n\
USAGE:\n  mapsyncd [--bind HOST:PORT] [--control-bind HOST:PORT] [--world PATH] [--ping-interval-s N]\n\n\
ENV:\n  MAP_BIND             default 127.0.0.1:4200 (page, /state, /path, websocket)\n  MAP_CONTROL_BIND     default 127.0.0.1:4201 (JSON-lines control port)\n  MAP_WORLD            default world/demo.yaml\n  MAP_PING_INTERVAL_S  default 30\n"
    );
    std::process::exit(2);
}

fn parse_args() -> Config {
    let mut bind: SocketAddr = std::env::var("MAP_BIND")
        .unwrap_or_else(|_| "127.0.0.1:4200".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());

    let mut control_bind: SocketAddr = std::env::var("MAP_CONTROL_BIND")
        .unwrap_or_else(|_| "127.0.0.1:4201".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());

    let mut world = PathBuf::from(
        std::env::var("MAP_WORLD").unwrap_or_else(|_| "world/demo.yaml".to_string()),
    );

    let mut ping_s: u64 = std::env::var("MAP_PING_INTERVAL_S")
        .unwrap_or_else(|_| "30".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--bind" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                bind = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--control-bind" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                control_bind = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--world" => {
                world = PathBuf::from(it.next().unwrap_or_else(|| usage_and_exit()));
            }
            "--ping-interval-s" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                ping_s = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }
    if ping_s == 0 {
        usage_and_exit();
    }

    Config {
        bind,
        control_bind,
        world,
        ping_interval: Duration::from_secs(ping_s),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mapsyncd=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = parse_args();

    let world = Arc::new(
        MemoryWorld::load(&cfg.world)
            .with_context(|| format!("load world {}", cfg.world.display()))?,
    );
    info!(
        world = %cfg.world.display(),
        rooms = world.room_count(),
        players = world.player_names().len(),
        "world loaded"
    );

    let sync_cfg = SyncConfig {
        bind: cfg.bind,
        ping_interval: cfg.ping_interval,
        ..SyncConfig::default()
    };
    let server = SyncServer::start(sync_cfg, world.clone())
        .await
        .with_context(|| format!("bind {}", cfg.bind))?;

    let control = tokio::spawn(control::control_server_task(
        cfg.control_bind,
        world,
        server.registry().clone(),
    ));

    info!(
        bind = %server.local_addr(),
        control_bind = %cfg.control_bind,
        "mapsyncd running"
    );

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("wait for ctrl-c")?;
            info!("shutting down");
        }
        res = control => {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(err = %e, "control port failed"),
                Err(e) => warn!(err = %e, "control task panicked"),
            }
        }
    }

    server.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapcore::{MapMode, ZoneColors};

    #[test]
    fn demo_world_loads_and_builds() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../world/demo.yaml");
        let world = MemoryWorld::load(&path).unwrap();
        assert_eq!(world.player_names(), vec!["Alice".to_string(), "Bob".to_string()]);

        let mut colors = ZoneColors::new();
        let p = mapcore::build(&world, "alice", MapMode::Full, &mut colors).unwrap();
        assert_eq!(p.rooms.len(), 6);
        assert!(p.player.is_some());

        // bob has seen part of town, but zone mode keeps to the forest
        let p = mapcore::build(&world, "bob", MapMode::Zone, &mut colors).unwrap();
        assert!(p.rooms.iter().all(|r| r.zone == 31));
    }
}
