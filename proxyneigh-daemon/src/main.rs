//! proxyneighd -- LXD IPVLAN proxy neighbour synchronization daemon.
//!
//! Startup: parse CLI, load configuration, initialize tracing, verify
//! privileges and the LXD API surface, then wire the link watcher into the
//! sync module and wait for a shutdown signal.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

use proxyneigh_core::Service;
use proxyneigh_core::config::ProxyneighConfig;
use proxyneigh_core::error::{ConfigError, ProxyneighError};
use proxyneigh_daemon::cli::DaemonCli;
use proxyneigh_daemon::logging;
use proxyneigh_sync::{
    EXTENSION_CONTAINER_FULL, LinkWatcher, LxdClient, MetadataClient, NeighSyncBuilder,
    RtnetlinkTable, SyncConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // 설정 파일이 없으면 기본값으로 기동 (로깅 초기화 후 경고)
    let mut config_file_missing = false;
    let mut config = match ProxyneighConfig::from_file(&cli.config).await {
        Ok(config) => config,
        Err(ProxyneighError::Config(ConfigError::FileNotFound { .. })) => {
            config_file_missing = true;
            ProxyneighConfig::default()
        }
        Err(e) => bail!("failed to load config from {}: {e}", cli.config.display()),
    };
    config.apply_env_overrides();

    // CLI 오버라이드가 최우선
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    config
        .validate()
        .context("configuration validation failed")?;

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;

    info!("proxyneighd starting");
    if config_file_missing {
        warn!(path = %cli.config.display(), "config file not found, using defaults");
    }

    // 커널 네이버 테이블 조작에는 루트 권한이 필요
    if !nix::unistd::Uid::effective().is_root() {
        bail!("proxyneighd must run as root to manage the kernel neighbour table");
    }

    // LXD 클라이언트 및 API 확장 게이트
    let sync_config = SyncConfig::from_core(&config.lxd);
    let lxd = Arc::new(LxdClient::from_config(&sync_config));
    match lxd.has_extension(EXTENSION_CONTAINER_FULL).await {
        Ok(true) => {
            info!(extension = EXTENSION_CONTAINER_FULL, "lxd api extension present");
        }
        Ok(false) => {
            bail!("lxd does not support the required '{EXTENSION_CONTAINER_FULL}' api extension");
        }
        Err(e) => {
            warn!(error = %e, "lxd not reachable at startup, continuing in degraded mode");
        }
    }

    let table = Arc::new(
        RtnetlinkTable::connect()
            .map_err(ProxyneighError::from)
            .context("failed to open the kernel neighbour table")?,
    );

    let (mut watcher, link_rx) = LinkWatcher::new(sync_config.event_channel_capacity);
    let mut sync = NeighSyncBuilder::new()
        .config(sync_config)
        .metadata_client(lxd)
        .neighbour_table(table)
        .link_receiver(link_rx)
        .build()
        .map_err(ProxyneighError::from)
        .context("failed to build sync module")?;

    // 이벤트 유실 방지를 위해 소비자(sync)를 생산자(watcher)보다 먼저 시작
    sync.start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start sync module: {e}"))?;
    watcher
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start link watcher: {e}"))?;

    info!("proxyneighd running — watching link state transitions");

    // SIGINT/SIGTERM 대기
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
    }

    // 종료는 생산자 먼저 (새 이벤트 차단 후 소비자 정리)
    if let Err(e) = watcher.stop().await {
        error!(error = %e, "failed to stop link watcher");
    }
    if let Err(e) = sync.stop().await {
        error!(error = %e, "failed to stop sync module");
    }

    info!("proxyneighd shut down");
    Ok(())
}
