use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use super::{run_admin_server, AdminState};
use crate::accessor::Accessor;
use crate::config::RuntimeConfig;
use crate::discovery::{Backend, ConsulBackend, CrossDcWatch, DatacenterWatcher, Watch};
use crate::environment::{AccessorFactory, Environment};
use crate::gate::Gate;
use crate::metrics::Metrics;
use crate::ring::Ring;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: PathBuf,
}

/// Runtime lifecycle: init → load config → build environment → seed
/// watches/registrations → serve admin → shutdown (§3 "Lifecycles").
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let config = RuntimeConfig::load(&args.config_path)?;
    let metrics = Metrics::install();

    let backend: Arc<dyn Backend> = Arc::new(ConsulBackend::new(
        &config.consul.address,
        config.consul.token.clone(),
        config.consul.datacenter.clone(),
    ));

    let gate = Arc::new(Gate::new(config.gate.initially_open));

    let vnodes = config.ring.vnodes;
    let accessor_factory: AccessorFactory =
        Arc::new(move |instances: &[String]| Accessor::ring(Ring::build(instances.to_vec(), vnodes)));

    let environment = Environment::new(backend.clone(), config.default_scheme.clone(), accessor_factory);

    let mut cross_dc_watches = Vec::new();
    for watch_cfg in &config.watches {
        if watch_cfg.cross_dc {
            cross_dc_watches.push(CrossDcWatch {
                service: watch_cfg.service.clone(),
                tag: watch_cfg.tag.clone(),
                other_tags: watch_cfg.other_tags.clone(),
                passing_only: watch_cfg.passing_only,
            });
            continue;
        }
        environment
            .ensure_watch(Watch {
                service: watch_cfg.service.clone(),
                tag: watch_cfg.tag.clone(),
                other_tags: watch_cfg.other_tags.clone(),
                passing_only: watch_cfg.passing_only,
                datacenter: watch_cfg.datacenter.clone(),
            })
            .await;
    }

    let datacenter_watcher = if cross_dc_watches.is_empty() {
        None
    } else {
        Some(DatacenterWatcher::start(
            environment.clone(),
            backend.clone(),
            cross_dc_watches,
            Duration::from_secs(config.datacenter_watcher.watch_interval_secs),
            config.datacenter_watcher.datacenter_retries,
        ))
    };

    for reg in &config.registrations {
        environment
            .register(
                backend.clone(),
                reg.name.clone(),
                reg.id.clone(),
                reg.address.clone(),
                reg.port,
                reg.tags.clone(),
                &reg.checks,
            )
            .await?;
    }

    let shutdown = Arc::new(Notify::new());
    let admin_state = AdminState { gate, metrics };
    {
        let admin_state = admin_state.clone();
        let shutdown = shutdown.clone();
        let listen = config.admin.listen.clone();
        tokio::spawn(async move {
            if let Err(e) = run_admin_server(&listen, admin_state, shutdown).await {
                tracing::error!("server: admin failed, error={}", e);
            }
        });
    }

    tracing::info!("server: runtime started, admin_listen={}", config.admin.listen);
    wait_for_shutdown(&shutdown).await;

    if let Some(dw) = datacenter_watcher {
        dw.stop();
    }
    environment.close().await;
    tracing::info!("server: shutdown complete");

    Ok(())
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_waiters();
}
