//! Launcher
//!
//! Wires the pipeline together: config, graph store, broker, analyzer,
//! active defense, a flow source (live or synthetic) and the control-plane
//! API. Exit codes: 0 clean shutdown, 1 configuration error, 2 capture init
//! failure, 3 bind failure.

mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shadowhunter::analyzer::Analyzer;
use shadowhunter::api::{self, AppState};
use shadowhunter::broker::Broker;
use shadowhunter::capture::synthetic::{self, TrafficGenerator};
use shadowhunter::config::{Config, EngineContext};
use shadowhunter::defense::{Interrogator, ResponseManager};
use shadowhunter::graph::GraphStore;
use shadowhunter::ml::IntelligenceEngine;

use cli::Cli;

const EXIT_CONFIG: u8 = 1;
const EXIT_CAPTURE: u8 = 2;
const EXIT_BIND: u8 = 3;

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(args: &Cli) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    config.general.port = args.port;
    if let Some(interface) = &args.interface {
        config.capture.interface = Some(interface.clone());
    }
    if let Some(seed) = args.seed {
        config.synthetic.seed = Some(seed);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    init_tracing(args.debug);

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let mode = if args.live { "LIVE" } else { "DEMO" };
    info!(mode, "starting shadowhunter");

    if args.reset && !args.inmemory {
        let path = &config.general.db_path;
        if path.exists() {
            if let Err(err) = std::fs::remove_file(path) {
                error!(%err, "failed to reset graph container");
                return ExitCode::from(EXIT_CONFIG);
            }
            info!("persistent graph reset");
        }
    }

    let store = if args.inmemory {
        GraphStore::open_memory()
    } else {
        GraphStore::open(&config.general.db_path)
    };
    let store = match store {
        Ok(store) => store,
        Err(err) => {
            error!(%err, "failed to open graph store");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let ctx = match EngineContext::new(config) {
        Ok(ctx) => ctx,
        Err(err) => {
            error!(%err, "invalid configuration");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let broker = Arc::new(Broker::new());

    let ml = Arc::new(if ctx.config.ml.enabled {
        match &ctx.config.ml.model_dir {
            Some(dir) => IntelligenceEngine::load_from(dir),
            None => IntelligenceEngine::cold(),
        }
    } else {
        IntelligenceEngine::cold()
    });
    if ml.models_loaded() {
        info!("intelligence engine active (ML + rules)");
    } else {
        info!("intelligence engine cold (rules only)");
    }

    let interrogator = match Interrogator::new(&ctx.config.defense, ctx.stats.clone()) {
        Ok(interrogator) => interrogator,
        Err(err) => {
            error!(%err, "failed to build probe client");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let response = ResponseManager::new(&ctx.config.defense, broker.clone());
    let sweeper = response.start_sweeper(ctx.config.defense.sweep_interval_secs);

    let analyzer = Analyzer::new(
        ctx.clone(),
        broker.clone(),
        store.clone(),
        ml,
        interrogator,
        response.clone(),
    );
    let analyzer_handle = analyzer.start();

    // Flow source
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    #[cfg(feature = "live-capture")]
    let mut sniffer_handle = None;
    if args.live {
        #[cfg(feature = "live-capture")]
        {
            match shadowhunter::capture::sniffer::start(&ctx.config.capture, broker.clone()) {
                Ok(handle) => {
                    info!("live capture running");
                    sniffer_handle = Some(handle);
                }
                Err(err) => {
                    error!(%err, "capture initialization failed");
                    return ExitCode::from(EXIT_CAPTURE);
                }
            }
        }
        #[cfg(not(feature = "live-capture"))]
        {
            error!("this build has no live capture support (enable the live-capture feature)");
            return ExitCode::from(EXIT_CAPTURE);
        }
    } else {
        let generator = TrafficGenerator::new(&ctx.config.synthetic);
        tokio::spawn(synthetic::run(generator, broker.clone(), shutdown_rx.clone()));
        info!("synthetic traffic generator running");
    }

    let state = AppState::new(
        ctx.clone(),
        store,
        analyzer.alerts.clone(),
        response,
        broker,
        args.live,
    );

    let port = ctx.config.general.port;
    let serve_result = tokio::select! {
        result = api::serve(state, port) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        }
    };

    // Stop intake, then drain the pipeline.
    let _ = shutdown_tx.send(true);
    #[cfg(feature = "live-capture")]
    if let Some(handle) = sniffer_handle {
        handle.stop();
    }
    analyzer_handle.shutdown().await;
    sweeper.abort();

    match serve_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "server error");
            ExitCode::from(EXIT_BIND)
        }
    }
}
