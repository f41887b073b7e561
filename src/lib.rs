pub mod floodgate;
#[cfg(test)]
mod tests;

pub use crate::floodgate::*;

use std::fs::File;
use std::io;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use crate::floodgate::bandwidth::BandwidthService;
use crate::floodgate::common::{Error, Result, Shutdown};
use crate::floodgate::config::{load_config, Settings};
use crate::floodgate::mongo::filter::{DbStatsProbe, QuotaFilter};
use crate::floodgate::mongo::MongoService;


pub fn init_tracing(conf: &Settings) {
    let builder = FmtSubscriber::builder()
        .with_max_level(conf.log_level.tracing_level());
    if conf.log_path.is_empty() {
        tracing::subscriber::set_global_default(builder.finish())
            .expect("setting default subscriber failed");
    } else {
        let file = File::create(&conf.log_path).expect("could not create log file");
        let subscriber = builder
            .with_ansi(false)
            .with_writer(move || file.try_clone().expect("could not clone log file handle"))
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("setting default subscriber failed");
    }
}

/// Load the configuration settings from floodgate.yaml
/// See floodgate::config::load_config for more info.
pub fn init_settings() -> Result<&'static Settings> {
    load_config("floodgate.yaml")
}

pub fn init_runtime(conf: &'static Settings) -> io::Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(conf.num_workers as usize)
        .enable_all()
        .build()
}

/// Starts every configured service and blocks until they have all wound
/// down. Returns an error for initialization failures and when a quota
/// monitor forced the stop, so main can exit non-zero.
pub fn run_servers(conf: &'static Settings, tokio: &Runtime) -> Result<()> {
    tokio.block_on(async move {
        let stop = Shutdown::new();
        tokio::spawn(signal_listener(stop.clone()));

        let mut handles = Vec::new();

        if let Some(mongo) = &conf.mongo {
            let filter = QuotaFilter::new(mongo.filter.clone(), mongo.backend.clone(), stop.clone());
            if filter.enabled() {
                filter.start(Box::new(DbStatsProbe::new(mongo.backend.clone())));
            }
            let service = MongoService::new(
                mongo.listen_address(), mongo.backend.clone(), filter, stop.clone())?;
            handles.push(tokio::spawn(async move { service.run().await }));
        }

        for tunnel in &conf.tunnels {
            let service = BandwidthService::new(tunnel, stop.clone())?;
            handles.push(tokio::spawn(async move { service.run().await }));
        }

        // Wait for all listener tasks to shut down
        for handle in handles.drain(..) {
            handle.await.map_err(Error::new)?;
        }

        if stop.is_fault() {
            return Err(Error::new("shut down after repeated quota monitor failures"));
        }
        Ok(())
    })
}

async fn signal_listener(stop: Arc<Shutdown>) {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!(%e, "could not install the SIGTERM handler");
            return;
        },
    };
    tokio::select! {
        _ = term.recv() => {},
        _ = tokio::signal::ctrl_c() => {},
    }
    info!("shutdown signal received");
    stop.raise();
}
