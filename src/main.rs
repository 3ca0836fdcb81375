#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

use mmsd::adapters::bus::{BusConnection, SocketBus};
use mmsd::adapters::transport::{HttpTransport, MessageTransport};
use mmsd::config::Config;
use mmsd::services::{MmsService, ServiceSettings};
use mmsd::storage::MessageStore;
use mmsd::telemetry;
use mmsd::workers::SendWorker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    let telemetry_guard = telemetry::init_telemetry(&config.telemetry)?;

    mmsd::setup_panic_hook();

    let boot_span = tracing::info_span!("boot_daemon");
    let (bus, listener, services, workers, shutdown_tx, shutdown_rx) = async {
        // Phase 1: Infrastructure Setup (Resources)
        let store = MessageStore::open(config.storage.data_root(), config.storage.cache_root())?;
        let (bus, listener) = SocketBus::bind(&config.bus.socket_path, config.bus.buffer_size)?;
        tracing::info!(socket = %config.bus.socket_path.display(), "bus listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        mmsd::spawn_signal_handler(shutdown_tx.clone());

        let transport: Arc<dyn MessageTransport> = Arc::new(HttpTransport::new(&config.transport)?);

        // Phase 2: Service Wiring (one service and send worker per identity)
        let conn = Arc::clone(&bus) as Arc<dyn BusConnection>;
        let mut services = Vec::with_capacity(config.identities.len());
        let mut workers = Vec::with_capacity(config.identities.len());
        for identity in &config.identities {
            let (outgoing_tx, outgoing_rx) = mpsc::channel(config.service.outgoing_channel_capacity);
            let settings = ServiceSettings {
                identity: identity.clone(),
                modem_object_path: config.modem_object_path.clone(),
                use_delivery_reports: config.use_delivery_reports,
            };
            let service = MmsService::new(Arc::clone(&conn), store.clone(), settings, outgoing_tx, &config.service);
            let worker = SendWorker::new(store.clone(), service.handle(), Arc::clone(&transport));
            workers.push((identity.clone(), worker, outgoing_rx));
            services.push(service);
        }

        Ok::<_, anyhow::Error>((bus, listener, services, workers, shutdown_tx, shutdown_rx))
    }
    .instrument(boot_span)
    .await?;

    // Phase 3: Start Runtime
    let worker_tasks: Vec<_> = workers
        .into_iter()
        .map(|(identity, worker, outgoing_rx)| {
            tokio::spawn(
                worker
                    .run(outgoing_rx, shutdown_rx.clone())
                    .instrument(tracing::info_span!("send_worker", identity = %identity)),
            )
        })
        .collect();

    bus.serve(listener, shutdown_rx.clone()).await;

    // Phase 4: Graceful Shutdown Orchestration
    let _ = shutdown_tx.send(true);
    for service in services {
        service.close().await;
    }
    tokio::select! {
        () = async {
            futures::future::join_all(worker_tasks).await;
        } => {
            tracing::info!("Background tasks finished.");
        }
        () = tokio::time::sleep(Duration::from_secs(config.shutdown_timeout_secs)) => {
            tracing::warn!("Timeout waiting for background tasks to finish.");
        }
    }

    telemetry_guard.shutdown();
    Ok(())
}
