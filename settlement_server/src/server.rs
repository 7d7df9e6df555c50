use std::{sync::Arc, time::Duration};

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use futures::FutureExt;
use log::*;
use settlement_engine::{
    chain::EthersChainSource,
    events::{EventHandlers, EventHooks, EventProducers},
    helpers::SystemClock,
    pipeline::{BackupReconciler, EventMonitor, EventProcessor, MonitorStatus},
    signer::AuthorizationSigner,
    AuthorizationApi,
    CancellationPolicyApi,
    EventQueue,
    SqliteDatabase,
};

use crate::{
    config::ServerConfig,
    errors::ServerError,
    monitor_worker::MonitorHandle,
    routes::{
        health,
        CancellationAuthorizationRoute,
        CancellationPoliciesRoute,
        MonitorStatusRoute,
        PaymentAuthorizationRoute,
        ReconcileBookingRoute,
        StartMonitorRoute,
        StopMonitorRoute,
    },
};

const MAX_DB_CONNECTIONS: u32 = 25;
const NOTIFICATION_BUFFER: usize = 100;

pub type ServerMonitor = MonitorHandle<SqliteDatabase, EthersChainSource, SqliteDatabase>;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, MAX_DB_CONNECTIONS)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let signer = AuthorizationSigner::new(config.signer.clone(), config.signer_key.as_ref(), SystemClock::shared())
        .map_err(|e| ServerError::ConfigurationError(e.to_string()))?;
    let producers = start_notification_handlers();
    let monitor = web::Data::new(create_monitor(&config, db.clone(), producers)?);
    if config.autostart_monitor {
        monitor.start().await?;
    } else {
        info!("🔗️ The event monitor was not started automatically. POST /monitor/start to start it.");
    }
    let srv = create_server_instance(config, db.clone(), signer, monitor.clone())?;
    let result = srv.await.map_err(|e| ServerError::Unspecified(e.to_string()));
    if monitor.is_running() {
        if let Err(e) = monitor.stop().await {
            warn!("🔗️ Could not stop the event monitor cleanly. {e}");
        }
    }
    db.close().await;
    result
}

/// Wires the chain source, durable queue and processor into a monitor. Nothing is started here.
pub fn create_monitor(
    config: &ServerConfig,
    db: SqliteDatabase,
    producers: EventProducers,
) -> Result<ServerMonitor, ServerError> {
    let chain = &config.chain;
    let source = EthersChainSource::new(&chain.ws_url, &chain.http_url, chain.escrow_contract)
        .map_err(|e| ServerError::ConfigurationError(e.to_string()))?;
    let status = Arc::new(MonitorStatus::default());
    let processor = Arc::new(EventProcessor::new(db.clone(), producers, config.signer.token_decimals, status));
    let queue = EventQueue::new(db);
    let monitor = EventMonitor::new(source.clone(), queue, Arc::clone(&processor), config.monitor);
    let reconciler = BackupReconciler::new(source, Arc::clone(&processor), config.reconciler);
    Ok(MonitorHandle::new(monitor, reconciler, processor))
}

/// Participants are notified by logging, until a delivery channel is configured.
fn start_notification_handlers() -> EventProducers {
    let mut hooks = EventHooks::default();
    hooks
        .on_booking_state_changed(|ev| {
            info!(
                "🪝️ Booking {} moved from {} to {}. Notifying {}",
                ev.booking.id,
                ev.old_status,
                ev.new_status,
                ev.recipients.join(", ")
            );
            async {}.boxed()
        })
        .on_chain_event_observed(|ev| {
            info!(
                "🪝️ {} observed for booking {}. Notifying {}",
                ev.envelope.kind(),
                ev.booking_id,
                ev.recipients.join(", ")
            );
            async {}.boxed()
        })
        .on_meeting_release(|ev| {
            info!("🪝️ Meeting room {} for booking {} can be released", ev.meeting_link, ev.booking_id);
            async {}.boxed()
        });
    let handlers = EventHandlers::new(NOTIFICATION_BUFFER, hooks);
    let producers = handlers.producers();
    handlers.start_handlers();
    producers
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    signer: AuthorizationSigner,
    monitor: web::Data<ServerMonitor>,
) -> Result<Server, ServerError> {
    let srv = HttpServer::new(move || {
        let policy_api = CancellationPolicyApi::new(db.clone(), SystemClock::shared());
        let authorization_api = AuthorizationApi::new(db.clone(), signer.clone(), SystemClock::shared());
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("bsg::access_log"))
            .app_data(web::Data::new(policy_api))
            .app_data(web::Data::new(authorization_api))
            .app_data(monitor.clone())
            .service(health)
            .service(MonitorStatusRoute::<SqliteDatabase, EthersChainSource, SqliteDatabase>::new())
            .service(StartMonitorRoute::<SqliteDatabase, EthersChainSource, SqliteDatabase>::new())
            .service(StopMonitorRoute::<SqliteDatabase, EthersChainSource, SqliteDatabase>::new())
            .service(ReconcileBookingRoute::<SqliteDatabase, EthersChainSource, SqliteDatabase>::new())
            .service(CancellationPoliciesRoute::<SqliteDatabase>::new())
            .service(PaymentAuthorizationRoute::<SqliteDatabase>::new())
            .service(CancellationAuthorizationRoute::<SqliteDatabase>::new())
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
