//! Request handler definitions
//!
//! Define each route and its handler here. Anything more than a few lines belongs in the engine's API objects.
//!
//! Handlers run on actix worker threads, one request at a time per worker. Never block in a handler: every store or
//! chain call is awaited, so the worker keeps serving other requests meanwhile.
//!
//! Booking routes identify the caller with [`authenticated_user`]. Monitor routes are operator endpoints and are
//! expected to be shielded by the deployment, not by this server.
use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use log::*;
use settlement_engine::{
    chain::ChainEventSource,
    db_types::BookingId,
    traits::{LedgerStore, QueueBackend},
    AuthorizationApi,
    CancellationPolicyApi,
};

use crate::{
    data_objects::{CancellationAuthorizationRequest, JsonResponse},
    errors::ServerError,
    helpers::authenticated_user,
    monitor_worker::MonitorHandle,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

// ----------------------------------------------   Monitor  ----------------------------------------------------
route!(monitor_status => Get "/monitor/status" impl LedgerStore, ChainEventSource, QueueBackend);
/// Route handler for the monitor status endpoint
///
/// Reports whether the monitor is running, its connection state, the number of consecutive reconnect attempts, the
/// queue depth and the event counters.
pub async fn monitor_status<B, S, Q>(monitor: web::Data<MonitorHandle<B, S, Q>>) -> Result<HttpResponse, ServerError>
where
    B: LedgerStore + 'static,
    S: ChainEventSource + 'static,
    Q: QueueBackend + 'static,
{
    trace!("💻️ GET monitor status");
    let status = monitor.status().await;
    Ok(HttpResponse::Ok().json(status))
}

route!(start_monitor => Post "/monitor/start" impl LedgerStore, ChainEventSource, QueueBackend);
pub async fn start_monitor<B, S, Q>(monitor: web::Data<MonitorHandle<B, S, Q>>) -> Result<HttpResponse, ServerError>
where
    B: LedgerStore + 'static,
    S: ChainEventSource + 'static,
    Q: QueueBackend + 'static,
{
    info!("💻️ Event monitor start requested");
    monitor.start().await?;
    Ok(HttpResponse::Ok().json(JsonResponse::success("Event monitor started.")))
}

route!(stop_monitor => Post "/monitor/stop" impl LedgerStore, ChainEventSource, QueueBackend);
pub async fn stop_monitor<B, S, Q>(monitor: web::Data<MonitorHandle<B, S, Q>>) -> Result<HttpResponse, ServerError>
where
    B: LedgerStore + 'static,
    S: ChainEventSource + 'static,
    Q: QueueBackend + 'static,
{
    info!("💻️ Event monitor stop requested");
    monitor.stop().await?;
    Ok(HttpResponse::Ok().json(JsonResponse::success("Event monitor stopped.")))
}

route!(reconcile_booking => Post "/monitor/reconcile/{booking_id}" impl LedgerStore, ChainEventSource, QueueBackend);
/// Route handler for launching a backup reconciliation
///
/// The reconciliation polls chain history for several minutes, so this route answers `202 Accepted` as soon as the
/// booking is known to exist. The outcome is logged.
pub async fn reconcile_booking<B, S, Q>(
    path: web::Path<String>,
    monitor: web::Data<MonitorHandle<B, S, Q>>,
) -> Result<HttpResponse, ServerError>
where
    B: LedgerStore + 'static,
    S: ChainEventSource + 'static,
    Q: QueueBackend + 'static,
{
    let booking_id = BookingId::new(path.into_inner());
    info!("💻️ Backup reconciliation requested for booking {booking_id}");
    let _ = monitor.reconcile(booking_id.clone()).await?;
    let msg = format!("Reconciliation of booking {booking_id} has started.");
    Ok(HttpResponse::Accepted().json(JsonResponse::success(msg)))
}

// ----------------------------------------------   Bookings  ----------------------------------------------------
route!(cancellation_policies => Get "/bookings/{id}/cancellation_policies" impl LedgerStore);
/// Route handler for the cancellation policies endpoint
///
/// Returns every policy the requesting user may currently invoke on the booking, each with its refund breakdown.
/// An empty list means nothing can be cancelled under any policy right now.
pub async fn cancellation_policies<B: LedgerStore>(
    req: HttpRequest,
    path: web::Path<String>,
    api: web::Data<CancellationPolicyApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let user = authenticated_user(&req)?;
    let booking_id = BookingId::new(path.into_inner());
    debug!("💻️ GET cancellation policies for booking {booking_id} as {user}");
    let quotes = api.quote(&booking_id, &user).await?;
    Ok(HttpResponse::Ok().json(quotes))
}

route!(payment_authorization => Post "/bookings/{id}/payment_authorization" impl LedgerStore);
/// Route handler for the payment authorization endpoint
///
/// Only the booking's customer may ask, and only once the provider has accepted the booking. The response carries
/// the typed-data message, its signature and the fee breakdown it commits to.
pub async fn payment_authorization<B: LedgerStore>(
    req: HttpRequest,
    path: web::Path<String>,
    api: web::Data<AuthorizationApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let user = authenticated_user(&req)?;
    let booking_id = BookingId::new(path.into_inner());
    debug!("💻️ POST payment authorization for booking {booking_id} as {user}");
    let authorization = api.authorize_booking_payment(&booking_id, &user).await?;
    Ok(HttpResponse::Ok().json(authorization))
}

route!(cancellation_authorization => Post "/bookings/{id}/cancellation_authorization" impl LedgerStore);
pub async fn cancellation_authorization<B: LedgerStore>(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<CancellationAuthorizationRequest>,
    api: web::Data<AuthorizationApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let user = authenticated_user(&req)?;
    let booking_id = BookingId::new(path.into_inner());
    let CancellationAuthorizationRequest { policy_id, reason } = body.into_inner();
    debug!("💻️ POST cancellation authorization for booking {booking_id} under policy {policy_id} as {user}");
    let authorization = api.authorize_cancellation(&booking_id, &user, policy_id, &reason).await?;
    Ok(HttpResponse::Ok().json(authorization))
}
