use std::sync::Arc;

use actix_web::{http::StatusCode, test, web, App};
use settlement_engine::{
    db_types::BookingStatus,
    events::EventProducers,
    pipeline::{
        BackupReconciler,
        EventMonitor,
        EventProcessor,
        MemoryQueue,
        MonitorConfig,
        MonitorStatus,
        ReconcilerConfig,
    },
    test_utils::{seed_booking, FakeChainSource, FakeSubscription, MemoryLedger},
    EventQueue,
};

use super::helpers::{get_request, json, post_request};
use crate::{
    monitor_worker::MonitorHandle,
    routes::{MonitorStatusRoute, ReconcileBookingRoute, StartMonitorRoute, StopMonitorRoute},
};

type TestMonitor = MonitorHandle<MemoryLedger, FakeChainSource, MemoryQueue>;

fn monitor(db: MemoryLedger, source: FakeChainSource) -> web::Data<TestMonitor> {
    let processor = Arc::new(EventProcessor::new(db, EventProducers::default(), 6, Arc::new(MonitorStatus::default())));
    let queue = EventQueue::new(MemoryQueue::new());
    let monitor = EventMonitor::new(source.clone(), queue, Arc::clone(&processor), MonitorConfig::default());
    let reconciler = BackupReconciler::new(source, Arc::clone(&processor), ReconcilerConfig::default());
    web::Data::new(MonitorHandle::new(monitor, reconciler, processor))
}

fn configure(monitor: web::Data<TestMonitor>) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(monitor)
            .service(MonitorStatusRoute::<MemoryLedger, FakeChainSource, MemoryQueue>::new())
            .service(StartMonitorRoute::<MemoryLedger, FakeChainSource, MemoryQueue>::new())
            .service(StopMonitorRoute::<MemoryLedger, FakeChainSource, MemoryQueue>::new())
            .service(ReconcileBookingRoute::<MemoryLedger, FakeChainSource, MemoryQueue>::new());
    }
}

#[actix_web::test]
async fn idle_monitor_status() {
    let _ = env_logger::try_init().ok();
    let handle = monitor(MemoryLedger::default(), FakeChainSource::default());
    let (status, body) = get_request("", "/monitor/status", configure(handle)).await;
    assert_eq!(status, StatusCode::OK);
    let snapshot = json(&body);
    assert_eq!(snapshot["running"], false);
    assert_eq!(snapshot["connection"]["state"], "disconnected");
    assert_eq!(snapshot["reconnect_attempts"], 0);
    assert_eq!(snapshot["queue_depth"], 0);
    assert_eq!(snapshot["events_processed"], 0);
}

#[actix_web::test]
async fn start_and_stop_the_monitor() {
    let _ = env_logger::try_init().ok();
    let source = FakeChainSource::default();
    source.script_subscription(FakeSubscription::Hold(vec![]));
    let handle = monitor(MemoryLedger::default(), source);
    // One service instance, so that every request sees the same monitor
    let app = test::init_service(App::new().configure(configure(handle.clone()))).await;

    let req = test::TestRequest::post().uri("/monitor/start").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);

    let req = test::TestRequest::post().uri("/monitor/start").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    for _ in 0..100 {
        if handle.is_running() {
            break;
        }
        actix_web::rt::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(handle.is_running());

    let req = test::TestRequest::post().uri("/monitor/stop").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(!handle.is_running());

    let req = test::TestRequest::post().uri("/monitor/stop").to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[actix_web::test]
async fn reconcile_known_booking() {
    let _ = env_logger::try_init().ok();
    let db = MemoryLedger::default();
    seed_booking(&db, "b1", BookingStatus::InProgress).await;
    let handle = monitor(db, FakeChainSource::default());
    let (status, body) = post_request("", "/monitor/reconcile/b1", None, configure(handle)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let result = json(&body);
    assert_eq!(result["success"], true);
    assert_eq!(result["message"], "Reconciliation of booking b1 has started.");
}

#[actix_web::test]
async fn reconcile_unknown_booking() {
    let _ = env_logger::try_init().ok();
    let handle = monitor(MemoryLedger::default(), FakeChainSource::default());
    let (status, body) = post_request("", "/monitor/reconcile/ghost", None, configure(handle)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json(&body)["error"].as_str().unwrap().contains("ghost"));
}
