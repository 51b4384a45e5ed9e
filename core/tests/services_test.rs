mod common;

use common::{harness, Harness, Script, NOTIFICATIONS};
use lametric_core::transport::Method;
use lametric_core::{LametricError, ServiceCall, ServiceResponse, Services};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn call(value: serde_json::Value) -> ServiceCall {
    serde_json::from_value(value).unwrap()
}

fn two_devices() -> (Services, Harness, Harness) {
    let kitchen = harness(Script::Silent, Duration::from_secs(12));
    let hall = harness(Script::Silent, Duration::from_secs(12));
    let services = Services::new();
    services.register("kitchen", Arc::clone(&kitchen.dispatcher));
    services.register("hall", Arc::clone(&hall.dispatcher));
    (services, kitchen, hall)
}

#[tokio::test]
async fn single_device_needs_no_device_id() {
    let h = harness(Script::Silent, Duration::from_secs(12));
    let services = Services::new();
    services.register("only", Arc::clone(&h.dispatcher));

    let res = services
        .handle(call(json!({
            "service": "play_mp3_url",
            "text": "Ding dong",
            "mp3_url": "/local/doorbell.mp3"
        })))
        .await
        .unwrap();

    assert!(matches!(res, ServiceResponse::Notification { .. }));
    assert_eq!(h.transport.notifications().len(), 1);
}

#[tokio::test]
async fn calls_are_routed_by_device_id() {
    let (services, kitchen, hall) = two_devices();
    assert_eq!(services.device_ids(), ["hall", "kitchen"]);

    services
        .handle(call(json!({
            "service": "show_setpoint_change",
            "device_id": "hall",
            "temperature_c": 19.0,
            "direction": "up"
        })))
        .await
        .unwrap();

    assert!(kitchen.transport.calls().is_empty());
    assert_eq!(hall.transport.notifications().len(), 1);
}

#[tokio::test]
async fn ambiguous_or_unknown_device_is_rejected() {
    let (services, kitchen, hall) = two_devices();

    let err = services
        .handle(call(json!({"service": "dismiss_all"})))
        .await
        .unwrap_err();
    assert!(matches!(err, LametricError::InvalidRequest(_)));

    let err = services
        .handle(call(json!({"service": "dismiss_all", "device_id": "attic"})))
        .await
        .unwrap_err();
    assert!(matches!(err, LametricError::InvalidRequest(_)));

    assert!(kitchen.transport.calls().is_empty());
    assert!(hall.transport.calls().is_empty());
}

#[tokio::test]
async fn unregistered_device_stops_receiving_calls() {
    let (services, kitchen, _hall) = two_devices();
    assert!(services.unregister("hall"));
    assert!(!services.unregister("hall"));

    let res = services
        .handle(call(json!({"service": "dismiss_all"})))
        .await
        .unwrap();
    assert_eq!(res, ServiceResponse::Dismissed);
    assert_eq!(kitchen.transport.calls_to(Method::Delete, NOTIFICATIONS).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_running_animation() {
    let h = harness(Script::Silent, Duration::from_secs(12));
    let services = Arc::new(Services::new());
    services.register("only", Arc::clone(&h.dispatcher));

    let running = tokio::spawn({
        let services = Arc::clone(&services);
        async move {
            services
                .handle(call(json!({
                    "service": "play_animation",
                    "frames": [{"text": "a"}, {"text": "b"}],
                    "hold_ms": 1000,
                    "repeat": 10
                })))
                .await
        }
    });

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    services.shutdown();

    match running.await.unwrap().unwrap() {
        ServiceResponse::Animation(report) => {
            assert!(report.cancelled);
            assert_eq!(report.frames_sent, 3);
        }
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_waiting_tts() {
    let h = harness(Script::Silent, Duration::from_secs(12));
    let services = Arc::new(Services::new());
    services.register("only", Arc::clone(&h.dispatcher));

    let running = tokio::spawn({
        let services = Arc::clone(&services);
        async move {
            services
                .handle(call(json!({"service": "play_tts", "message": "Dinner is ready"})))
                .await
        }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    services.shutdown();

    let err = running.await.unwrap().unwrap_err();
    assert!(matches!(err, LametricError::Cancelled));
    assert!(h.transport.notifications().is_empty());
}
