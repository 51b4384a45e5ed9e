mod common;

use common::{full_map, map_with, RecordingTransport};
use lametric_core::notification::NotificationFrame;
use lametric_core::transport::{Method, TransportResponse};
use lametric_core::{DeviceClient, LametricError, Operation, Priority, SwitchDirection};

const DIRECTORY: &str = r#"{
    "api_version": "2.3.0",
    "endpoints": {
        "device_url": "http://lametric:8080/api/v2/device",
        "notifications_url": "http://lametric:8080/api/v2/device/notifications",
        "current_notification_url": "http://lametric:8080/api/v2/device/notifications/current",
        "concrete_notification_url": "http://lametric:8080/api/v2/device/notifications{/:id}",
        "apps_list_url": "http://lametric:8080/api/v2/device/apps",
        "apps_switch_next_url": "http://lametric:8080/api/v2/device/apps/next",
        "apps_switch_prev_url": "http://lametric:8080/api/v2/device/apps/prev"
    }
}"#;

#[tokio::test]
async fn discovery_falls_back_to_plain_http() {
    let transport = RecordingTransport::new();
    transport.unreachable("https://lametric:4343/api/v2");
    transport.respond(
        Method::Get,
        "http://lametric:8080/api/v2",
        TransportResponse::new(200, DIRECTORY),
    );

    let client = DeviceClient::new(transport.clone(), "lametric");
    let map = client.capabilities().await.unwrap();

    assert_eq!(map.base_url(), "http://lametric:8080");
    assert_eq!(map.api_version(), Some("2.3.0"));
    assert!(map.supports(Operation::Notifications));
    assert!(!map.supports(Operation::Bluetooth));

    let tried: Vec<_> = transport.calls().into_iter().map(|c| c.url).collect();
    assert_eq!(
        tried,
        ["https://lametric:4343/api/v2", "http://lametric:8080/api/v2"]
    );

    // Cached after the first discovery
    client.capabilities().await.unwrap();
    assert_eq!(transport.calls().len(), 2);
}

#[tokio::test]
async fn discovery_fails_when_every_candidate_fails() {
    let transport = RecordingTransport::new();
    for url in [
        "https://lametric:4343/api/v2",
        "http://lametric:8080/api/v2",
        "https://lametric/api/v2",
    ] {
        transport.unreachable(url);
    }
    transport.respond(
        Method::Get,
        "http://lametric/api/v2",
        TransportResponse::new(401, "unauthorized"),
    );

    let client = DeviceClient::new(transport.clone(), "lametric");
    let err = client.capabilities().await.unwrap_err();

    assert!(matches!(err, LametricError::DiscoveryError(_)));
    assert_eq!(transport.calls().len(), 4);
}

#[tokio::test]
async fn document_without_endpoints_is_rejected() {
    let transport = RecordingTransport::new();
    transport.respond(
        Method::Get,
        "http://lametric:8080/api/v2",
        TransportResponse::new(200, r#"{"api_version":"2.3.0"}"#),
    );

    let client = DeviceClient::new(transport.clone(), "http://lametric:8080");
    let err = client.capabilities().await.unwrap_err();
    assert!(matches!(err, LametricError::DiscoveryError(_)));
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn unsupported_operation_makes_no_request() {
    let transport = RecordingTransport::new();
    let client = DeviceClient::with_capabilities(
        transport.clone(),
        map_with(&[Operation::Device, Operation::Notifications]),
    );

    let err = client.switch_app(SwitchDirection::Next).await.unwrap_err();
    assert!(matches!(
        err,
        LametricError::UnsupportedCapability(Operation::AppsSwitchNext)
    ));

    let err = client.dismiss_current().await.unwrap_err();
    assert!(matches!(
        err,
        LametricError::UnsupportedCapability(Operation::CurrentNotification)
    ));

    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn notifications_follow_discovered_urls() {
    let transport = RecordingTransport::new();
    transport.respond(
        Method::Get,
        "http://lametric:8080/api/v2",
        TransportResponse::new(200, DIRECTORY),
    );
    let client = DeviceClient::new(transport.clone(), "http://lametric:8080");

    let notification = NotificationFrame::text("hi").into_notification(Priority::Warning, 1, None);
    let id = client.send_notification(&notification).await.unwrap();
    assert_eq!(id.0, "1");

    let sent = transport.notifications();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["priority"], "warning");
    assert_eq!(sent[0]["model"]["frames"][0]["text"], "hi");
}

#[tokio::test]
async fn apps_are_listed_and_switched() {
    let transport = RecordingTransport::new();
    transport.respond(
        Method::Get,
        "http://lametric:8080/api/v2/device/apps",
        TransportResponse::new(
            200,
            r#"{
                "com.lametric.weather": {"package": "com.lametric.weather", "version": "1.0.9"},
                "com.lametric.clock": {"version": "1.0.22"}
            }"#,
        ),
    );
    let client = DeviceClient::with_capabilities(transport.clone(), full_map());

    let apps = client.get_apps().await.unwrap();
    let packages: Vec<_> = apps.iter().map(|a| a.package.as_str()).collect();
    assert_eq!(packages, ["com.lametric.clock", "com.lametric.weather"]);

    client.switch_app(SwitchDirection::Prev).await.unwrap();
    let switched = transport.calls_to(Method::Post, "http://lametric:8080/api/v2/device/apps/prev");
    assert_eq!(switched.len(), 1);
}
