use secrecy::Secret;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use nestflow::api::{app, AppState};
use nestflow::client::{ClientError, Notice, RosterClient};
use nestflow::config::ClientConfig;
use nestflow::models::{AttendanceStatus, Child, EnrollmentStatus, Scope};
use nestflow::services::relay::Relay;
use nestflow::services::roster::MemoryRoster;
use nestflow::services::transition::TransitionError;

const TOKEN: &str = "integration-token";

async fn spawn_server() -> (Url, AppState) {
    let store = Arc::new(MemoryRoster::new(vec![
        Child::enrolled("c1", "Ada", "toddlers"),
        Child::enrolled("c2", "Bo", "toddlers"),
        Child::enrolled("c9", "Zed", "toddlers").with_enrollment(EnrollmentStatus::Pending),
        Child::enrolled("c5", "Ivy", "infants"),
    ]));
    let state = AppState::new(store, Relay::default(), Secret::new(TOKEN.to_string()));
    let router = app(state.clone(), &[]);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (Url::parse(&format!("http://{}/", addr)).unwrap(), state)
}

fn client_for(base_url: &Url, actor: &str) -> (RosterClient, nestflow::client::NoticeReceiver) {
    let mut config = ClientConfig::new(base_url.clone(), actor);
    config.api_token = Some(Secret::new(TOKEN.to_string()));
    RosterClient::connect_http(config).unwrap()
}

async fn wait_for_status(client: &RosterClient, child_id: &str, status: AttendanceStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if client.cached(child_id).map(|c| c.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("cache never caught up with the pushed event");
}

#[tokio::test]
async fn test_check_in_reaches_classroom_followers() {
    let (base_url, state) = spawn_server().await;

    let (watcher, _watcher_notices) = client_for(&base_url, "teacher-2");
    let roster = watcher.refresh(Some("toddlers")).await.unwrap();
    assert_eq!(roster.len(), 3);
    assert!(!watcher.is_demo_mode());

    let _follow = watcher
        .follow(vec![Scope::classroom("toddlers")])
        .await
        .unwrap();
    assert_eq!(state.relay.connection_count(), 1);

    let (actor, mut notices) = client_for(&base_url, "teacher-1");
    let child = actor.check_in("c1").await.unwrap();
    assert_eq!(child.status, AttendanceStatus::Present);
    assert_eq!(
        notices.recv().await,
        Some(Notice::Success("Child checked in successfully".to_string()))
    );

    wait_for_status(&watcher, "c1", AttendanceStatus::Present).await;
    assert!(watcher.cached("c1").unwrap().last_activity_time.is_some());
    assert_eq!(
        watcher.cached("c2").unwrap().status,
        AttendanceStatus::Absent
    );
}

#[tokio::test]
async fn test_rejections_come_back_typed() {
    let (base_url, _state) = spawn_server().await;
    let (client, mut notices) = client_for(&base_url, "teacher-1");

    let err = client.check_out("c2").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Rejected(TransitionError::InvalidTransition)
    ));

    let err = client.check_in("c9").await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(TransitionError::NotEligible)));

    let err = client.check_in("missing").await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(TransitionError::NotFound)));

    assert_eq!(
        notices.recv().await,
        Some(Notice::Failure("Failed to check out child".to_string()))
    );
    assert!(!client.is_demo_mode());
}

#[tokio::test]
async fn test_unreachable_backend_falls_back_to_demo_roster() {
    // Bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let base_url = Url::parse(&format!("http://{}/", addr)).unwrap();
    let mut config = ClientConfig::new(base_url, "teacher-1");
    config.request_timeout = Duration::from_millis(500);
    let (client, mut notices) = RosterClient::connect_http(config).unwrap();

    let roster = client.refresh(None).await.unwrap();
    assert!(!roster.is_empty());
    assert!(client.is_demo_mode());
    assert_eq!(notices.recv().await, Some(Notice::DemoMode));

    let child = client.check_in("child-1").await.unwrap();
    assert_eq!(child.status, AttendanceStatus::Present);
    assert_eq!(
        client.cached("child-1").unwrap().status,
        AttendanceStatus::Present
    );
}
