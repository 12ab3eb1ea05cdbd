use silmaril::config::SilmarilConfig;
use silmaril::error::SilmarilError;
use silmaril::supervisor::Supervisor;
use silmaril::transfer::TransferStatus;
use tempfile::TempDir;

fn config_at(temp: &TempDir) -> SilmarilConfig {
    let mut config = SilmarilConfig::default();
    config.home = Some(temp.path().to_string_lossy().into_owned());
    config.dht_port = 0;
    config
}

#[tokio::test]
async fn pause_resume_cancel_cycle_on_a_live_supervisor() {
    let temp = TempDir::new().unwrap();
    let supervisor = Supervisor::start(config_at(&temp)).await.unwrap();

    let infohash = "b".repeat(40);
    let id = supervisor
        .transfers()
        .create_download("acme/widget-1b".to_string(), infohash.clone(), 1024)
        .await;
    assert_eq!(
        supervisor.transfers().get(&id).await.unwrap().status,
        TransferStatus::Pending
    );

    // Pausing a download that hasn't begun is rejected: only `active` may
    // transition to `paused` (§4.G).
    assert!(matches!(
        supervisor.transfers().pause(&id).await,
        Err(SilmarilError::BadState(_))
    ));

    supervisor.transfers().begin(&id).await.unwrap();
    assert_eq!(
        supervisor.transfers().get(&id).await.unwrap().status,
        TransferStatus::Active
    );

    // The infohash was never added to the torrent-session manager, so the
    // underlying `pause()` call fails `NotFound` and the transfer manager
    // surfaces that rather than silently flipping the status anyway.
    let err = supervisor.transfers().pause(&id).await.unwrap_err();
    assert!(matches!(err, SilmarilError::NotFound(_)));
    assert_eq!(
        supervisor.transfers().get(&id).await.unwrap().status,
        TransferStatus::Active
    );

    // `CancelTransfer` doesn't depend on the session manager knowing about
    // the infohash — it tolerates the `remove()` failure and still marks the
    // record cancelled (§4.G).
    supervisor.transfers().cancel(&id).await.unwrap();
    assert_eq!(
        supervisor.transfers().get(&id).await.unwrap().status,
        TransferStatus::Cancelled
    );
    assert!(matches!(
        supervisor.transfers().cancel(&id).await,
        Err(SilmarilError::BadState(_))
    ));

    let token = supervisor.cancellation_token();
    let handle = tokio::spawn(supervisor.run());
    token.cancel();
    handle.await.unwrap().unwrap();
}
