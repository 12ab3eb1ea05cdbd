use silmaril::config::SilmarilConfig;
use silmaril::error::SilmarilError;
use silmaril::supervisor::Supervisor;
use tempfile::TempDir;

fn config_at(temp: &TempDir) -> SilmarilConfig {
    let mut config = SilmarilConfig::default();
    config.home = Some(temp.path().to_string_lossy().into_owned());
    config.dht_port = 0;
    config
}

#[tokio::test]
async fn a_second_start_against_the_same_home_fails_with_lock_held() {
    let temp = TempDir::new().unwrap();

    let first = Supervisor::start(config_at(&temp)).await.unwrap();

    let err = Supervisor::start(config_at(&temp)).await.unwrap_err();
    assert!(matches!(err, SilmarilError::LockHeld));

    let token = first.cancellation_token();
    let handle = tokio::spawn(first.run());
    token.cancel();
    handle.await.unwrap().unwrap();

    // The lock was released on graceful shutdown, so a new instance can
    // start against the same home directory.
    let second = Supervisor::start(config_at(&temp)).await.unwrap();
    let token = second.cancellation_token();
    let handle = tokio::spawn(second.run());
    token.cancel();
    handle.await.unwrap().unwrap();
}
