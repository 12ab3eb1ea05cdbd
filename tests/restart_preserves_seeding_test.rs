use silmaril::config::SilmarilConfig;
use silmaril::publish::PublishRequest;
use silmaril::supervisor::Supervisor;
use tempfile::TempDir;

fn config_at(temp: &TempDir) -> SilmarilConfig {
    let mut config = SilmarilConfig::default();
    config.home = Some(temp.path().to_string_lossy().into_owned());
    config.dht_port = 0;
    config
}

async fn shut_down(supervisor: Supervisor) {
    let token = supervisor.cancellation_token();
    let handle = tokio::spawn(supervisor.run());
    token.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn a_seeded_model_is_still_seeding_after_a_restart() {
    let temp = TempDir::new().unwrap();

    let first = Supervisor::start(config_at(&temp)).await.unwrap();
    let model_dir = first.paths().model_path("acme/widget-1b");
    std::fs::create_dir_all(&model_dir).unwrap();
    std::fs::write(model_dir.join("model.bin"), vec![0x7eu8; 512 * 1024]).unwrap();

    let outcome = first
        .pipeline()
        .publish(PublishRequest {
            directory: model_dir,
            name: "acme/widget-1b".to_string(),
            license: "apache-2.0".to_string(),
            version: "main".to_string(),
            inference_hints: None,
            piece_length: 256 * 1024,
            skip_dht: true,
            sign: false,
        })
        .await
        .unwrap();
    let infohash = outcome.infohash;

    shut_down(first).await;

    let second = Supervisor::start(config_at(&temp)).await.unwrap();
    let stats = second.session().stats(&infohash).await.unwrap();
    assert!(stats.seeding);
    assert_eq!(stats.name, "acme/widget-1b");

    // The transfer manager starts fresh on every restart; only the torrent
    // session and its persisted `TorrentRecord`s survive (§4.A, §4.D).
    assert!(second.transfers().list().await.is_empty());
    second.transfers().update_stats().await.unwrap();
    assert!(second.transfers().list().await.is_empty());

    shut_down(second).await;
}
