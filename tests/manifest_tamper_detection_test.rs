use silmaril::config::SilmarilConfig;
use silmaril::error::SilmarilError;
use silmaril::publish::PublishRequest;
use silmaril::supervisor::Supervisor;
use tempfile::TempDir;

fn config_at(temp: &TempDir) -> SilmarilConfig {
    let mut config = SilmarilConfig::default();
    config.home = Some(temp.path().to_string_lossy().into_owned());
    config.dht_port = 0;
    config
}

#[tokio::test]
async fn tampering_with_a_published_file_is_caught_on_verify_but_the_catalog_still_lists_it() {
    let temp = TempDir::new().unwrap();
    let supervisor = Supervisor::start(config_at(&temp)).await.unwrap();

    let model_dir = supervisor.paths().model_path("acme/widget-1b");
    std::fs::create_dir_all(&model_dir).unwrap();
    std::fs::write(model_dir.join("model.bin"), vec![0x11u8; 4096]).unwrap();

    supervisor
        .pipeline()
        .publish(PublishRequest {
            directory: model_dir.clone(),
            name: "acme/widget-1b".to_string(),
            license: "mit".to_string(),
            version: "main".to_string(),
            inference_hints: None,
            piece_length: 1024,
            skip_dht: true,
            sign: true,
        })
        .await
        .unwrap();

    // Flip a byte of the referenced file without going through the
    // registry, simulating corruption or tampering on disk.
    let mut bytes = std::fs::read(model_dir.join("model.bin")).unwrap();
    bytes[0] ^= 0xff;
    std::fs::write(model_dir.join("model.bin"), &bytes).unwrap();

    let err = supervisor
        .registry()
        .verify("acme/widget-1b")
        .await
        .unwrap_err();
    assert!(matches!(err, SilmarilError::IntegrityError(_)));

    // The catalog only tracks infohashes, never file contents, so a
    // rediscovery still lists the model (§8 scenario S5).
    let matches = supervisor.catalog().get_models("acme/*").await;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].0, "acme/widget-1b");

    // A registry built fresh against the same `models/` tree (as happens on
    // restart) never caches the tampered manifest in the first place: its
    // `Scan()` skips it on the same integrity check.
    let fresh_registry = silmaril::registry::ManifestRegistry::new(supervisor.paths().clone());
    fresh_registry.scan().await.unwrap();
    assert!(matches!(
        fresh_registry.get("acme/widget-1b").await,
        Err(SilmarilError::NotFound(_))
    ));

    let token = supervisor.cancellation_token();
    let handle = tokio::spawn(supervisor.run());
    token.cancel();
    handle.await.unwrap().unwrap();
}
