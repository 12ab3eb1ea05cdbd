use silmaril::catalog::Catalog;

/// Two daemons independently publish the same model name with differing
/// infohashes; after their catalogs are merged (the BEP44 convergence path,
/// §4.E/§4.F), both sides must agree on the same winner: later `added`
/// timestamp wins, ties break on the lexicographically larger infohash.
#[tokio::test]
async fn independent_publishers_converge_on_the_same_winner_regardless_of_merge_direction() {
    let mut daemon_a = Catalog::default();
    daemon_a.models.insert(
        "foo/bar".to_string(),
        entry("1111111111111111111111111111111111111a", 1_000),
    );

    let mut daemon_b = Catalog::default();
    daemon_b.models.insert(
        "foo/bar".to_string(),
        entry("2222222222222222222222222222222222222b", 1_005),
    );

    let mut a_merged = daemon_a.clone();
    assert!(a_merged.merge(&daemon_b));

    let mut b_merged = daemon_b.clone();
    assert!(b_merged.merge(&daemon_a));

    assert_eq!(a_merged.models["foo/bar"], b_merged.models["foo/bar"]);
    assert_eq!(
        a_merged.models["foo/bar"].infohash,
        "2222222222222222222222222222222222222b"
    );
}

#[tokio::test]
async fn simultaneous_publish_at_the_same_timestamp_breaks_on_infohash() {
    let mut daemon_a = Catalog::default();
    daemon_a.models.insert(
        "foo/bar".to_string(),
        entry("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", 500),
    );

    let mut daemon_b = Catalog::default();
    daemon_b.models.insert(
        "foo/bar".to_string(),
        entry("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz", 500),
    );

    let mut a_merged = daemon_a.clone();
    a_merged.merge(&daemon_b);
    let mut b_merged = daemon_b;
    b_merged.merge(&daemon_a);

    assert_eq!(a_merged.models["foo/bar"], b_merged.models["foo/bar"]);
    assert_eq!(
        a_merged.models["foo/bar"].infohash,
        "zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz"
    );
}

fn entry(infohash: &str, added: i64) -> silmaril::catalog::CatalogEntry {
    silmaril::catalog::CatalogEntry {
        infohash: infohash.to_string(),
        size: 4096,
        tags: Vec::new(),
        added,
    }
}
