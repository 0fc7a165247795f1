use madison_mirror::catalog::Catalog;
use madison_mirror::metadata::Compression;
use madison_mirror::refresh::{ArchiveRefresher, RefreshSupervisor, initial_refresh};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

mod common;
use common::{FixtureArchive, cache_dir, open_archive, packages, settings, with_ports};

#[tokio::test]
async fn test_refresh_populates_cache() {
    let fixture = FixtureArchive::start().await;
    fixture.set_index(
        "stable",
        "main",
        "amd64",
        &packages(&[("foo", "1.0", "amd64"), ("bar", "2.0", "all")]),
        Compression::Gzip,
    );

    let dir = cache_dir();
    let archive = open_archive(&settings("a", &fixture, &["stable"], &["main"], &["amd64"]), dir.path()).await;
    let refresher = ArchiveRefresher::new(Arc::clone(&archive));

    let result = refresher.refresh_once(true).await;
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.records, 2);
    assert_eq!(result.pockets_replaced, 1);

    let foo = archive.store.get("foo").unwrap();
    assert_eq!(foo.len(), 1);
    assert_eq!(foo[0].version, "1.0");
    assert_eq!(foo[0].architecture, "amd64");
    assert_eq!(foo[0].pocket, "stable");
    assert_eq!(foo[0].component, "main");
    assert_eq!(foo[0].archive, "a");
}

#[tokio::test]
async fn test_refresh_is_idempotent() {
    let fixture = FixtureArchive::start().await;
    fixture.set_index(
        "stable",
        "main",
        "amd64",
        &packages(&[("foo", "1.0", "amd64"), ("foo", "1.0", "amd64")]),
        Compression::Xz,
    );

    let dir = cache_dir();
    let archive = open_archive(&settings("a", &fixture, &["stable"], &["main"], &["amd64"]), dir.path()).await;
    let refresher = ArchiveRefresher::new(Arc::clone(&archive));

    refresher.refresh_once(true).await;
    let first = archive.store.get("foo").unwrap();
    refresher.refresh_once(true).await;
    let second = archive.store.get("foo").unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_unchanged_index_is_not_downloaded_again() {
    let fixture = FixtureArchive::start().await;
    fixture.set_index("stable", "main", "amd64", &packages(&[("foo", "1.0", "amd64")]), Compression::None);

    let dir = cache_dir();
    let archive = open_archive(&settings("a", &fixture, &["stable"], &["main"], &["amd64"]), dir.path()).await;
    let refresher = ArchiveRefresher::new(Arc::clone(&archive));

    refresher.refresh_once(true).await;
    assert_eq!(fixture.index_downloads(), 1);

    let result = refresher.refresh_once(false).await;
    assert!(result.is_success());
    assert_eq!(result.pockets_unchanged, 1);
    assert_eq!(result.pockets_replaced, 0);
    assert_eq!(fixture.index_downloads(), 1);
    assert_eq!(refresher.fetcher().downloads(), 1);

    refresher.refresh_once(true).await;
    assert_eq!(fixture.index_downloads(), 2);
}

#[tokio::test]
async fn test_new_version_replaces_old_across_archives() {
    let fixture_a = FixtureArchive::start().await;
    let fixture_b = FixtureArchive::start().await;
    fixture_a.set_index("stable", "main", "amd64", &packages(&[("foo", "1.0", "amd64")]), Compression::Gzip);
    fixture_b.set_index("stable", "main", "amd64", &packages(&[("bar", "3.0", "amd64")]), Compression::Gzip);

    let dir = cache_dir();
    let a = open_archive(&settings("a", &fixture_a, &["stable"], &["main"], &["amd64"]), dir.path()).await;
    let b = open_archive(&settings("b", &fixture_b, &["stable"], &["main"], &["amd64"]), dir.path()).await;
    let refreshers = vec![
        Arc::new(ArchiveRefresher::new(Arc::clone(&a))),
        Arc::new(ArchiveRefresher::new(Arc::clone(&b))),
    ];
    let catalog = Catalog::from_archives(&[a, b]);

    let results = initial_refresh(&refreshers).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].archive, "a");
    assert_eq!(results[1].archive, "b");

    let found = catalog.lookup("foo").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!((found[0].archive.as_str(), found[0].pocket.as_str(), found[0].version.as_str()), ("a", "stable", "1.0"));

    fixture_a.set_index("stable", "main", "amd64", &packages(&[("foo", "1.1", "amd64")]), Compression::Gzip);
    let result = refreshers[0].refresh_once(false).await;
    assert_eq!(result.pockets_replaced, 1);

    let found = catalog.lookup("foo").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].version, "1.1");
}

#[tokio::test]
async fn test_missing_pocket_keeps_cached_records() {
    let fixture = FixtureArchive::start().await;
    fixture.set_index("stable", "main", "amd64", &packages(&[("foo", "1.0", "amd64")]), Compression::Gzip);
    fixture.set_index("stable-updates", "main", "amd64", &packages(&[("foo", "1.1", "amd64")]), Compression::Gzip);

    let dir = cache_dir();
    let archive = open_archive(
        &settings("a", &fixture, &["stable", "stable-updates"], &["main"], &["amd64"]),
        dir.path(),
    )
    .await;
    let refresher = ArchiveRefresher::new(Arc::clone(&archive));
    refresher.refresh_once(true).await;

    fixture.hide_pocket("stable-updates");
    fixture.set_index("stable", "main", "amd64", &packages(&[("foo", "1.2", "amd64")]), Compression::Gzip);
    let result = refresher.refresh_once(false).await;

    assert!(!result.is_success());
    assert_eq!(result.pockets_replaced, 1);
    let versions: Vec<_> = archive
        .store
        .get("foo")
        .unwrap()
        .into_iter()
        .map(|r| (r.pocket, r.version))
        .collect();
    assert_eq!(
        versions,
        vec![
            ("stable".to_string(), "1.2".to_string()),
            ("stable-updates".to_string(), "1.1".to_string()),
        ]
    );

    // Recovers on the next tick once the pocket is back
    fixture.unhide_pocket("stable-updates");
    fixture.set_index("stable-updates", "main", "amd64", &packages(&[("foo", "1.3", "amd64")]), Compression::Gzip);
    let result = refresher.refresh_once(false).await;
    assert!(result.is_success(), "{:?}", result.error);
    assert!(archive.store.get("foo").unwrap().iter().any(|r| r.version == "1.3"));
}

#[tokio::test]
async fn test_checksum_mismatch_only_affects_its_index() {
    let fixture = FixtureArchive::start().await;
    fixture.set_index("stable", "main", "amd64", &packages(&[("foo", "1.0", "amd64")]), Compression::Gzip);
    fixture.set_index("stable", "universe", "amd64", &packages(&[("baz", "1.0", "amd64")]), Compression::Gzip);

    let dir = cache_dir();
    let archive = open_archive(
        &settings("a", &fixture, &["stable"], &["main", "universe"], &["amd64"]),
        dir.path(),
    )
    .await;
    let refresher = ArchiveRefresher::new(Arc::clone(&archive));
    assert!(refresher.refresh_once(true).await.is_success());

    fixture.set_index("stable", "main", "amd64", &packages(&[("foo", "1.1", "amd64")]), Compression::Gzip);
    fixture.set_index("stable", "universe", "amd64", &packages(&[("baz", "2.0", "amd64")]), Compression::Gzip);
    fixture.corrupt_index("stable", "universe", "amd64");

    let result = refresher.refresh_once(false).await;
    let error = result.error.expect("mismatch should be reported");
    assert!(error.contains("Checksum mismatch"), "{}", error);
    assert_eq!(result.pockets_replaced, 1);

    assert_eq!(archive.store.get("foo").unwrap()[0].version, "1.1");
    // The failed index is rebuilt from its last verified copy
    assert_eq!(archive.store.get("baz").unwrap()[0].version, "1.0");

    // Fixed upstream: the failed index is fetched again
    fixture.thaw_release("stable");
    fixture.set_index("stable", "universe", "amd64", &packages(&[("baz", "2.0", "amd64")]), Compression::Gzip);
    assert!(refresher.refresh_once(false).await.is_success());
    assert_eq!(archive.store.get("baz").unwrap()[0].version, "2.0");
}

#[tokio::test]
async fn test_failed_index_on_first_pass_does_not_block_pocket() {
    let fixture = FixtureArchive::start().await;
    fixture.set_index("stable", "main", "amd64", &packages(&[("foo", "1.0", "amd64")]), Compression::Gzip);
    fixture.set_index("stable", "main", "i386", &packages(&[("foo", "1.0", "i386")]), Compression::Gzip);
    fixture.corrupt_index("stable", "main", "i386");

    let dir = cache_dir();
    let archive = open_archive(&settings("a", &fixture, &["stable"], &["main"], &["amd64", "i386"]), dir.path()).await;
    let refresher = ArchiveRefresher::new(Arc::clone(&archive));

    let result = refresher.refresh_once(true).await;
    assert!(!result.is_success());
    let foo = archive.store.get("foo").unwrap();
    assert_eq!(foo.len(), 1);
    assert_eq!(foo[0].architecture, "amd64");
}

#[tokio::test]
async fn test_ports_architectures_come_from_ports_mirror() {
    let base = FixtureArchive::start().await;
    let ports = FixtureArchive::start().await;
    base.set_index("stable", "main", "amd64", &packages(&[("foo", "1.0", "amd64")]), Compression::Gzip);
    ports.set_index("stable", "main", "arm64", &packages(&[("foo", "1.0", "arm64")]), Compression::Xz);

    let dir = cache_dir();
    let archive_settings = with_ports(settings("a", &base, &["stable"], &["main"], &["amd64"]), &ports, &["arm64"]);
    let archive = open_archive(&archive_settings, dir.path()).await;
    let refresher = ArchiveRefresher::new(Arc::clone(&archive));

    let result = refresher.refresh_once(true).await;
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.records, 2);

    let mut archs: Vec<_> = archive
        .store
        .get("foo")
        .unwrap()
        .into_iter()
        .map(|r| r.architecture)
        .collect();
    archs.sort();
    assert_eq!(archs, vec!["amd64", "arm64"]);
    assert_eq!(base.index_downloads(), 1);
    assert_eq!(ports.index_downloads(), 1);
}

#[tokio::test]
async fn test_never_fetched_index_does_not_hold_back_pocket() {
    let base = FixtureArchive::start().await;
    // Ports mirror that does not carry the pocket at all
    let ports = FixtureArchive::start().await;
    base.set_index("stable", "main", "amd64", &packages(&[("foo", "1.0", "amd64")]), Compression::Gzip);

    let dir = cache_dir();
    let archive_settings = with_ports(settings("a", &base, &["stable"], &["main"], &["amd64"]), &ports, &["arm64"]);
    let archive = open_archive(&archive_settings, dir.path()).await;
    let refresher = ArchiveRefresher::new(Arc::clone(&archive));

    let result = refresher.refresh_once(true).await;
    assert!(!result.is_success());
    assert_eq!(result.pockets_replaced, 1);

    base.set_index("stable", "main", "amd64", &packages(&[("foo", "1.1", "amd64")]), Compression::Gzip);
    let result = refresher.refresh_once(false).await;
    assert!(result.error.is_some());
    assert_eq!(result.pockets_replaced, 1);

    let versions: Vec<_> = archive.store.get("foo").unwrap().into_iter().map(|r| r.version).collect();
    assert_eq!(versions, vec!["1.1"]);
}

#[tokio::test]
async fn test_unreachable_release_is_requested_once_per_pass() {
    let fixture = FixtureArchive::start().await;
    fixture.set_index("stable", "main", "amd64", &packages(&[("foo", "1.0", "amd64")]), Compression::Gzip);
    fixture.hide_pocket("stable");

    let dir = cache_dir();
    let archive = open_archive(
        &settings("a", &fixture, &["stable"], &["main", "universe"], &["amd64", "i386"]),
        dir.path(),
    )
    .await;
    let refresher = ArchiveRefresher::new(Arc::clone(&archive));

    let result = refresher.refresh_once(true).await;
    assert!(!result.is_success());
    assert_eq!(fixture.release_requests(), 1);

    // Each pass tries again
    refresher.refresh_once(false).await;
    assert_eq!(fixture.release_requests(), 2);

    fixture.unhide_pocket("stable");
    let result = refresher.refresh_once(false).await;
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(archive.store.get("foo").unwrap().len(), 1);
}

#[tokio::test]
async fn test_unlisted_index_is_empty_not_an_error() {
    let fixture = FixtureArchive::start().await;
    fixture.set_index("stable", "main", "amd64", &packages(&[("foo", "1.0", "amd64")]), Compression::Gzip);

    let dir = cache_dir();
    let archive = open_archive(
        &settings("a", &fixture, &["stable"], &["main", "restricted"], &["amd64"]),
        dir.path(),
    )
    .await;
    let refresher = ArchiveRefresher::new(Arc::clone(&archive));

    let result = refresher.refresh_once(true).await;
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.records, 1);

    let result = refresher.refresh_once(false).await;
    assert_eq!(result.pockets_unchanged, 1);
}

#[tokio::test]
async fn test_reopened_cache_serves_last_snapshot() {
    let fixture = FixtureArchive::start().await;
    fixture.set_index("stable", "main", "amd64", &packages(&[("foo", "1.0", "amd64")]), Compression::Gzip);

    let dir = cache_dir();
    let archive_settings = settings("a", &fixture, &["stable"], &["main"], &["amd64"]);
    {
        let archive = open_archive(&archive_settings, dir.path()).await;
        ArchiveRefresher::new(archive).refresh_once(true).await;
    }

    fixture.hide_pocket("stable");
    let archive = open_archive(&archive_settings, dir.path()).await;
    let found = archive.store.get("foo").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].version, "1.0");

    // Unreachable upstream after restart leaves the snapshot in place
    let result = ArchiveRefresher::new(Arc::clone(&archive)).refresh_once(true).await;
    assert!(!result.is_success());
    assert_eq!(result.records, 1);
}

#[tokio::test]
async fn test_lookups_stay_complete_during_replace() {
    let fixture = FixtureArchive::start().await;
    fixture.set_index("stable", "main", "amd64", &packages(&[("foo", "1.0", "amd64"), ("foo", "1.0", "all")]), Compression::Gzip);
    fixture.set_index("other", "main", "amd64", &packages(&[("bar", "1", "amd64")]), Compression::Gzip);

    let dir = cache_dir();
    let archive = open_archive(&settings("a", &fixture, &["stable", "other"], &["main"], &["amd64"]), dir.path()).await;
    let refresher = Arc::new(ArchiveRefresher::new(Arc::clone(&archive)));
    refresher.refresh_once(true).await;

    let catalog = Catalog::from_archives(&[Arc::clone(&archive)]);
    let reader = tokio::spawn(async move {
        for _ in 0..200 {
            assert_eq!(catalog.lookup("foo").unwrap().len(), 2);
            tokio::task::yield_now().await;
        }
    });

    for i in 0..10 {
        let version = format!("{}", i + 2);
        fixture.set_index("other", "main", "amd64", &packages(&[("bar", &version, "amd64")]), Compression::Gzip);
        refresher.refresh_once(false).await;
    }

    reader.await.unwrap();
    assert_eq!(archive.store.get("bar").unwrap()[0].version, "11");
}

#[tokio::test]
async fn test_refresh_task_handle_and_shutdown() {
    let fixture = FixtureArchive::start().await;
    fixture.set_index("stable", "main", "amd64", &packages(&[("foo", "1.0", "amd64")]), Compression::Gzip);

    let dir = cache_dir();
    let archive = open_archive(&settings("a", &fixture, &["stable"], &["main"], &["amd64"]), dir.path()).await;
    let refreshers = vec![Arc::new(ArchiveRefresher::new(Arc::clone(&archive)))];

    let (reports_tx, mut reports_rx) = mpsc::channel(8);
    let supervisor = RefreshSupervisor::start(&refreshers, Duration::from_secs(3600), reports_tx);

    let handle = supervisor.handles().next().unwrap().clone();
    assert_eq!(handle.archive().as_str(), "a");

    let result = handle.refresh_now(true).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.records, 1);

    let reported = reports_rx.recv().await.unwrap();
    assert_eq!(reported.archive, "a");

    supervisor.shutdown().await;
    // All task senders are gone once the tasks have stopped
    assert!(reports_rx.recv().await.is_none());
    assert!(handle.refresh_now(false).await.is_none());
}

#[tokio::test]
async fn test_refresh_task_runs_on_interval() {
    let fixture = FixtureArchive::start().await;
    fixture.set_index("stable", "main", "amd64", &packages(&[("foo", "1.0", "amd64")]), Compression::Gzip);

    let dir = cache_dir();
    let archive = open_archive(&settings("a", &fixture, &["stable"], &["main"], &["amd64"]), dir.path()).await;
    let refreshers = vec![Arc::new(ArchiveRefresher::new(Arc::clone(&archive)))];

    let (reports_tx, mut reports_rx) = mpsc::channel(8);
    let supervisor = RefreshSupervisor::start(&refreshers, Duration::from_millis(100), reports_tx);

    let reported = tokio::time::timeout(Duration::from_secs(10), reports_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reported.pockets_replaced, 1);
    assert_eq!(archive.store.get("foo").unwrap().len(), 1);

    supervisor.shutdown().await;
}
