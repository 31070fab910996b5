//! Integration tests against a throwaway PostgreSQL container.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use uuid::Uuid;

use vigil_core::hashing::FingerprintSet;
use vigil_core::models::{
    AlertKind, AlertSeverity, ClassifierWeights, ContentVector, NewAlert, NewSite, NewSnapshot,
    Verdict, VectorKind,
};
use vigil_core::schedule::Schedule;
use vigil_core::traits::MonitorStore;
use vigil_db::Database;

/// Spins up a PostgreSQL container and returns a connected database.
///
/// The `ContainerAsync` must be kept in scope for the test duration —
/// dropping it will stop the container.
async fn setup_test_db() -> (Database, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "vigil_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/vigil_test");

    // Retry connection until container is fully ready
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool: PgPool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    let db = Database::from_pool(pool);
    db.migrate().await.expect("Failed to run migrations");
    (db, container)
}

fn new_site(url: &str) -> NewSite {
    NewSite::new(url, "test site", Schedule::parse("5m").unwrap())
}

fn new_snapshot(site_id: Uuid, verdict: Verdict, text: &str) -> NewSnapshot {
    NewSnapshot {
        id: Uuid::new_v4(),
        site_id,
        http_status: 200,
        response_time_ms: 42.0,
        raw_html: Some(b"<html></html>".to_vec()),
        extracted_text: text.to_string(),
        fingerprints: FingerprintSet::compute(text, &[], &[text.to_string()]),
        outline: vec![],
        truncated: false,
        vector_ref: None,
        prev_similarity: None,
        verdict: Some(verdict),
        confidence: Some(0.9),
    }
}

#[tokio::test]
async fn site_crud_roundtrip() {
    let (db, _container) = setup_test_db().await;

    let site = db
        .create_site(new_site("https://a.example.com"))
        .await
        .unwrap();
    assert!(!site.id.is_nil());
    assert_eq!(site.schedule.as_str(), "5m");

    let fetched = db.get_site(site.id).await.unwrap().unwrap();
    assert_eq!(fetched.url, "https://a.example.com");

    let mut updated = fetched.clone();
    updated.active = false;
    updated.keep_scans = Some(7);
    db.update_site(&updated).await.unwrap();

    let active = db.list_sites(true).await.unwrap();
    assert!(active.is_empty());
    let all = db.list_sites(false).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].keep_scans, Some(7));

    db.delete_site(site.id).await.unwrap();
    assert!(db.get_site(site.id).await.unwrap().is_none());
}

#[tokio::test]
async fn baseline_skips_adverse_verdicts() {
    let (db, _container) = setup_test_db().await;
    let site = db
        .create_site(new_site("https://b.example.com"))
        .await
        .unwrap();

    db.save_snapshot(new_snapshot(site.id, Verdict::Initial, "first content"))
        .await
        .unwrap();
    let benign = db
        .save_snapshot(new_snapshot(site.id, Verdict::Benign, "second content"))
        .await
        .unwrap();
    db.save_snapshot(new_snapshot(site.id, Verdict::Defacement, "hacked content"))
        .await
        .unwrap();

    let latest = db.latest_snapshot(site.id).await.unwrap().unwrap();
    assert_eq!(latest.verdict, Some(Verdict::Defacement));

    // The baseline is the newest benign/initial snapshot, not the latest.
    let baseline = db.baseline_snapshot(site.id).await.unwrap().unwrap();
    assert_eq!(baseline.id, benign.id);
    assert_eq!(baseline.verdict, Some(Verdict::Benign));
}

#[tokio::test]
async fn snapshot_roundtrip_preserves_fingerprints_and_outline() {
    let (db, _container) = setup_test_db().await;
    let site = db
        .create_site(new_site("https://c.example.com"))
        .await
        .unwrap();

    let mut snapshot = new_snapshot(site.id, Verdict::Initial, "some page text");
    snapshot.outline = vec![vigil_core::extract::OutlineNode {
        tag: "div".into(),
        depth: 1,
        classes: vec!["hero".into()],
        id: Some("main".into()),
    }];
    let saved = db.save_snapshot(snapshot.clone()).await.unwrap();

    let fetched = db.latest_snapshot(site.id).await.unwrap().unwrap();
    assert_eq!(fetched.id, saved.id);
    assert_eq!(fetched.fingerprints, snapshot.fingerprints);
    assert_eq!(fetched.outline.len(), 1);
    assert_eq!(fetched.outline[0].signature(), "div:1.hero#main");
    assert_eq!(fetched.http_status, 200);
}

#[tokio::test]
async fn verdict_backfill_updates_snapshot() {
    let (db, _container) = setup_test_db().await;
    let site = db
        .create_site(new_site("https://d.example.com"))
        .await
        .unwrap();
    let saved = db
        .save_snapshot(new_snapshot(site.id, Verdict::Unclear, "pending text"))
        .await
        .unwrap();

    db.update_snapshot_verdict(saved.id, Verdict::Benign, 0.77)
        .await
        .unwrap();

    let fetched = db.latest_snapshot(site.id).await.unwrap().unwrap();
    assert_eq!(fetched.verdict, Some(Verdict::Benign));
    assert_eq!(fetched.confidence, Some(0.77));
}

#[tokio::test]
async fn pruning_keeps_newest_and_cascades_to_vectors() {
    let (db, _container) = setup_test_db().await;
    let site = db
        .create_site(new_site("https://e.example.com"))
        .await
        .unwrap();

    let mut snapshot_ids = Vec::new();
    for i in 0..5 {
        let saved = db
            .save_snapshot(new_snapshot(site.id, Verdict::Benign, &format!("text {i}")))
            .await
            .unwrap();
        db.save_vectors(&[ContentVector {
            id: Uuid::new_v4(),
            site_id: site.id,
            snapshot_id: saved.id,
            kind: VectorKind::Main,
            dimension: 3,
            payload: vec![0.1, 0.2, 0.3],
        }])
        .await
        .unwrap();
        snapshot_ids.push(saved.id);
    }

    let pruned = db.prune_snapshots(site.id, 2).await.unwrap();
    assert_eq!(pruned, 3);

    let remaining = db.recent_snapshots(site.id, 10).await.unwrap();
    assert_eq!(remaining.len(), 2);

    // No dangling vectors: pruned snapshots lose theirs.
    for old_id in &snapshot_ids[..3] {
        assert!(db.vectors_for_snapshot(*old_id).await.unwrap().is_empty());
    }
    for kept_id in &snapshot_ids[3..] {
        assert_eq!(db.vectors_for_snapshot(*kept_id).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn vectors_roundtrip_payload() {
    let (db, _container) = setup_test_db().await;
    let site = db
        .create_site(new_site("https://f.example.com"))
        .await
        .unwrap();
    let snapshot = db
        .save_snapshot(new_snapshot(site.id, Verdict::Initial, "vector text"))
        .await
        .unwrap();

    let vector = ContentVector {
        id: Uuid::new_v4(),
        site_id: site.id,
        snapshot_id: snapshot.id,
        kind: VectorKind::Combined,
        dimension: 4,
        payload: vec![0.5, -0.25, 0.0, 1.0],
    };
    db.save_vectors(std::slice::from_ref(&vector)).await.unwrap();

    let fetched = db.vectors_for_snapshot(snapshot.id).await.unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].kind, VectorKind::Combined);
    assert_eq!(fetched[0].payload, vector.payload);
}

#[tokio::test]
async fn alerts_save_and_filter_open() {
    let (db, _container) = setup_test_db().await;
    let site = db
        .create_site(new_site("https://g.example.com"))
        .await
        .unwrap();

    let alert = db
        .save_alert(NewAlert {
            site_id: site.id,
            snapshot_id: None,
            kind: AlertKind::SiteDown,
            severity: AlertSeverity::High,
            title: "site_down on test".into(),
            description: "5 consecutive fetch failures".into(),
            verdict_label: None,
            confidence: None,
            similarity: None,
        })
        .await
        .unwrap();
    assert_eq!(alert.kind, AlertKind::SiteDown);

    let open = db.open_alerts(Some(site.id), 10).await.unwrap();
    assert_eq!(open.len(), 1);

    db.alerts()
        .update_status(alert.id, vigil_core::models::AlertStatus::Resolved)
        .await
        .unwrap();
    let open = db.open_alerts(Some(site.id), 10).await.unwrap();
    assert!(open.is_empty());
}

#[tokio::test]
async fn false_positive_rate_counts_only_adjudicated_alerts() {
    let (db, _container) = setup_test_db().await;
    let site = db
        .create_site(new_site("https://j.example.com"))
        .await
        .unwrap();

    // No adjudication history yet.
    assert!(db.false_positive_rate(site.id, 20).await.unwrap().is_none());

    let mut ids = Vec::new();
    for i in 0..4 {
        let alert = db
            .save_alert(NewAlert {
                site_id: site.id,
                snapshot_id: None,
                kind: AlertKind::Suspicious,
                severity: AlertSeverity::Low,
                title: format!("alert {i}"),
                description: "suspicious change".into(),
                verdict_label: None,
                confidence: None,
                similarity: None,
            })
            .await
            .unwrap();
        ids.push(alert.id);
    }

    // Open and acknowledged alerts do not count toward the rate.
    db.alerts()
        .update_status(ids[0], vigil_core::models::AlertStatus::Acknowledged)
        .await
        .unwrap();
    assert!(db.false_positive_rate(site.id, 20).await.unwrap().is_none());

    // One confirmed, one dismissed as a false positive: rate 0.5.
    db.alerts()
        .update_status(ids[1], vigil_core::models::AlertStatus::Resolved)
        .await
        .unwrap();
    db.alerts()
        .update_status(ids[2], vigil_core::models::AlertStatus::FalsePositive)
        .await
        .unwrap();
    let rate = db.false_positive_rate(site.id, 20).await.unwrap().unwrap();
    assert!((rate - 0.5).abs() < 1e-9);

    // A trailing window of one sees only the most recently adjudicated.
    db.alerts()
        .update_status(ids[3], vigil_core::models::AlertStatus::FalsePositive)
        .await
        .unwrap();
    let rate = db.false_positive_rate(site.id, 1).await.unwrap().unwrap();
    assert!((rate - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn weights_upsert_roundtrip() {
    let (db, _container) = setup_test_db().await;
    let site = db
        .create_site(new_site("https://h.example.com"))
        .await
        .unwrap();

    assert!(db.get_weights(site.id).await.unwrap().is_none());

    db.save_weights(site.id, ClassifierWeights::default())
        .await
        .unwrap();
    let first = db.get_weights(site.id).await.unwrap().unwrap();
    assert_eq!(first, ClassifierWeights::default());

    let dampened = ClassifierWeights::default().dampened();
    db.save_weights(site.id, dampened).await.unwrap();
    let second = db.get_weights(site.id).await.unwrap().unwrap();
    assert_eq!(second, dampened);
}

#[tokio::test]
async fn deleting_a_site_cascades_everything() {
    let (db, _container) = setup_test_db().await;
    let site = db
        .create_site(new_site("https://i.example.com"))
        .await
        .unwrap();
    let snapshot = db
        .save_snapshot(new_snapshot(site.id, Verdict::Initial, "content"))
        .await
        .unwrap();
    db.save_vectors(&[ContentVector {
        id: Uuid::new_v4(),
        site_id: site.id,
        snapshot_id: snapshot.id,
        kind: VectorKind::Main,
        dimension: 2,
        payload: vec![1.0, 0.0],
    }])
    .await
    .unwrap();
    db.save_weights(site.id, ClassifierWeights::default())
        .await
        .unwrap();

    db.delete_site(site.id).await.unwrap();

    assert!(db.latest_snapshot(site.id).await.unwrap().is_none());
    assert!(db.vectors_for_snapshot(snapshot.id).await.unwrap().is_empty());
    assert!(db.get_weights(site.id).await.unwrap().is_none());
}
