//! End-to-end: ticks chain themselves through the real re-entry endpoint
//! until the job finishes.

use std::sync::Arc;
use std::time::Duration;

use conductor::capabilities::Capabilities;
use conductor::config::{ConductorConfig, Credentials};
use conductor::handler::HandlerRegistry;
use conductor::phase::{JobStatus, Phase};
use conductor::server::{AppState, build_router};
use conductor::store::{Db, DbHandle};
use conductor::tick::TickController;
use tokio::net::TcpListener;

async fn start(db_path: &std::path::Path) -> Capabilities {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = ConductorConfig::default();
    config.database.path = db_path.to_path_buf();
    config.dispatch.reentry_url = format!("http://{}/internal/tick", addr);
    config.dispatch.base_backoff_ms = 10;
    config.dispatch.max_jitter_ms = 5;

    let db = DbHandle::new(Db::new(db_path).unwrap());
    let caps = Capabilities::new(db, config, Credentials::with_token("e2e-token"));
    let controller = Arc::new(TickController::new(caps.clone(), HandlerRegistry::dry_run()));
    let app = build_router(Arc::new(AppState { controller }));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    caps
}

async fn wait_for_terminal(caps: &Capabilities, job_id: &str) -> conductor::store::JobRecord {
    for _ in 0..250 {
        let job = caps.jobs().get(job_id).await.unwrap();
        if job.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} did not finish", job_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_continuation_drives_job_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let caps = start(&dir.path().join("conductor.db")).await;

    let seeds: Vec<String> = (0..60).map(|i| format!("https://site.example/{}", i)).collect();
    let job = caps.jobs().create_job(50, seeds).await.unwrap();

    // One external trigger; every later tick is a continuation.
    assert!(caps.continuation.schedule(&job.id).await);

    let finished = wait_for_terminal(&caps, &job.id).await;
    assert_eq!(finished.status, JobStatus::Succeeded);
    assert_eq!(finished.phase, Phase::Completed);

    let counts = caps.frontier().counts(&job.id).await.unwrap();
    assert_eq!(counts.units_collected, 50);
    assert_eq!(counts.in_progress, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_triggers_do_not_double_advance() {
    let dir = tempfile::tempdir().unwrap();
    let caps = start(&dir.path().join("conductor.db")).await;

    let seeds: Vec<String> = (0..10).map(|i| format!("https://dup.example/{}", i)).collect();
    let job = caps.jobs().create_job(10, seeds).await.unwrap();

    // Several schedulers fire at once; the lease turns the extras into no-ops.
    let triggers = (0..5).map(|_| caps.continuation.schedule(&job.id));
    for accepted in futures::future::join_all(triggers).await {
        assert!(accepted);
    }

    let finished = wait_for_terminal(&caps, &job.id).await;
    assert_eq!(finished.status, JobStatus::Succeeded);
    let counts = caps.frontier().counts(&job.id).await.unwrap();
    assert_eq!(counts.units_collected, 10);
    assert_eq!(counts.done, 10);
}
