//! End-to-end lifecycle of the firelens resource as driven by a task engine.

#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskhost_common::config::AgentConfig;
use taskhost_common::error::{Result, TaskhostError};
use taskhost_common::status::ResourceStatus;
use taskhost_resource::credentials::{InMemoryCredentials, RoleCredentials, TaskCredentials};
use taskhost_resource::firelens::{FirelensParams, FirelensResource};
use taskhost_resource::fs::OsFilesystem;
use taskhost_resource::resource::{Resource, ResourceFields, ResourceState, TaskResource};
use taskhost_resource::storage::client::{ObjectStoreClient, ObjectStoreClientFactory};

const TASK_ARN: &str = "arn:aws:ecs:us-west-2:123456789012:task/prod/0b1e";
const EXTERNAL_ARN: &str = "arn:aws:s3:::team-logging/firelens/parsers.conf";

/// Serves a fixed body, optionally pausing until released.
struct Store {
    body: &'static [u8],
    gate: Option<Gate>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

struct Gate {
    started: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl Store {
    fn serving(body: &'static [u8]) -> Self {
        Self {
            body,
            gate: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

struct StoreClient(Arc<Store>);

struct SharedStore(Arc<Store>);

impl ObjectStoreClientFactory for SharedStore {
    fn client_for_bucket(
        &self,
        _bucket: &str,
        _region: &str,
        credentials: &RoleCredentials,
    ) -> Result<Box<dyn ObjectStoreClient>> {
        assert_eq!(credentials.access_key_id, "AKIDTASK");
        Ok(Box::new(StoreClient(Arc::clone(&self.0))))
    }
}

impl ObjectStoreClient for StoreClient {
    fn download(
        &self,
        bucket: &str,
        key: &str,
        _timeout: Duration,
        sink: &mut dyn Write,
    ) -> Result<u64> {
        let store = &self.0;
        store.requests.lock().unwrap().push(format!("{bucket}/{key}"));
        let now = store.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = store.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(gate) = &store.gate {
            gate.started.lock().unwrap().send(()).unwrap();
            gate.release.lock().unwrap().recv().unwrap();
        } else {
            std::thread::sleep(Duration::from_millis(20));
        }
        let _ = store.in_flight.fetch_sub(1, Ordering::SeqCst);
        sink.write_all(store.body).unwrap();
        Ok(store.body.len() as u64)
    }
}

fn credentials() -> Arc<InMemoryCredentials> {
    let creds = InMemoryCredentials::new();
    creds.set(
        "exec-role",
        TaskCredentials {
            task_arn: TASK_ARN.into(),
            role: RoleCredentials {
                access_key_id: "AKIDTASK".into(),
                secret_access_key: "secret".into(),
                session_token: Some("token".into()),
            },
        },
    );
    Arc::new(creds)
}

fn fields(store: &Arc<Store>, credentials: Arc<InMemoryCredentials>) -> ResourceFields {
    ResourceFields {
        credentials,
        filesystem: Arc::new(OsFilesystem),
        object_store: Arc::new(SharedStore(Arc::clone(store))),
    }
}

fn s3_params(data_dir: &Path) -> FirelensParams {
    let config = AgentConfig {
        data_dir: data_dir.to_path_buf(),
        cluster: "prod".into(),
        instance_id: "i-0feed".into(),
        region: "us-west-2".into(),
        ..AgentConfig::default()
    };
    let mut params = FirelensParams::from_agent_config(&config, TASK_ARN);
    params.task_definition = "checkout:12".into();
    params.config_type = "fluentbit".into();
    params.network_mode = "bridge".into();
    params.execution_credentials_id = "exec-role".into();
    params.options = HashMap::from([
        ("config-file-type".to_string(), "s3".to_string()),
        ("config-file-value".to_string(), EXTERNAL_ARN.to_string()),
        ("enable-ecs-log-metadata".to_string(), "false".to_string()),
    ]);
    params.container_log_options = BTreeMap::from([(
        "checkout".to_string(),
        BTreeMap::from([
            ("Name".to_string(), "kinesis_firehose".to_string()),
            ("delivery_stream".to_string(), "checkout-logs".to_string()),
        ]),
    )]);
    params
}

#[test]
fn engine_drives_create_then_cleanup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(Store::serving(b"[PARSER]\n    Name json\n"));
    let resource = FirelensResource::new(s3_params(dir.path()), &fields(&store, credentials()))
        .expect("new");

    resource.set_desired_status(ResourceStatus::Created);
    let next = resource.next_known_state();
    assert_eq!(next, ResourceStatus::Created);
    assert!(resource.set_applied_status(next));
    resource.apply_transition(next).expect("create");
    resource.set_known_status(next);
    resource.set_created_at(chrono::Utc::now());

    assert_eq!(resource.applied_status(), ResourceStatus::None);
    assert!(resource.known_created());
    assert!(resource.created_at().is_some());

    let config_dir = resource.resource_dir().join("config");
    assert_eq!(
        std::fs::read_to_string(config_dir.join("external.conf")).expect("external"),
        "[PARSER]\n    Name json\n"
    );
    let fluent = std::fs::read_to_string(config_dir.join("fluent.conf")).expect("fluent");
    assert!(fluent.contains("@INCLUDE /fluent-bit/etc/external.conf"));
    assert!(fluent.contains("Listen 0.0.0.0"));
    assert!(fluent.contains("Match checkout-firelens*"));
    assert!(fluent.contains("delivery_stream checkout-logs"));
    assert!(!fluent.contains("record_modifier"));
    assert!(resource.resource_dir().join("socket").is_dir());
    assert_eq!(
        store.requests.lock().unwrap().as_slice(),
        ["team-logging/firelens/parsers.conf".to_string()]
    );

    resource.set_desired_status(ResourceStatus::Removed);
    assert!(resource.desired_terminal());
    resource.cleanup().expect("cleanup");
    resource.set_known_status(ResourceStatus::Removed);
    assert!(!resource.resource_dir().exists());
    assert_eq!(resource.known_status(), ResourceStatus::Removed);
}

#[test]
fn missing_execution_credentials_is_terminal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(Store::serving(b""));
    let resource = FirelensResource::new(
        s3_params(dir.path()),
        &fields(&store, Arc::new(InMemoryCredentials::new())),
    )
    .expect("new");

    let err = resource.apply_transition(ResourceStatus::Created).unwrap_err();

    assert!(matches!(err.root(), TaskhostError::Credential { .. }));
    let reason = resource.terminal_reason().expect("reason");
    assert!(reason.starts_with("unable to download firelens s3 config file"));
    assert!(reason.contains("unable to get execution role credentials"));
    assert!(resource.resource_dir().join("config").is_dir());
    assert!(!resource.resource_dir().join("config/fluent.conf").exists());
    assert!(store.requests.lock().unwrap().is_empty());

    let _ = resource.create().unwrap_err();
    assert_eq!(resource.terminal_reason(), Some(reason));
}

#[test]
fn concurrent_transitions_run_one_create_at_a_time() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(Store::serving(b"# extra\n"));
    let resource = Arc::new(
        FirelensResource::new(s3_params(dir.path()), &fields(&store, credentials()))
            .expect("new"),
    );

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let resource = Arc::clone(&resource);
            std::thread::spawn(move || resource.apply_transition(ResourceStatus::Created))
        })
        .collect();
    for handle in handles {
        handle.join().expect("join").expect("create");
    }

    assert_eq!(store.requests.lock().unwrap().len(), 4);
    assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);
}

#[test]
fn status_reads_proceed_during_slow_create() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let store = Arc::new(Store {
        gate: Some(Gate {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        }),
        ..Store::serving(b"# extra\n")
    });
    let resource = Arc::new(
        FirelensResource::new(s3_params(dir.path()), &fields(&store, credentials()))
            .expect("new"),
    );
    resource.set_desired_status(ResourceStatus::Created);
    assert!(resource.set_applied_status(ResourceStatus::Created));

    let creator = {
        let resource = Arc::clone(&resource);
        std::thread::spawn(move || resource.apply_transition(ResourceStatus::Created))
    };
    started_rx.recv_timeout(Duration::from_secs(5)).expect("download started");

    assert_eq!(resource.known_status(), ResourceStatus::None);
    assert_eq!(resource.desired_status(), ResourceStatus::Created);
    assert_eq!(resource.applied_status(), ResourceStatus::Created);
    assert!(!resource.set_applied_status(ResourceStatus::Created));

    release_tx.send(()).expect("release");
    creator.join().expect("join").expect("create");
    resource.set_known_status(ResourceStatus::Created);
    assert_eq!(resource.applied_status(), ResourceStatus::None);
}

#[test]
fn persisted_resource_resumes_after_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(Store::serving(b"# extra\n"));
    let fields = fields(&store, credentials());
    let resource = Resource::Firelens(
        FirelensResource::new(s3_params(dir.path()), &fields).expect("new"),
    );
    resource.as_task_resource().set_desired_status(ResourceStatus::Created);

    let saved = serde_json::to_string(&resource.snapshot()).expect("save");
    drop(resource);

    let state: ResourceState = serde_json::from_str(&saved).expect("load");
    let restored = Resource::restore(state, &fields);
    let restored = restored.as_task_resource();
    assert_eq!(restored.desired_status(), ResourceStatus::Created);
    assert_eq!(restored.known_status(), ResourceStatus::None);

    restored.apply_transition(ResourceStatus::Created).expect("create after restore");
    restored.set_known_status(ResourceStatus::Created);
    assert!(restored.known_created());
}

#[test]
fn known_status_never_moves_backwards() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(Store::serving(b""));
    let resource = FirelensResource::new(s3_params(dir.path()), &fields(&store, credentials()))
        .expect("new");

    resource.set_known_status(ResourceStatus::Removed);
    resource.set_known_status(ResourceStatus::Created);

    assert_eq!(resource.known_status(), ResourceStatus::Removed);
    assert_eq!(resource.next_known_state(), ResourceStatus::Removed);
}
