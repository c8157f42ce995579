//! Deadline-bounded download of an external configuration fragment.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use taskhost_common::constants::S3_DOWNLOAD_TIMEOUT;
use taskhost_common::error::{Result, ResultExt, TaskhostError};

use super::arn::parse_s3_arn;
use super::client::ObjectStoreClientFactory;
use crate::credentials::CredentialsManager;
use crate::fs::AtomicConfigWriter;

/// Fetches an object named by an S3 ARN onto a local path.
///
/// The whole operation, from credential lookup to the final rename, shares
/// one deadline measured from the start of [`ExternalConfigFetcher::fetch`].
#[derive(Clone)]
pub struct ExternalConfigFetcher {
    credentials: Arc<dyn CredentialsManager>,
    clients: Arc<dyn ObjectStoreClientFactory>,
    writer: AtomicConfigWriter,
    timeout: Duration,
}

impl ExternalConfigFetcher {
    /// Creates a fetcher with the standard download deadline.
    #[must_use]
    pub fn new(
        credentials: Arc<dyn CredentialsManager>,
        clients: Arc<dyn ObjectStoreClientFactory>,
        writer: AtomicConfigWriter,
    ) -> Self {
        Self {
            credentials,
            clients,
            writer,
            timeout: S3_DOWNLOAD_TIMEOUT,
        }
    }

    /// Overrides the download deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Downloads the object named by `locator` and atomically writes it to `dest`.
    ///
    /// # Errors
    ///
    /// - [`TaskhostError::Credential`] if `credentials_id` has no credentials.
    /// - [`TaskhostError::Address`] if `locator` is not an S3 object ARN.
    /// - [`TaskhostError::Download`] if the client cannot be built, the
    ///   transfer fails, or the deadline passes.
    /// - [`TaskhostError::Provisioning`] if the file cannot be moved into place.
    ///
    /// Every error is wrapped with the stage it happened in; use
    /// [`TaskhostError::root`] to classify it.
    pub fn fetch(
        &self,
        credentials_id: &str,
        locator: &str,
        region: &str,
        dest: &Path,
    ) -> Result<()> {
        let deadline = Instant::now() + self.timeout;

        let credentials = self
            .credentials
            .task_credentials(credentials_id)
            .ok_or_else(|| TaskhostError::Credential {
                message: "unable to get execution role credentials".into(),
            })
            .context("unable to download external config")?;

        let location =
            parse_s3_arn(locator).context("unable to parse bucket and key from s3 arn")?;

        let client = self
            .clients
            .client_for_bucket(&location.bucket, region, &credentials.role)
            .with_context(|| {
                format!("unable to initialize s3 client for bucket {}", location.bucket)
            })?;

        self.writer
            .write(dest, |sink| {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(self.deadline_exceeded());
                }
                let bytes = client.download(&location.bucket, &location.key, remaining, sink)?;
                if Instant::now() > deadline {
                    return Err(self.deadline_exceeded());
                }
                tracing::debug!(bucket = %location.bucket, key = %location.key, bytes, "fetched object");
                Ok(())
            })
            .with_context(|| {
                format!(
                    "unable to download s3 config {} from bucket {}",
                    location.key, location.bucket
                )
            })?;

        tracing::info!(
            task_arn = %credentials.task_arn,
            path = %dest.display(),
            "external config downloaded"
        );
        Ok(())
    }

    fn deadline_exceeded(&self) -> TaskhostError {
        TaskhostError::Download {
            message: format!("deadline of {:?} exceeded", self.timeout),
        }
    }
}

impl std::fmt::Debug for ExternalConfigFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalConfigFetcher")
            .field("writer", &self.writer)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use super::*;
    use crate::credentials::{InMemoryCredentials, RoleCredentials, TaskCredentials};
    use crate::fs::OsFilesystem;
    use crate::storage::client::ObjectStoreClient;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Serve(&'static [u8]),
        FailBuild,
        FailTransfer,
        Stall(Duration),
    }

    /// Records requested buckets and keys and serves canned content.
    struct FakeStore {
        behaviour: Behaviour,
        requests: Arc<Mutex<Vec<(String, String, String)>>>,
    }

    struct FakeClient {
        behaviour: Behaviour,
        requests: Arc<Mutex<Vec<(String, String, String)>>>,
        region: String,
    }

    impl ObjectStoreClientFactory for FakeStore {
        fn client_for_bucket(
            &self,
            _bucket: &str,
            region: &str,
            _credentials: &RoleCredentials,
        ) -> Result<Box<dyn ObjectStoreClient>> {
            if matches!(self.behaviour, Behaviour::FailBuild) {
                return Err(TaskhostError::Download {
                    message: "no route".into(),
                });
            }
            Ok(Box::new(FakeClient {
                behaviour: self.behaviour,
                requests: Arc::clone(&self.requests),
                region: region.to_string(),
            }))
        }
    }

    impl ObjectStoreClient for FakeClient {
        fn download(
            &self,
            bucket: &str,
            key: &str,
            timeout: Duration,
            sink: &mut dyn Write,
        ) -> Result<u64> {
            self.requests.lock().unwrap().push((
                self.region.clone(),
                bucket.to_string(),
                key.to_string(),
            ));
            match self.behaviour {
                Behaviour::Serve(body) => {
                    sink.write_all(body).unwrap();
                    Ok(body.len() as u64)
                }
                Behaviour::Stall(delay) => {
                    std::thread::sleep(delay.min(timeout));
                    sink.write_all(b"late").unwrap();
                    Ok(4)
                }
                Behaviour::FailTransfer | Behaviour::FailBuild => {
                    sink.write_all(b"half").unwrap();
                    Err(TaskhostError::Download {
                        message: "connection reset".into(),
                    })
                }
            }
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        requests: Arc<Mutex<Vec<(String, String, String)>>>,
        fetcher: ExternalConfigFetcher,
    }

    fn fixture(behaviour: Behaviour) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let credentials = InMemoryCredentials::new();
        credentials.set(
            "exec-1",
            TaskCredentials {
                task_arn: "arn:aws:ecs:us-west-2:1:task/c/t".into(),
                role: RoleCredentials {
                    access_key_id: "AKID".into(),
                    secret_access_key: "secret".into(),
                    session_token: None,
                },
            },
        );
        let requests = Arc::new(Mutex::new(Vec::new()));
        let store = FakeStore {
            behaviour,
            requests: Arc::clone(&requests),
        };
        let writer = AtomicConfigWriter::new(Arc::new(OsFilesystem), dir.path());
        let fetcher = ExternalConfigFetcher::new(Arc::new(credentials), Arc::new(store), writer);
        Fixture {
            dir,
            requests,
            fetcher,
        }
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .expect("read_dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    const ARN: &str = "arn:aws:s3:::bucket/dir/extra.conf";

    #[test]
    fn fetch_writes_object_to_destination() {
        let fx = fixture(Behaviour::Serve(b"[FILTER]\n"));
        let dest = fx.dir.path().join("external.conf");

        fx.fetcher.fetch("exec-1", ARN, "us-west-2", &dest).expect("fetch");

        assert_eq!(std::fs::read_to_string(&dest).expect("read"), "[FILTER]\n");
        assert_eq!(
            fx.requests.lock().unwrap().as_slice(),
            [("us-west-2".to_string(), "bucket".to_string(), "dir/extra.conf".to_string())]
        );
    }

    #[test]
    fn missing_credentials_is_credential_error() {
        let fx = fixture(Behaviour::Serve(b"x"));
        let dest = fx.dir.path().join("external.conf");

        let err = fx.fetcher.fetch("exec-2", ARN, "us-west-2", &dest).unwrap_err();

        assert!(matches!(err.root(), TaskhostError::Credential { .. }));
        assert!(fx.requests.lock().unwrap().is_empty());
        assert!(!dest.exists());
    }

    #[test]
    fn malformed_arn_is_address_error() {
        let fx = fixture(Behaviour::Serve(b"x"));
        let dest = fx.dir.path().join("external.conf");

        let err = fx
            .fetcher
            .fetch("exec-1", "s3://bucket/key", "us-west-2", &dest)
            .unwrap_err();

        assert!(matches!(err.root(), TaskhostError::Address { .. }));
        assert!(err.to_string().starts_with("unable to parse bucket and key from s3 arn"));
    }

    #[test]
    fn client_construction_failure_names_bucket() {
        let fx = fixture(Behaviour::FailBuild);
        let dest = fx.dir.path().join("external.conf");

        let err = fx.fetcher.fetch("exec-1", ARN, "us-west-2", &dest).unwrap_err();

        assert!(matches!(err.root(), TaskhostError::Download { .. }));
        assert!(err.to_string().contains("bucket bucket"));
    }

    #[test]
    fn transfer_failure_keeps_previous_content() {
        let fx = fixture(Behaviour::FailTransfer);
        let dest = fx.dir.path().join("external.conf");
        std::fs::write(&dest, "previous").expect("seed");

        let err = fx.fetcher.fetch("exec-1", ARN, "us-west-2", &dest).unwrap_err();

        assert!(matches!(err.root(), TaskhostError::Download { .. }));
        assert_eq!(std::fs::read_to_string(&dest).expect("read"), "previous");
        assert_eq!(names(fx.dir.path()), vec!["external.conf"]);
    }

    #[test]
    fn slow_transfer_exceeds_deadline() {
        let fx = fixture(Behaviour::Stall(Duration::from_millis(200)));
        let fetcher = fx.fetcher.clone().with_timeout(Duration::from_millis(50));
        let dest = fx.dir.path().join("external.conf");

        let err = fetcher.fetch("exec-1", ARN, "us-west-2", &dest).unwrap_err();

        assert!(matches!(err.root(), TaskhostError::Download { .. }));
        assert!(err.to_string().contains("deadline"));
        assert!(!dest.exists());
        assert!(names(fx.dir.path()).is_empty());
    }
}
