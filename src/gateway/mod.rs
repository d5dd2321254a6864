//! Authorization Gateway
//!
//! Entry point for every caller operation. Each call is authorized against the
//! immutable permission snapshot, then runs on its own session which is closed
//! before the call returns, whatever the outcome.

pub mod diagnostics;
pub mod error;
pub mod reachability;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GatewaySettings;
use crate::permissions::PermissionSnapshot;
use crate::recorder::{dispatch, OperationRecord, OperationRecorder};
use crate::registry::Target;
use crate::ssh::{
    CommandOutput, Connector, RunOptions, ScriptOptions, SessionConfig, SessionError,
    SshConnector,
};

pub use diagnostics::{
    DiagnosticsStatus, DistroInfo, NetworkInfo, PlatformInfo, TargetDiagnostics, UserInfo,
};
pub use error::{GatewayError, UNAUTHORIZED_MESSAGE};
pub use reachability::Reachability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Executed,
}

/// Result of a command that exited zero
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub job_id: String,
    pub target: String,
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Caller identity and target after a successful authorization check
struct Authorized {
    user: Option<String>,
    target: Arc<Target>,
}

enum Job<'a> {
    Command {
        command: &'a str,
        options: &'a RunOptions,
    },
    Script {
        local_path: &'a Path,
        options: &'a ScriptOptions,
    },
}

pub struct Gateway {
    snapshot: Arc<PermissionSnapshot>,
    connector: Arc<dyn Connector>,
    recorder: Arc<dyn OperationRecorder>,
    probe_timeout: Duration,
    pending_records: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    pub fn new(
        snapshot: Arc<PermissionSnapshot>,
        connector: Arc<dyn Connector>,
        recorder: Arc<dyn OperationRecorder>,
    ) -> Self {
        Self {
            snapshot,
            connector,
            recorder,
            probe_timeout: GatewaySettings::default().probe_timeout(),
            pending_records: Mutex::new(Vec::new()),
        }
    }

    /// Gateway backed by real SSH sessions
    pub fn from_settings(
        snapshot: Arc<PermissionSnapshot>,
        recorder: Arc<dyn OperationRecorder>,
        settings: &GatewaySettings,
    ) -> Self {
        let connector = Arc::new(SshConnector::new(SessionConfig::from_settings(settings)));
        Self::new(snapshot, connector, recorder).with_probe_timeout(settings.probe_timeout())
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn snapshot(&self) -> &PermissionSnapshot {
        &self.snapshot
    }

    /// Target names the caller may use, in document order for open mode
    pub fn list_accessible(&self, api_key: Option<&str>) -> Result<Vec<String>, GatewayError> {
        if !self.snapshot.permissions_enabled() {
            return Ok(self.snapshot.registry().list_targets());
        }
        let user = api_key
            .and_then(|key| self.snapshot.find_user(key))
            .ok_or_else(|| {
                info!("[gateway] Target listing rejected: unknown API key");
                GatewayError::Unauthorized
            })?;
        Ok(self.snapshot.targets_for_user(user))
    }

    fn authorize(&self, api_key: Option<&str>, target: &str) -> Result<Authorized, GatewayError> {
        let user = if self.snapshot.permissions_enabled() {
            let Some(user) = api_key.and_then(|key| self.snapshot.find_user(key)) else {
                info!("[gateway] Request for '{}' rejected: unknown API key", target);
                return Err(GatewayError::Unauthorized);
            };
            if !self.snapshot.targets_for_user(user).iter().any(|t| t == target) {
                info!(
                    "[gateway] Request for '{}' rejected: not permitted for user '{}'",
                    target, user.name
                );
                return Err(GatewayError::Unauthorized);
            }
            Some(user.name.clone())
        } else {
            None
        };

        let target = self
            .snapshot
            .registry()
            .credentials_for(target)
            .map_err(|_| GatewayError::NotFound(target.to_string()))?;

        Ok(Authorized { user, target })
    }

    /// Run `command` on `target`.
    ///
    /// A non-zero exit is returned as [`GatewayError::CommandFailed`] with the
    /// full output; it is still recorded.
    pub async fn execute(
        &self,
        api_key: Option<&str>,
        target: &str,
        command: &str,
        options: &RunOptions,
    ) -> Result<ExecutionReport, GatewayError> {
        let auth = self.authorize(api_key, target)?;
        if command.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("command cannot be empty".to_string()));
        }

        let output = self
            .run_job(&auth.target, Job::Command { command, options })
            .await?;
        self.finish(&auth, command.to_string(), output)
    }

    /// Upload a local script to `target` and run it
    pub async fn execute_script(
        &self,
        api_key: Option<&str>,
        target: &str,
        local_path: &Path,
        options: &ScriptOptions,
    ) -> Result<ExecutionReport, GatewayError> {
        let auth = self.authorize(api_key, target)?;

        let output = self
            .run_job(&auth.target, Job::Script { local_path, options })
            .await?;
        self.finish(&auth, format!("script {}", local_path.display()), output)
    }

    /// TCP reachability of the target's SSH port; failures land in `reason`
    pub async fn check_reachable(
        &self,
        api_key: Option<&str>,
        target: &str,
        timeout: Option<Duration>,
    ) -> Result<Reachability, GatewayError> {
        let auth = self.authorize(api_key, target)?;
        let target = &auth.target;
        let result = reachability::probe(
            &target.name,
            &target.host,
            target.port,
            timeout.unwrap_or(self.probe_timeout),
        )
        .await;
        debug!(
            "[gateway] Probe {}: reachable={} latency={:?}",
            target.name, result.reachable, result.latency_ms
        );
        Ok(result)
    }

    /// Run the read-only discovery battery and parse its sections
    pub async fn diagnostics(
        &self,
        api_key: Option<&str>,
        target: &str,
    ) -> Result<TargetDiagnostics, GatewayError> {
        let auth = self.authorize(api_key, target)?;
        let options = RunOptions::default();
        let output = self
            .run_job(
                &auth.target,
                Job::Command {
                    command: diagnostics::DIAGNOSTICS_COMMAND,
                    options: &options,
                },
            )
            .await?;
        if !output.success() {
            debug!(
                "[gateway] Diagnostics on {} exited {}: {}",
                auth.target.name,
                output.exit_code,
                output.stderr.trim()
            );
        }
        let t = &auth.target;
        Ok(diagnostics::parse_diagnostics(&output.stdout).into_report(&t.name, &t.host, t.port))
    }

    /// Wait up to `limit` for recordings still in flight
    pub async fn flush_records(&self, limit: Duration) -> bool {
        let handles = std::mem::take(&mut *self.pending_records.lock());
        tokio::time::timeout(limit, async {
            for handle in handles {
                let _ = handle.await;
            }
        })
        .await
        .is_ok()
    }

    async fn run_job(&self, target: &Arc<Target>, job: Job<'_>) -> Result<CommandOutput, GatewayError> {
        let mut session = self.connector.session_for(target.clone());

        let result = async {
            session.connect().await?;
            match job {
                Job::Command { command, options } => session.run(command, options).await,
                Job::Script {
                    local_path,
                    options,
                } => session.run_script(local_path, options).await,
            }
        }
        .await;

        session.close().await;

        result.map_err(|e| {
            log_session_failure(target, &e);
            GatewayError::from_session(&target.name, &e)
        })
    }

    fn finish(
        &self,
        auth: &Authorized,
        command: String,
        output: CommandOutput,
    ) -> Result<ExecutionReport, GatewayError> {
        let record = OperationRecord::new(auth.target.name.clone(), auth.user.clone(), command, &output);
        let job_id = record.job_id.clone();

        let handle = dispatch(self.recorder.clone(), record);
        {
            let mut pending = self.pending_records.lock();
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }

        if output.success() {
            Ok(ExecutionReport {
                job_id,
                target: auth.target.name.clone(),
                status: ExecutionStatus::Executed,
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.exit_code,
            })
        } else {
            Err(GatewayError::CommandFailed {
                job_id,
                target: auth.target.name.clone(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }
}

fn log_session_failure(target: &Target, error: &SessionError) {
    match error {
        SessionError::InvalidRequest(_) | SessionError::Timeout(_) => {
            debug!("[gateway] {} on {}", error, target.name)
        }
        _ => warn!(
            "[gateway] {} on {}. Details: {}",
            error,
            target.name,
            target.masked_details()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigDocument, GroupConfig, TargetConfig, UserConfig};
    use crate::recorder::{MemoryRecorder, RecorderError};
    use crate::ssh::ExecSession;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    enum Behavior {
        Output(CommandOutput),
        ConnectFails(fn() -> SessionError),
        Hang,
    }

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        closed: AtomicUsize,
        dropped: AtomicUsize,
        commands: Mutex<Vec<String>>,
    }

    struct FakeConnector {
        behavior: Behavior,
        counters: Arc<Counters>,
    }

    struct FakeSession {
        behavior: Behavior,
        counters: Arc<Counters>,
    }

    impl Connector for FakeConnector {
        fn session_for(&self, _target: Arc<Target>) -> Box<dyn ExecSession> {
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Box::new(FakeSession {
                behavior: self.behavior.clone(),
                counters: self.counters.clone(),
            })
        }
    }

    impl FakeSession {
        async fn output(&self) -> Result<CommandOutput, SessionError> {
            match &self.behavior {
                Behavior::Output(out) => Ok(out.clone()),
                Behavior::ConnectFails(make) => Err(make()),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(SessionError::Closed)
                }
            }
        }
    }

    #[async_trait]
    impl ExecSession for FakeSession {
        async fn connect(&mut self) -> Result<(), SessionError> {
            match &self.behavior {
                Behavior::ConnectFails(make) => Err(make()),
                _ => Ok(()),
            }
        }

        async fn run(&mut self, command: &str, _options: &RunOptions) -> Result<CommandOutput, SessionError> {
            self.counters.commands.lock().push(command.to_string());
            self.output().await
        }

        async fn run_script(
            &mut self,
            local_path: &Path,
            _options: &ScriptOptions,
        ) -> Result<CommandOutput, SessionError> {
            self.counters
                .commands
                .lock()
                .push(format!("script:{}", local_path.display()));
            self.output().await
        }

        async fn close(&mut self) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Drop for FakeSession {
        fn drop(&mut self) {
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FailingRecorder;

    #[async_trait]
    impl OperationRecorder for FailingRecorder {
        async fn record(&self, _record: &OperationRecord) -> Result<(), RecorderError> {
            Err(RecorderError::Unavailable("down".to_string()))
        }
    }

    struct SlowRecorder;

    #[async_trait]
    impl OperationRecorder for SlowRecorder {
        async fn record(&self, _record: &OperationRecord) -> Result<(), RecorderError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    fn output(stdout: &str, stderr: &str, exit_code: i32) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
        }
    }

    fn document(with_users: bool) -> ConfigDocument {
        ConfigDocument {
            targets: vec![
                TargetConfig::new("A", "10.0.0.1", "ops"),
                TargetConfig::new("B", "10.0.0.2", "ops"),
                TargetConfig::new("C", "10.0.0.3", "ops"),
                TargetConfig::new("D", "10.0.0.4", "ops"),
            ],
            groups: Some(vec![
                GroupConfig {
                    name: "g1".to_string(),
                    targets: vec!["A".to_string(), "B".to_string()],
                },
                GroupConfig {
                    name: "g2".to_string(),
                    targets: vec!["B".to_string(), "C".to_string()],
                },
            ]),
            users: with_users.then(|| {
                vec![UserConfig {
                    name: "alice".to_string(),
                    api_key: "key-alice".to_string(),
                    groups: vec!["g1".to_string(), "g2".to_string()],
                }]
            }),
            settings: GatewaySettings::default(),
        }
    }

    fn gateway_with(
        with_users: bool,
        behavior: Behavior,
        recorder: Arc<dyn OperationRecorder>,
    ) -> (Gateway, Arc<Counters>) {
        let snapshot = Arc::new(PermissionSnapshot::load(&document(with_users)).unwrap());
        let counters = Arc::new(Counters::default());
        let connector = Arc::new(FakeConnector {
            behavior,
            counters: counters.clone(),
        });
        (Gateway::new(snapshot, connector, recorder), counters)
    }

    #[tokio::test]
    async fn test_execute_success_is_recorded_and_closed() {
        let recorder = Arc::new(MemoryRecorder::new(10));
        let (gateway, counters) =
            gateway_with(true, Behavior::Output(output("hello\n", "", 0)), recorder.clone());

        let report = gateway
            .execute(Some("key-alice"), "A", "echo hello", &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(report.status, ExecutionStatus::Executed);
        assert_eq!(report.stdout, "hello\n");
        assert_eq!(report.stderr, "");
        assert_eq!(report.exit_code, 0);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(*counters.commands.lock(), vec!["echo hello"]);

        assert!(gateway.flush_records(Duration::from_secs(1)).await);
        let records = recorder.recent(10);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].job_id, report.job_id);
        assert_eq!(records[0].requesting_user.as_deref(), Some("alice"));
        assert_eq!(records[0].command, "echo hello");
    }

    #[tokio::test]
    async fn test_unauthorized_is_uniform() {
        let (gateway, counters) = gateway_with(
            true,
            Behavior::Output(output("", "", 0)),
            Arc::new(MemoryRecorder::new(10)),
        );
        let opts = RunOptions::default();

        let cases = [
            gateway.execute(Some("wrong-key"), "A", "id", &opts).await,
            gateway.execute(None, "A", "id", &opts).await,
            gateway.execute(Some("key-alice"), "D", "id", &opts).await,
            gateway.execute(Some("key-alice"), "does-not-exist", "id", &opts).await,
            gateway.execute(Some("wrong-key"), "does-not-exist", "id", &opts).await,
        ];
        for result in cases {
            let err = result.unwrap_err();
            assert!(matches!(err, GatewayError::Unauthorized));
            assert_eq!(err.to_string(), UNAUTHORIZED_MESSAGE);
        }
        assert_eq!(counters.opened.load(Ordering::SeqCst), 0);

        let probe = gateway.check_reachable(Some("key-alice"), "D", None).await;
        assert!(matches!(probe, Err(GatewayError::Unauthorized)));
        let diag = gateway.diagnostics(Some("nope"), "A").await;
        assert!(matches!(diag, Err(GatewayError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_command_failed() {
        let recorder = Arc::new(MemoryRecorder::new(10));
        let (gateway, counters) =
            gateway_with(false, Behavior::Output(output("", "boom", 1)), recorder.clone());

        let err = gateway
            .execute(None, "B", "false", &RunOptions::default())
            .await
            .unwrap_err();
        match err {
            GatewayError::CommandFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);

        gateway.flush_records(Duration::from_secs(1)).await;
        assert_eq!(recorder.for_target("B")[0].exit_code, 1);
        assert!(recorder.for_target("B")[0].requesting_user.is_none());
    }

    #[tokio::test]
    async fn test_connect_failures_map_to_kinds_and_close() {
        let cases: [(fn() -> SessionError, &str); 3] = [
            (
                || SessionError::Authentication {
                    target: "A".to_string(),
                },
                "authentication_error",
            ),
            (
                || SessionError::Connection("10.0.0.1:22 refused".to_string()),
                "connection_error",
            ),
            (
                || SessionError::Credential("bad key".to_string()),
                "credential_error",
            ),
        ];

        for (make, kind) in cases {
            let recorder = Arc::new(MemoryRecorder::new(10));
            let (gateway, counters) =
                gateway_with(false, Behavior::ConnectFails(make), recorder.clone());
            let err = gateway
                .execute(None, "A", "id", &RunOptions::default())
                .await
                .unwrap_err();

            assert_eq!(err.kind(), kind);
            assert!(!err.to_string().contains("10.0.0.1"));
            assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
            gateway.flush_records(Duration::from_secs(1)).await;
            assert!(recorder.is_empty());
        }
    }

    #[tokio::test]
    async fn test_open_mode_unknown_target_is_not_found() {
        let (gateway, _) = gateway_with(
            false,
            Behavior::Output(output("", "", 0)),
            Arc::new(MemoryRecorder::new(10)),
        );
        let err = gateway
            .execute(Some("anything"), "Z", "id", &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(ref name) if name == "Z"));
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let (gateway, counters) = gateway_with(
            false,
            Behavior::Output(output("", "", 0)),
            Arc::new(MemoryRecorder::new(10)),
        );
        let err = gateway
            .execute(None, "A", "   ", &RunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
        assert_eq!(counters.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recorder_failure_and_latency_never_reach_caller() {
        let (gateway, _) = gateway_with(
            false,
            Behavior::Output(output("ok", "", 0)),
            Arc::new(FailingRecorder),
        );
        assert!(gateway
            .execute(None, "A", "true", &RunOptions::default())
            .await
            .is_ok());
        assert!(gateway.flush_records(Duration::from_secs(1)).await);

        let (gateway, _) = gateway_with(
            false,
            Behavior::Output(output("ok", "", 0)),
            Arc::new(SlowRecorder),
        );
        let started = std::time::Instant::now();
        assert!(gateway
            .execute(None, "A", "true", &RunOptions::default())
            .await
            .is_ok());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!gateway.flush_records(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_cancelled_request_releases_session() {
        let (gateway, counters) =
            gateway_with(false, Behavior::Hang, Arc::new(MemoryRecorder::new(10)));

        let result = tokio::time::timeout(
            Duration::from_millis(100),
            gateway.execute(None, "A", "sleep 1000", &RunOptions::default()),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_list_accessible() {
        let (open, _) = gateway_with(
            false,
            Behavior::Output(output("", "", 0)),
            Arc::new(MemoryRecorder::new(10)),
        );
        assert_eq!(open.list_accessible(None).unwrap(), vec!["A", "B", "C", "D"]);
        assert_eq!(open.list_accessible(Some("")).unwrap().len(), 4);

        let (enabled, _) = gateway_with(
            true,
            Behavior::Output(output("", "", 0)),
            Arc::new(MemoryRecorder::new(10)),
        );
        assert_eq!(
            enabled.list_accessible(Some("key-alice")).unwrap(),
            vec!["A", "B", "C"]
        );
        assert!(matches!(
            enabled.list_accessible(Some("nope")),
            Err(GatewayError::Unauthorized)
        ));
        assert!(matches!(
            enabled.list_accessible(None),
            Err(GatewayError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_execute_script_goes_through_session() {
        let recorder = Arc::new(MemoryRecorder::new(10));
        let (gateway, counters) =
            gateway_with(true, Behavior::Output(output("done", "", 0)), recorder.clone());

        let report = gateway
            .execute_script(
                Some("key-alice"),
                "C",
                Path::new("deploy.sh"),
                &ScriptOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(report.stdout, "done");
        assert_eq!(*counters.commands.lock(), vec!["script:deploy.sh"]);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);

        gateway.flush_records(Duration::from_secs(1)).await;
        assert_eq!(recorder.recent(1)[0].command, "script deploy.sh");
    }

    #[tokio::test]
    async fn test_check_reachable_closed_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut doc = document(false);
        doc.targets[0].host = "127.0.0.1".to_string();
        doc.targets[0].port = port;
        let snapshot = Arc::new(PermissionSnapshot::load(&doc).unwrap());
        let gateway = Gateway::new(
            snapshot,
            Arc::new(FakeConnector {
                behavior: Behavior::Hang,
                counters: Arc::new(Counters::default()),
            }),
            Arc::new(MemoryRecorder::new(1)),
        );

        let result = gateway
            .check_reachable(None, "A", Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert!(!result.reachable);
        assert!(!result.reason.unwrap_or_default().is_empty());
        assert_eq!(result.port, port);
    }

    #[tokio::test]
    async fn test_diagnostics_parses_battery_output() {
        let stdout = "===OSRELEASE===\nID=debian\nVERSION_ID=\"12\"\n===KERNEL===\n6.1.0\n===PKG===\n/usr/bin/apt\n===USER===\nroot\n===END===\n";
        let (gateway, counters) = gateway_with(
            false,
            Behavior::Output(output(stdout, "", 0)),
            Arc::new(MemoryRecorder::new(10)),
        );

        let report = gateway.diagnostics(None, "A").await.unwrap();
        assert_eq!(report.target, "A");
        assert_eq!(report.port, 22);
        assert_eq!(report.status, DiagnosticsStatus::Ok);
        assert_eq!(report.distro.id.as_deref(), Some("debian"));
        assert_eq!(report.distro.version_id.as_deref(), Some("12"));
        assert_eq!(report.platform.pkg_manager.as_deref(), Some("apt"));
        assert_eq!(report.user.username.as_deref(), Some("root"));
        assert_eq!(
            *counters.commands.lock(),
            vec![diagnostics::DIAGNOSTICS_COMMAND]
        );
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }
}
