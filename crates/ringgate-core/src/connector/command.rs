//! Connector for config-management systems driven through a CLI.
//!
//! The configured program is invoked as
//! `<program> <args..> <operation> --group <group> [--idempotency-key <key>]`
//! with `operation` one of `health`, `sync`, `compliance`, `push`,
//! `rollback`. Push and rollback receive the intent as JSON on stdin. Every
//! operation prints its JSON result on stdout.
//!
//! Exit codes: 0 success, 75 (`EX_TEMPFAIL`) transient, 77 (`EX_NOPERM`)
//! policy violation, anything else permanent. Death by signal is treated as
//! transient.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::credentials::{CredentialRef, CredentialResolver};
use super::journal::IdempotencyJournal;
use super::types::*;
use super::Connector;

pub const EXIT_TEMPFAIL: i32 = 75;
pub const EXIT_NOPERM: i32 = 77;

/// Environment variable that carries the resolved credential to the child.
pub const CREDENTIAL_ENV: &str = "RINGGATE_CREDENTIAL";

pub fn classify_exit(code: Option<i32>) -> ErrorClass {
    match code {
        Some(0) => ErrorClass::None,
        Some(EXIT_TEMPFAIL) | None => ErrorClass::Transient,
        Some(EXIT_NOPERM) => ErrorClass::PolicyViolation,
        Some(_) => ErrorClass::Permanent,
    }
}

pub struct CommandPlaneConnector {
    id: String,
    program: String,
    args: Vec<String>,
    credential: Option<CredentialRef>,
    resolver: Arc<dyn CredentialResolver>,
    journal: IdempotencyJournal,
}

impl CommandPlaneConnector {
    pub fn new(
        id: impl Into<String>,
        program: impl Into<String>,
        args: Vec<String>,
        credential: Option<CredentialRef>,
        resolver: Arc<dyn CredentialResolver>,
    ) -> Self {
        Self {
            id: id.into(),
            program: program.into(),
            args,
            credential,
            resolver,
            journal: IdempotencyJournal::new(),
        }
    }

    async fn invoke(
        &self,
        operation: &str,
        group: &str,
        key: Option<&IdempotencyKey>,
        stdin: Option<Vec<u8>>,
    ) -> ConnectorResult<serde_json::Value> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(operation)
            .arg("--group")
            .arg(group)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(key) = key {
            command.arg("--idempotency-key").arg(key.as_str());
        }
        if let Some(reference) = &self.credential {
            let secret = self.resolver.resolve(reference).await?;
            command.env(CREDENTIAL_ENV, secret.expose());
        }

        debug!(
            connector = %self.id,
            program = %self.program,
            operation,
            group,
            "invoking plane command"
        );
        let mut child = command.spawn().map_err(|e| {
            ConnectorError::permanent(format!("{}: cannot run {}: {e}", self.id, self.program))
        })?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(&input).await.map_err(|e| {
                ConnectorError::transient(format!("{}: writing stdin: {e}", self.id))
            })?;
            // Close stdin so the child sees EOF.
            drop(pipe);
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| {
                ConnectorError::transient(format!("{}: waiting for child: {e}", self.id))
            })?;

        let class = classify_exit(output.status.code());
        if class != ErrorClass::None {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConnectorError::new(
                class,
                format!(
                    "{}: {operation} exited with {}: {}",
                    self.id,
                    output.status,
                    stderr.trim()
                ),
            ));
        }
        let stdout = output.stdout;
        if stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&stdout).map_err(|e| {
            ConnectorError::permanent(format!("{}: {operation} printed invalid JSON: {e}", self.id))
        })
    }

    async fn read<T: DeserializeOwned>(
        &self,
        operation: &str,
        scope: &Scope,
    ) -> ConnectorResult<T> {
        let value = self.invoke(operation, &scope.group, None, None).await?;
        serde_json::from_value(value).map_err(|e| {
            ConnectorError::permanent(format!("{}: unexpected {operation} output: {e}", self.id))
        })
    }

    async fn write(
        &self,
        operation: &str,
        intent: &PlaneIntent,
        key: &IdempotencyKey,
    ) -> ConnectorOperationResult {
        self.journal
            .run_once(key, || async move {
                let body = match serde_json::to_vec(intent) {
                    Ok(body) => body,
                    Err(e) => {
                        return ConnectorOperationResult::failed(
                            key,
                            ErrorClass::Permanent,
                            format!("{}: encoding intent: {e}", self.id),
                        )
                    }
                };
                match self
                    .invoke(operation, &intent.scope.group, Some(key), Some(body))
                    .await
                {
                    Ok(payload) => ConnectorOperationResult::ok(key, payload),
                    Err(err) => ConnectorOperationResult::from_error(key, err),
                }
            })
            .await
    }
}

#[async_trait]
impl Connector for CommandPlaneConnector {
    fn id(&self) -> &str {
        &self.id
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        match self.invoke("health", "-", None, None).await {
            Ok(_) => Ok(true),
            Err(err) if err.class == ErrorClass::Transient => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn sync_state(&self, scope: &Scope) -> ConnectorResult<ActualState> {
        self.read("sync", scope).await
    }

    async fn push_intent(
        &self,
        intent: &PlaneIntent,
        key: &IdempotencyKey,
    ) -> ConnectorOperationResult {
        self.write("push", intent, key).await
    }

    async fn query_compliance(&self, scope: &Scope) -> ConnectorResult<ComplianceStatus> {
        self.read("compliance", scope).await
    }

    async fn rollback(
        &self,
        intent: &PlaneIntent,
        key: &IdempotencyKey,
    ) -> ConnectorOperationResult {
        self.write("rollback", intent, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::StaticCredentialResolver;
    use crate::domain::ArtifactRef;
    use ringgate_state::ContentDigest;

    // `sh -c <script> plane <operation> --group <group> ...` puts the
    // operation in $1.
    fn shell(script: &str) -> CommandPlaneConnector {
        CommandPlaneConnector::new(
            "ansible",
            "sh",
            vec!["-c".into(), script.into(), "plane".into()],
            None,
            Arc::new(StaticCredentialResolver::new()),
        )
    }

    fn intent() -> PlaneIntent {
        PlaneIntent {
            correlation_id: "dep-1".into(),
            artifact: ArtifactRef::new("7zip", "23.01", ContentDigest::from_bytes(b"7zip")),
            scope: Scope::new("canary", "grp-canary"),
        }
    }

    #[test]
    fn exit_code_classification() {
        assert_eq!(classify_exit(Some(0)), ErrorClass::None);
        assert_eq!(classify_exit(Some(75)), ErrorClass::Transient);
        assert_eq!(classify_exit(Some(77)), ErrorClass::PolicyViolation);
        assert_eq!(classify_exit(Some(1)), ErrorClass::Permanent);
        assert_eq!(classify_exit(None), ErrorClass::Transient);
    }

    #[tokio::test]
    async fn push_sends_intent_on_stdin() {
        let plane = shell(
            r#"case "$1" in
                 push) grep -q '"correlation_id":"dep-1"' && echo '{"accepted":true}' ;;
                 *) exit 2 ;;
               esac"#,
        );
        let key = IdempotencyKey::derive("dep-1", "push:canary:1", "ansible");
        let result = plane.push_intent(&intent(), &key).await;
        assert!(result.success, "{:?}", result.message);
        assert_eq!(result.payload["accepted"], true);
    }

    #[tokio::test]
    async fn exit_codes_map_to_classes() {
        let plane =
            shell(r#"cat >/dev/null; case "$1" in push) exit 75 ;; rollback) exit 77 ;; esac"#);
        let push = IdempotencyKey::derive("dep-1", "push:canary:1", "ansible");
        let undo = IdempotencyKey::derive("dep-1", "rollback:canary:1", "ansible");

        assert!(plane.push_intent(&intent(), &push).await.is_transient());
        let result = plane.rollback(&intent(), &undo).await;
        assert_eq!(result.error_class, ErrorClass::PolicyViolation);
    }

    #[tokio::test]
    async fn sync_parses_actual_state() {
        let plane = shell(
            r#"echo '{"apps":{"7zip":{"version":"23.01","targets":12}}}'"#,
        );
        let state = plane
            .sync_state(&Scope::new("canary", "grp-canary"))
            .await
            .unwrap();
        assert_eq!(state.apps["7zip"].version, "23.01");
        assert_eq!(state.apps["7zip"].targets, 12);
        assert!(plane.test_connection().await.unwrap());
    }

    #[tokio::test]
    async fn missing_program_is_permanent() {
        let plane = CommandPlaneConnector::new(
            "ansible",
            "/nonexistent/ringgate-plane",
            Vec::new(),
            None,
            Arc::new(StaticCredentialResolver::new()),
        );
        let err = plane
            .query_compliance(&Scope::new("canary", "grp-canary"))
            .await
            .unwrap_err();
        assert_eq!(err.class, ErrorClass::Permanent);
    }
}
