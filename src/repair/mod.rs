//! Repair client
//!
//! Builds the repair conversation, sends it to the backend and turns the
//! reply into a [`Patch`]. A reply without usable JSON is answered with a
//! corrective message and the whole conversation is sent again, up to the
//! configured [`RetryBudget`].

mod extract;
mod prompt;
mod response;

pub use prompt::PromptBuilder;

use prompt::CORRECTIVE_MESSAGE;
use response::{ResponseError, parse_response};

use crate::backend_executor::{BackendError, BackendExecutor, BackendRequest, ChatMessage};
use crate::failure::FailureSignal;
use crate::patch::{Patch, PatchError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default number of backend calls spent on getting parseable JSON
pub const DEFAULT_JSON_RETRIES: i64 = 5;

/// Errors from a repair request
#[derive(Debug, Error)]
pub enum RepairError {
    /// Every reply within the budget lacked usable JSON
    #[error("no parseable repair response after {attempts} call(s)")]
    Unparseable {
        attempts: u32,
        last_response: Option<String>,
    },

    /// The reply parsed but described an invalid patch
    #[error(transparent)]
    Malformed(#[from] PatchError),

    /// Transport failure after the executor's own retries
    #[error("repair backend failed: {0}")]
    Backend(#[from] BackendError),

    /// A context file could not be read
    #[error("failed to read {path}: {source}")]
    Context {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The prompt template failed to render
    #[error("failed to render repair prompt: {0}")]
    Prompt(#[from] minijinja::Error),
}

/// How many backend calls one repair may spend on unparseable replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBudget {
    Limited(u32),
    Unbounded,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::Limited(DEFAULT_JSON_RETRIES as u32)
    }
}

impl RetryBudget {
    /// From a configured count: negative means unbounded, 0 means no calls
    pub fn from_setting(n: i64) -> Self {
        if n < 0 {
            Self::Unbounded
        } else {
            Self::Limited(u32::try_from(n).unwrap_or(u32::MAX))
        }
    }

    /// Whether another call is allowed after `calls` have been made
    pub fn allows(&self, calls: u32) -> bool {
        match self {
            Self::Limited(max) => calls < *max,
            Self::Unbounded => true,
        }
    }
}

/// Everything the model sees for one iteration
#[derive(Debug, Clone)]
pub struct RepairContext {
    pub target: PathBuf,
    /// Current content of the target
    pub source: String,
    pub signal: FailureSignal,
    /// Imported files and their content
    pub related: Vec<(PathBuf, String)>,
    /// Operator-supplied reference documents
    pub documents: Vec<(PathBuf, String)>,
    /// Arguments the target was run with
    pub args: Vec<String>,
}

impl RepairContext {
    /// Read the target, related files and documents from disk.
    ///
    /// The target and documents must be readable; related files that cannot
    /// be read are skipped.
    pub fn load(
        target: &Path,
        signal: FailureSignal,
        related: &[PathBuf],
        documents: &[PathBuf],
        args: &[String],
    ) -> Result<Self, RepairError> {
        let source = read(target)?;

        let related = related
            .iter()
            .filter_map(|path| match fs::read_to_string(path) {
                Ok(content) => Some((path.clone(), content)),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping related file");
                    None
                }
            })
            .collect();

        let documents = documents
            .iter()
            .map(|path| read(path).map(|content| (path.clone(), content)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            target: target.to_path_buf(),
            source,
            signal,
            related,
            documents,
            args: args.to_vec(),
        })
    }
}

fn read(path: &Path) -> Result<String, RepairError> {
    fs::read_to_string(path).map_err(|source| RepairError::Context {
        path: path.to_path_buf(),
        source,
    })
}

/// Settings for [`RepairClient`]
#[derive(Debug, Clone)]
pub struct RepairSettings {
    pub budget: RetryBudget,
    pub temperature: Option<f32>,
    pub prompt: PromptBuilder,
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self {
            budget: RetryBudget::default(),
            temperature: Some(0.1),
            prompt: PromptBuilder::default(),
        }
    }
}

/// Asks a backend for patches
pub struct RepairClient {
    backend: Box<dyn BackendExecutor>,
    settings: RepairSettings,
}

impl RepairClient {
    pub fn new(backend: Box<dyn BackendExecutor>, settings: RepairSettings) -> Self {
        Self { backend, settings }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Request a patch for the context's target
    pub async fn repair(&self, ctx: &RepairContext) -> Result<Patch, RepairError> {
        let mut messages = self.settings.prompt.render(ctx)?;
        let mut calls = 0u32;
        let mut last_response = None;

        while self.settings.budget.allows(calls) {
            calls += 1;

            let mut request = BackendRequest::from_messages(messages.clone());
            if let Some(temperature) = self.settings.temperature {
                request = request.with_temperature(temperature);
            }

            let response = self.backend.execute(&request).await?;
            tracing::debug!(
                call = calls,
                backend = %response.backend,
                model = response.model.as_deref().unwrap_or("-"),
                total_tokens = response.usage.as_ref().and_then(|u| u.total_tokens),
                duration_ms = response.duration.as_millis() as u64,
                "repair response received"
            );

            match parse_response(&response.text) {
                Ok(parsed) => return Ok(parsed.into_patch(&ctx.target)?),
                Err(ResponseError::Malformed(e)) => return Err(e.into()),
                Err(ResponseError::Unparseable(reason)) => {
                    tracing::warn!(call = calls, %reason, "unparseable repair response, asking again");
                    messages.push(ChatMessage::assistant(response.text.clone()));
                    messages.push(ChatMessage::user(CORRECTIVE_MESSAGE));
                    last_response = Some(response.text);
                }
            }
        }

        Err(RepairError::Unparseable {
            attempts: calls,
            last_response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend_executor::{BackendResponse, Role};
    use crate::patch::Edit;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Replays canned replies, repeating the last one, and records requests
    struct ScriptedBackend {
        replies: Vec<String>,
        calls: Arc<AtomicU32>,
        seen: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    }

    impl ScriptedBackend {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: replies.iter().map(|r| r.to_string()).collect(),
                calls: Arc::new(AtomicU32::new(0)),
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl BackendExecutor for ScriptedBackend {
        async fn execute(
            &self,
            request: &BackendRequest,
        ) -> Result<BackendResponse, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            self.seen.lock().unwrap().push(request.messages.clone());
            let text = self.replies[n.min(self.replies.len() - 1)].clone();
            Ok(BackendResponse::new(text, "scripted".into(), Duration::ZERO))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl BackendExecutor for FailingBackend {
        async fn execute(&self, _: &BackendRequest) -> Result<BackendResponse, BackendError> {
            Err(BackendError::auth("bad key"))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn context() -> RepairContext {
        RepairContext {
            target: PathBuf::from("calc.py"),
            source: "def add(a, b):\n    return a - b\n".into(),
            signal: FailureSignal {
                text: "AssertionError".into(),
                marker: None,
            },
            related: Vec::new(),
            documents: Vec::new(),
            args: Vec::new(),
        }
    }

    fn client(backend: ScriptedBackend, budget: RetryBudget) -> RepairClient {
        RepairClient::new(
            Box::new(backend),
            RepairSettings {
                budget,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_retry_budget() {
        assert_eq!(RetryBudget::from_setting(-1), RetryBudget::Unbounded);
        assert_eq!(RetryBudget::from_setting(0), RetryBudget::Limited(0));
        assert_eq!(RetryBudget::default(), RetryBudget::Limited(5));

        assert!(!RetryBudget::Limited(0).allows(0));
        assert!(RetryBudget::Limited(2).allows(1));
        assert!(!RetryBudget::Limited(2).allows(2));
        assert!(RetryBudget::Unbounded.allows(u32::MAX - 1));
    }

    #[tokio::test]
    async fn test_parses_first_reply() {
        let backend = ScriptedBackend::new(&[
            r#"[{"operation":"Replace","line":2,"content":"    return a + b"}]"#,
        ]);
        let calls = backend.calls.clone();
        let patch = client(backend, RetryBudget::default())
            .repair(&context())
            .await
            .unwrap();

        assert_eq!(patch.edits, vec![Edit::replace(2, "    return a + b")]);
        assert_eq!(patch.path, PathBuf::from("calc.py"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_always_unparseable_uses_exact_budget() {
        let backend = ScriptedBackend::new(&["I would change line 2."]);
        let calls = backend.calls.clone();
        let result = client(backend, RetryBudget::Limited(3))
            .repair(&context())
            .await;

        match result {
            Err(RepairError::Unparseable {
                attempts,
                last_response,
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last_response.as_deref(), Some("I would change line 2."));
            }
            other => panic!("expected Unparseable, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_budget_never_calls_backend() {
        let backend = ScriptedBackend::new(&["[]"]);
        let calls = backend.calls.clone();
        let result = client(backend, RetryBudget::Limited(0))
            .repair(&context())
            .await;

        assert!(matches!(
            result,
            Err(RepairError::Unparseable { attempts: 0, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_preserves_conversation() {
        let backend = ScriptedBackend::new(&[
            "Let me think about it.",
            "```json\n[{\"operation\":\"Delete\",\"line\":1}]\n```",
        ]);
        let calls = backend.calls.clone();
        let seen = backend.seen.clone();
        let patch = client(backend, RetryBudget::Unbounded)
            .repair(&context())
            .await
            .unwrap();

        assert_eq!(patch.edits, vec![Edit::delete(1)]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].len(), 2);
        let second = &seen[1];
        assert_eq!(second.len(), 4);
        assert_eq!(second[2], ChatMessage::assistant("Let me think about it."));
        assert_eq!(second[3].role, Role::User);
        assert_eq!(second[3].content, CORRECTIVE_MESSAGE);
    }

    #[tokio::test]
    async fn test_bracketed_prose_without_patch_is_retried() {
        let backend = ScriptedBackend::new(&[
            "The problem is on line [2]; I need more context.",
            "Line [2] is wrong. Fix:\n[{\"operation\":\"Replace\",\"line\":2,\"content\":\"    return a + b\"}]",
        ]);
        let calls = backend.calls.clone();
        let patch = client(backend, RetryBudget::Limited(3))
            .repair(&context())
            .await
            .unwrap();

        assert_eq!(patch.edits, vec![Edit::replace(2, "    return a + b")]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_is_not_retried() {
        let backend = ScriptedBackend::new(&[r#"[{"operation":"Swap","line":1}]"#, "[]"]);
        let calls = backend.calls.clone();
        let result = client(backend, RetryBudget::default())
            .repair(&context())
            .await;

        assert!(matches!(result, Err(RepairError::Malformed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wrong_target_is_malformed() {
        let backend = ScriptedBackend::new(&[r#"{"files": {"other.py": {"changes": []}}}"#]);
        let result = client(backend, RetryBudget::default())
            .repair(&context())
            .await;
        assert!(matches!(
            result,
            Err(RepairError::Malformed(PatchError::MalformedPatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_backend_error_surfaces() {
        let client = RepairClient::new(Box::new(FailingBackend), RepairSettings::default());
        let result = client.repair(&context()).await;
        assert!(matches!(result, Err(RepairError::Backend(BackendError::Auth { .. }))));
    }

    #[test]
    fn test_context_load() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("calc.py");
        fs::write(&target, "import helpers\n").unwrap();
        let helpers = dir.path().join("helpers.py");
        fs::write(&helpers, "X = 1\n").unwrap();
        let doc = dir.path().join("REQS.md");
        fs::write(&doc, "must add\n").unwrap();

        let ctx = RepairContext::load(
            &target,
            FailureSignal {
                text: "boom".into(),
                marker: None,
            },
            &[helpers.clone(), dir.path().join("gone.py")],
            &[doc.clone()],
            &["1".to_string()],
        )
        .unwrap();

        assert_eq!(ctx.source, "import helpers\n");
        assert_eq!(ctx.related, vec![(helpers, "X = 1\n".to_string())]);
        assert_eq!(ctx.documents, vec![(doc, "must add\n".to_string())]);
        assert_eq!(ctx.args, vec!["1".to_string()]);

        let missing_doc = RepairContext::load(
            &target,
            FailureSignal {
                text: "boom".into(),
                marker: None,
            },
            &[],
            &[dir.path().join("missing.md")],
            &[],
        );
        assert!(matches!(missing_doc, Err(RepairError::Context { .. })));
    }
}
