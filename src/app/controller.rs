//! Upload state machine.
//!
//! ```text
//! Idle --select_file--> Uploading --on_progress--> Uploading
//! Uploading --on_complete--> (resolving address) --on_resolved--> Succeeded
//! Uploading --on_error / on_resolve_error--> Idle
//! any --reset--> Idle
//! ```
//!
//! All mutation happens on the UI thread. Transport work runs on the tokio
//! runtime and comes back through [`UploadController::poll`].

use super::state::UploadSession;
use crate::upload::{
    ObjectKey, ProgressSender, SelectedFile, SessionEvent, StorageTransport, TransportError,
    TransportEvent, UploadedObject,
};
use derivative::Derivative;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use url::Url;

#[derive(Derivative)]
#[derivative(Debug)]
pub struct UploadController {
    #[derivative(Debug = "ignore")]
    transport: Arc<dyn StorageTransport>,
    #[derivative(Debug = "ignore")]
    runtime: Handle,
    key_prefix: String,
    session: UploadSession,
    generation: u64,
    last_error: Option<String>,
    #[derivative(Debug = "ignore")]
    events_tx: Sender<SessionEvent>,
    #[derivative(Debug = "ignore")]
    events_rx: Receiver<SessionEvent>,
    #[derivative(Debug = "ignore")]
    task: Option<JoinHandle<()>>,
}

impl UploadController {
    pub fn new(
        transport: Arc<dyn StorageTransport>,
        runtime: Handle,
        key_prefix: impl Into<String>,
    ) -> Self {
        let (events_tx, events_rx) = channel();
        Self {
            transport,
            runtime,
            key_prefix: key_prefix.into(),
            session: UploadSession::idle(),
            generation: 0,
            last_error: None,
            events_tx,
            events_rx,
            task: None,
        }
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    /// Message from the most recent failed session, cleared by the next
    /// selection or a reset.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Starts uploading `file`. Ignored unless the controller is idle.
    pub fn select_file(&mut self, file: SelectedFile) -> bool {
        if !self.session.is_idle() {
            tracing::warn!(
                file = %file.name,
                status = ?self.session.status(),
                "ignoring selection while a session is active"
            );
            return false;
        }

        self.generation += 1;
        self.last_error = None;

        let key = ObjectKey::generate(&self.key_prefix, &file);
        tracing::info!(
            file = %file.name,
            bytes = file.size,
            key = %key,
            "starting upload"
        );
        self.session = UploadSession::uploading(file.clone());

        let transport = Arc::clone(&self.transport);
        let progress = ProgressSender::new(self.generation, self.events_tx.clone());
        self.task = Some(self.runtime.spawn(async move {
            match transport.upload(&key, &file, &progress).await {
                Ok(object) => progress.send(TransportEvent::Completed(object)),
                Err(err) => progress.send(TransportEvent::Failed(err)),
            }
        }));
        true
    }

    /// Applies every transport event that arrived since the last call.
    /// Returns whether any of them changed the session.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(SessionEvent { generation, event }) = self.events_rx.try_recv() {
            if generation != self.generation {
                tracing::debug!(generation, "dropping event from a previous session");
                continue;
            }
            changed |= match event {
                TransportEvent::Progress {
                    bytes_transferred,
                    total_bytes,
                } => self.on_progress(bytes_transferred, total_bytes),
                TransportEvent::Failed(err) => self.on_error(err),
                TransportEvent::Completed(object) => self.on_complete(object),
                TransportEvent::Resolved(url) => self.on_resolved(url),
                TransportEvent::ResolveFailed(err) => self.on_resolve_error(err),
            };
        }
        changed
    }

    pub fn on_progress(&mut self, bytes_transferred: u64, total_bytes: u64) -> bool {
        if !self.session.is_uploading() {
            return false;
        }
        self.session.record_progress(bytes_transferred, total_bytes);
        tracing::debug!(
            bytes_transferred,
            total_bytes,
            progress = self.session.progress(),
            "upload progress"
        );
        true
    }

    pub fn on_error(&mut self, err: TransportError) -> bool {
        if !self.session.is_uploading() {
            return false;
        }
        tracing::error!(error = %err, "upload failed");
        self.fail(format!("Upload failed: {}", err));
        true
    }

    /// Every byte is stored; fetch the public address before showing success.
    pub fn on_complete(&mut self, object: UploadedObject) -> bool {
        if !self.session.is_uploading() {
            return false;
        }
        tracing::info!(
            object = %object.name,
            bucket = %object.bucket,
            bytes = object.size,
            content_type = ?object.content_type,
            "upload complete, resolving address"
        );

        let transport = Arc::clone(&self.transport);
        let progress = ProgressSender::new(self.generation, self.events_tx.clone());
        self.task = Some(self.runtime.spawn(async move {
            match transport.resolve_address(&object).await {
                Ok(url) => progress.send(TransportEvent::Resolved(url)),
                Err(err) => progress.send(TransportEvent::ResolveFailed(err)),
            }
        }));
        true
    }

    pub fn on_resolved(&mut self, url: Url) -> bool {
        if !self.session.is_uploading() {
            return false;
        }
        tracing::info!(url = %url, "upload available");
        self.session.succeed(url);
        self.task = None;
        true
    }

    pub fn on_resolve_error(&mut self, err: TransportError) -> bool {
        if !self.session.is_uploading() {
            return false;
        }
        tracing::error!(error = %err, "could not resolve uploaded image address");
        self.fail(format!("Uploaded, but the image address is unavailable: {}", err));
        true
    }

    /// Back to a fresh idle session. An upload still in flight is cancelled.
    pub fn reset(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                tracing::info!("cancelling in-flight upload");
            }
            task.abort();
        }
        self.generation += 1;
        self.session = UploadSession::idle();
        self.last_error = None;
    }

    fn fail(&mut self, message: String) {
        self.task = None;
        self.session = UploadSession::idle();
        self.last_error = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::state::UploadStatus;
    use crate::upload::{accept_selection, FileSource, SelectionCandidate};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tokio::runtime::Runtime;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    enum Outcome {
        Complete,
        Fail(u16),
        Hang,
    }

    struct ScriptedTransport {
        progress: Vec<(u64, u64)>,
        outcome: Outcome,
        resolvable: bool,
        uploads: AtomicUsize,
        dropped: Arc<AtomicBool>,
    }

    impl ScriptedTransport {
        fn new(progress: Vec<(u64, u64)>, outcome: Outcome) -> Self {
            Self {
                progress,
                outcome,
                resolvable: true,
                uploads: AtomicUsize::new(0),
                dropped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StorageTransport for ScriptedTransport {
        async fn upload(
            &self,
            key: &ObjectKey,
            file: &SelectedFile,
            progress: &ProgressSender,
        ) -> Result<UploadedObject, TransportError> {
            let _guard = DropFlag(Arc::clone(&self.dropped));
            self.uploads.fetch_add(1, Ordering::SeqCst);
            for (sent, total) in &self.progress {
                progress.report(*sent, *total);
            }
            match self.outcome {
                Outcome::Complete => Ok(UploadedObject {
                    name: key.to_string(),
                    bucket: "test-bucket".to_string(),
                    size: file.size,
                    content_type: Some(file.content_type.clone()),
                    download_tokens: vec!["token".to_string()],
                }),
                Outcome::Fail(status) => Err(TransportError::Status {
                    status,
                    body: "denied".to_string(),
                }),
                Outcome::Hang => std::future::pending().await,
            }
        }

        async fn resolve_address(&self, object: &UploadedObject) -> Result<Url, TransportError> {
            if !self.resolvable {
                return Err(TransportError::NoDownloadToken(object.name.clone()));
            }
            Ok(Url::parse(&format!("https://storage.test/{}?token=token", object.name)).unwrap())
        }
    }

    /// Counts `ERROR` events seen on the current thread.
    struct ErrorCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for ErrorCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn count_errors(run: impl FnOnce()) -> usize {
        let errors = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(ErrorCounter(Arc::clone(&errors)));
        tracing::subscriber::with_default(subscriber, run);
        errors.load(Ordering::SeqCst)
    }

    fn photo() -> SelectedFile {
        SelectedFile {
            name: "photo.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            size: 2_000_000,
            source: FileSource::Memory(Arc::from(&b"jpeg"[..])),
        }
    }

    fn controller(runtime: &Runtime, transport: &Arc<ScriptedTransport>) -> UploadController {
        let transport: Arc<dyn StorageTransport> = transport.clone();
        UploadController::new(transport, runtime.handle().clone(), "uploads/")
    }

    fn pump_until(controller: &mut UploadController, done: impl Fn(&UploadController) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(&*controller) {
            assert!(Instant::now() < deadline, "timed out in {:?}", controller);
            controller.poll();
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn select_file_starts_uploading_at_zero() {
        let runtime = Runtime::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![], Outcome::Hang));
        let mut controller = controller(&runtime, &transport);

        assert!(controller.select_file(photo()));
        assert_eq!(controller.session().status(), UploadStatus::Uploading);
        assert_eq!(controller.session().progress(), 0.0);
        assert_eq!(controller.session().file().unwrap().name, "photo.jpg");
        assert!(controller.session().result_url().is_none());
    }

    #[test]
    fn progress_sequence_then_success() {
        let runtime = Runtime::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![], Outcome::Hang));
        let mut controller = controller(&runtime, &transport);
        controller.select_file(photo());

        controller.on_progress(500_000, 2_000_000);
        assert_eq!(controller.session().progress(), 25.0);
        controller.on_progress(2_000_000, 2_000_000);
        assert_eq!(controller.session().progress(), 100.0);

        controller.on_complete(UploadedObject {
            name: "uploads/photo.jpg".to_string(),
            bucket: "test-bucket".to_string(),
            size: 2_000_000,
            content_type: None,
            download_tokens: vec![],
        });
        // Still uploading until the address comes back.
        assert_eq!(controller.session().status(), UploadStatus::Uploading);

        pump_until(&mut controller, |c| {
            c.session().status() == UploadStatus::Succeeded
        });
        assert_eq!(
            controller.session().result_url().unwrap().as_str(),
            "https://storage.test/uploads/photo.jpg?token=token"
        );
    }

    #[test]
    fn transport_events_drive_a_full_upload() {
        let runtime = Runtime::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new(
            vec![(0, 2_000_000), (500_000, 2_000_000), (2_000_000, 2_000_000)],
            Outcome::Complete,
        ));
        let mut controller = controller(&runtime, &transport);
        controller.select_file(photo());

        pump_until(&mut controller, |c| {
            c.session().status() == UploadStatus::Succeeded
        });
        let url = controller.session().result_url().unwrap();
        assert!(url.as_str().starts_with("https://storage.test/uploads/"));
        assert!(url.as_str().ends_with(".jpg?token=token"));
        assert_eq!(controller.session().progress(), 100.0);
        assert_eq!(transport.uploads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transport_error_returns_to_idle() {
        let runtime = Runtime::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new(
            vec![(1_000_000, 2_000_000)],
            Outcome::Fail(403),
        ));
        let mut controller = controller(&runtime, &transport);
        controller.select_file(photo());

        pump_until(&mut controller, |c| c.session().is_idle());
        assert!(controller.session().result_url().is_none());
        assert_eq!(controller.session().progress(), 0.0);
        assert!(controller.session().file().is_none());
        assert!(controller.last_error().unwrap().contains("403"));
    }

    #[test]
    fn second_terminal_event_is_ignored() {
        let runtime = Runtime::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![], Outcome::Hang));
        let mut controller = controller(&runtime, &transport);
        controller.select_file(photo());

        controller.on_error(TransportError::MissingUploadUrl);
        let first = controller.last_error().unwrap().to_string();
        controller.on_error(TransportError::Status {
            status: 500,
            body: String::new(),
        });
        assert_eq!(controller.last_error().unwrap(), first);
        assert!(controller.session().is_idle());
    }

    #[test]
    fn unresolvable_address_returns_to_idle() {
        let runtime = Runtime::new().unwrap();
        let mut scripted = ScriptedTransport::new(vec![(4, 4)], Outcome::Complete);
        scripted.resolvable = false;
        let transport = Arc::new(scripted);
        let mut controller = controller(&runtime, &transport);
        controller.select_file(photo());

        pump_until(&mut controller, |c| c.last_error().is_some());
        assert!(controller.session().is_idle());
        assert!(controller.session().result_url().is_none());
    }

    #[test]
    fn reset_after_success_behaves_like_a_fresh_start() {
        let runtime = Runtime::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![(2, 2)], Outcome::Complete));
        let mut controller = controller(&runtime, &transport);

        controller.select_file(photo());
        pump_until(&mut controller, |c| {
            c.session().status() == UploadStatus::Succeeded
        });

        controller.reset();
        let session = controller.session();
        assert_eq!(session.status(), UploadStatus::Idle);
        assert_eq!(session.progress(), 0.0);
        assert!(session.result_url().is_none());
        assert!(session.file().is_none());

        assert!(controller.select_file(photo()));
        assert_eq!(controller.session().status(), UploadStatus::Uploading);
        assert_eq!(controller.session().progress(), 0.0);
        pump_until(&mut controller, |c| {
            c.session().status() == UploadStatus::Succeeded
        });
        assert_eq!(transport.uploads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reset_mid_upload_cancels_the_transport() {
        let runtime = Runtime::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![(1, 2)], Outcome::Hang));
        let mut controller = controller(&runtime, &transport);
        controller.select_file(photo());

        pump_until(&mut controller, |_| transport.uploads.load(Ordering::SeqCst) == 1);
        controller.reset();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !transport.dropped.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "upload task was not cancelled");
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(controller.session().is_idle());
    }

    #[test]
    fn events_from_a_previous_session_are_dropped() {
        let runtime = Runtime::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![], Outcome::Hang));
        let mut controller = controller(&runtime, &transport);
        controller.select_file(photo());

        let stale = ProgressSender::new(controller.generation, controller.events_tx.clone());
        controller.reset();
        controller.select_file(photo());

        stale.report(1_000_000, 2_000_000);
        stale.send(TransportEvent::Failed(TransportError::MissingUploadUrl));
        assert!(!controller.poll());
        assert!(controller.session().is_uploading());
        assert_eq!(controller.session().progress(), 0.0);
    }

    #[test]
    fn selection_while_uploading_is_ignored() {
        let runtime = Runtime::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![], Outcome::Hang));
        let mut controller = controller(&runtime, &transport);

        assert!(controller.select_file(photo()));
        assert!(!controller.select_file(photo()));
        pump_until(&mut controller, |_| transport.uploads.load(Ordering::SeqCst) >= 1);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(transport.uploads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejected_selection_never_reaches_the_transport() {
        let runtime = Runtime::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![], Outcome::Complete));
        let mut controller = controller(&runtime, &transport);

        let candidate = SelectionCandidate {
            name: "report.pdf".to_string(),
            path: None,
            bytes: Some(Arc::from(&b"%PDF"[..])),
        };
        if let Ok(file) = accept_selection(vec![candidate]) {
            controller.select_file(file);
        }

        std::thread::sleep(Duration::from_millis(20));
        assert!(!controller.poll());
        assert!(controller.session().is_idle());
        assert_eq!(transport.uploads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn upload_failure_is_logged_exactly_once() {
        let errors = count_errors(|| {
            let runtime = Runtime::new().unwrap();
            let transport = Arc::new(ScriptedTransport::new(
                vec![(500_000, 2_000_000)],
                Outcome::Fail(503),
            ));
            let mut controller = controller(&runtime, &transport);
            controller.select_file(photo());
            pump_until(&mut controller, |c| c.last_error().is_some());

            assert!(!controller.on_error(TransportError::MissingUploadUrl));
            assert!(!controller.on_resolve_error(TransportError::NoDownloadToken(
                "late".to_string()
            )));
            std::thread::sleep(Duration::from_millis(20));
            assert!(!controller.poll());
        });
        assert_eq!(errors, 1);
    }

    #[test]
    fn resolve_failure_is_logged_exactly_once() {
        let errors = count_errors(|| {
            let runtime = Runtime::new().unwrap();
            let mut scripted = ScriptedTransport::new(vec![(4, 4)], Outcome::Complete);
            scripted.resolvable = false;
            let transport = Arc::new(scripted);
            let mut controller = controller(&runtime, &transport);
            controller.select_file(photo());
            pump_until(&mut controller, |c| c.last_error().is_some());

            assert!(!controller.on_resolve_error(TransportError::MissingUploadUrl));
            assert!(!controller.on_error(TransportError::MissingUploadUrl));
        });
        assert_eq!(errors, 1);
    }

    #[test]
    fn ignored_events_do_not_count_as_changes() {
        let runtime = Runtime::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![], Outcome::Hang));
        let mut controller = controller(&runtime, &transport);
        controller.select_file(photo());

        let current = ProgressSender::new(controller.generation, controller.events_tx.clone());
        current.report(500_000, 2_000_000);
        assert!(controller.poll());
        assert_eq!(controller.session().progress(), 25.0);

        current.send(TransportEvent::Failed(TransportError::MissingUploadUrl));
        assert!(controller.poll());
        assert!(controller.session().is_idle());

        // Same generation, but the session already failed.
        current.report(2_000_000, 2_000_000);
        current.send(TransportEvent::Failed(TransportError::MissingUploadUrl));
        assert!(!controller.poll());
        assert_eq!(controller.session().progress(), 0.0);
    }
}
