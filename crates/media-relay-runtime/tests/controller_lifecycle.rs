//! Run gate, stop escalation and forced reset.

use async_trait::async_trait;
use media_relay_core::transport::{ChatInfo, ChatRef, Message, MessageId};
use media_relay_core::{
    ChatTransport, DedupStore, DeliveryFeed, ProgressEvent, RelaySettings, ScanRunner,
    ScanStatus, SessionCredential, SessionPool, TransportConnector, TransportError,
};
use media_relay_runtime::{ControlError, JoinError, ScanController};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Answers instantly, or never when `hang` is set
struct StubTransport {
    hang: bool,
}

impl StubTransport {
    async fn maybe_hang(&self) {
        if self.hang {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl ChatTransport for StubTransport {
    async fn get_chat(&self, chat: &ChatRef) -> Result<ChatInfo, TransportError> {
        self.maybe_hang().await;
        Ok(ChatInfo {
            id: -100_1,
            title: chat.to_string(),
            pinned_message_id: None,
        })
    }

    async fn join_chat(&self, chat: &ChatRef) -> Result<ChatInfo, TransportError> {
        self.get_chat(chat).await
    }

    async fn fetch_history(
        &self,
        _chat: &ChatRef,
        _limit: usize,
    ) -> Result<Vec<Message>, TransportError> {
        self.maybe_hang().await;
        Ok(Vec::new())
    }

    async fn fetch_message(
        &self,
        _chat: &ChatRef,
        _id: MessageId,
    ) -> Result<Option<Message>, TransportError> {
        Ok(None)
    }

    async fn click_callback(&self, _message: &Message, _data: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_message(&self, _chat: &ChatRef, _text: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn forward_message(
        &self,
        _message: &Message,
        _destination: &ChatRef,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

struct StubConnector {
    hang: bool,
}

#[async_trait]
impl TransportConnector for StubConnector {
    async fn connect(
        &self,
        _credential: &SessionCredential,
        _feed: DeliveryFeed,
    ) -> Result<Arc<dyn ChatTransport>, TransportError> {
        Ok(Arc::new(StubTransport { hang: self.hang }))
    }
}

async fn controller(hang: bool, dir: &tempfile::TempDir) -> ScanController {
    let settings = RelaySettings {
        index_channel: "@catalog".to_string(),
        destination_channel: "@sink".to_string(),
        ..RelaySettings::default()
    };
    let store = Arc::new(DedupStore::load(dir.path()).await.expect("ledgers"));
    let pool = SessionPool::new(["only-session"]).expect("pool");
    let runner = ScanRunner::new(Arc::new(StubConnector { hang }), pool, store, &settings);
    ScanController::with_stop_grace(Arc::new(runner), Duration::from_secs(10))
}

#[tokio::test(start_paused = true)]
async fn stop_while_idle_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = controller(false, &dir).await;
    assert_eq!(controller.request_stop(), Err(ControlError::NotRunning));
}

#[tokio::test(start_paused = true)]
async fn finished_run_releases_the_gate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = controller(false, &dir).await;

    let handle = controller.start_run(None, None).expect("first run starts");
    let report = handle.await.expect("join").expect("empty catalog scan succeeds");

    assert_eq!(report.items, 0);
    assert!(!controller.is_running());
    assert_eq!(controller.status(), ScanStatus::Idle);
    assert!(controller.start_run(None, None).is_ok(), "gate should be free again");
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected_while_running() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = controller(true, &dir).await;

    let _handle = controller.start_run(None, None).expect("first run starts");
    let Err(err) = controller.start_run(None, None) else {
        panic!("expected the gate to be held");
    };
    assert_eq!(err, ControlError::AlreadyRunning);
}

#[tokio::test(start_paused = true)]
async fn stuck_run_is_aborted_and_state_is_reset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = controller(true, &dir).await;
    let (tx, mut rx) = mpsc::channel(16);

    let handle = controller.start_run(None, Some(tx)).expect("run starts");
    tokio::task::yield_now().await;
    assert!(controller.is_running());

    controller.request_stop().expect("stop accepted");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(controller.is_running(), "still inside the grace period");

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!controller.is_running(), "gate should be released by the forced reset");
    assert_eq!(controller.status(), ScanStatus::Idle);

    let Err(join_err) = handle.await else {
        panic!("expected the stuck run to be aborted");
    };
    assert!(join_err.is_cancelled());

    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        last = Some(event);
    }
    assert_eq!(last, Some(ProgressEvent::RunCancelled));

    assert!(controller.start_run(None, None).is_ok(), "ready for a new run");
}

#[tokio::test(start_paused = true)]
async fn join_while_idle_resolves_and_frees_the_gate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = controller(false, &dir).await;

    let chat = controller.join_chat("@NewSink").await.expect("join succeeds");

    assert_eq!(chat.title, "@NewSink");
    assert!(!controller.is_running());
    assert!(controller.start_run(None, None).is_ok());
}

#[tokio::test(start_paused = true)]
async fn join_is_rejected_while_a_scan_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = controller(true, &dir).await;
    let _handle = controller.start_run(None, None).expect("run starts");

    let err = controller
        .join_chat("@NewSink")
        .await
        .expect_err("gate is held by the scan");
    assert!(matches!(err, JoinError::Control(ControlError::AlreadyRunning)));
}

#[tokio::test(start_paused = true)]
async fn invalid_join_target_is_an_error_and_frees_the_gate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let controller = controller(false, &dir).await;

    let err = controller
        .join_chat("two words")
        .await
        .expect_err("not a chat");
    assert!(matches!(err, JoinError::Scan(_)));
    assert!(!controller.is_running());
}
