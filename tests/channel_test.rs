use async_trait::async_trait;
use escalada::channel::{ChannelError, Dialer, LiveChannel, Link};
use escalada::protocol::BoxEvent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

/// In-memory connection: what the channel sends lands in `sent`,
/// and the test plays the server through `incoming`.
struct MockLink {
    sent: mpsc::UnboundedSender<String>,
    incoming: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Link for MockLink {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        self.sent
            .send(text)
            .map_err(|_| ChannelError::Transport("peer gone".to_string()))
    }

    async fn recv_text(&mut self) -> Option<Result<String, ChannelError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct ServerSide {
    sent: mpsc::UnboundedReceiver<String>,
    push: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

fn mock_link() -> (Box<dyn Link>, ServerSide) {
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (push_tx, push_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let link = MockLink {
        sent: sent_tx,
        incoming: push_rx,
        closed: closed.clone(),
    };
    (
        Box::new(link),
        ServerSide {
            sent: sent_rx,
            push: push_tx,
            closed,
        },
    )
}

/// Hands out prepared links in order, then refuses every dial
#[derive(Default)]
struct ScriptedDialer {
    links: Mutex<VecDeque<Box<dyn Link>>>,
    attempts: Mutex<Vec<Instant>>,
    gate: Option<Arc<Notify>>,
    dialing: AtomicUsize,
}

impl ScriptedDialer {
    fn with_links(links: Vec<Box<dyn Link>>) -> Self {
        Self {
            links: Mutex::new(links.into()),
            ..Default::default()
        }
    }

    fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(&self) -> Result<Box<dyn Link>, ChannelError> {
        self.attempts.lock().unwrap().push(Instant::now());
        self.dialing.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let next = self.links.lock().unwrap().pop_front();
        next.ok_or_else(|| ChannelError::Transport("connection refused".to_string()))
    }
}

async fn next_sent(server: &mut ServerSide) -> BoxEvent {
    let text = tokio::time::timeout(Duration::from_secs(30), server.sent.recv())
        .await
        .expect("message sent")
        .expect("link alive");
    serde_json::from_str(&text).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff_doubles_and_caps() {
    let dialer = Arc::new(ScriptedDialer::default());
    let (channel, _events) = LiveChannel::spawn(dialer.clone(), "1".to_string());

    while dialer.attempts().len() < 7 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let attempts = dialer.attempts();
    let gaps: Vec<u64> = attempts
        .windows(2)
        .take(6)
        .map(|w| w[1].duration_since(w[0]).as_secs())
        .collect();
    assert_eq!(gaps, vec![1, 2, 4, 8, 15, 15]);

    assert!(!channel.is_connected());
    channel.close().await;
}

#[tokio::test]
async fn test_send_fails_fast_while_disconnected() {
    let dialer = Arc::new(ScriptedDialer::default());
    let (channel, _events) = LiveChannel::spawn(dialer, "1".to_string());

    let result = channel.send(BoxEvent::StartTimer {
        box_id: "1".to_string(),
    });
    assert!(matches!(result, Err(ChannelError::Disconnected)));
    channel.close().await;
}

#[tokio::test]
async fn test_open_requests_state_and_dispatches_messages() {
    let (link, mut server) = mock_link();
    let dialer = Arc::new(ScriptedDialer::with_links(vec![link]));
    let (channel, mut events) = LiveChannel::spawn(dialer, "4".to_string());

    assert_eq!(
        next_sent(&mut server).await,
        BoxEvent::RequestState {
            box_id: "4".to_string()
        }
    );
    assert!(channel.is_connected());

    // Unknown and malformed frames are dropped, known ones delivered
    server.push.send(r#"{"type":"SOMETHING_NEW"}"#.to_string()).unwrap();
    server.push.send("{oops".to_string()).unwrap();
    server
        .push
        .send(r#"{"type":"TIMER_SYNC","boxId":"4","remaining":42}"#.to_string())
        .unwrap();
    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        BoxEvent::TimerSync {
            box_id: "4".to_string(),
            remaining: 42
        }
    );

    channel
        .send(BoxEvent::StopTimer {
            box_id: "4".to_string(),
        })
        .unwrap();
    assert!(matches!(
        next_sent(&mut server).await,
        BoxEvent::StopTimer { .. }
    ));

    channel.close().await;
    assert!(server.closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_peer_close() {
    let (first, first_server) = mock_link();
    let (second, mut second_server) = mock_link();
    let dialer = Arc::new(ScriptedDialer::with_links(vec![first, second]));
    let (channel, _events) = LiveChannel::spawn(dialer.clone(), "2".to_string());

    let ServerSide {
        mut sent,
        push,
        closed: _,
    } = first_server;
    assert!(sent.recv().await.is_some());
    drop(push);

    assert_eq!(
        next_sent(&mut second_server).await,
        BoxEvent::RequestState {
            box_id: "2".to_string()
        }
    );
    let attempts = dialer.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1].duration_since(attempts[0]).as_secs(), 1);

    channel.close().await;
}

#[tokio::test]
async fn test_close_during_handshake_is_deferred() {
    let (link, mut server) = mock_link();
    let gate = Arc::new(Notify::new());
    let dialer = Arc::new(ScriptedDialer {
        links: Mutex::new(VecDeque::from(vec![link])),
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let (channel, _events) = LiveChannel::spawn(dialer.clone(), "3".to_string());

    while dialer.dialing.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    let closing = tokio::spawn(channel.close());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!closing.is_finished());

    // Handshake completes after the close request
    gate.notify_one();
    tokio::time::timeout(Duration::from_secs(1), closing)
        .await
        .expect("close completes")
        .unwrap();

    assert!(server.closed.load(Ordering::SeqCst));
    assert!(server.sent.try_recv().is_err(), "no traffic after deferred close");
    assert_eq!(dialer.attempts().len(), 1);
}
