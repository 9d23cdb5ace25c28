//! Relay session tests over in-memory connections
//!
//! A fake connector hands every dialed target end to the test, which then
//! plays the agent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::SinkExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use jr_core::transport::{
    memory_pair, next_inbound, Frame, FrameSink, FrameStream, Inbound, MemoryEnd,
};
use jr_core::{Lifecycle, Tracked};
use jr_protocol::Message;
use jr_server::{DialError, ForwardHeaders, RelayRegistry, RelaySession, Scheme, TargetConnector};

const WAIT: Duration = Duration::from_secs(5);

struct FakeConnector {
    unreachable: Vec<String>,
    probes: AtomicUsize,
    dials: Mutex<Vec<(String, ForwardHeaders)>>,
    agents: mpsc::UnboundedSender<(String, MemoryEnd)>,
}

#[async_trait]
impl TargetConnector for FakeConnector {
    async fn probe(&self, addr: &str) -> Result<Scheme, DialError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.iter().any(|a| a == addr) {
            return Err(DialError::Probe(format!(
                "dial tcp {}: connection refused",
                addr
            )));
        }
        Ok(Scheme::Plain)
    }

    async fn dial(
        &self,
        addr: &str,
        _scheme: Scheme,
        headers: &ForwardHeaders,
    ) -> Result<(FrameSink, FrameStream), DialError> {
        self.dials
            .lock()
            .unwrap()
            .push((addr.to_string(), headers.clone()));
        let (relay_end, agent_end) = memory_pair();
        self.agents.send((addr.to_string(), agent_end)).unwrap();
        Ok((relay_end.sink, relay_end.stream))
    }
}

struct Peer {
    sink: FrameSink,
    stream: FrameStream,
}

impl Peer {
    fn new(end: MemoryEnd) -> Self {
        Self {
            sink: end.sink,
            stream: end.stream,
        }
    }

    async fn send(&mut self, json: &str) {
        self.sink.send(Frame::Text(json.to_string())).await.unwrap();
    }

    async fn next(&mut self) -> Inbound {
        tokio::time::timeout(WAIT, next_inbound(&mut self.stream))
            .await
            .expect("timed out waiting for the relay")
    }

    async fn next_text(&mut self) -> String {
        match self.next().await {
            Inbound::Data(Frame::Text(text)) => text,
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    async fn next_message(&mut self) -> Message {
        Message::decode(&self.next_text().await).unwrap()
    }

    async fn expect_close(&mut self) -> String {
        match self.next().await {
            Inbound::Closed(Some(reason)) => reason.reason,
            other => panic!("expected a close frame, got {:?}", other),
        }
    }

    async fn expect_silence(&mut self, window: Duration) {
        if let Ok(frame) = tokio::time::timeout(window, next_inbound(&mut self.stream)).await {
            panic!("unexpected frame {:?}", frame);
        }
    }
}

struct Harness {
    relay: Arc<RelaySession>,
    browser: Peer,
    agents: mpsc::UnboundedReceiver<(String, MemoryEnd)>,
    connector: Arc<FakeConnector>,
    serving: JoinHandle<()>,
}

impl Harness {
    fn start(unreachable: &[&str]) -> Self {
        let lifecycle = Lifecycle::new();
        let (tx, agents) = mpsc::unbounded_channel();
        let connector = Arc::new(FakeConnector {
            unreachable: unreachable.iter().map(|s| s.to_string()).collect(),
            probes: AtomicUsize::new(0),
            dials: Mutex::new(Vec::new()),
            agents: tx,
        });

        let (relay_end, browser_end) = memory_pair();
        let headers = ForwardHeaders {
            forwarded_for: "192.168.1.7:51000".into(),
            forwarded_proto: "http",
            forwarded_host: Some("console:9994".into()),
            client_id: "tab-1".into(),
        };
        let relay = RelaySession::new(
            "tab-1".into(),
            relay_end.sink,
            headers,
            Arc::clone(&connector) as Arc<dyn TargetConnector>,
            Duration::from_millis(10),
            lifecycle,
        );
        let serving = tokio::spawn({
            let relay = Arc::clone(&relay);
            let stream = relay_end.stream;
            async move { relay.serve(stream).await }
        });

        Self {
            relay,
            browser: Peer::new(browser_end),
            agents,
            connector,
            serving,
        }
    }

    async fn next_agent(&mut self) -> (String, Peer) {
        let (addr, end) = tokio::time::timeout(WAIT, self.agents.recv())
            .await
            .expect("relay did not dial")
            .expect("connector dropped");
        (addr, Peer::new(end))
    }

    async fn connect(&mut self, addr: &str) -> Peer {
        self.browser
            .send(&format!(r#"{{"type":1,"data":"{}"}}"#, addr))
            .await;
        let (dialed, agent) = self.next_agent().await;
        assert_eq!(dialed, addr);
        assert_eq!(self.browser.next_message().await, Message::Connected);
        agent
    }

    async fn wait_closed(&self) {
        tokio::time::timeout(WAIT, async {
            while self.relay.is_active() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("relay did not close");
    }

    fn dial_count(&self) -> usize {
        self.connector.dials.lock().unwrap().len()
    }
}

#[tokio::test]
async fn test_non_address_first_message_never_dials() {
    let mut h = Harness::start(&[]);

    h.browser
        .send(r#"{"type":0,"joptions":{"unit":"sshd"}}"#)
        .await;
    let reason = h.browser.expect_close().await;
    assert!(reason.contains("first message"), "reason: {}", reason);

    tokio::time::timeout(WAIT, &mut h.serving).await.unwrap().unwrap();
    assert_eq!(h.connector.probes.load(Ordering::SeqCst), 0);
    assert_eq!(h.dial_count(), 0);
    assert!(!h.relay.is_active());
}

#[tokio::test]
async fn test_unreachable_target_sends_dial_failed() {
    let mut h = Harness::start(&["10.0.0.5:9995"]);

    h.browser.send(r#"{"type":1,"data":"10.0.0.5:9995"}"#).await;
    assert_eq!(h.browser.next_message().await, Message::DialFailed);
    let reason = h.browser.expect_close().await;
    assert!(reason.contains("http/https"), "reason: {}", reason);
    assert!(matches!(h.browser.next().await, Inbound::Abnormal));

    tokio::time::timeout(WAIT, &mut h.serving).await.unwrap().unwrap();
    assert!(!h.relay.is_active());
    assert!(h.relay.workers_idle());
    assert_eq!(h.dial_count(), 0);
}

#[tokio::test]
async fn test_relays_both_directions() {
    let mut h = Harness::start(&[]);
    let mut agent = h.connect("10.0.0.6:9995").await;

    let filter = r#"{"type":0,"joptions":{"unit":"sshd","notail":false}}"#;
    h.browser.send(filter).await;
    assert_eq!(agent.next_text().await, filter);

    let record = r#"{"type":4,"data":{"timestamp":"1700000000000","message":"hello","targetname":"sshd"}}"#;
    agent.send(record).await;
    assert_eq!(h.browser.next_text().await, record);

    let dials = h.connector.dials.lock().unwrap().clone();
    assert_eq!(dials.len(), 1);
    assert_eq!(dials[0].1.client_id.as_str(), "tab-1");
    assert_eq!(dials[0].1.forwarded_for, "192.168.1.7:51000");

    h.relay.close().await;
    assert!(h.browser.expect_close().await.is_empty());
    assert!(agent.expect_close().await.is_empty());
    assert!(h.relay.workers_idle());
}

#[tokio::test]
async fn test_retarget_closes_only_target() {
    let mut h = Harness::start(&[]);
    let mut first = h.connect("10.0.0.6:9995").await;

    let mut second = h.connect("10.0.0.7:9995").await;
    first.expect_close().await;
    assert!(matches!(first.next().await, Inbound::Abnormal));

    // The browser was acknowledged once per dial and stays connected.
    h.browser.expect_silence(Duration::from_millis(100)).await;
    assert!(h.relay.is_active());

    h.browser.send(r#"{"type":2}"#).await;
    assert_eq!(second.next_text().await, r#"{"type":2}"#);

    second.send(r#"{"type":4,"data":null}"#).await;
    assert_eq!(h.browser.next_message().await, Message::Data(None));

    assert_eq!(h.dial_count(), 2);
    h.relay.close().await;
}

#[tokio::test]
async fn test_retarget_to_unreachable_target() {
    let mut h = Harness::start(&["10.0.0.5:9995"]);
    let mut agent = h.connect("10.0.0.6:9995").await;

    h.browser.send(r#"{"type":1,"data":"10.0.0.5:9995"}"#).await;
    agent.expect_close().await;
    assert_eq!(h.browser.next_message().await, Message::DialFailed);
    h.browser.expect_close().await;

    h.wait_closed().await;
    assert!(h.relay.workers_idle());
}

#[tokio::test]
async fn test_target_close_tears_down_relay() {
    let mut h = Harness::start(&[]);
    let mut agent = h.connect("10.0.0.6:9995").await;

    agent
        .sink
        .send(Frame::close_normal("session over"))
        .await
        .unwrap();
    let reason = h.browser.expect_close().await;
    assert!(reason.contains("target"), "reason: {}", reason);

    h.wait_closed().await;
    assert!(h.relay.workers_idle());
}

#[tokio::test]
async fn test_client_close_tears_down_relay() {
    let mut h = Harness::start(&[]);
    let mut agent = h.connect("10.0.0.6:9995").await;

    h.browser.sink.send(Frame::close_normal("tab closed")).await.unwrap();
    let reason = agent.expect_close().await;
    assert!(reason.contains("client"), "reason: {}", reason);

    h.wait_closed().await;
}

#[tokio::test]
async fn test_concurrent_close_sends_one_close_frame() {
    let mut h = Harness::start(&[]);
    let mut agent = h.connect("10.0.0.6:9995").await;

    let a = tokio::spawn({
        let relay = Arc::clone(&h.relay);
        async move { relay.close().await }
    });
    let b = tokio::spawn({
        let relay = Arc::clone(&h.relay);
        async move { relay.shutdown().await }
    });
    a.await.unwrap();
    b.await.unwrap();

    h.browser.expect_close().await;
    assert!(matches!(h.browser.next().await, Inbound::Abnormal));
    agent.expect_close().await;
    assert!(matches!(agent.next().await, Inbound::Abnormal));
    assert!(!h.relay.is_active());
}

#[tokio::test]
async fn test_registry_sweeps_closed_relays() {
    let mut h = Harness::start(&[]);
    let _agent = h.connect("10.0.0.6:9995").await;

    let registry = RelayRegistry::new("relay");
    registry.add("tab-1".into(), Arc::clone(&h.relay));
    assert_eq!(registry.sweep(), 0);

    h.relay.close().await;
    assert_eq!(registry.sweep(), 1);
    assert!(registry.is_empty());
}
