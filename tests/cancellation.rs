use std::sync::Arc;
use std::time::Duration;

use ollama_conductor::{
    CANCELLED_NOTICE, ChannelSink, ClientConfig, ClientEvent, ClientState, OllamaClient, Outcome,
    THINKING_NOTICE,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

const PS_BODY: &str = r#"{"models":[{"name":"gemma3:1b","model":"gemma3:1b"}]}"#;
const FIRST_CHUNK: &str = "{\"response\":\"Hel\",\"done\":false}\n";

async fn read_head(socket: &mut TcpStream) -> std::io::Result<String> {
    let mut head = Vec::new();
    let mut buf = [0_u8; 1024];
    while !head.windows(4).any(|window| window == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

/// Answers `/api/ps`, then streams one chunk for `/api/generate` and stalls
/// until the client hangs up, which it reports on `closed`.
async fn serve(socket: TcpStream, closed: UnboundedSender<()>) -> std::io::Result<()> {
    let mut socket = socket;
    let head = read_head(&mut socket).await?;

    if head.starts_with("GET /api/ps") {
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{PS_BODY}",
            PS_BODY.len()
        );
        socket.write_all(response.as_bytes()).await?;
        return Ok(());
    }

    let head = "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ntransfer-encoding: chunked\r\n\r\n";
    socket.write_all(head.as_bytes()).await?;
    let chunk = format!("{:x}\r\n{FIRST_CHUNK}\r\n", FIRST_CHUNK.len());
    socket.write_all(chunk.as_bytes()).await?;
    socket.flush().await?;

    // Drain whatever is left of the request body; EOF means the client is gone.
    let mut buf = [0_u8; 1024];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
    let _ = closed.send(());
    Ok(())
}

async fn stalling_server() -> (String, UnboundedReceiver<()>) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (closed_tx, closed_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve(socket, closed_tx.clone()));
        }
    });
    (format!("http://{addr}"), closed_rx)
}

fn client_for(base_url: String) -> (OllamaClient, UnboundedReceiver<ClientEvent>) {
    let (sink, rx) = ChannelSink::new();
    let config = ClientConfig {
        base_url,
        ..ClientConfig::default()
    };
    let client = OllamaClient::from_config(config, Arc::new(sink)).expect("client");
    (client, rx)
}

async fn next_event(rx: &mut UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event before timeout")
        .expect("sink still open")
}

fn drain(rx: &mut UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn cancel_mid_stream_stops_delivery_and_releases_connection() {
    if ollama_conductor::utils::test_support::should_skip_httpmock() {
        return;
    }

    let (base_url, mut closed) = stalling_server().await;
    let (client, mut rx) = client_for(base_url);
    let pending = client.chat("hi").expect("dispatch");

    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::StateChange(ClientState::Running)
    );
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::UserMessage("hi".to_string())
    );
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::SystemMessage(THINKING_NOTICE.to_string())
    );
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::SystemMessage("Wait stream ... hi".to_string())
    );
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::AssistantMessageStart("Hel".to_string())
    );
    assert!(client.is_running());

    assert!(client.cancel());
    assert_eq!(pending.outcome().await, Outcome::Cancelled);
    assert_eq!(client.state(), ClientState::Idle);
    assert_eq!(
        drain(&mut rx),
        vec![
            ClientEvent::SystemMessage(CANCELLED_NOTICE.to_string()),
            ClientEvent::StateChange(ClientState::Idle),
        ]
    );

    tokio::time::timeout(Duration::from_secs(5), closed.recv())
        .await
        .expect("connection closed after cancel");

    // Nothing trails the cancellation, and a second cancel stays silent.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!client.cancel());
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn new_request_after_cancel_streams_normally() {
    if ollama_conductor::utils::test_support::should_skip_httpmock() {
        return;
    }

    let (base_url, _closed) = stalling_server().await;
    let (client, mut rx) = client_for(base_url);

    client.chat("first").expect("dispatch");
    while next_event(&mut rx).await != ClientEvent::AssistantMessageStart("Hel".to_string()) {}
    assert!(client.cancel());
    drain(&mut rx);

    let second = client.chat("second").expect("dispatch after cancel");
    assert_ne!(second.id(), 0);
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::StateChange(ClientState::Running)
    );
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::UserMessage("second".to_string())
    );
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::SystemMessage(THINKING_NOTICE.to_string())
    );
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::SystemMessage("Wait stream ... second".to_string())
    );
    assert_eq!(
        next_event(&mut rx).await,
        ClientEvent::AssistantMessageStart("Hel".to_string())
    );
    assert!(client.cancel());
    assert_eq!(second.outcome().await, Outcome::Cancelled);
}

#[test]
fn cancel_before_any_request_is_a_no_op() {
    let (sink, mut rx) = ChannelSink::new();
    let client = OllamaClient::new(Arc::new(sink)).expect("client");

    assert!(!client.cancel());
    assert!(!client.cancel());
    assert_eq!(client.state(), ClientState::Idle);
    assert!(drain(&mut rx).is_empty());
}
