//! Integration tests for ScannerConnection
//!
//! A loopback TCP listener plays the scanner. Timing is shortened through
//! the connection config so the tests run in real time.

use std::time::Duration;

use scanbridge_core::{
    BarcodeStore, BridgeEvent, DebounceConfig, EventSink, RetryPolicy, ScannerAddress, ScannerRole,
};
use scanbridge_network::{ScannerConnection, ScannerConnectionConfig, ScannerError};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn fast_config() -> ScannerConnectionConfig {
    ScannerConnectionConfig::default()
        .with_retry(RetryPolicy::default().with_backoff(Duration::from_millis(20)))
        .with_connect_timeout(Duration::from_millis(500))
        .with_poll_interval(Duration::from_millis(10))
        .with_read_timeout(Duration::from_millis(50))
}

async fn fake_scanner() -> (TcpListener, ScannerAddress) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, ScannerAddress::new("127.0.0.1", port).unwrap())
}

fn drain(rx: &mut mpsc::Receiver<BridgeEvent>) -> Vec<BridgeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn barcode_of(event: &BridgeEvent) -> Option<&str> {
    match event {
        BridgeEvent::BarcodeNew { barcode, .. } | BridgeEvent::BarcodeDuplicate { barcode, .. } => {
            Some(barcode.as_str())
        }
        _ => None,
    }
}

/// New, duplicate and new again, then the scanner hangs up.
#[tokio::test]
async fn test_reads_until_scanner_closes() {
    let (listener, address) = fake_scanner().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(b"ABC123\r\nABC123\r\n").await.unwrap();
        stream.write_all(b"XYZ999\r\n").await.unwrap();
        stream.shutdown().await.unwrap();
    });

    let store = BarcodeStore::new();
    let (events, mut rx) = EventSink::channel();
    let config = fast_config().with_debounce(DebounceConfig::default().with_rate_limit_interval(Duration::ZERO));
    let connection = ScannerConnection::new(ScannerRole::Bottom, address.clone(), store.clone(), events)
        .with_config(config);

    let result = connection.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(ScannerError::ConnectionClosed(_))));

    let events = drain(&mut rx);
    assert_eq!(events.len(), 5);
    assert!(matches!(events[0], BridgeEvent::ConnectionEstablished { attempt: 1, .. }));
    assert!(matches!(events[1], BridgeEvent::BarcodeNew { .. }));
    assert!(matches!(events[2], BridgeEvent::BarcodeDuplicate { .. }));
    assert!(matches!(events[3], BridgeEvent::BarcodeNew { .. }));
    assert!(matches!(events[4], BridgeEvent::ConnectionLost { reset: true, .. }));

    let barcodes: Vec<_> = events.iter().filter_map(barcode_of).collect();
    assert_eq!(barcodes, vec!["ABC123", "ABC123", "XYZ999"]);

    let current = store.current().unwrap();
    assert_eq!(current.barcode.as_str(), "XYZ999");
    assert_eq!(current.source, address);
    assert_eq!(store.scanner_state(&address).unwrap().history().len(), 1);
}

#[tokio::test]
async fn test_read_inside_rate_limit_window_is_dropped() {
    let (listener, address) = fake_scanner().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(b"ABC123\r\nXYZ999\r\n").await.unwrap();
        stream.shutdown().await.unwrap();
    });

    let store = BarcodeStore::new();
    let (events, mut rx) = EventSink::channel();
    let config = fast_config().with_debounce(DebounceConfig::default().with_rate_limit_interval(Duration::from_secs(10)));
    let connection = ScannerConnection::new(ScannerRole::Top, address.clone(), store.clone(), events)
        .with_config(config);

    let _ = connection.run(CancellationToken::new()).await;

    let events = drain(&mut rx);
    let barcodes: Vec<_> = events.iter().filter_map(barcode_of).collect();
    assert_eq!(barcodes, vec!["ABC123"]);

    let state = store.scanner_state(&address).unwrap();
    assert_eq!(state.last_barcode().unwrap().as_str(), "ABC123");
    assert!(state.suppressed_notice_emitted());
}

#[tokio::test]
async fn test_read_timeout_keeps_connection() {
    let (listener, address) = fake_scanner().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        // Several read timeouts pass before the line arrives.
        tokio::time::sleep(Duration::from_millis(300)).await;
        stream.write_all(b"LATE01\r\n").await.unwrap();
        stream.shutdown().await.unwrap();
    });

    let (events, mut rx) = EventSink::channel();
    let connection = ScannerConnection::new(ScannerRole::Bottom, address, BarcodeStore::new(), events)
        .with_config(fast_config());
    let _ = connection.run(CancellationToken::new()).await;

    let events = drain(&mut rx);
    let barcodes: Vec<_> = events.iter().filter_map(barcode_of).collect();
    assert_eq!(barcodes, vec!["LATE01"]);
}

#[tokio::test]
async fn test_connect_retry_exhausted() {
    let (listener, address) = fake_scanner().await;
    drop(listener);

    let (events, mut rx) = EventSink::channel();
    let connection = ScannerConnection::new(ScannerRole::Bottom, address, BarcodeStore::new(), events)
        .with_config(fast_config());

    let result = connection.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(ScannerError::Io(_))));

    let events = drain(&mut rx);
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], BridgeEvent::ConnectionRetry { attempt: 1, max_attempts: 3, .. }));
    assert!(matches!(events[1], BridgeEvent::ConnectionRetry { attempt: 2, .. }));
    assert!(matches!(events[2], BridgeEvent::ConnectionFailed { attempt: 3, .. }));
    assert!(events[2].is_terminal());
}

#[tokio::test]
async fn test_cancel_open_connection_is_silent() {
    let (listener, address) = fake_scanner().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let (events, mut rx) = EventSink::channel();
    let connection = ScannerConnection::new(ScannerRole::Bottom, address, BarcodeStore::new(), events)
        .with_config(fast_config());

    let cancel = CancellationToken::new();
    let task = tokio::spawn(connection.run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();

    task.await.unwrap().unwrap();
    server.abort();

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], BridgeEvent::ConnectionEstablished { .. }));
}
