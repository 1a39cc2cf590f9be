//! End-to-end RPC scenarios over in-memory duplex streams.

use std::sync::Arc;
use std::time::Duration;

use milan_session::codec::LittleEndian;
use milan_session::runtime::{Context, Flag, never, select};
use milan_session::{
    Accept, Client, ClientOptions, Connect, Error, ErrorKind, Result, Server, ServerOptions,
    TcpAcceptor, TcpConnect,
};
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

milan_session::interface! {
    /// Remote key-value store used by most scenarios.
    pub trait KeyValue via KeyValueDispatch {
        fn get(key: String) -> String;
        fn put(key: String, value: String);
        fn sum(values: Vec<i64>) -> i64;
        fn fail(message: String) -> u32;
        fn hang();
    }
}

milan_session::interface! {
    /// Extension of [`KeyValue`] with one extra method.
    pub trait Writer: KeyValue via WriterDispatch + KeyValueDispatch {
        fn wipe() -> u64;
    }
}

milan_session::codec::dynamic_class! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct CallTag {
        pub tag: u64,
    }
    name = "rpc.CallTag";
}

struct Store {
    data: Mutex<std::collections::HashMap<String, String>>,
    entered_hang: Flag,
    hang_outcome: Mutex<Option<ErrorKind>>,
    seen_tag: Mutex<u64>,
}

impl Store {
    fn new() -> Arc<Self> {
        Arc::new(Store {
            data: Mutex::new(std::collections::HashMap::new()),
            entered_hang: Flag::new(),
            hang_outcome: Mutex::new(None),
            seen_tag: Mutex::new(0),
        })
    }
}

impl KeyValue for Store {
    async fn get(&self, key: String) -> Result<String> {
        *self.seen_tag.lock() = Context::current().get::<CallTag>().tag;
        match self.data.lock().get(&key) {
            Some(value) => Ok(value.clone()),
            None => Ok(format!("{}_poo", key)),
        }
    }

    async fn put(&self, key: String, value: String) -> Result<()> {
        self.data.lock().insert(key, value);
        Ok(())
    }

    async fn sum(&self, values: Vec<i64>) -> Result<i64> {
        Ok(values.iter().sum())
    }

    async fn fail(&self, message: String) -> Result<u32> {
        Err(Error::invalid_argument(message))
    }

    async fn hang(&self) -> Result<()> {
        self.entered_hang.set();
        match select((never(),)).await {
            Err(e) => {
                *self.hang_outcome.lock() = Some(e.kind());
                Err(e)
            }
            Ok(_) => Err(Error::invalid_state("never() completed")),
        }
    }
}

impl Writer for Store {
    async fn wipe(&self) -> Result<u64> {
        let mut data = self.data.lock();
        let count = data.len() as u64;
        data.clear();
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// In-memory transport plumbing
// ---------------------------------------------------------------------------

struct DuplexConnect {
    tx: mpsc::UnboundedSender<DuplexStream>,
}

impl Connect for DuplexConnect {
    type Stream = DuplexStream;

    async fn connect(&self) -> Result<DuplexStream> {
        let (client_half, server_half) = tokio::io::duplex(64 * 1024);
        self.tx
            .send(server_half)
            .map_err(|_| Error::io("acceptor is gone"))?;
        Ok(client_half)
    }
}

struct DuplexAcceptor {
    rx: mpsc::UnboundedReceiver<DuplexStream>,
}

impl Accept for DuplexAcceptor {
    type Stream = DuplexStream;

    async fn accept(&mut self) -> Result<DuplexStream> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| Error::shutting_down("no more clients"))
    }
}

fn pipe() -> (DuplexConnect, DuplexAcceptor) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DuplexConnect { tx }, DuplexAcceptor { rx })
}

/// Drops the first accepted connection to exercise client recovery.
struct FlakyAcceptor {
    inner: DuplexAcceptor,
    dropped_one: bool,
}

impl Accept for FlakyAcceptor {
    type Stream = DuplexStream;

    async fn accept(&mut self) -> Result<DuplexStream> {
        loop {
            let stream = self.inner.accept().await?;
            if self.dropped_one {
                return Ok(stream);
            }
            self.dropped_one = true;
            drop(stream);
        }
    }
}

struct Fixture {
    server: Arc<Server>,
    client: Client<DuplexConnect>,
    store: Arc<Store>,
}

fn start_with<A: Accept<Stream = DuplexStream>>(
    acceptor: A,
    connector: DuplexConnect,
    server_options: ServerOptions,
    client_options: ClientOptions,
) -> Fixture {
    let server = Arc::new(Server::new(server_options));
    let store = Store::new();
    server
        .register_object("writer", WriterDispatch::table(&store).unwrap())
        .unwrap();

    let serving = server.clone();
    tokio::spawn(async move {
        let _ = serving.serve(acceptor).await;
    });

    let client = Client::new(connector, client_options);
    Fixture {
        server,
        client,
        store,
    }
}

fn start(server_options: ServerOptions, client_options: ClientOptions) -> Fixture {
    let (connector, acceptor) = pipe();
    start_with(acceptor, connector, server_options, client_options)
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_returns_the_value() {
    let fixture = start(ServerOptions::default(), ClientOptions::default());
    let writer = fixture.client.object("writer");
    let value = writer.get("patata".to_string()).await.unwrap();
    assert_eq!(value, "patata_poo");
}

#[tokio::test]
async fn void_and_multi_argument_methods() {
    let fixture = start(ServerOptions::default(), ClientOptions::default());
    let writer = fixture.client.object("writer");

    writer
        .put("patata".to_string(), "frita".to_string())
        .await
        .unwrap();
    assert_eq!(writer.get("patata".to_string()).await.unwrap(), "frita");
    assert_eq!(writer.sum(vec![1, 2, 3, -1]).await.unwrap(), 5);
}

#[tokio::test]
async fn sequential_calls_reuse_the_connection() {
    let fixture = start(ServerOptions::default(), ClientOptions::default());
    let writer = fixture.client.object("writer");
    assert!(!fixture.client.is_ready());
    for i in 0..10u32 {
        let key = format!("k{}", i);
        writer.put(key.clone(), format!("v{}", i)).await.unwrap();
        assert_eq!(writer.get(key).await.unwrap(), format!("v{}", i));
    }
    assert!(fixture.client.is_ready());
}

#[tokio::test]
async fn responses_correlate_out_of_order_calls() {
    let fixture = start(ServerOptions::default(), ClientOptions::default());
    let writer = fixture.client.object("writer");

    // The hanging call occupies a worker; the quick one overtakes it.
    let hanging = fixture.client.object("writer");
    let slow_ctx = Context::root().child();
    let slow = tokio::spawn(
        slow_ctx
            .clone()
            .scope(async move { hanging.hang().await }),
    );
    fixture.store.entered_hang.wait_set().await;

    assert_eq!(writer.sum(vec![40, 2]).await.unwrap(), 42);

    slow_ctx.cancel();
    let outcome = slow.await.unwrap();
    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::Cancelled);
}

#[tokio::test]
async fn typed_errors_cross_the_wire() {
    let fixture = start(ServerOptions::default(), ClientOptions::default());
    let writer = fixture.client.object("writer");
    let err = writer.fail("bad temper".to_string()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(err.message(), "bad temper");
}

#[tokio::test]
async fn unknown_object_is_not_found() {
    let fixture = start(ServerOptions::default(), ClientOptions::default());
    let ghost = fixture.client.object("ghost");
    let err = ghost.get("x".to_string()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn unknown_method_is_not_found() {
    let fixture = start(ServerOptions::default(), ClientOptions::default());
    let writer = fixture.client.object("writer");
    let err = writer
        .call::<(String,), String>("no_such_method", 0x1234, ("x".to_string(),))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn signature_hash_mismatch_is_rejected() {
    let fixture = start(ServerOptions::default(), ClientOptions::default());
    let writer = fixture.client.object("writer");
    // Right name, wrong fingerprint: the peer must refuse to dispatch.
    let err = writer
        .call::<(String,), String>("get", 0xdead_beef, ("x".to_string(),))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataMismatch);
}

#[tokio::test]
async fn extended_interfaces_dispatch_base_and_own_methods() {
    let fixture = start(ServerOptions::default(), ClientOptions::default());
    let writer = fixture.client.object("writer");

    writer.put("a".to_string(), "1".to_string()).await.unwrap();
    writer.put("b".to_string(), "2".to_string()).await.unwrap();
    assert_eq!(writer.wipe().await.unwrap(), 2);
    assert_eq!(writer.get("a".to_string()).await.unwrap(), "a_poo");
}

#[tokio::test]
async fn every_extended_interface_is_independently_registrable() {
    let fixture = start(ServerOptions::default(), ClientOptions::default());
    // The same implementation, exposed a second time under its base
    // interface only.
    fixture
        .server
        .register_object(
            "store",
            KeyValueDispatch::table(&fixture.store).unwrap(),
        )
        .unwrap();

    let store = fixture.client.object("store");
    assert_eq!(store.sum(vec![20, 22]).await.unwrap(), 42);
    // The extension method is not reachable through the base surface.
    let err = store.wipe().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn client_deadline_expires_the_call() {
    let fixture = start(
        ServerOptions::default(),
        ClientOptions {
            request_timeout: Some(Duration::from_millis(150)),
            ..ClientOptions::default()
        },
    );
    let writer = fixture.client.object("writer");
    let started = std::time::Instant::now();
    let err = writer.hang().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    assert!(started.elapsed() < Duration::from_secs(30));

    // The server observed the same deadline through the wire context.
    wait_until("server-side deadline", || {
        fixture.store.hang_outcome.lock().is_some()
    })
    .await;
    assert_eq!(
        *fixture.store.hang_outcome.lock(),
        Some(ErrorKind::DeadlineExceeded)
    );
}

#[tokio::test]
async fn server_request_timeout_bounds_generous_clients() {
    let fixture = start(
        ServerOptions {
            request_timeout: Some(Duration::from_millis(100)),
            ..ServerOptions::default()
        },
        ClientOptions {
            request_timeout: Some(Duration::from_secs(3600)),
            ..ClientOptions::default()
        },
    );
    let writer = fixture.client.object("writer");
    // The client waits; the server gives up first and answers with the
    // handler's deadline error.
    let err = writer.hang().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
}

#[tokio::test]
async fn cancellation_reaches_the_handler() {
    let fixture = start(
        ServerOptions::default(),
        ClientOptions {
            request_timeout: Some(Duration::from_secs(10)),
            ..ClientOptions::default()
        },
    );
    let writer = fixture.client.object("writer");

    let call_ctx = Context::root().child();
    let call = tokio::spawn(
        call_ctx
            .clone()
            .scope(async move { writer.hang().await }),
    );

    fixture.store.entered_hang.wait_set().await;
    call_ctx.cancel();

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    // The CANCEL_REQUEST reaches the server and unwinds the handler.
    wait_until("handler cancellation", || {
        fixture.store.hang_outcome.lock().is_some()
    })
    .await;
    assert_eq!(
        *fixture.store.hang_outcome.lock(),
        Some(ErrorKind::Cancelled)
    );
}

#[tokio::test]
async fn context_values_propagate_to_the_handler() {
    let fixture = start(ServerOptions::default(), ClientOptions::default());
    let writer = fixture.client.object("writer");

    let call_ctx = Context::root().child();
    call_ctx.set(CallTag { tag: 7777 });
    let value = call_ctx
        .scope(async move { writer.get("patata".to_string()).await })
        .await
        .unwrap();
    assert_eq!(value, "patata_poo");
    assert_eq!(*fixture.store.seen_tag.lock(), 7777);
}

#[tokio::test]
async fn unregistering_prevents_new_dispatches() {
    let fixture = start(ServerOptions::default(), ClientOptions::default());
    let writer = fixture.client.object("writer");
    assert_eq!(writer.sum(vec![1]).await.unwrap(), 1);

    assert!(fixture.server.unregister_object("writer"));
    assert!(!fixture.server.unregister_object("writer"));

    let err = writer.sum(vec![1]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn duplicate_object_registration_is_rejected() {
    let fixture = start(ServerOptions::default(), ClientOptions::default());
    let err = fixture
        .server
        .register_object("writer", KeyValueDispatch::table(&fixture.store).unwrap())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn client_reconnects_after_a_broken_connection() {
    let (connector, acceptor) = pipe();
    let fixture = start_with(
        FlakyAcceptor {
            inner: acceptor,
            dropped_one: false,
        },
        connector,
        ServerOptions::default(),
        ClientOptions {
            request_timeout: Some(Duration::from_secs(2)),
            ..ClientOptions::default()
        },
    );
    let writer = fixture.client.object("writer");

    // First call lands on the connection the server resets.
    assert!(writer.get("patata".to_string()).await.is_err());
    // The next call dials a fresh connection and succeeds.
    let value = writer.get("patata".to_string()).await.unwrap();
    assert_eq!(value, "patata_poo");
}

#[tokio::test]
async fn server_shutdown_fails_pending_calls() {
    let fixture = start(ServerOptions::default(), ClientOptions::default());
    let writer = fixture.client.object("writer");
    assert_eq!(writer.sum(vec![2]).await.unwrap(), 2);

    let call_ctx = Context::root().child();
    call_ctx.set_timeout(Duration::from_secs(5));
    let hanging = fixture.client.object("writer");
    let call = tokio::spawn(
        call_ctx
            .clone()
            .scope(async move { hanging.hang().await }),
    );
    fixture.store.entered_hang.wait_set().await;

    fixture.server.shutdown();
    let err = call.await.unwrap().unwrap_err();
    // Either the broken connection or, at worst, the call deadline.
    assert!(matches!(
        err.kind(),
        ErrorKind::Eof | ErrorKind::Io | ErrorKind::DeadlineExceeded | ErrorKind::Cancelled
    ));
}

#[tokio::test]
async fn big_endian_dialect_end_to_end() {
    use milan_session::codec::BigEndian;

    let (connector, acceptor) = pipe();
    let server = Arc::new(Server::<BigEndian>::new(ServerOptions::default()));
    let store = Store::new();
    server
        .register_object("writer", WriterDispatch::table(&store).unwrap())
        .unwrap();
    let serving = server.clone();
    tokio::spawn(async move {
        let _ = serving.serve(acceptor).await;
    });

    let client = Client::<DuplexConnect, BigEndian>::new(connector, ClientOptions::default());
    let writer = client.object("writer");
    assert_eq!(
        writer.get("patata".to_string()).await.unwrap(),
        "patata_poo"
    );
    assert_eq!(writer.sum(vec![1, 2, 3]).await.unwrap(), 6);
}

#[tokio::test]
async fn tcp_transport_end_to_end() {
    let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
    let addr = acceptor.local_addr().unwrap();

    let server = Arc::new(Server::<LittleEndian>::new(ServerOptions::default()));
    let store = Store::new();
    server
        .register_object("writer", WriterDispatch::table(&store).unwrap())
        .unwrap();
    let serving = server.clone();
    tokio::spawn(async move {
        let _ = serving.serve(acceptor).await;
    });

    let client = Client::<_, LittleEndian>::new(
        TcpConnect::new(addr.to_string()),
        ClientOptions::default(),
    );
    let writer = client.object("writer");
    assert_eq!(
        writer.get("patata".to_string()).await.unwrap(),
        "patata_poo"
    );
    assert_eq!(writer.sum(vec![4, 5, 6]).await.unwrap(), 15);
}
