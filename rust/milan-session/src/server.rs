//! Server dispatcher.
//!
//! A [`Server`] owns a set of registered objects and serves connections
//! produced by an [`Accept`]or. Each connection gets a receive loop and
//! a send task; decoded requests are executed on the server's worker
//! pool under a per-request context, so handlers can be cancelled out
//! of band and are bounded by the tighter of the client deadline and
//! the server's own request timeout. Responses are correlated by id and
//! may complete in any order.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use milan_codec::{Decoder, Encoder, LittleEndian, WireOrder};
use milan_frame::{DEFAULT_MAX_PACKET_SIZE, Mac, ProtectedReader, ProtectedWriter};
use milan_runtime::{BoundedQueue, Context, ContextWire, Semaphore, WorkerPool};
use milan_wire::{Error, ErrorKind, MessageType, Result};

use crate::interface::{DispatchTable, Handler};
use crate::result::ResultHolder;
use crate::transport::Accept;

/// Per-server tuning knobs.
#[derive(Clone, Debug)]
pub struct ServerOptions {
    /// Timeout imposed on each request in addition to the client's
    /// deadline (defaults to one hour).
    pub request_timeout: Option<Duration>,
    /// Worker tasks executing request bodies.
    pub worker_threads: usize,
    /// Capacity of the request queue feeding the workers.
    pub queue_size: usize,
    /// Cap on concurrently served connections.
    pub max_connections: usize,
    /// Capacity of each connection's outbound response queue.
    pub response_queue: usize,
    /// Key for the frame MAC; both peers must agree.
    pub mac_key: [u64; 4],
    /// Maximum frame payload accepted or produced.
    pub max_packet_size: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        ServerOptions {
            request_timeout: Some(Duration::from_secs(3600)),
            worker_threads: 2 * parallelism,
            queue_size: 1024,
            max_connections: 1024,
            response_queue: 256,
            mac_key: milan_frame::DEFAULT_MAC_KEY,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

struct ObjectEntry<O: WireOrder> {
    table: Arc<DispatchTable<O>>,
}

struct RequestRecord {
    ctx: Context,
}

type RequestKey = (u64, u32);

struct ServerShared<O: WireOrder> {
    options: ServerOptions,
    objects: parking_lot::Mutex<HashMap<String, ObjectEntry<O>>>,
    requests: parking_lot::Mutex<HashMap<RequestKey, RequestRecord>>,
    pool: WorkerPool,
    connections: Semaphore,
    next_connection: AtomicU64,
    _order: PhantomData<fn() -> O>,
}

/// RPC server hosting named objects over stream connections.
pub struct Server<O: WireOrder = LittleEndian> {
    shared: Arc<ServerShared<O>>,
    ctx: Context,
}

impl<O: WireOrder> Server<O> {
    /// Create a server and its worker pool. Must be called from within
    /// a tokio runtime.
    pub fn new(options: ServerOptions) -> Self {
        let pool = WorkerPool::new(options.worker_threads, options.queue_size);
        let connections = Semaphore::new(options.max_connections);
        let shared = Arc::new(ServerShared {
            options,
            objects: parking_lot::Mutex::new(HashMap::new()),
            requests: parking_lot::Mutex::new(HashMap::new()),
            pool,
            connections,
            next_connection: AtomicU64::new(0),
            _order: PhantomData,
        });
        Server {
            shared,
            ctx: Context::root().child(),
        }
    }

    /// Expose an implementation under `name`. The name must be free;
    /// re-registering requires unregistering first.
    pub fn register_object(
        &self,
        name: impl Into<String>,
        table: DispatchTable<O>,
    ) -> Result<()> {
        let name = name.into();
        let mut objects = self.shared.objects.lock();
        if objects.contains_key(&name) {
            return Err(Error::invalid_state(format!(
                "object {} is already registered",
                name
            )));
        }
        objects.insert(
            name,
            ObjectEntry {
                table: Arc::new(table),
            },
        );
        Ok(())
    }

    /// Stop dispatching to `name`. In-flight requests keep their own
    /// reference to the implementation and finish undisturbed.
    pub fn unregister_object(&self, name: &str) -> bool {
        self.shared.objects.lock().remove(name).is_some()
    }

    /// Accept and serve connections until the server is shut down.
    pub async fn serve<A: Accept<Stream = S>, S>(&self, mut acceptor: A) -> Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let serve_ctx = self.ctx.child();
        let shared = self.shared.clone();
        serve_ctx
            .scope(async move {
                loop {
                    let permit = shared.connections.acquire().await?;
                    let stream = match Context::current().run(acceptor.accept()).await {
                        Ok(accepted) => accepted?,
                        Err(e) => return Err(e),
                    };
                    let conn_id = shared.next_connection.fetch_add(1, Ordering::Relaxed);
                    debug!(conn_id, "accepted connection");
                    let shared = shared.clone();
                    milan_runtime::spawn(async move {
                        run_connection(shared, conn_id, stream).await;
                        drop(permit);
                    });
                }
            })
            .await
    }

    /// Cancel the accept loop, every connection task and the pool.
    pub fn shutdown(&self) {
        self.ctx.cancel();
        self.shared.pool.shutdown();
    }
}

impl<O: WireOrder> Drop for Server<O> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Per-connection duplex state machine: an inline receive loop plus a
/// spawned send task draining the response queue.
async fn run_connection<O, S>(shared: Arc<ServerShared<O>>, conn_id: u64, stream: S)
where
    O: WireOrder,
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    let mac = Mac::new(shared.options.mac_key);
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader =
        ProtectedReader::with_max_packet_size(read_half, mac, shared.options.max_packet_size);
    let mut writer =
        ProtectedWriter::with_max_packet_size(write_half, mac, shared.options.max_packet_size);

    let responses: BoundedQueue<Vec<u8>> = BoundedQueue::new(shared.options.response_queue);
    let conn_ctx = Context::current();

    let send_task = milan_runtime::spawn({
        let responses = responses.clone();
        let receive_half = conn_ctx.clone();
        async move {
            loop {
                let body = match responses.get().await {
                    Ok(body) => body,
                    // Queue closed (teardown) or context cancelled.
                    Err(_) => break,
                };
                if let Err(e) = writer.send(&body).await {
                    warn!(conn_id, error = %e, "send failed; tearing connection down");
                    // Stop accepting responses and unblock the receive
                    // half so the connection can quiesce.
                    responses.close();
                    receive_half.cancel();
                    break;
                }
            }
        }
    });

    let teardown_cause = loop {
        let frame = match conn_ctx.run(reader.recv()).await.and_then(|inner| inner) {
            Ok(frame) => frame,
            Err(e) => break e,
        };
        if let Err(e) = handle_frame(&shared, conn_id, &responses, frame).await {
            break e;
        }
    };
    match teardown_cause.kind() {
        ErrorKind::Eof | ErrorKind::Cancelled => {
            debug!(conn_id, cause = %teardown_cause, "connection closing")
        }
        _ => warn!(conn_id, cause = %teardown_cause, "connection torn down"),
    }

    // Let the send half drain what is already queued, then wait for it
    // to quiesce before releasing the connection slot.
    responses.close();
    let _ = send_task.await;
}

async fn handle_frame<O: WireOrder>(
    shared: &Arc<ServerShared<O>>,
    conn_id: u64,
    responses: &BoundedQueue<Vec<u8>>,
    frame: Bytes,
) -> Result<()> {
    let mut dec = Decoder::<O>::new(&frame);
    let message_type = MessageType::try_from(dec.get_u8()?)?;
    let req_id = dec.get_u32()?;
    match message_type {
        MessageType::Request => {
            let body = Bytes::copy_from_slice(dec.take_rest());
            dispatch(shared, conn_id, req_id, body, responses.clone()).await
        }
        MessageType::CancelRequest => {
            let requests = shared.requests.lock();
            match requests.get(&(conn_id, req_id)) {
                Some(record) => record.ctx.cancel(),
                None => debug!(conn_id, req_id, "cancel for an unknown request"),
            }
            Ok(())
        }
        MessageType::Response => {
            Err(Error::data_mismatch("server received a response message"))
        }
    }
}

/// Register the request record and hand the body to the worker pool.
/// Submission blocks when the pool queue is full, which backpressures
/// this connection's receive loop.
async fn dispatch<O: WireOrder>(
    shared: &Arc<ServerShared<O>>,
    conn_id: u64,
    req_id: u32,
    body: Bytes,
    responses: BoundedQueue<Vec<u8>>,
) -> Result<()> {
    let key: RequestKey = (conn_id, req_id);
    // The record's context is rooted, not tied to the connection:
    // teardown drops responses, it does not abort handlers.
    let record_ctx = Context::root().child();
    {
        let mut requests = shared.requests.lock();
        if requests.contains_key(&key) {
            debug!(conn_id, req_id, "duplicate request id; dropping");
            return Ok(());
        }
        requests.insert(
            key,
            RequestRecord {
                ctx: record_ctx.clone(),
            },
        );
    }

    let job_shared = shared.clone();
    let job = async move {
        let response = execute(&job_shared, req_id, &body, &record_ctx).await;
        if responses.put(response).await.is_err() {
            debug!(conn_id, req_id, "connection gone; response dropped");
        }
        job_shared.requests.lock().remove(&key);
    };

    match shared.pool.submit(job).await {
        Ok(()) => Ok(()),
        Err(e) => {
            shared.requests.lock().remove(&key);
            Err(e)
        }
    }
}

/// Produce the full RESPONSE frame body for one request. Failures
/// before the handler runs become an encoded error result.
async fn execute<O: WireOrder>(
    shared: &Arc<ServerShared<O>>,
    req_id: u32,
    body: &Bytes,
    record_ctx: &Context,
) -> Vec<u8> {
    let result_bytes = match execute_inner(shared, body, record_ctx).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let holder = ResultHolder::<()>::from_error(&e);
            milan_codec::encode_one::<O, _>(&holder).unwrap_or_default()
        }
    };

    let mut frame = Vec::with_capacity(result_bytes.len() + 8);
    let mut enc = Encoder::<O>::new(&mut frame);
    enc.put_u8(MessageType::Response.as_u8());
    enc.put_u32(req_id);
    enc.put_bytes(&result_bytes);
    frame
}

async fn execute_inner<O: WireOrder>(
    shared: &Arc<ServerShared<O>>,
    body: &Bytes,
    record_ctx: &Context,
) -> Result<Vec<u8>> {
    let mut dec = Decoder::<O>::new(body);
    let object_name: String = dec.decode()?;
    let method_name: String = dec.decode()?;
    let wire_hash = dec.get_u64()?;
    let method_hash = u32::try_from(wire_hash)
        .map_err(|_| Error::data_mismatch("method hash out of range"))?;

    let handler: Handler = {
        let objects = shared.objects.lock();
        let entry = objects
            .get(&object_name)
            .ok_or_else(|| Error::not_found(format!("object {} not found", object_name)))?;
        entry.table.lookup(&method_name, method_hash)?
    };

    // Client context, tightened by the server-side request timeout.
    let wire_ctx: ContextWire = dec.decode()?;
    let handler_ctx = record_ctx.child();
    handler_ctx.apply_wire(wire_ctx);
    if let Some(timeout) = shared.options.request_timeout {
        handler_ctx.set_timeout(timeout);
    }

    let args = Bytes::copy_from_slice(dec.take_rest());
    handler_ctx.scope(handler(args)).await
}
