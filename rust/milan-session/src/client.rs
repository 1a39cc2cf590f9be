//! Client dispatcher.
//!
//! One [`Client`] owns one logical connection: a lazily established
//! stream, a pending table correlating request ids to promises, a
//! receiver daemon demultiplexing responses, and a housekeeping daemon
//! that sweeps expired requests and forwards cancellations to the
//! server. Proxies obtained through [`Client::object`] share the
//! connection.
//!
//! An I/O failure fails every pending request, marks the connection
//! not-ready and lets the next call reconnect through the [`Connect`]
//! factory.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::io::{ReadHalf, WriteHalf};
use tracing::{debug, warn};

use milan_codec::{Decode, Decoder, Encode, Encoder, LittleEndian, WireOrder, decode_one};
use milan_frame::{DEFAULT_MAX_PACKET_SIZE, Mac, ProtectedReader, ProtectedWriter};
use milan_runtime::{BoundedQueue, Context, Flag, FutureValue, Promise, never, promise, select};
use milan_wire::{Error, ErrorKind, MessageType, Result};

use crate::interface::ProxyHandle;
use crate::result::ResultHolder;
use crate::transport::Connect;

/// Per-client tuning knobs.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Timeout applied to each request (defaults to one hour).
    pub request_timeout: Option<Duration>,
    /// Capacity of the new-deadline and cancelled-request queues.
    pub max_queued_events: usize,
    /// Key for the frame MAC; both peers must agree.
    pub mac_key: [u64; 4],
    /// Maximum frame payload accepted or produced.
    pub max_packet_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            request_timeout: Some(Duration::from_secs(3600)),
            max_queued_events: 256,
            mac_key: milan_frame::DEFAULT_MAC_KEY,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

struct PendingEntry {
    deadline: Option<SystemTime>,
    promise: Promise<Bytes>,
}

struct PendingTable {
    next_id: u32,
    entries: HashMap<u32, PendingEntry>,
}

struct ClientShared<C: Connect, O: WireOrder> {
    options: ClientOptions,
    connector: C,
    pending: parking_lot::Mutex<PendingTable>,
    /// Send mutex and connection state in one: `None` means not
    /// connected; the next send dials through the connector.
    writer: tokio::sync::Mutex<Option<ProtectedWriter<WriteHalf<C::Stream>>>>,
    ready: Flag,
    /// Read halves handed to the receiver daemon as connections come up.
    readers: BoundedQueue<ProtectedReader<ReadHalf<C::Stream>>>,
    new_deadlines: BoundedQueue<()>,
    cancelled: BoundedQueue<u32>,
    _order: PhantomData<fn() -> O>,
}

/// RPC client over a stream transport.
pub struct Client<C: Connect, O: WireOrder = LittleEndian> {
    shared: Arc<ClientShared<C, O>>,
    ctx: Context,
}

impl<C: Connect, O: WireOrder> Client<C, O> {
    /// Create a client and start its daemons. Must be called from
    /// within a tokio runtime; the connection itself is only dialed on
    /// the first call.
    pub fn new(connector: C, options: ClientOptions) -> Self {
        let shared = Arc::new(ClientShared {
            readers: BoundedQueue::new(4),
            new_deadlines: BoundedQueue::new(options.max_queued_events),
            cancelled: BoundedQueue::new(options.max_queued_events),
            options,
            connector,
            pending: parking_lot::Mutex::new(PendingTable {
                next_id: 0,
                entries: HashMap::new(),
            }),
            writer: tokio::sync::Mutex::new(None),
            ready: Flag::new(),
            _order: PhantomData,
        });

        let ctx = Context::root().child();
        tokio::spawn(ctx.child().scope(receive_loop(shared.clone())));
        tokio::spawn(ctx.child().scope(housekeeping_loop(shared.clone())));

        Client { shared, ctx }
    }

    /// Proxy for the remote object registered under `name`. With an
    /// interface trait in scope, its methods can be called on the
    /// returned handle directly.
    pub fn object(&self, name: impl Into<String>) -> RemoteObject<C, O> {
        RemoteObject {
            shared: self.shared.clone(),
            name: name.into(),
        }
    }

    /// Whether the underlying connection is currently established.
    pub fn is_ready(&self) -> bool {
        self.shared.ready.is_set()
    }

    /// Stop the daemons and fail all pending requests.
    pub fn shutdown(&self) {
        self.ctx.cancel();
        self.shared
            .broadcast_error(Error::shutting_down("client shut down"));
    }
}

impl<C: Connect, O: WireOrder> Drop for Client<C, O> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A named object on the other side of a client's connection.
pub struct RemoteObject<C: Connect, O: WireOrder = LittleEndian> {
    shared: Arc<ClientShared<C, O>>,
    name: String,
}

impl<C: Connect, O: WireOrder> Clone for RemoteObject<C, O> {
    fn clone(&self) -> Self {
        RemoteObject {
            shared: self.shared.clone(),
            name: self.name.clone(),
        }
    }
}

impl<C: Connect, O: WireOrder> RemoteObject<C, O> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Issue one call: encode, correlate, await, decode.
    pub async fn call<Args, R>(
        &self,
        method: &'static str,
        method_hash: u32,
        args: Args,
    ) -> Result<R>
    where
        Args: Encode,
        R: Decode,
    {
        // Per-invocation child context; the client-side request timeout
        // is folded in as a deadline minimum.
        let ctx = Context::current().child();
        if let Some(timeout) = self.shared.options.request_timeout {
            ctx.set_timeout(timeout);
        }

        let (req_id, response) = self
            .shared
            .send_request(&self.name, method, method_hash, &args, &ctx)
            .await?;

        match ctx.clone().scope(response.get()).await {
            Ok(bytes) => {
                let holder: ResultHolder<R> = decode_one::<O, _>(&bytes)?;
                holder.into_result()
            }
            Err(e) if e.kind() == ErrorKind::Cancelled => {
                // Tell the server, best effort, and unwind locally.
                self.shared.cancel_request(req_id);
                Err(e)
            }
            Err(e) if e.kind() == ErrorKind::DeadlineExceeded => {
                self.shared.abandon_request(req_id, e.clone());
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

impl<C: Connect, O: WireOrder> ProxyHandle for RemoteObject<C, O> {
    fn call_remote<Args, R>(
        &self,
        method: &'static str,
        method_hash: u32,
        args: Args,
    ) -> impl std::future::Future<Output = Result<R>> + Send
    where
        Args: Encode + Send + Sync + 'static,
        R: Decode + Send + 'static,
    {
        let this = self.clone();
        async move { this.call(method, method_hash, args).await }
    }
}

impl<C: Connect, O: WireOrder> ClientShared<C, O> {
    async fn send_request(
        &self,
        object: &str,
        method: &str,
        method_hash: u32,
        args: &impl Encode,
        ctx: &Context,
    ) -> Result<(u32, FutureValue<Bytes>)> {
        // Allocate the id and install the pending entry first, so a
        // response racing the send cannot miss it.
        let deadline = ctx.deadline();
        let (req_id, response) = {
            let mut pending = self.pending.lock();
            let id = pending.next_id;
            pending.next_id = pending.next_id.wrapping_add(1);
            let (tx, rx) = promise::<Bytes>();
            pending.entries.insert(
                id,
                PendingEntry {
                    deadline,
                    promise: tx,
                },
            );
            (id, rx)
        };
        if deadline.is_some() {
            // Wake the housekeeping task so it can re-arm its timer.
            let _ = self.new_deadlines.maybe_put(());
        }

        let mut frame = Vec::new();
        let mut enc = Encoder::<O>::new(&mut frame);
        enc.put_u8(MessageType::Request.as_u8());
        enc.put_u32(req_id);
        let encode_result = (|| -> Result<()> {
            enc.encode(object)?;
            enc.encode(method)?;
            enc.put_u64(method_hash as u64);
            enc.encode(&ctx.to_wire())?;
            enc.encode(args)
        })();
        if let Err(e) = encode_result {
            self.abandon_request(req_id, e.clone());
            return Err(e);
        }

        if let Err(e) = self.send(&frame).await {
            self.abandon_request(req_id, e.clone());
            return Err(e);
        }
        Ok((req_id, response))
    }

    /// Send one frame under the send mutex, connecting lazily.
    async fn send(&self, frame: &[u8]) -> Result<()> {
        let mut slot = self.writer.lock().await;

        if slot.is_none() {
            let stream = self.connector.connect().await?;
            let (read_half, write_half) = tokio::io::split(stream);
            let mac = Mac::new(self.options.mac_key);
            let reader = ProtectedReader::with_max_packet_size(
                read_half,
                mac,
                self.options.max_packet_size,
            );
            self.readers.put(reader).await?;
            *slot = Some(ProtectedWriter::with_max_packet_size(
                write_half,
                mac,
                self.options.max_packet_size,
            ));
            self.ready.set();
            debug!("client connection established");
        }

        let writer = match slot.as_mut() {
            Some(writer) => writer,
            None => return Err(Error::invalid_state("connection setup did not complete")),
        };
        match writer.send(frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                *slot = None;
                self.ready.reset();
                Err(e)
            }
        }
    }

    fn set_response(&self, req_id: u32, body: Bytes) {
        let mut pending = self.pending.lock();
        match pending.entries.remove(&req_id) {
            Some(mut entry) => {
                entry.promise.set_value(body);
            }
            None => debug!(req_id, "response for an unknown or abandoned request"),
        }
    }

    fn abandon_request(&self, req_id: u32, error: Error) {
        let mut pending = self.pending.lock();
        if let Some(mut entry) = pending.entries.remove(&req_id) {
            entry.promise.set_error(error);
        }
    }

    /// Abandon locally and queue a best-effort server-side cancel.
    fn cancel_request(&self, req_id: u32) {
        self.abandon_request(req_id, Error::cancelled("request cancelled"));
        let _ = self.cancelled.maybe_put(req_id);
    }

    fn broadcast_error(&self, error: Error) {
        let mut pending = self.pending.lock();
        for (_, mut entry) in pending.entries.drain() {
            entry.promise.set_error(error.clone());
        }
    }

    async fn connection_broken(&self, error: Error) {
        {
            let mut slot = self.writer.lock().await;
            *slot = None;
        }
        self.ready.reset();
        if error.kind() == ErrorKind::Eof {
            debug!("connection closed by peer");
        } else {
            warn!(error = %error, "connection failed");
        }
        self.broadcast_error(error);
    }

    fn earliest_deadline(&self) -> Option<SystemTime> {
        self.pending
            .lock()
            .entries
            .values()
            .filter_map(|entry| entry.deadline)
            .min()
    }

    /// Drop every entry whose deadline has passed.
    fn sweep_expired(&self) {
        let now = SystemTime::now();
        let mut pending = self.pending.lock();
        pending.entries.retain(|_, entry| match entry.deadline {
            Some(deadline) if deadline <= now => {
                entry
                    .promise
                    .set_error(Error::deadline_exceeded("request timed out"));
                false
            }
            _ => true,
        });
    }

    async fn send_cancel(&self, req_id: u32) {
        let mut frame = Vec::new();
        let mut enc = Encoder::<O>::new(&mut frame);
        enc.put_u8(MessageType::CancelRequest.as_u8());
        enc.put_u32(req_id);
        // Best effort: a broken connection already failed the request.
        if let Err(e) = self.send(&frame).await {
            debug!(req_id, error = %e, "dropping cancel request");
        }
    }
}

/// Receiver daemon: demultiplex responses into the pending table.
async fn receive_loop<C: Connect, O: WireOrder>(shared: Arc<ClientShared<C, O>>) {
    let ctx = Context::current();
    loop {
        let mut reader = match shared.readers.get().await {
            Ok(reader) => reader,
            // Client context cancelled: daemon winds down.
            Err(_) => return,
        };
        loop {
            let frame = match ctx.run(reader.recv()).await.and_then(|inner| inner) {
                Ok(frame) => frame,
                Err(e) if e.kind() == ErrorKind::Cancelled => return,
                Err(e) => {
                    shared.connection_broken(e).await;
                    break;
                }
            };
            if let Err(e) = handle_frame(&shared, frame) {
                shared.connection_broken(e).await;
                break;
            }
        }
    }
}

fn handle_frame<C: Connect, O: WireOrder>(
    shared: &ClientShared<C, O>,
    frame: Bytes,
) -> Result<()> {
    let mut dec = Decoder::<O>::new(&frame);
    let message_type = MessageType::try_from(dec.get_u8()?)?;
    let req_id = dec.get_u32()?;
    match message_type {
        MessageType::Response => {
            let body = Bytes::copy_from_slice(dec.take_rest());
            shared.set_response(req_id, body);
            Ok(())
        }
        other => Err(Error::data_mismatch(format!(
            "client received a {} message",
            other
        ))),
    }
}

/// Housekeeping daemon: expire deadlines and forward cancellations.
async fn housekeeping_loop<C: Connect, O: WireOrder>(shared: Arc<ClientShared<C, O>>) {
    loop {
        let deadline_timer: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
            match shared.earliest_deadline() {
                Some(when) => Box::pin(milan_runtime::at(when)),
                None => Box::pin(never()),
            };

        let (deadline_added, cancel, expired) = match select((
            shared.new_deadlines.get(),
            shared.cancelled.get(),
            deadline_timer,
        ))
        .await
        {
            Ok(ready) => ready,
            // Client context cancelled.
            Err(_) => return,
        };

        if expired.is_some() {
            shared.sweep_expired();
        }
        match cancel {
            Some(Ok(req_id)) => shared.send_cancel(req_id).await,
            Some(Err(_)) => return,
            None => {}
        }
        if let Some(Err(_)) = deadline_added {
            return;
        }
        // A new earliest deadline re-arms the timer on the next turn.
    }
}
