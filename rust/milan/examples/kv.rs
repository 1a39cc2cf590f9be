//! Minimal key-value service: server and client in one process.
//!
//! ```sh
//! cargo run -p milan --example kv
//! ```

use milan::LittleEndian;
use milan::prelude::*;
use parking_lot::Mutex;
use std::collections::HashMap;

milan::interface! {
    /// A remote key-value store.
    pub trait KeyValue via KeyValueDispatch {
        fn get(key: String) -> String;
        fn put(key: String, value: String);
    }
}

struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl KeyValue for MemoryStore {
    async fn get(&self, key: String) -> Result<String> {
        self.data
            .lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("no entry for {}", key)))
    }

    async fn put(&self, key: String, value: String) -> Result<()> {
        self.data.lock().insert(key, value);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let acceptor = TcpAcceptor::bind("127.0.0.1:0").await?;
    let addr = acceptor.local_addr()?;

    let server = Arc::new(Server::<LittleEndian>::new(ServerOptions::default()));
    let store = Arc::new(MemoryStore {
        data: Mutex::new(HashMap::new()),
    });
    server.register_object("kv", KeyValueDispatch::table(&store)?)?;

    let serving = server.clone();
    tokio::spawn(async move {
        if let Err(e) = serving.serve(acceptor).await {
            eprintln!("server stopped: {}", e);
        }
    });

    let client =
        Client::<_, LittleEndian>::new(TcpConnect::new(addr.to_string()), ClientOptions::default());
    let kv = client.object("kv");

    kv.put("greeting".to_string(), "hola".to_string()).await?;
    println!("greeting = {}", kv.get("greeting".to_string()).await?);

    match kv.get("missing".to_string()).await {
        Err(e) if e.kind() == ErrorKind::NotFound => println!("missing key: {}", e),
        other => println!("unexpected outcome: {:?}", other),
    }

    server.shutdown();
    Ok(())
}
