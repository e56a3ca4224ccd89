//! # TCP Server
//!
//! Accept loop, per-connection frame handling, and the housekeeping task.
//!
//! Each connection is an independent task: it reads into a bounded buffer,
//! drains every complete request frame the read delivered, executes each
//! one against the keyspace under a short-lived lock, and writes the framed
//! responses back in order. Framing violations close only the offending
//! connection.
//!
//! The housekeeper owns both timers. It sleeps until the earlier of the
//! oldest connection's idle deadline and the TTL heap's next expiry (with a
//! ten second ceiling when neither is pending), and is kicked awake early
//! whenever a command or a new connection may have produced a sooner
//! deadline.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use kestrel_common::{frame, OutBuf, MAX_MSG};
use kestrel_engine::{mono_us, Db};

use crate::dispatch::dispatch;
use crate::idle::{ConnToken, IdleTracker};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 1234;

/// Listen backlog.
const BACKLOG: u32 = 1024;

/// Sleep ceiling when no timer is pending.
const TIMER_CEILING: Duration = Duration::from_secs(10);

/// Server tuning knobs. The defaults are the served configuration; tests
/// shrink the idle timeout to exercise the reaper quickly.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Connections quiet for longer than this are closed.
    pub idle_timeout: Duration,
    /// Upper bound on keys expired per timer tick.
    pub expire_budget: usize,
    /// Worker threads for background disposal of large containers.
    pub disposal_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            idle_timeout: Duration::from_secs(5),
            expire_budget: 2000,
            disposal_threads: 4,
        }
    }
}

struct Shared {
    db: Mutex<Db>,
    idle: Mutex<IdleTracker>,
    idle_timeout_us: u64,
    expire_budget: usize,
    /// Re-arms the housekeeper when a sooner deadline may exist.
    timer_kick: Notify,
}

/// A bound listener plus the shared state its connections serve.
pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl Server {
    /// Binds the listening socket with `SO_REUSEADDR`.
    pub async fn bind(config: ServerConfig) -> io::Result<Server> {
        let socket = match config.addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(config.addr)?;
        let listener = socket.listen(BACKLOG)?;

        Ok(Server {
            listener,
            shared: Arc::new(Shared {
                db: Mutex::new(Db::new(config.disposal_threads)),
                idle: Mutex::new(IdleTracker::new()),
                idle_timeout_us: config.idle_timeout.as_micros() as u64,
                expire_budget: config.expire_budget,
                timer_kick: Notify::new(),
            }),
        })
    }

    /// The bound address; useful with an ephemeral port.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves connections until the task is dropped.
    pub async fn run(self) -> io::Result<()> {
        let Server { listener, shared } = self;
        info!(addr = %listener.local_addr()?, "listening");
        tokio::spawn(housekeeper(Arc::clone(&shared)));

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    let shared = Arc::clone(&shared);
                    let kill = Arc::new(Notify::new());
                    let token = shared.idle.lock().register(mono_us(), Arc::clone(&kill));
                    shared.timer_kick.notify_one();
                    tokio::spawn(async move {
                        if let Err(err) = handle_conn(stream, &shared, token, kill).await {
                            warn!(%peer, %err, "connection error");
                        }
                        shared.idle.lock().deregister(token);
                        debug!(%peer, "connection closed");
                    });
                }
                Err(err) => error!(%err, "accept failed"),
            }
        }
    }
}

/// Drives one connection through its request/response cycle.
async fn handle_conn(
    mut stream: TcpStream,
    shared: &Arc<Shared>,
    token: ConnToken,
    kill: Arc<Notify>,
) -> io::Result<()> {
    let mut rbuf = BytesMut::with_capacity(4 + MAX_MSG);
    let mut wbuf = Vec::new();
    let mut payload = OutBuf::new();

    loop {
        tokio::select! {
            _ = kill.notified() => {
                info!("closing idle connection");
                return Ok(());
            }
            read = stream.read_buf(&mut rbuf) => {
                if read? == 0 {
                    if !rbuf.is_empty() {
                        warn!("unexpected eof inside a frame");
                    }
                    return Ok(());
                }
                shared.idle.lock().touch(token, mono_us());

                wbuf.clear();
                loop {
                    let args = match frame::take_frame(&mut rbuf) {
                        Ok(Some(args)) => args,
                        Ok(None) => break,
                        Err(err) => {
                            warn!(%err, "dropping connection");
                            return Ok(());
                        }
                    };
                    payload.clear();
                    {
                        let mut db = shared.db.lock();
                        dispatch(&mut db, args, &mut payload);
                    }
                    frame::write_frame(payload.as_bytes(), &mut wbuf);
                }
                if !wbuf.is_empty() {
                    stream.write_all(&wbuf).await?;
                }
                shared.timer_kick.notify_one();
            }
        }
    }
}

async fn housekeeper(shared: Arc<Shared>) {
    loop {
        let wait = next_timer(&shared);
        tokio::select! {
            _ = sleep(wait) => {}
            _ = shared.timer_kick.notified() => {}
        }
        process_timers(&shared);
    }
}

/// Time until the next deadline across the idle list and the TTL heap.
fn next_timer(shared: &Shared) -> Duration {
    let now_us = mono_us();
    let idle = shared.idle.lock().next_deadline_us(shared.idle_timeout_us);
    let ttl = shared.db.lock().next_expiry_us();
    let next_us = match (idle, ttl) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    match next_us {
        None => TIMER_CEILING,
        Some(at) if at <= now_us => Duration::ZERO,
        Some(at) => Duration::from_micros(at - now_us).min(TIMER_CEILING),
    }
}

fn process_timers(shared: &Shared) {
    // One extra millisecond absorbs timer granularity.
    let now_us = mono_us() + 1000;

    let kills = shared
        .idle
        .lock()
        .pop_expired(now_us.saturating_sub(shared.idle_timeout_us));
    if !kills.is_empty() {
        info!(count = kills.len(), "evicting idle connections");
        for kill in &kills {
            kill.notify_one();
        }
    }

    let expired = shared.db.lock().expire_due(now_us, shared.expire_budget);
    if expired > 0 {
        debug!(count = expired, "expired keys");
    }
}
