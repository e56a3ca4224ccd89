//! # Synchronous Client
//!
//! Blocking facade over one TCP connection: encode a request frame, write
//! it, read exactly one length-prefixed response, parse it into a typed
//! value. Server-side error replies surface as [`ClientError::Server`].

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;

use kestrel_common::{encode_request, parse_value, FrameError, Value, MAX_MSG};

/// Result type for client calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network failure while reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Framing or value-encoding violation on the wire.
    #[error("wire error: {0}")]
    Frame(#[from] FrameError),
    /// The server answered with an error reply.
    #[error("server error (code {code})")]
    Server { code: u32, message: Vec<u8> },
    /// The reply type did not match the command.
    #[error("unexpected response")]
    UnexpectedResponse,
}

/// PTTL reply, decoded from the sentinel integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlReply {
    /// Key does not exist.
    Missing,
    /// Key exists without an expiration.
    NoExpiry,
    /// Milliseconds until expiry.
    RemainingMs(i64),
}

/// Blocking client over a single connection.
pub struct Client {
    stream: TcpStream,
    wbuf: Vec<u8>,
    rbuf: Vec<u8>,
}

impl Client {
    pub fn connect(addr: impl ToSocketAddrs) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr)?;
        // Small request/response pairs; latency matters more than batching.
        stream.set_nodelay(true)?;
        Ok(Client {
            stream,
            wbuf: Vec::with_capacity(256),
            rbuf: vec![0u8; MAX_MSG],
        })
    }

    /// Applies a read and write timeout to all following calls.
    pub fn set_op_timeout(&self, timeout: Option<Duration>) -> ClientResult<()> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)?;
        Ok(())
    }

    /// Sends one request and reads its response.
    pub fn exec(&mut self, args: &[&[u8]]) -> ClientResult<Value> {
        self.wbuf.clear();
        encode_request(args, &mut self.wbuf)?;
        self.stream.write_all(&self.wbuf)?;

        let mut len_bytes = [0u8; 4];
        self.stream.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_MSG {
            return Err(ClientError::Frame(FrameError::Oversize));
        }
        self.stream.read_exact(&mut self.rbuf[..len])?;
        Ok(parse_value(&self.rbuf[..len])?)
    }

    pub fn get(&mut self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        match self.checked(&[b"get", key])? {
            Value::Str(value) => Ok(Some(value)),
            Value::Nil => Ok(None),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        match self.checked(&[b"set", key, value])? {
            Value::Nil => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Deletes a key, reporting whether it existed.
    pub fn del(&mut self, key: &[u8]) -> ClientResult<bool> {
        match self.checked(&[b"del", key])? {
            Value::Int(n) => Ok(n == 1),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn keys(&mut self) -> ClientResult<Vec<Vec<u8>>> {
        match self.checked(&[b"keys"])? {
            Value::Arr(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Str(key) => Ok(key),
                    _ => Err(ClientError::UnexpectedResponse),
                })
                .collect(),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets (`ttl_ms >= 0`) or clears (`ttl_ms < 0`) a key's TTL.
    pub fn pexpire(&mut self, key: &[u8], ttl_ms: i64) -> ClientResult<bool> {
        let ttl = ttl_ms.to_string();
        match self.checked(&[b"pexpire", key, ttl.as_bytes()])? {
            Value::Int(n) => Ok(n == 1),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn pttl(&mut self, key: &[u8]) -> ClientResult<TtlReply> {
        match self.checked(&[b"pttl", key])? {
            Value::Int(-2) => Ok(TtlReply::Missing),
            Value::Int(-1) => Ok(TtlReply::NoExpiry),
            Value::Int(ms) if ms >= 0 => Ok(TtlReply::RemainingMs(ms)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Adds a member, reporting whether it was new.
    pub fn zadd(&mut self, key: &[u8], score: f64, member: &[u8]) -> ClientResult<bool> {
        let score = score.to_string();
        match self.checked(&[b"zadd", key, score.as_bytes(), member])? {
            Value::Int(n) => Ok(n == 1),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Removes a member. `None` means the whole set is missing.
    pub fn zrem(&mut self, key: &[u8], member: &[u8]) -> ClientResult<Option<bool>> {
        match self.checked(&[b"zrem", key, member])? {
            Value::Int(n) => Ok(Some(n == 1)),
            Value::Nil => Ok(None),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn zscore(&mut self, key: &[u8], member: &[u8]) -> ClientResult<Option<f64>> {
        match self.checked(&[b"zscore", key, member])? {
            Value::Dbl(score) => Ok(Some(score)),
            Value::Nil => Ok(None),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Range query returning (member, score) pairs.
    pub fn zquery(
        &mut self,
        key: &[u8],
        score: f64,
        member: &[u8],
        offset: i64,
        limit: i64,
    ) -> ClientResult<Vec<(Vec<u8>, f64)>> {
        let score = score.to_string();
        let offset = offset.to_string();
        let limit = limit.to_string();
        let reply = self.checked(&[
            b"zquery",
            key,
            score.as_bytes(),
            member,
            offset.as_bytes(),
            limit.as_bytes(),
        ])?;
        let Value::Arr(items) = reply else {
            return Err(ClientError::UnexpectedResponse);
        };
        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut items = items.into_iter();
        while let Some(name) = items.next() {
            match (name, items.next()) {
                (Value::Str(name), Some(Value::Dbl(score))) => pairs.push((name, score)),
                _ => return Err(ClientError::UnexpectedResponse),
            }
        }
        Ok(pairs)
    }

    /// Runs a request and converts an error reply into `ClientError`.
    fn checked(&mut self, args: &[&[u8]]) -> ClientResult<Value> {
        match self.exec(args)? {
            Value::Err { code, message } => Err(ClientError::Server { code, message }),
            value => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    use kestrel_common::{decode_args, OutBuf};

    /// One-shot mock server: reads a single frame, asserts the argv,
    /// answers with the prepared payload.
    fn mock_server(expect: Vec<Vec<u8>>, reply: OutBuf) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut len_bytes = [0u8; 4];
            stream.read_exact(&mut len_bytes).expect("len");
            let mut body = vec![0u8; u32::from_le_bytes(len_bytes) as usize];
            stream.read_exact(&mut body).expect("body");
            assert_eq!(decode_args(&body).expect("args"), expect);

            let mut framed = Vec::new();
            kestrel_common::write_frame(reply.as_bytes(), &mut framed);
            stream.write_all(&framed).expect("reply");
        });
        addr
    }

    #[test]
    fn get_round_trip() {
        let mut reply = OutBuf::new();
        reply.string(b"value");
        let addr = mock_server(vec![b"get".to_vec(), b"key".to_vec()], reply);

        let mut client = Client::connect(addr).expect("connect");
        assert_eq!(client.get(b"key").expect("get"), Some(b"value".to_vec()));
    }

    #[test]
    fn error_reply_becomes_server_error() {
        let mut reply = OutBuf::new();
        reply.err(kestrel_common::ErrCode::Type, "expect zset");
        let addr = mock_server(
            vec![b"zadd".to_vec(), b"k".to_vec(), b"1".to_vec(), b"m".to_vec()],
            reply,
        );

        let mut client = Client::connect(addr).expect("connect");
        match client.zadd(b"k", 1.0, b"m") {
            Err(ClientError::Server { code, message }) => {
                assert_eq!(code, 3);
                assert_eq!(message, b"expect zset");
            }
            other => panic!("expected server error, got {:?}", other),
        }
    }

    #[test]
    fn zquery_parses_pairs() {
        let mut reply = OutBuf::new();
        let at = reply.begin_arr();
        reply.string(b"alice");
        reply.dbl(1.5);
        reply.patch_arr(at, 2);
        let addr = mock_server(
            vec![
                b"zquery".to_vec(),
                b"s".to_vec(),
                b"0".to_vec(),
                b"".to_vec(),
                b"0".to_vec(),
                b"10".to_vec(),
            ],
            reply,
        );

        let mut client = Client::connect(addr).expect("connect");
        let pairs = client.zquery(b"s", 0.0, b"", 0, 10).expect("zquery");
        assert_eq!(pairs, vec![(b"alice".to_vec(), 1.5)]);
    }
}
