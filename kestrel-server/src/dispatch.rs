//! # Command Dispatch
//!
//! Turns a parsed argument list into a response payload. A command is
//! identified jointly by its case-insensitive name and its arity; anything
//! else is an UNKNOWN error. Numeric arguments use strict full-string
//! parses, and NaN scores are rejected.

use kestrel_common::{ErrCode, OutBuf, MAX_MSG};
use kestrel_engine::{mono_us, Db, TtlStatus};

enum Cmd {
    Keys,
    Get,
    Set,
    Del,
    PExpire,
    PTtl,
    ZAdd,
    ZRem,
    ZScore,
    ZQuery,
    Unknown,
}

fn identify(args: &[Vec<u8>]) -> Cmd {
    let is = |name: &str| args[0].eq_ignore_ascii_case(name.as_bytes());
    match args.len() {
        1 if is("keys") => Cmd::Keys,
        2 if is("get") => Cmd::Get,
        3 if is("set") => Cmd::Set,
        2 if is("del") => Cmd::Del,
        3 if is("pexpire") => Cmd::PExpire,
        2 if is("pttl") => Cmd::PTtl,
        4 if is("zadd") => Cmd::ZAdd,
        3 if is("zrem") => Cmd::ZRem,
        3 if is("zscore") => Cmd::ZScore,
        6 if is("zquery") => Cmd::ZQuery,
        _ => Cmd::Unknown,
    }
}

/// Executes one request and leaves the response payload in `out`. When the
/// payload would no longer fit in a frame it is replaced wholesale by a
/// TOO_BIG error.
pub fn dispatch(db: &mut Db, args: Vec<Vec<u8>>, out: &mut OutBuf) {
    do_request(db, args, out);
    if out.len() + 4 > MAX_MSG {
        out.clear();
        out.err(ErrCode::TooBig, "response is too big");
    }
}

fn do_request(db: &mut Db, mut args: Vec<Vec<u8>>, out: &mut OutBuf) {
    if args.is_empty() {
        return out.err(ErrCode::Unknown, "Unknown cmd");
    }
    match identify(&args) {
        Cmd::Keys => keys(db, out),
        Cmd::Get => get(db, &args[1], out),
        Cmd::Set => {
            // The entry takes ownership of the key and value buffers.
            let value = args.pop().expect("arity checked");
            let key = args.pop().expect("arity checked");
            set(db, key, value, out)
        }
        Cmd::Del => del(db, &args[1], out),
        Cmd::PExpire => pexpire(db, &args[1], &args[2], out),
        Cmd::PTtl => pttl(db, &args[1], out),
        Cmd::ZAdd => zadd(db, &args[1], &args[2], &args[3], out),
        Cmd::ZRem => zrem(db, &args[1], &args[2], out),
        Cmd::ZScore => zscore(db, &args[1], &args[2], out),
        Cmd::ZQuery => zquery(db, &args, out),
        Cmd::Unknown => out.err(ErrCode::Unknown, "Unknown cmd"),
    }
}

fn keys(db: &mut Db, out: &mut OutBuf) {
    out.arr(db.len() as u32);
    db.for_each_key(|key| out.string(key));
}

fn get(db: &mut Db, key: &[u8], out: &mut OutBuf) {
    match db.get(key) {
        Ok(Some(value)) => out.string(value),
        Ok(None) => out.nil(),
        Err(_) => out.err(ErrCode::Type, "expect string type"),
    }
}

fn set(db: &mut Db, key: Vec<u8>, value: Vec<u8>, out: &mut OutBuf) {
    match db.set(key, value) {
        Ok(()) => out.nil(),
        Err(_) => out.err(ErrCode::Type, "expect string type"),
    }
}

fn del(db: &mut Db, key: &[u8], out: &mut OutBuf) {
    out.int(i64::from(db.del(key)));
}

fn pexpire(db: &mut Db, key: &[u8], ttl: &[u8], out: &mut OutBuf) {
    let Some(ttl_ms) = parse_int(ttl) else {
        return out.err(ErrCode::Arg, "expect int64");
    };
    out.int(i64::from(db.pexpire(key, ttl_ms, mono_us())));
}

fn pttl(db: &mut Db, key: &[u8], out: &mut OutBuf) {
    match db.pttl(key, mono_us()) {
        TtlStatus::Missing => out.int(-2),
        TtlStatus::NoExpiry => out.int(-1),
        TtlStatus::RemainingMs(ms) => out.int(ms as i64),
    }
}

fn zadd(db: &mut Db, key: &[u8], score: &[u8], member: &[u8], out: &mut OutBuf) {
    let Some(score) = parse_float(score) else {
        return out.err(ErrCode::Arg, "expect fp number");
    };
    match db.zadd(key, score, member) {
        Ok(added) => out.int(i64::from(added)),
        Err(_) => out.err(ErrCode::Type, "expect zset"),
    }
}

fn zrem(db: &mut Db, key: &[u8], member: &[u8], out: &mut OutBuf) {
    match db.zrem(key, member) {
        Ok(Some(removed)) => out.int(i64::from(removed)),
        Ok(None) => out.nil(),
        Err(_) => out.err(ErrCode::Type, "expect zset"),
    }
}

fn zscore(db: &mut Db, key: &[u8], member: &[u8], out: &mut OutBuf) {
    match db.zscore(key, member) {
        Ok(Some(score)) => out.dbl(score),
        Ok(None) => out.nil(),
        Err(_) => out.err(ErrCode::Type, "expect zset"),
    }
}

fn zquery(db: &mut Db, args: &[Vec<u8>], out: &mut OutBuf) {
    let Some(score) = parse_float(&args[2]) else {
        return out.err(ErrCode::Arg, "expect fp number");
    };
    let Some(offset) = parse_int(&args[4]) else {
        return out.err(ErrCode::Arg, "expect int");
    };
    let Some(limit) = parse_int(&args[5]) else {
        return out.err(ErrCode::Arg, "expect int");
    };

    let at = out.begin_arr();
    let mut produced = 0u32;
    let result = db.zquery(&args[1], score, &args[3], offset, limit, |name, member_score| {
        out.string(name);
        out.dbl(member_score);
        produced += 2;
    });
    match result {
        Ok(()) => out.patch_arr(at, produced),
        Err(_) => {
            out.clear();
            out.err(ErrCode::Type, "expect zset");
        }
    }
}

fn parse_int(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

fn parse_float(bytes: &[u8]) -> Option<f64> {
    let value: f64 = std::str::from_utf8(bytes).ok()?.parse().ok()?;
    if value.is_nan() {
        return None;
    }
    Some(value)
}
