//! Keyspace commands: `DEL`, `EXISTS`, `EXPIRE`, `PEXPIREAT`, `TTL`,
//! `PERSIST`, `TYPE`.

use super::{parse_int, record, text, CommandError, CommandResult};
use crate::engine::database::{instant_at_unix_millis, unix_millis_at};
use crate::engine::Database;
use crate::protocol::RespValue;
use bytes::Bytes;
use std::time::{Duration, Instant};

/// DEL key [key ...]
pub fn del(db: &Database, args: &[Bytes]) -> CommandResult {
    let mut keys = Vec::with_capacity(args.len());
    for arg in args {
        keys.push(text(arg)?);
    }

    let mut removed = Vec::new();
    for (key, arg) in keys.into_iter().zip(args) {
        if db.remove(key) {
            removed.push(arg.clone());
        }
    }

    if !removed.is_empty() {
        db.append_aof(record("DEL", &removed));
    }
    Ok(RespValue::integer(removed.len() as i64))
}

/// EXISTS key [key ...]
pub fn exists(db: &Database, args: &[Bytes]) -> CommandResult {
    let mut count = 0;
    for arg in args {
        if db.contains(text(arg)?) {
            count += 1;
        }
    }
    Ok(RespValue::integer(count))
}

/// EXPIRE key seconds
///
/// Zero expires the key immediately; negative values are rejected. Logged
/// as `PEXPIREAT` so replay restores the same deadline.
pub fn expire(db: &Database, args: &[Bytes]) -> CommandResult {
    let key = text(&args[0])?;
    let seconds = parse_int(&args[1])?;
    if seconds < 0 {
        return Err(CommandError::InvalidExpireTime("expire"));
    }

    let deadline = Instant::now()
        .checked_add(Duration::from_secs(seconds as u64))
        .ok_or(CommandError::InvalidExpireTime("expire"))?;

    if !db.expire_at(key, deadline) {
        return Ok(RespValue::integer(0));
    }

    db.append_aof(record(
        "PEXPIREAT",
        &[args[0].clone(), Bytes::from(unix_millis_at(deadline).to_string())],
    ));
    Ok(RespValue::integer(1))
}

/// PEXPIREAT key unix-time-milliseconds
pub fn pexpireat(db: &Database, args: &[Bytes]) -> CommandResult {
    let key = text(&args[0])?;
    let at = parse_int(&args[1])?;
    if at < 0 {
        return Err(CommandError::InvalidExpireTime("pexpireat"));
    }

    if !db.expire_at(key, instant_at_unix_millis(at)) {
        return Ok(RespValue::integer(0));
    }

    db.append_aof(record("PEXPIREAT", args));
    Ok(RespValue::integer(1))
}

/// TTL key
///
/// -2 if the key does not exist, -1 if it has no expiry.
pub fn ttl(db: &Database, args: &[Bytes]) -> CommandResult {
    let key = text(&args[0])?;

    let reply = match db.ttl(key) {
        None => -2,
        Some(None) => -1,
        Some(Some(remaining)) => ((remaining.as_millis() + 500) / 1000) as i64,
    };
    Ok(RespValue::integer(reply))
}

/// PERSIST key
pub fn persist(db: &Database, args: &[Bytes]) -> CommandResult {
    let key = text(&args[0])?;

    if db.persist(key) {
        db.append_aof(record("PERSIST", args));
        Ok(RespValue::integer(1))
    } else {
        Ok(RespValue::integer(0))
    }
}

/// TYPE key
pub fn key_type(db: &Database, args: &[Bytes]) -> CommandResult {
    let key = text(&args[0])?;
    let name = db.read(key, |value| value.map_or("none", |v| v.type_name()));
    Ok(RespValue::simple_string(name))
}
