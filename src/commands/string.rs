//! String commands: `GET`, `MGET`, `SET`, `MSET`.

use super::{parse_int, record, text, CommandError, CommandResult};
use crate::engine::database::unix_millis_at;
use crate::engine::{Database, Value};
use crate::protocol::RespValue;
use bytes::Bytes;
use std::time::{Duration, Instant};

/// GET key
pub fn get(db: &Database, args: &[Bytes]) -> CommandResult {
    let key = text(&args[0])?;

    db.read(key, |value| match value {
        None => Ok(RespValue::null()),
        Some(Value::String(data)) => Ok(RespValue::bulk_string(data.clone())),
        Some(_) => Err(CommandError::WrongType),
    })
}

/// MGET key [key ...]
///
/// Keys that are missing or hold another type come back as null.
pub fn mget(db: &Database, args: &[Bytes]) -> CommandResult {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        let key = text(arg)?;
        let value = db.read(key, |value| match value {
            Some(Value::String(data)) => RespValue::bulk_string(data.clone()),
            _ => RespValue::null(),
        });
        values.push(value);
    }
    Ok(RespValue::array(values))
}

/// SET key value [EX seconds | PX milliseconds]
pub fn set(db: &Database, args: &[Bytes]) -> CommandResult {
    let key = text(&args[0])?;
    let value = args[1].clone();

    let mut ttl: Option<Duration> = None;
    let mut i = 2;
    while i < args.len() {
        let option = String::from_utf8_lossy(&args[i]).to_ascii_uppercase();
        match option.as_str() {
            "EX" | "PX" if ttl.is_none() => {
                let amount = args.get(i + 1).ok_or(CommandError::Syntax)?;
                let amount = parse_int(amount)?;
                if amount <= 0 {
                    return Err(CommandError::InvalidExpireTime("set"));
                }
                ttl = Some(if option == "EX" {
                    Duration::from_secs(amount as u64)
                } else {
                    Duration::from_millis(amount as u64)
                });
                i += 2;
            }
            _ => return Err(CommandError::Syntax),
        }
    }

    let deadline = match ttl {
        Some(ttl) => Some(
            Instant::now()
                .checked_add(ttl)
                .ok_or(CommandError::InvalidExpireTime("set"))?,
        ),
        None => None,
    };

    db.set(key, Value::String(value.clone()), deadline);

    db.append_aof(record("SET", &[args[0].clone(), value]));
    if let Some(at) = deadline {
        db.append_aof(record(
            "PEXPIREAT",
            &[args[0].clone(), Bytes::from(unix_millis_at(at).to_string())],
        ));
    }

    Ok(RespValue::ok())
}

/// MSET key value [key value ...]
pub fn mset(db: &Database, args: &[Bytes]) -> CommandResult {
    if args.len() % 2 != 0 {
        return Err(CommandError::WrongArity("mset".into()));
    }

    let mut pairs = Vec::with_capacity(args.len() / 2);
    for pair in args.chunks_exact(2) {
        pairs.push((text(&pair[0])?, pair[1].clone()));
    }

    for (key, value) in pairs {
        db.set(key, Value::String(value), None);
    }
    db.append_aof(record("MSET", args));

    Ok(RespValue::ok())
}

#[cfg(test)]
mod tests {
    use crate::commands::test_support::Client;
    use crate::commands::CommandError;
    use crate::protocol::RespValue;
    use std::time::Duration;

    #[tokio::test]
    async fn test_set_get() {
        let mut client = Client::new();

        assert_eq!(client.run(&["SET", "key", "value"]), RespValue::ok());
        assert_eq!(client.run(&["GET", "key"]), RespValue::bulk_string("value"));
        assert_eq!(client.run(&["GET", "missing"]), RespValue::null());
    }

    #[tokio::test]
    async fn test_set_overwrites_other_types() {
        let mut client = Client::new();
        client.run(&["ZADD", "k", "1", "a"]);

        assert_eq!(client.run(&["SET", "k", "v"]), RespValue::ok());
        assert_eq!(client.run(&["TYPE", "k"]), RespValue::simple_string("string"));
    }

    #[tokio::test]
    async fn test_set_with_expiry() {
        let mut client = Client::new();

        client.run(&["SET", "k", "v", "PX", "40"]);
        assert_eq!(client.run(&["GET", "k"]), RespValue::bulk_string("v"));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(client.run(&["GET", "k"]), RespValue::null());
    }

    #[tokio::test]
    async fn test_set_rejects_bad_options() {
        let mut client = Client::new();
        let invalid = RespValue::from(CommandError::InvalidExpireTime("set"));

        assert_eq!(client.run(&["SET", "k", "v", "EX", "0"]), invalid);
        assert_eq!(client.run(&["SET", "k", "v", "EX", "-5"]), invalid);
        assert_eq!(
            client.run(&["SET", "k", "v", "EX", "ten"]),
            RespValue::from(CommandError::NotInteger)
        );
        assert_eq!(
            client.run(&["SET", "k", "v", "EX"]),
            RespValue::from(CommandError::Syntax)
        );
        assert_eq!(
            client.run(&["SET", "k", "v", "NX"]),
            RespValue::from(CommandError::Syntax)
        );
        assert_eq!(client.run(&["GET", "k"]), RespValue::null());
    }

    #[tokio::test]
    async fn test_mset_mget() {
        let mut client = Client::new();

        assert_eq!(client.run(&["MSET", "a", "1", "b", "2"]), RespValue::ok());
        client.run(&["ZADD", "z", "1", "m"]);

        assert_eq!(
            client.run(&["MGET", "a", "b", "missing", "z"]),
            RespValue::array(vec![
                RespValue::bulk_string("1"),
                RespValue::bulk_string("2"),
                RespValue::null(),
                RespValue::null(),
            ])
        );
    }

    #[tokio::test]
    async fn test_mset_odd_arguments() {
        let mut client = Client::new();

        assert_eq!(
            client.run(&["MSET", "a", "1", "b"]),
            RespValue::error("ERR wrong number of arguments for 'mset' command")
        );
        assert_eq!(client.run(&["GET", "a"]), RespValue::null());
    }
}
