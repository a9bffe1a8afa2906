//! Server and connection commands.
//!
//! `SELECT`, `PING`, `AUTH` and `COMMAND` are answered by the engine before
//! a database is chosen; the rest run against the selected database.

use super::{all, parse_int, record, CommandError, CommandResult};
use crate::engine::{Connection, Database};
use crate::protocol::RespValue;
use bytes::Bytes;

/// Commands the engine answers itself.
pub const ENGINE_COMMANDS: &[&str] = &["select", "ping", "auth", "command"];

/// SELECT index
pub fn select(conn: &mut dyn Connection, databases: usize, args: &[Bytes]) -> CommandResult {
    let [index] = args else {
        return Err(CommandError::WrongArity("select".into()));
    };

    let index = parse_int(index)?;
    if index < 0 || index as u64 >= databases as u64 {
        return Err(CommandError::DbIndexOutOfRange);
    }

    conn.set_db_index(index as usize);
    Ok(RespValue::ok())
}

/// PING [message]
pub fn ping(args: &[Bytes]) -> CommandResult {
    match args {
        [] => Ok(RespValue::pong()),
        [message] => Ok(RespValue::bulk_string(message.clone())),
        _ => Err(CommandError::WrongArity("ping".into())),
    }
}

/// AUTH [username] password
///
/// Accepted unconditionally; there is no access control.
pub fn auth(args: &[Bytes]) -> CommandResult {
    if args.is_empty() || args.len() > 2 {
        return Err(CommandError::WrongArity("auth".into()));
    }
    Ok(RespValue::ok())
}

/// COMMAND
///
/// Just the names, which is enough for client handshakes.
pub fn command_names() -> RespValue {
    let names = ENGINE_COMMANDS
        .iter()
        .copied()
        .chain(all().map(|c| c.name))
        .map(RespValue::bulk_string)
        .collect();
    RespValue::array(names)
}

/// ECHO message
pub fn echo(_db: &Database, args: &[Bytes]) -> CommandResult {
    Ok(RespValue::bulk_string(args[0].clone()))
}

/// DBSIZE
pub fn dbsize(db: &Database, _args: &[Bytes]) -> CommandResult {
    Ok(RespValue::integer(db.len() as i64))
}

/// FLUSHDB
pub fn flushdb(db: &Database, args: &[Bytes]) -> CommandResult {
    db.flush();
    db.append_aof(record("FLUSHDB", args));
    Ok(RespValue::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::Client;

    #[test]
    fn test_ping_arity() {
        assert_eq!(ping(&[]), Ok(RespValue::pong()));
        assert_eq!(
            ping(&[Bytes::from("hello")]),
            Ok(RespValue::bulk_string("hello"))
        );
        assert_eq!(
            ping(&[Bytes::from("a"), Bytes::from("b")]),
            Err(CommandError::WrongArity("ping".into()))
        );
    }

    #[test]
    fn test_auth_accepts_any_password() {
        assert_eq!(auth(&[Bytes::from("pw")]), Ok(RespValue::ok()));
        assert_eq!(auth(&[Bytes::from("user"), Bytes::from("pw")]), Ok(RespValue::ok()));
        assert!(auth(&[]).is_err());
    }

    #[tokio::test]
    async fn test_echo_dbsize_flushdb() {
        let mut client = Client::new();

        assert_eq!(client.run(&["ECHO", "hi"]), RespValue::bulk_string("hi"));

        client.run(&["MSET", "a", "1", "b", "2"]);
        client.run(&["ZADD", "z", "1", "m"]);
        assert_eq!(client.run(&["DBSIZE"]), RespValue::integer(3));

        client.run(&["SELECT", "1"]);
        client.run(&["SET", "other", "x"]);
        client.run(&["SELECT", "0"]);

        assert_eq!(client.run(&["FLUSHDB"]), RespValue::ok());
        assert_eq!(client.run(&["DBSIZE"]), RespValue::integer(0));

        client.run(&["SELECT", "1"]);
        assert_eq!(client.run(&["DBSIZE"]), RespValue::integer(1));
    }
}
