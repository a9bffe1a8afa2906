//! Sorted set commands.

use super::{parse_float, parse_int, record, text, CommandError, CommandResult};
use crate::engine::{Database, Value};
use crate::protocol::RespValue;
use crate::storage::SortedSet;
use bytes::Bytes;

/// Runs `f` against the sorted set under `key`, or `None` if the key is
/// missing. Any other type is a type error.
fn read_set<R>(
    db: &Database,
    key: &str,
    f: impl FnOnce(Option<&SortedSet>) -> R,
) -> Result<R, CommandError> {
    db.read(key, |value| match value {
        None => Ok(f(None)),
        Some(Value::SortedSet(set)) => Ok(f(Some(set.as_ref()))),
        Some(_) => Err(CommandError::WrongType),
    })
}

fn format_score(score: f64) -> Bytes {
    Bytes::from(score.to_string())
}

/// ZADD key score member [score member ...]
///
/// Replies with the number of members added or moved to a new score.
pub fn zadd(db: &Database, args: &[Bytes]) -> CommandResult {
    let pairs = &args[1..];
    if pairs.len() % 2 != 0 {
        return Err(CommandError::Syntax);
    }

    let key = text(&args[0])?;
    let mut entries = Vec::with_capacity(pairs.len() / 2);
    for pair in pairs.chunks_exact(2) {
        entries.push((parse_float(&pair[0])?, text(&pair[1])?));
    }

    let changed = db.update(key, |slot| {
        if slot.is_none() {
            *slot = Some(Value::SortedSet(Box::default()));
        }
        let Some(Value::SortedSet(set)) = slot else {
            return Err(CommandError::WrongType);
        };

        let changed = entries
            .into_iter()
            .filter(|(score, member)| set.add(*member, *score))
            .count();
        Ok(changed)
    })?;

    if changed > 0 {
        db.append_aof(record("ZADD", args));
    }
    Ok(RespValue::integer(changed as i64))
}

/// ZSCORE key member
pub fn zscore(db: &Database, args: &[Bytes]) -> CommandResult {
    let key = text(&args[0])?;
    let member = text(&args[1])?;

    let score = read_set(db, key, |set| set.and_then(|s| s.score_of(member)))?;
    Ok(score.map_or_else(RespValue::null, |s| RespValue::bulk_string(format_score(s))))
}

/// ZREM key member [member ...]
///
/// The key is deleted once its last member is gone.
pub fn zrem(db: &Database, args: &[Bytes]) -> CommandResult {
    let key = text(&args[0])?;
    let mut members = Vec::with_capacity(args.len() - 1);
    for arg in &args[1..] {
        members.push(text(arg)?);
    }

    let removed = db.update(key, |slot| {
        let set = match slot.as_mut() {
            None => return Ok(0),
            Some(Value::SortedSet(set)) => set,
            Some(_) => return Err(CommandError::WrongType),
        };

        let removed = members.iter().filter(|m| set.remove(m)).count();
        if set.is_empty() {
            *slot = None;
        }
        Ok(removed)
    })?;

    if removed > 0 {
        db.append_aof(record("ZREM", args));
    }
    Ok(RespValue::integer(removed as i64))
}

/// ZCARD key
pub fn zcard(db: &Database, args: &[Bytes]) -> CommandResult {
    let key = text(&args[0])?;
    let len = read_set(db, key, |set| set.map_or(0, SortedSet::len))?;
    Ok(RespValue::integer(len as i64))
}

fn rank(db: &Database, args: &[Bytes], descending: bool) -> CommandResult {
    let key = text(&args[0])?;
    let member = text(&args[1])?;

    let rank = read_set(db, key, |set| set.and_then(|s| s.rank_of(member, descending)))?;
    Ok(rank.map_or_else(RespValue::null, |r| RespValue::integer(r as i64)))
}

/// ZRANK key member
pub fn zrank(db: &Database, args: &[Bytes]) -> CommandResult {
    rank(db, args, false)
}

/// ZREVRANK key member
pub fn zrevrank(db: &Database, args: &[Bytes]) -> CommandResult {
    rank(db, args, true)
}

fn range(db: &Database, args: &[Bytes], reverse: bool) -> CommandResult {
    let key = text(&args[0])?;
    let start = parse_int(&args[1])?;
    let stop = parse_int(&args[2])?;

    let with_scores = match &args[3..] {
        [] => false,
        [flag] if flag.eq_ignore_ascii_case(b"WITHSCORES") => true,
        _ => return Err(CommandError::Syntax),
    };

    let items = read_set(db, key, |set| {
        let Some(set) = set else {
            return Vec::new();
        };

        let mut items = Vec::new();
        for (member, score) in set.range_by_rank(start, stop, reverse) {
            items.push(RespValue::bulk_string(Bytes::copy_from_slice(member.as_bytes())));
            if with_scores {
                items.push(RespValue::bulk_string(format_score(score)));
            }
        }
        items
    })?;

    Ok(RespValue::array(items))
}

/// ZRANGE key start stop [WITHSCORES]
pub fn zrange(db: &Database, args: &[Bytes]) -> CommandResult {
    range(db, args, false)
}

/// ZREVRANGE key start stop [WITHSCORES]
pub fn zrevrange(db: &Database, args: &[Bytes]) -> CommandResult {
    range(db, args, true)
}
