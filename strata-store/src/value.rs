//! Queued commands and their replies.
//!
//! A [`CommandBatch`] is the write half of a transaction: commands queue up
//! client-side and apply atomically on [`exec`]. Each command produces one
//! [`Reply`] in queue order. A command that fails against the live keyspace
//! (renaming a missing key, arithmetic on a non-number) yields
//! [`Reply::Failed`] in its slot without aborting the rest of the batch,
//! matching how command errors inside a committed transaction behave in
//! list/set stores.
//!
//! [`exec`]: crate::conn::StoreConnection::exec

use std::time::Duration;

/// One queued store command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get(String),
    Set { key: String, value: Vec<u8> },
    SetEx {
        key: String,
        value: Vec<u8>,
        ttl: Duration,
    },
    Del(String),
    IncrBy { key: String, delta: i64 },
    Rename { from: String, to: String },
    SAdd { key: String, member: Vec<u8> },
    SRem { key: String, member: Vec<u8> },
    RPush { key: String, value: Vec<u8> },
    HSet {
        key: String,
        field: String,
        value: Vec<u8>,
    },
    HGet { key: String, field: String },
    HDel { key: String, field: String },
    HGetAll(String),
}

/// Commands queued for one atomic commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBatch {
    commands: Vec<Command>,
}

impl CommandBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub(crate) fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    pub fn get(&mut self, key: &str) {
        self.commands.push(Command::Get(key.to_string()));
    }

    pub fn set(&mut self, key: &str, value: &[u8]) {
        self.commands.push(Command::Set {
            key: key.to_string(),
            value: value.to_vec(),
        });
    }

    pub fn set_ex(&mut self, key: &str, value: &[u8], ttl: Duration) {
        self.commands.push(Command::SetEx {
            key: key.to_string(),
            value: value.to_vec(),
            ttl,
        });
    }

    pub fn del(&mut self, key: &str) {
        self.commands.push(Command::Del(key.to_string()));
    }

    pub fn incr_by(&mut self, key: &str, delta: i64) {
        self.commands.push(Command::IncrBy {
            key: key.to_string(),
            delta,
        });
    }

    pub fn rename(&mut self, from: &str, to: &str) {
        self.commands.push(Command::Rename {
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    pub fn sadd(&mut self, key: &str, member: &[u8]) {
        self.commands.push(Command::SAdd {
            key: key.to_string(),
            member: member.to_vec(),
        });
    }

    pub fn srem(&mut self, key: &str, member: &[u8]) {
        self.commands.push(Command::SRem {
            key: key.to_string(),
            member: member.to_vec(),
        });
    }

    pub fn rpush(&mut self, key: &str, value: &[u8]) {
        self.commands.push(Command::RPush {
            key: key.to_string(),
            value: value.to_vec(),
        });
    }

    pub fn hset(&mut self, key: &str, field: &str, value: &[u8]) {
        self.commands.push(Command::HSet {
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_vec(),
        });
    }

    pub fn hget(&mut self, key: &str, field: &str) {
        self.commands.push(Command::HGet {
            key: key.to_string(),
            field: field.to_string(),
        });
    }

    pub fn hdel(&mut self, key: &str, field: &str) {
        self.commands.push(Command::HDel {
            key: key.to_string(),
            field: field.to_string(),
        });
    }

    pub fn hgetall(&mut self, key: &str) {
        self.commands.push(Command::HGetAll(key.to_string()));
    }
}

/// Result of one command within a committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Key or field absent.
    Nil,
    /// Command applied, nothing to return.
    Okay,
    Int(i64),
    Bytes(Vec<u8>),
    /// Field/value pairs from a hash read.
    Pairs(Vec<(String, Vec<u8>)>),
    /// The command failed; the rest of the batch still applied.
    Failed(String),
}

impl Reply {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Reply::Failed(_))
    }
}
