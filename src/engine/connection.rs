//! Per-client state the engine needs to see.

/// What the engine needs from a client: which database it has selected.
///
/// Implemented by the network client state and by [`ReplayConnection`].
pub trait Connection: Send {
    fn db_index(&self) -> usize;

    fn set_db_index(&mut self, index: usize);
}

/// In-process connection used to replay the append-only file.
#[derive(Debug, Default, Clone)]
pub struct ReplayConnection {
    db: usize,
}

impl ReplayConnection {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connection for ReplayConnection {
    fn db_index(&self) -> usize {
        self.db
    }

    fn set_db_index(&mut self, index: usize) {
        self.db = index;
    }
}
