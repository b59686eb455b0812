mod backend;
mod repository;
mod schema;
mod seed;

pub use repository::{Repository, CREDENTIALS_KEY, SESSION_KEY};

#[cfg(test)]
pub(crate) use backend::{KvBackend, MemoryBackend};
#[cfg(test)]
pub(crate) use repository::tests;
