//! Dynaforge - schema compiler and change-propagation runtime
//!
//! Compiles an annotated type schema into a storage intermediate
//! representation for partition/sort-key document stores (DynamoDB and an
//! in-memory equivalent), serves typed repositories over it, and propagates
//! changes from the store's stream through enricher, reducer and reactor
//! handlers.

pub mod bus;
pub mod codec;
pub mod compiler;
pub mod config;
pub mod dlq;
pub mod handlers;
pub mod ir;
pub mod key;
pub mod repository;
pub mod runtime;
pub mod schema;
pub mod storage;
pub mod stream;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use compiler::{compile, CompileError};
pub use config::Config;
pub use handlers::{Enricher, HandlerContext, HandlerSet, MultiReducer, Reactor, Reducer};
pub use ir::Ir;
pub use repository::{Entity, Repository, RepositoryError, RepositoryRegistry};
pub use runtime::ChangeRuntime;
pub use schema::SchemaDocument;
pub use storage::{MemoryStore, Store};
