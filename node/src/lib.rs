// Synod node library. Exposes internal modules for the binary entry point
// and for integration tests.

#[macro_use]
extern crate log;

pub mod bootstrap;
pub mod config;
pub mod consensus;
pub mod error;
pub mod external;
pub mod halving;
pub mod ledger;
pub mod p2p;
pub mod pool;
pub mod producer;
pub mod reputation;
pub mod storage;
pub mod supervisor;
pub mod transport;
