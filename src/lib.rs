pub mod batch;
pub mod conf;
pub mod core;
pub mod delivery;
pub mod engine;
pub mod ledger;
pub mod plan;
pub mod source;

#[cfg(feature = "testutil")]
pub mod testutil;
