//! Test fixtures

mod two_context;

pub use two_context::{CLIENT_PORT, HOST_PORT, TwoContextFixture};
