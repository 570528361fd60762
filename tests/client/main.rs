//! Client integration tests against the in-memory broker.

mod commands;
mod dispatch;
mod session;
mod supervisor;
