//! benchlib-test-harness: Test doubles for sessions, transports and drivers.
//!
//! This crate provides [`MockTransport`] for deterministic, byte-exact unit
//! testing of sessions and drivers without real instruments,
//! [`ScpiSimulator`] for set/get round trips against a register-backed SCPI
//! instrument, and [`MockTcpServer`] for testing socket transports.

pub mod mock_tcp;
pub mod mock_transport;
pub mod simulator;
pub mod wire_log;

pub use mock_tcp::MockTcpServer;
pub use mock_transport::MockTransport;
pub use simulator::{ScpiSimulator, SimTransport};
pub use wire_log::WireLog;
