//! # Packet Listener
//!
//! A small UDP diagnostic listener for accelerometer sensors.
//!
//! Each datagram carries one line `<patient_id>,<elapsed_ms>l,<signal>`. The listener decodes it,
//! drops the spurious `l` unit suffix and prints `<patient_id>,<elapsed_ms>,<signal>`.
//!
//! Refer to the included binary for the complete listener.
/// Module containing the packet line format
pub mod packet;
/// Module containing the listener and its receive loop
pub mod runtime;
/// Module containing the settings of the listener
pub mod settings;
