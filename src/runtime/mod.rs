/// Module containing the stream of received datagrams
pub mod datagram;
/// Module containing the logic for the listener
pub mod listener;
/// Module containing the destinations of cleaned lines
pub mod sink;
