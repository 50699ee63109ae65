/// Module containing logic to decode a single packet line
pub mod line;
