//! Process wiring: startup, worker supervision and ordered shutdown

pub mod run;
