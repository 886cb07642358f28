//! Integration test entry point. Each module drives a real federate over
//! real sockets via the harness orchestrator double.

mod harness;

mod messaging;
mod nodes;
