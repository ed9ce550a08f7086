//! Status command implementation

use crate::oplock::{ResultKind, StateDir};

/// Print the running operation and the last recorded results
pub fn run_status(state: &StateDir) {
    println!("Operation: {}", state.status_message());
    println!("Erase:     {}", state.read_result(ResultKind::Erase));
    println!("Program:   {}", state.read_result(ResultKind::Flash));
}
