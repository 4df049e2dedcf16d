//! ## vindkanal-mgmt
//! **Line-oriented management protocol for live links**
//!
//! Parses the console grammar (`delay 80+20N`,
//! `markov-numnodes 4`, `setedge 0,1,25`, ...), executes commands
//! against a [`vindkanal_core::LinkHandle`], and serves interactive
//! sessions over a Unix domain socket.

pub mod command;
pub mod dispatch;
pub mod error;
pub mod server;

pub use command::{parse_line, parse_wire_value, Command, HELP_TEXT};
pub use dispatch::{dispatch, replay_script, Outcome};
pub use error::MgmtError;
pub use server::{MgmtServer, MAX_SESSIONS};
