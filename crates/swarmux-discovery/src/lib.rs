//! Task discovery across every orchestrator multiplexer server on the host.
//!
//! A pass enumerates the orchestrator's sockets, lists each session's
//! windows, decodes status and task name from the window name and, for
//! working tasks only, scrapes the agent pane for live progress.

pub mod mux;
pub mod service;
pub mod sockets;
pub mod tmux;

pub use mux::{Multiplexer, MuxError, SessionTarget, WindowInfo};
pub use service::{DiscoveredTask, DiscoveryService, DiscoverySnapshot};
pub use sockets::{SocketEntry, SocketEnumerator};
pub use tmux::TmuxCli;
