//! Agent Communication Protocol (ACP) transport (C2).
//!
//! Spawns an agent as a child process with inherited stderr and piped
//! stdin/stdout, exchanges JSON-RPC 2.0 messages newline-framed, and owns
//! the id counter / pending-request bookkeeping for client→agent calls.
//!
//! # Submodules
//!
//! - [`protocol`]: JSON-RPC envelope types and the `session/update` tagged
//!   union.
//! - [`codec`]: NDJSON framing with a configurable max line length.
//! - [`spawner`]: process-group spawn and teardown (`SIGTERM` then
//!   `SIGKILL`), shell-style command tokenisation.
//! - [`handshake`]: `initialize` + `session/new` exchange.
//! - [`reader`]: inbound dispatcher — routes responses to pending awaiters,
//!   forwards agent-originated requests/notifications, applies the
//!   JSON-line filter.
//! - [`writer`]: outbound writer — serialises requests/notifications,
//!   assigns ids, tracks pending responses.
//! - [`transport`]: glue that spawns + handshakes + wires reader/writer into
//!   one live [`transport::AcpTransport`].

pub mod codec;
pub mod handshake;
pub mod protocol;
pub mod reader;
pub mod spawner;
pub mod transport;
pub mod writer;
