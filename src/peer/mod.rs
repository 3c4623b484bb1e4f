// peer/mod.rs - Peer Protocol (spec §4.5)
//
// One request and one response per TCP connection. The source reads a
// single fixed-size buffer per connection (spec §9 open question); we frame
// messages with a 4-byte big-endian length prefix instead so a signature or
// address straddling a single read never truncates, while keeping the
// one-request-per-connection semantic.

pub mod client;
mod codec;
pub mod server;
