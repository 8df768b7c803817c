//! Wire-level types for the Road transaction layer: enums, the packet
//! header, the fixed packer layouts used by the allow handshake, segment
//! trays, and the traits standing in for the external collaborators
//! (datagram I/O, packeting, keep store) that `road-core` depends on.

pub mod header;
pub mod kinds;
pub mod packer;
pub mod traits;
pub mod tray;

pub use header::{Packet, PacketHeader};
pub use kinds::{AcceptStatus, CoatKind, FootKind, PacketKind, TransactionKind};
pub use traits::{DatagramSink, Keep, PacketeerError, Packeteer};
pub use tray::{RxTray, Segment, TxTray};
