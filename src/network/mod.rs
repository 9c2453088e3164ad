pub mod messaging;
pub mod simulated;
pub mod transport;

pub use messaging::{DispatchOutcome, MessageDispatcher, MessageProcessor};
pub use simulated::{ChannelDirectory, ChannelTransport, Envelope};
pub use transport::{
    AddressProvider, DEFAULT_DATA_PORT_BASE, DEFAULT_SIGNAL_PORT_BASE, PeerDirectory,
    SequentialAddresses, Transport,
};
