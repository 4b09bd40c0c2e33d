pub mod blu_trv;
pub mod device;
pub mod gen1;
pub mod gen2;
pub mod mock;
pub mod probe;
pub mod transport;
pub mod wire;

pub use blu_trv::{BluTrv, DEFAULT_COMPONENT_ID};
pub use device::{ChannelState, Device, DeviceError, DeviceInfo, create};
pub use gen1::Gen1Relay;
pub use gen2::Gen2Switch;
pub use mock::{MockRequest, MockTransport};
pub use probe::{HostProbe, probe_host};
pub use transport::{DEFAULT_TIMEOUT, HttpResponse, HttpTransport, Transport, TransportError};
