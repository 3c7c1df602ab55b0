//! Connectivity detection.

mod connectivity;

pub use connectivity::{
  Connectivity, ConnectivityProbe, LinkEvent, LinkStatus, PlatformLink, PROBE_TIMEOUT,
};
