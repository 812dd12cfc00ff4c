use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::ops::RangeInclusive;

#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("no free TCP port in range {start}-{end}")]
    Exhausted { start: u16, end: u16 },
}

/// Returns the first port in `range` (ascending) for which a test
/// bind+listen on all interfaces succeeds. The probe socket is released
/// before returning, so the caller must claim the port promptly.
pub fn scout_port(range: RangeInclusive<u16>) -> Result<u16, PortError> {
    let (start, end) = (*range.start(), *range.end());
    for port in range {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        if TcpListener::bind(addr).is_ok() {
            return Ok(port);
        }
    }
    Err(PortError::Exhausted { start, end })
}
