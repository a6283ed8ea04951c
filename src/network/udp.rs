//! UDP socket construction

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;

use crate::error::NetworkError;

/// Receive buffer size requested from the OS
const RECV_BUFFER_BYTES: usize = 256 * 1024;

/// Tokio UDP socket used by the media transport
pub type UdpSocket = tokio::net::UdpSocket;

/// Bind a non-blocking UDP socket and register it with the tokio reactor.
///
/// Address reuse stays off so a second transport on a busy media port
/// fails to bind. Must be called inside a runtime.
pub fn create_socket(bind_addr: SocketAddr) -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::for_address(bind_addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_BYTES) {
        tracing::debug!("Could not set receive buffer size: {}", e);
    }
    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .bind(&bind_addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{bind_addr}: {e}")))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(|e| NetworkError::BindFailed(e.to_string()))
}
