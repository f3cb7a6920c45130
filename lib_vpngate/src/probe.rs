//! # Endpoint Liveness Checks
//!
//! Decides whether a relay is worth persisting. Two independent checks,
//! both required: the advertised endpoint answers a single dial attempt
//! within a bounded timeout, and the decoded configuration carries the
//! open-access marker.

use std::time::Duration;

use tokio::net::{TcpStream, UdpSocket};
use tracing::trace;

/// Marker left in generated configurations when the relay accepts
/// connections without a separately supplied credential. A heuristic on a
/// comment line, not a real authentication check; kept as-is.
const OPEN_ACCESS_MARKER: &str = "#auth-user-pass";

/// Combined liveness decision for one record.
///
/// Pure with respect to process state, so it is safe to call concurrently
/// for different records. False whenever the dial fails, regardless of the
/// marker, and false whenever the marker is absent, regardless of
/// reachability.
pub async fn is_insertable(
    ip: &str,
    proto: &str,
    conf_data: &str,
    port: u16,
    timeout: Duration,
) -> bool {
    let reachable = is_reachable(ip, proto, port, timeout).await;
    let unauthenticated = conf_data.contains(OPEN_ACCESS_MARKER);
    trace!(ip, proto, port, reachable, unauthenticated, "probed server");
    reachable && unauthenticated
}

/// One dial attempt of the given transport kind, no retry. Any error,
/// including timeout, refusal, resolution failure and an unsupported
/// protocol string, means unreachable.
async fn is_reachable(ip: &str, proto: &str, port: u16, timeout: Duration) -> bool {
    let addr = format!("{ip}:{port}");
    match proto {
        "tcp" => matches!(
            tokio::time::timeout(timeout, TcpStream::connect(&addr)).await,
            Ok(Ok(_))
        ),
        "udp" => {
            // Datagram sockets have no handshake; connect resolves the
            // address and fixes the peer, which is all a single dial can
            // observe.
            let dial = async {
                let socket = UdpSocket::bind("0.0.0.0:0").await?;
                socket.connect(&addr).await
            };
            matches!(tokio::time::timeout(timeout, dial).await, Ok(Ok(())))
        }
        _ => false,
    }
}
