use super::PeerError;

use std::net::IpAddr;

/// Split `addr` into host and port, using `default_port` when `addr` has no
/// port. IPv6 hosts may be bracketed (`[::1]:8333`); a bare IPv6 address is
/// taken as a host without a port.
pub fn split_host_port<'a>(addr: &'a str, default_port: &'a str) -> (&'a str, &'a str) {
	if let Some(rest) = addr.strip_prefix('[') {
		if let Some((host, after)) = rest.split_once(']') {
			return match after.strip_prefix(':') {
				Some(port) if !port.is_empty() => (host, port),
				_ => (host, default_port),
			};
		}
	}

	match addr.rsplit_once(':') {
		// More than one colon without brackets is a bare IPv6 address.
		Some((host, _)) if host.contains(':') => (addr, default_port),
		Some((host, port)) if !port.is_empty() => (host, port),
		Some((host, _)) => (host, default_port),
		None => (addr, default_port),
	}
}

fn join_host_port(ip: IpAddr, port: u16) -> String {
	match ip {
		IpAddr::V4(ip) => format!("{}:{}", ip, port),
		IpAddr::V6(ip) => format!("[{}]:{}", ip, port),
	}
}

/// Resolve a user-supplied peer address to the `ip:port` form the chain client
/// reports for connected peers.
///
/// Onion addresses can't be resolved and are returned unchanged. When
/// `localhost` resolves to several addresses, `127.0.0.1` is preferred.
pub async fn resolve_address(addr: &str, default_port: &str) -> Result<String, PeerError> {
	let (host, port) = split_host_port(addr, default_port);

	if host.ends_with(".onion") {
		return Ok(addr.to_string());
	}

	let port: u16 = port.parse().map_err(|_| PeerError::Resolve {
		addr: addr.to_string(),
		reason: format!("invalid port {:?}", port),
	})?;

	let ips: Vec<IpAddr> = tokio::net::lookup_host((host, port))
		.await
		.map_err(|e| PeerError::Resolve {
			addr: addr.to_string(),
			reason: e.to_string(),
		})?
		.map(|socket_addr| socket_addr.ip())
		.collect();

	let ip = match ips.first() {
		None => {
			return Err(PeerError::Resolve {
				addr: addr.to_string(),
				reason: format!("no addresses found for {}", host),
			});
		}
		Some(_) if host == "localhost" && ips.len() > 1 => IpAddr::from([127, 0, 0, 1]),
		Some(ip) => *ip,
	};

	Ok(join_host_port(ip, port))
}
