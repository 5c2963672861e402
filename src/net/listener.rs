//! TCP listener binding.
//!
//! Bind failures are fatal to the broker and are reported as
//! `FabricError::Bind` with the address that could not be bound.

use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::error::{FabricError, Result};

/// Bind `address` (e.g. "0.0.0.0:8768"; port 0 picks a free port).
pub async fn bind(address: &str) -> Result<TcpListener> {
    let addr: SocketAddr = address.parse().map_err(|e| FabricError::Bind {
        address: address.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
    })?;

    let listener = TcpListener::bind(addr).await.map_err(|source| FabricError::Bind {
        address: address.to_string(),
        source,
    })?;

    let local_addr = listener.local_addr().map_err(|source| FabricError::Bind {
        address: address.to_string(),
        source,
    })?;
    tracing::info!(address = %local_addr, "Listener bound");

    Ok(listener)
}
