// SPDX-License-Identifier: Apache-2.0

use std::net::UdpSocket;

use serde_json::Value;
use tracing::debug;

use crate::input::marker::InputMarker;
use crate::record::Record;

/// Shared defaults table for well-known fields. Host facts are detected once
/// at startup; `type` comes from the owning input at apply time.
pub struct FieldDefaults {
    host: Option<String>,
    ip: Option<String>,
}

impl FieldDefaults {
    pub fn detect() -> Self {
        let host = gethostname::gethostname().into_string().ok();
        let ip = local_ip();
        if ip.is_none() {
            debug!("could not determine a local IP address, records will omit 'ip'");
        }
        Self { host, ip }
    }

    /// Explicit values, used by tests and by callers that already know the
    /// host facts.
    pub fn fixed(host: Option<String>, ip: Option<String>) -> Self {
        Self { host, ip }
    }

    /// Fill missing well-known fields on a record.
    pub fn apply(&self, record: &mut Record, marker: &InputMarker) {
        if !record.contains_key("host") {
            if let Some(host) = &self.host {
                record.insert("host".to_string(), Value::from(host.as_str()));
            }
        }
        if !record.contains_key("ip") {
            if let Some(ip) = &self.ip {
                record.insert("ip".to_string(), Value::from(ip.as_str()));
            }
        }
        if !record.contains_key("type") {
            record.insert(
                "type".to_string(),
                Value::from(marker.input.config.log_type.as_str()),
            );
        }
    }
}

/// Best-effort local address discovery: route a UDP socket at a public
/// address and read the chosen source address. No packet is sent.
fn local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|a| a.ip().to_string())
}
