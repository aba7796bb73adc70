use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::tcp::{TcpClientDirectorOptions, TcpServerDirectorOptions};
use crate::udp::UdpDirectorOptions;

/// Timeouts are written in seconds; zero and negative values disable the
/// timer in question, matching the constructor defaults.
fn seconds(value: f64) -> Option<Duration> {
    (value > 0.0).then(|| Duration::from_secs_f64(value))
}

#[derive(Deserialize, Debug, Clone)]
pub struct UdpSection {
    /// Address and port the datagram socket binds to.
    pub bind: SocketAddr,

    /// Seconds of silence before a peer's actor is reaped; zero keeps
    /// actors until the director closes.
    #[serde(default)]
    pub timeout: f64,

    /// Set `SO_REUSEADDR` before binding, for co-bound diagnostics.
    #[serde(default)]
    pub reuse: bool,
}

impl UdpSection {
    pub fn options(&self) -> UdpDirectorOptions {
        let mut options = UdpDirectorOptions::new(self.bind);
        options.timeout = seconds(self.timeout);
        options.reuse = self.reuse;
        options
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct TcpClientSection {
    /// Seconds allowed for a TCP handshake; zero leaves the limit to the
    /// operating system.
    #[serde(default)]
    pub connect_timeout: f64,

    /// Seconds of silence before a connection is closed; zero keeps it
    /// open indefinitely.
    #[serde(default)]
    pub idle_timeout: f64,
}

impl TcpClientSection {
    pub fn options(&self) -> TcpClientDirectorOptions {
        TcpClientDirectorOptions {
            connect_timeout: seconds(self.connect_timeout),
            idle_timeout: seconds(self.idle_timeout),
            ..Default::default()
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct TcpServerSection {
    /// Address and port the listener binds to.
    pub bind: SocketAddr,

    /// Listen backlog handed to the kernel.
    #[serde(default = "TcpServerSection::listeners")]
    pub listeners: u32,

    /// Seconds of silence before a connection is closed; zero keeps it
    /// open indefinitely.
    #[serde(default)]
    pub idle_timeout: f64,

    /// Set `SO_REUSEADDR` before binding.
    #[serde(default)]
    pub reuse: bool,
}

impl TcpServerSection {
    fn listeners() -> u32 {
        5
    }

    pub fn options(&self) -> TcpServerDirectorOptions {
        let mut options = TcpServerDirectorOptions::new(self.bind);
        options.listeners = self.listeners;
        options.idle_timeout = seconds(self.idle_timeout);
        options.reuse = self.reuse;
        options
    }
}

/// Transport configuration for an embedding application.
///
/// Every section is optional; an application instantiates directors only
/// for the sections it carries.
#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub udp: Option<UdpSection>,

    #[serde(default)]
    pub tcp_client: Option<TcpClientSection>,

    #[serde(default)]
    pub tcp_server: Option<TcpServerSection>,
}

impl Config {
    /// Parse a JSON5 configuration document.
    pub fn from_str(text: &str) -> Result<Self, serde_json5::Error> {
        serde_json5::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_document_has_no_sections() {
        let config = Config::from_str("{}").unwrap();
        assert!(config.udp.is_none());
        assert!(config.tcp_client.is_none());
        assert!(config.tcp_server.is_none());
    }

    #[test]
    fn sections_fill_in_their_defaults() {
        let config = Config::from_str(
            r#"{
                udp: { bind: "127.0.0.1:47808" },
                tcp_server: { bind: "127.0.0.1:47809" },
                tcp_client: {},
            }"#,
        )
        .unwrap();

        let udp = config.udp.unwrap().options();
        assert_eq!(udp.bind, "127.0.0.1:47808".parse().unwrap());
        assert_eq!(udp.timeout, None);
        assert!(!udp.reuse);

        let server = config.tcp_server.unwrap().options();
        assert_eq!(server.listeners, 5);
        assert_eq!(server.idle_timeout, None);

        let client = config.tcp_client.unwrap().options();
        assert_eq!(client.connect_timeout, None);
        assert_eq!(client.idle_timeout, None);
    }

    #[test]
    fn fractional_timeouts_become_durations() {
        let config = Config::from_str(
            r#"{
                udp: { bind: "127.0.0.1:47808", timeout: 0.5, reuse: true },
                tcp_client: { connect_timeout: 1.5, idle_timeout: 60 },
            }"#,
        )
        .unwrap();

        let udp = config.udp.unwrap().options();
        assert_eq!(udp.timeout, Some(Duration::from_millis(500)));
        assert!(udp.reuse);

        let client = config.tcp_client.unwrap().options();
        assert_eq!(client.connect_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(client.idle_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn zero_timeout_disables_the_timer() {
        let config = Config::from_str(r#"{ udp: { bind: "0.0.0.0:0", timeout: 0 } }"#).unwrap();
        assert_eq!(config.udp.unwrap().options().timeout, None);
    }
}
