/*!
SOCKS version sniff.

Talks to the proxy directly over TCP: a SOCKS4 CONNECT greeting first, a
SOCKS5 method negotiation second. The proxy's declared protocol is
reclassified to whichever handshake succeeds; a proxy that rejects both is
demoted to HTTP. HTTP proxies are skipped.
*/

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::models::{Proxy, ProxyProtocol, ProxyStatus, ProxyTest};
use crate::probes::{Probe, ProbeError};

pub struct SocksVersionProbe {
    timeout: Duration,
}

impl SocksVersionProbe {
    pub fn new(timeout: Duration) -> Self {
        SocksVersionProbe { timeout }
    }

    /// SOCKS4 CONNECT greeting; a 0x5A reply grants the request.
    async fn check_socks4(&self, stream: &mut TcpStream, ip: Ipv4Addr, port: u16) -> bool {
        let mut packet = Vec::with_capacity(9);
        packet.extend_from_slice(&[0x04, 0x01]);
        packet.extend_from_slice(&port.to_be_bytes());
        packet.extend_from_slice(&ip.octets());
        packet.push(0x00);

        if stream.write_all(&packet).await.is_err() {
            return false;
        }

        let mut reply = [0u8; 8];
        match stream.read(&mut reply).await {
            Ok(n) if n >= 2 => reply[0] == 0x00 && reply[1] == 0x5A,
            _ => false,
        }
    }

    /// SOCKS5 method negotiation offering "no auth".
    async fn check_socks5(&self, stream: &mut TcpStream) -> bool {
        if stream.write_all(&[0x05, 0x01, 0x00]).await.is_err() {
            return false;
        }

        let mut reply = [0u8; 2];
        match stream.read_exact(&mut reply).await {
            Ok(_) => reply[0] == 0x05 && reply[1] == 0x00,
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Probe for SocksVersionProbe {
    fn name(&self) -> &'static str {
        "socks-version"
    }

    fn skip_probe(&self, proxy: &Proxy) -> bool {
        proxy.protocol == ProxyProtocol::Http
    }

    async fn validate(&self) -> Result<(), ProbeError> {
        // Nothing to validate: there is no benchmark endpoint for a raw
        // TCP handshake.
        Ok(())
    }

    async fn execute(&self, proxy: &mut Proxy) -> ProxyTest {
        let Ok(ip) = Ipv4Addr::from_str(&proxy.ip) else {
            return ProxyTest::new(proxy.id, ProxyStatus::Error, 0, "Invalid address");
        };
        let addr = (ip, proxy.port);
        let start = Instant::now();

        let result = timeout(self.timeout, async {
            let mut stream = TcpStream::connect(addr).await?;

            if self.check_socks4(&mut stream, ip, proxy.port).await {
                return Ok::<Option<ProxyProtocol>, std::io::Error>(Some(ProxyProtocol::Socks4));
            }

            // SOCKS4 rejected the greeting; renegotiate on a fresh stream.
            let mut stream = TcpStream::connect(addr).await?;
            if self.check_socks5(&mut stream).await {
                return Ok(Some(ProxyProtocol::Socks5));
            }

            Ok(None)
        })
        .await;

        let latency = start.elapsed().as_millis().min(u32::MAX as u128) as u32;

        match result {
            Ok(Ok(Some(protocol))) => {
                if proxy.protocol != protocol {
                    debug!("Reclassified proxy {}:{} as {}.", proxy.ip, proxy.port, protocol);
                }
                proxy.protocol = protocol;
                ProxyTest::new(
                    proxy.id,
                    ProxyStatus::Ok,
                    latency,
                    &format!("SOCKS version: {protocol}"),
                )
            }
            Ok(Ok(None)) => {
                // Speaks neither SOCKS dialect; treat it as a plain HTTP proxy.
                proxy.protocol = ProxyProtocol::Http;
                ProxyTest::new(proxy.id, ProxyStatus::Error, latency, "SOCKS not supported")
            }
            Ok(Err(e)) => ProxyTest::new(
                proxy.id,
                ProxyStatus::Error,
                latency,
                &format!("Connection refused - {}", e.kind()),
            ),
            Err(_) => ProxyTest::new(proxy.id, ProxyStatus::Timeout, latency, "Connection timed out"),
        }
    }
}
