use crate::error::{ProxyError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use fast_socks5::server::{DnsResolveHelper, Socks5ServerProtocol, SocksServerError, states};
use fast_socks5::util::target_addr::TargetAddr;
use fast_socks5::{ReplyError, Socks5Command, consts};
use meter::{MeterError, RejectionReply};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

/// SOCKS5 "connection not allowed by ruleset" reply, sent to a client that
/// went over a traffic limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct Socks5RuleFailure;

impl RejectionReply for Socks5RuleFailure {
    fn frame(&self, _error: &MeterError) -> Bytes {
        let mut frame = BytesMut::with_capacity(10);
        frame.put_u8(consts::SOCKS5_VERSION);
        frame.put_u8(ReplyError::ConnectionNotAllowed.as_u8());
        frame.put_u8(0x00);
        frame.put_u8(consts::SOCKS5_ADDR_TYPE_IPV4);
        frame.put_slice(&Ipv4Addr::UNSPECIFIED.octets());
        frame.put_u16(0);
        frame.freeze()
    }
}

/// Serves one no-auth SOCKS5 CONNECT session on an accepted stream.
pub async fn handle_connection<S>(stream: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (protocol, command, target_addr): (
        Socks5ServerProtocol<S, states::CommandRead>,
        Socks5Command,
        TargetAddr,
    ) = Socks5ServerProtocol::accept_no_auth(stream)
        .await
        .map_err(map_socks_error)?
        .read_command()
        .await
        .map_err(map_socks_error)?
        .resolve_dns()
        .await
        .map_err(map_socks_error)?;

    match command {
        Socks5Command::TCPConnect => {
            debug!("SOCKS5 CONNECT request to {}", target_addr);
            let (target_host, target_port) = target_addr.into_string_and_port();
            let mut target = match TcpStream::connect((target_host.as_str(), target_port)).await {
                Ok(target) => target,
                Err(e) => {
                    if let Err(err) = protocol.reply_error(&ReplyError::HostUnreachable).await {
                        error!("Failed to reply host unreachable error: {err:?}");
                    }
                    return Err(e.into());
                }
            };

            let reply_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
            let mut client = protocol
                .reply_success(reply_addr)
                .await
                .map_err(map_socks_error)?;
            relay(&mut client, &mut target, &target_host, target_port).await
        }
        _ => {
            if let Err(err) = protocol.reply_error(&ReplyError::CommandNotSupported).await {
                error!("Failed to reply unsupported command error: {err:?}");
            }
            Err(ProxyError::Socks5(format!(
                "SOCKS5 command {:?} not supported",
                command
            )))
        }
    }
}

async fn relay<S, T>(
    client: &mut S,
    target: &mut T,
    target_host: &str,
    target_port: u16,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::io::copy_bidirectional(client, target).await {
        Ok((client_to_target, target_to_client)) => {
            debug!(
                "Relay to {}:{} completed: {} bytes client->target, {} bytes target->client",
                target_host, target_port, client_to_target, target_to_client
            );
            Ok(())
        }
        Err(e) => match MeterError::from_io(&e) {
            Some(limit) => {
                info!("Relay to {}:{} stopped: {}", target_host, target_port, limit);
                Err(e.into())
            }
            None if is_peer_disconnect(&e) => {
                debug!("Relay to {}:{} ended: {}", target_host, target_port, e);
                Ok(())
            }
            None => {
                warn!("Relay to {}:{} failed: {}", target_host, target_port, e);
                Err(e.into())
            }
        },
    }
}

/// Either side going away mid-transfer ends the relay normally.
fn is_peer_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

fn map_socks_error(err: SocksServerError) -> ProxyError {
    ProxyError::Socks5(err.to_string())
}
