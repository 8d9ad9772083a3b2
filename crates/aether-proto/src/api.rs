//! Authorized API (client→server) and client-safe API (server→client) wire
//! formats (spec §6.1), carried inside a `StreamMuxFrame` payload on the
//! per-server `StreamMux`.

use bytes::{Bytes, BytesMut};

use crate::registration::ServerDescriptor;
use crate::uid::{ServerId, Uid};
use crate::wire::{get_len16_bytes, get_u16, get_u8, put_len16_bytes, WireDecode, WireEncode, WireError};

/// Method IDs are stable; additions are backward-compatible via new IDs
/// (spec §6.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizedCall {
    SendMessage { dst_uid: Uid, data: Bytes },
    ResolveServers { server_ids: Vec<ServerId> },
    GetClientCloud { uid: Uid },
    CheckAccessForSendMessage { dst_uid: Uid },
}

impl AuthorizedCall {
    fn method_id(&self) -> u8 {
        match self {
            AuthorizedCall::SendMessage { .. } => 0,
            AuthorizedCall::ResolveServers { .. } => 1,
            AuthorizedCall::GetClientCloud { .. } => 2,
            AuthorizedCall::CheckAccessForSendMessage { .. } => 3,
        }
    }
}

impl WireEncode for AuthorizedCall {
    fn encode(&self, buf: &mut BytesMut) {
        use bytes::BufMut;
        buf.put_u8(self.method_id());
        match self {
            AuthorizedCall::SendMessage { dst_uid, data } => {
                dst_uid.encode(buf);
                put_len16_bytes(buf, data);
            }
            AuthorizedCall::ResolveServers { server_ids } => {
                buf.put_u16(server_ids.len() as u16);
                for id in server_ids {
                    id.encode(buf);
                }
            }
            AuthorizedCall::GetClientCloud { uid } => uid.encode(buf),
            AuthorizedCall::CheckAccessForSendMessage { dst_uid } => dst_uid.encode(buf),
        }
    }
}

impl WireDecode for AuthorizedCall {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let method_id = get_u8(buf)?;
        match method_id {
            0 => {
                let dst_uid = Uid::decode(buf)?;
                let data = get_len16_bytes(buf)?;
                Ok(AuthorizedCall::SendMessage { dst_uid, data })
            }
            1 => {
                let count = get_u16(buf)? as usize;
                let mut server_ids = Vec::with_capacity(count);
                for _ in 0..count {
                    server_ids.push(ServerId::decode(buf)?);
                }
                Ok(AuthorizedCall::ResolveServers { server_ids })
            }
            2 => Ok(AuthorizedCall::GetClientCloud { uid: Uid::decode(buf)? }),
            3 => Ok(AuthorizedCall::CheckAccessForSendMessage { dst_uid: Uid::decode(buf)? }),
            other => Err(WireError::UnknownDiscriminant(other)),
        }
    }
}

/// Client-safe-API replies (server→client), symmetric format (spec §6.1).
/// `Ack`/`Error` cover `send_message` and `check_access_for_send_message`,
/// neither of which carries a payload beyond success/failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientSafeEvent {
    SendMessage { src_uid: Uid, data: Bytes },
    ServerDescriptor(ServerDescriptor),
    ClientCloud { uid: Uid, cloud: Vec<ServerId> },
    Ack,
    Error { message: String },
}

impl ClientSafeEvent {
    fn kind(&self) -> u8 {
        match self {
            ClientSafeEvent::SendMessage { .. } => 0,
            ClientSafeEvent::ServerDescriptor(_) => 1,
            ClientSafeEvent::ClientCloud { .. } => 2,
            ClientSafeEvent::Ack => 3,
            ClientSafeEvent::Error { .. } => 4,
        }
    }
}

impl WireEncode for ClientSafeEvent {
    fn encode(&self, buf: &mut BytesMut) {
        use bytes::BufMut;
        buf.put_u8(self.kind());
        match self {
            ClientSafeEvent::SendMessage { src_uid, data } => {
                src_uid.encode(buf);
                put_len16_bytes(buf, data);
            }
            ClientSafeEvent::ServerDescriptor(desc) => {
                desc.server_id.encode(buf);
                buf.put_u16(desc.ips.len() as u16);
                for ip in &desc.ips {
                    put_len16_bytes(buf, ip.ip.as_bytes());
                    buf.put_u16(ip.ports.len() as u16);
                    for port in &ip.ports {
                        buf.put_u8(match port.protocol {
                            crate::config::Protocol::Tcp => 0,
                            crate::config::Protocol::Udp => 1,
                        });
                        buf.put_u16(port.port);
                    }
                }
            }
            ClientSafeEvent::ClientCloud { uid, cloud } => {
                uid.encode(buf);
                buf.put_u16(cloud.len() as u16);
                for id in cloud {
                    id.encode(buf);
                }
            }
            ClientSafeEvent::Ack => {}
            ClientSafeEvent::Error { message } => put_len16_bytes(buf, message.as_bytes()),
        }
    }
}

impl WireDecode for ClientSafeEvent {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let kind = get_u8(buf)?;
        match kind {
            0 => {
                let src_uid = Uid::decode(buf)?;
                let data = get_len16_bytes(buf)?;
                Ok(ClientSafeEvent::SendMessage { src_uid, data })
            }
            1 => {
                let server_id = ServerId::decode(buf)?;
                let ip_count = get_u16(buf)? as usize;
                let mut ips = Vec::with_capacity(ip_count);
                for _ in 0..ip_count {
                    let ip_bytes = get_len16_bytes(buf)?;
                    let ip = String::from_utf8_lossy(&ip_bytes).into_owned();
                    let port_count = get_u16(buf)? as usize;
                    let mut ports = Vec::with_capacity(port_count);
                    for _ in 0..port_count {
                        let protocol = match get_u8(buf)? {
                            0 => crate::config::Protocol::Tcp,
                            1 => crate::config::Protocol::Udp,
                            other => return Err(WireError::UnknownDiscriminant(other)),
                        };
                        let port = get_u16(buf)?;
                        ports.push(crate::registration::PortProto { protocol, port });
                    }
                    ips.push(crate::registration::IpPorts { ip, ports });
                }
                Ok(ClientSafeEvent::ServerDescriptor(ServerDescriptor { server_id, ips }))
            }
            2 => {
                let uid = Uid::decode(buf)?;
                let count = get_u16(buf)? as usize;
                let mut cloud = Vec::with_capacity(count);
                for _ in 0..count {
                    cloud.push(ServerId::decode(buf)?);
                }
                Ok(ClientSafeEvent::ClientCloud { uid, cloud })
            }
            3 => Ok(ClientSafeEvent::Ack),
            4 => {
                let bytes = get_len16_bytes(buf)?;
                Ok(ClientSafeEvent::Error { message: String::from_utf8_lossy(&bytes).into_owned() })
            }
            other => Err(WireError::UnknownDiscriminant(other)),
        }
    }
}

/// Encodes `call` to its standalone wire representation, for handing to a
/// `StreamMux::encode` payload.
pub fn encode_call(call: &AuthorizedCall) -> Bytes {
    let mut buf = BytesMut::new();
    call.encode(&mut buf);
    buf.freeze()
}

pub fn encode_event(event: &ClientSafeEvent) -> Bytes {
    let mut buf = BytesMut::new();
    event.encode(&mut buf);
    buf.freeze()
}

pub fn decode_call(mut bytes: Bytes) -> Result<AuthorizedCall, WireError> {
    let call = AuthorizedCall::decode(&mut bytes)?;
    if !bytes.is_empty() {
        return Err(WireError::TrailingBytes(bytes.len()));
    }
    Ok(call)
}

pub fn decode_event(mut bytes: Bytes) -> Result<ClientSafeEvent, WireError> {
    let event = ClientSafeEvent::decode(&mut bytes)?;
    if !bytes.is_empty() {
        return Err(WireError::TrailingBytes(bytes.len()));
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;
    use crate::registration::{IpPorts, PortProto};

    #[test]
    fn send_message_call_round_trips() {
        let call = AuthorizedCall::SendMessage {
            dst_uid: Uid::new([1; 16]),
            data: Bytes::from_static(b"hello"),
        };
        assert_eq!(decode_call(encode_call(&call)).unwrap(), call);
    }

    #[test]
    fn resolve_servers_call_round_trips() {
        let call = AuthorizedCall::ResolveServers { server_ids: vec![ServerId(1), ServerId(2)] };
        assert_eq!(decode_call(encode_call(&call)).unwrap(), call);
    }

    #[test]
    fn client_cloud_event_round_trips() {
        let event = ClientSafeEvent::ClientCloud {
            uid: Uid::new([9; 16]),
            cloud: vec![ServerId(1), ServerId(2), ServerId(3)],
        };
        assert_eq!(decode_event(encode_event(&event)).unwrap(), event);
    }

    #[test]
    fn server_descriptor_event_round_trips() {
        let event = ClientSafeEvent::ServerDescriptor(ServerDescriptor {
            server_id: ServerId(7),
            ips: vec![IpPorts {
                ip: "203.0.113.5".into(),
                ports: vec![PortProto { protocol: Protocol::Tcp, port: 9000 }],
            }],
        });
        assert_eq!(decode_event(encode_event(&event)).unwrap(), event);
    }

    #[test]
    fn ack_and_error_events_round_trip() {
        assert_eq!(decode_event(encode_event(&ClientSafeEvent::Ack)).unwrap(), ClientSafeEvent::Ack);
        let err = ClientSafeEvent::Error { message: "nope".into() };
        assert_eq!(decode_event(encode_event(&err)).unwrap(), err);
    }
}
