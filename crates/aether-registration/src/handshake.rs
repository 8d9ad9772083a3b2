//! The registration handshake (C10, spec §4.10): a one-shot state machine
//! run once per new client identity, modeled the same way
//! `aether-cloud::server_session` drives a connection — except there is no
//! persistent handle here, just a future that resolves to a `ClientConfig`
//! or fails.
//!
//! Four phases over one transport connection to the registration cloud:
//! 1. `GetReturnKey` — unencrypted, signature-authenticated: the registrar
//!    hands back a `SignedKey` and everything from here on is framed
//!    through the AEAD session built from it ("the return-key session").
//! 2. `RequestPowParams` — over the return-key session: proof-of-work
//!    parameters plus a second, longer-lived `SignedKey` ("the global-key
//!    session") that outlives this one connection.
//! 3. `Register` — over the global-key session: submit the computed
//!    proof-of-work pool and a freshly generated master key, get back the
//!    assigned uid/ephemeral_uid/cloud.
//! 4. `ResolveServers` — over the global-key session: turn the assigned
//!    cloud's server ids into connectable endpoints.

use std::collections::HashMap;
use std::time::Duration;

use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info, warn};

use aether_crypto::aead::{CryptoError, Role};
use aether_crypto::{pow, sign};
use aether_proto::config::{ClientConfig, Endpoint, ServerConfig};
use aether_proto::registration::{PowMethod, SignatureMethod};
use aether_proto::uid::Uid;
use aether_session::crypto_session::{CryptoSession, CryptoSessionError};
use aether_transport::registry::AdapterRegistry;
use aether_transport::TransportError;

use crate::messages::{RootCall, RootReply};
use crate::root_channel::{self, RootChannelDecoder, RootChannelError};

const MASTER_KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Channel(#[from] RootChannelError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    CryptoFrame(#[from] CryptoSessionError),
    #[error(transparent)]
    Pow(#[from] pow::PowError),
    #[error("registrar-supplied key failed signature verification: {0}")]
    UntrustedKey(sign::SignError),
    #[error("registrar replied with the wrong message for this phase")]
    UnexpectedReply,
    #[error("registrar reported an error: {0}")]
    ServerError(String),
    #[error("transport closed before the registrar replied")]
    ConnectionClosed,
    #[error("registration timed out waiting for a reply")]
    Timeout,
    #[error("no trusted public key configured for signature method {0:?}")]
    MissingTrustAnchor(SignatureMethod),
    #[error("every registration endpoint was unreachable")]
    AllEndpointsFailed,
}

pub struct RegistrationParams {
    /// Registration channels to try in order (spec §4.10: "next channel in
    /// cloud; after exhausting all, Failed") — the first one that accepts a
    /// connection is used.
    pub endpoints: Vec<Endpoint>,
    pub parent_uid: Uid,
    /// Trusted registrar public keys, one per signature method; every
    /// `SignedKey` the registrar hands over must verify under the matching
    /// entry (spec §4.10 edge case: an unsigned or wrongly-signed key aborts
    /// registration).
    pub signature_pubkeys: HashMap<SignatureMethod, [u8; 32]>,
    pub reply_timeout: Duration,
}

/// Runs the full handshake to completion and returns the `ClientConfig` to
/// persist (spec §8 scenario F).
pub async fn register(
    params: RegistrationParams,
    adapters: &AdapterRegistry,
) -> Result<ClientConfig, RegistrationError> {
    let ed25519_key = params
        .signature_pubkeys
        .get(&SignatureMethod::Ed25519)
        .ok_or(RegistrationError::MissingTrustAnchor(SignatureMethod::Ed25519))?;

    let mut transport = None;
    for endpoint in &params.endpoints {
        match adapters.build(endpoint).await {
            Ok(t) => {
                debug!(endpoint = ?endpoint, "registration: connected");
                transport = Some(t);
                break;
            }
            Err(e) => warn!(endpoint = ?endpoint, %e, "registration endpoint unreachable, trying next channel"),
        }
    }
    let mut transport = transport.ok_or(RegistrationError::AllEndpointsFailed)?;

    // Phase 1: unencrypted, signature-authenticated return key.
    let mut plain = RootChannelDecoder::new();
    send_plain(&mut *transport, &RootCall::GetReturnKey).await?;
    let return_key = match recv_plain::<RootReply>(&mut *transport, &mut plain, params.reply_timeout).await? {
        RootReply::ReturnKey(key) => key,
        RootReply::Error { message } => return Err(RegistrationError::ServerError(message)),
        _ => return Err(RegistrationError::UnexpectedReply),
    };
    sign::verify(ed25519_key, &return_key.key, &return_key.signature).map_err(RegistrationError::UntrustedKey)?;
    let mut return_session = CryptoSession::new(&return_key.key, Role::Client)?;
    info!("registration: return-key session established");

    // Phase 2: proof-of-work parameters and the longer-lived global key.
    send_encrypted(&mut *transport, &mut return_session, &RootCall::RequestPowParams).await?;
    let pow_params =
        match recv_encrypted::<RootReply>(&mut *transport, &mut return_session, params.reply_timeout).await? {
            RootReply::PowParams(reply) => reply,
            RootReply::Error { message } => return Err(RegistrationError::ServerError(message)),
            _ => return Err(RegistrationError::UnexpectedReply),
        };
    sign::verify(ed25519_key, &pow_params.global_key.key, &pow_params.global_key.signature)
        .map_err(RegistrationError::UntrustedKey)?;
    let mut global_session = CryptoSession::new(&pow_params.global_key.key, Role::Client)?;

    let pow_pool = pow::compute(
        PowMethod::Crc32,
        pow_params.pool_size,
        &pow_params.salt,
        &pow_params.pw_suffix,
        pow_params.max_hash,
    )?;
    debug!(pool_size = pow_params.pool_size, "registration: proof-of-work computed");

    // Phase 3: submit the proof-of-work pool and a fresh master key.
    let mut master_key = vec![0u8; MASTER_KEY_LEN];
    rand::thread_rng().fill_bytes(&mut master_key);

    send_encrypted(
        &mut *transport,
        &mut global_session,
        &RootCall::Register { parent_uid: params.parent_uid, master_key: master_key.clone(), pow_pool },
    )
    .await?;
    let finish = match recv_encrypted::<RootReply>(&mut *transport, &mut global_session, params.reply_timeout).await?
    {
        RootReply::Finish(reply) => reply,
        RootReply::Error { message } => return Err(RegistrationError::ServerError(message)),
        _ => return Err(RegistrationError::UnexpectedReply),
    };
    info!(uid = %finish.uid, "registration: assigned uid");

    // Phase 4: resolve the assigned cloud's server ids to endpoints.
    send_encrypted(
        &mut *transport,
        &mut global_session,
        &RootCall::ResolveServers { server_ids: finish.cloud.clone() },
    )
    .await?;
    let descriptors =
        match recv_encrypted::<RootReply>(&mut *transport, &mut global_session, params.reply_timeout).await? {
            RootReply::Servers(descriptors) => descriptors,
            RootReply::Error { message } => return Err(RegistrationError::ServerError(message)),
            _ => return Err(RegistrationError::UnexpectedReply),
        };

    let cloud = descriptors
        .into_iter()
        .map(|desc| ServerConfig {
            server_id: desc.server_id,
            endpoints: desc
                .ips
                .into_iter()
                .flat_map(|ip| {
                    ip.ports
                        .into_iter()
                        .map(move |p| Endpoint { host: ip.ip.clone(), port: p.port, protocol: p.protocol })
                })
                .collect(),
        })
        .collect();

    Ok(ClientConfig { parent_uid: params.parent_uid, uid: finish.uid, ephemeral_uid: finish.ephemeral_uid, master_key, cloud })
}

async fn send_plain(transport: &mut dyn aether_transport::Transport, call: &RootCall) -> Result<(), RegistrationError> {
    let frame = root_channel::encode_frame(call)?;
    match transport.write(frame).await {
        aether_transport::SendAction::Sent => Ok(()),
        _ => Err(RegistrationError::ConnectionClosed),
    }
}

async fn recv_plain<T: serde::de::DeserializeOwned>(
    transport: &mut dyn aether_transport::Transport,
    decoder: &mut RootChannelDecoder,
    timeout: Duration,
) -> Result<T, RegistrationError> {
    tokio::time::timeout(timeout, async {
        loop {
            if let Some(result) = decoder.poll_frame::<T>() {
                return result.map_err(RegistrationError::from);
            }
            match transport.read().await {
                Some(frame) => decoder.feed(&frame.bytes),
                None => return Err(RegistrationError::ConnectionClosed),
            }
        }
    })
    .await
    .map_err(|_| RegistrationError::Timeout)?
}

async fn send_encrypted(
    transport: &mut dyn aether_transport::Transport,
    session: &mut CryptoSession,
    call: &RootCall,
) -> Result<(), RegistrationError> {
    let body = serde_json::to_vec(call).map_err(RootChannelError::from)?;
    let frame = session.encode_frame(&body);
    match transport.write(frame).await {
        aether_transport::SendAction::Sent => Ok(()),
        _ => Err(RegistrationError::ConnectionClosed),
    }
}

async fn recv_encrypted<T: serde::de::DeserializeOwned>(
    transport: &mut dyn aether_transport::Transport,
    session: &mut CryptoSession,
    timeout: Duration,
) -> Result<T, RegistrationError> {
    tokio::time::timeout(timeout, async {
        loop {
            if let Some(result) = session.poll_frame() {
                let plaintext = result?;
                return serde_json::from_slice(&plaintext).map_err(|e| RegistrationError::from(RootChannelError::from(e)));
            }
            match transport.read().await {
                Some(frame) => {
                    session.feed(&frame.bytes);
                    if session.should_tear_down() {
                        warn!("registration: crypto session poisoned mid-handshake");
                        return Err(RegistrationError::ConnectionClosed);
                    }
                }
                None => return Err(RegistrationError::ConnectionClosed),
            }
        }
    })
    .await
    .map_err(|_| RegistrationError::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_master_key_has_expected_length() {
        let mut master_key = vec![0u8; MASTER_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut master_key);
        assert_eq!(master_key.len(), 32);
        assert_ne!(master_key, vec![0u8; MASTER_KEY_LEN]);
    }
}
