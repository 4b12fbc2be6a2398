//! Mutual Challenge/Response Authentication
//!
//! Both ends hold the same [`DerivedToken`] and prove it without sending it:
//!
//! - Host sends a random 32-byte nonce
//! - Peer answers with `HMAC-SHA256(token, host_nonce)` plus its own nonce
//! - Host verifies and answers with `HMAC-SHA256(token, peer_nonce)`
//! - Peer verifies, so a process squatting on the port with a different
//!   token cannot pass itself off as the host
//!
//! Digest comparison is constant-time (`Mac::verify_slice`).

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use super::channel::FramedChannel;
use super::protocol::{HostFrame, PeerFrame, PROTOCOL_VERSION};
use super::TransportError;
use crate::secret::DerivedToken;

type HmacSha256 = Hmac<Sha256>;

/// Nonce size in bytes
pub const NONCE_SIZE: usize = 32;

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

fn mac_for(token: &DerivedToken, nonce: &[u8]) -> Result<HmacSha256, TransportError> {
    let mut mac = HmacSha256::new_from_slice(token.as_bytes())
        .map_err(|e| TransportError::AuthenticationFailed(format!("invalid key: {e}")))?;
    mac.update(nonce);
    Ok(mac)
}

/// Hex digest proving knowledge of `token` for `nonce`
///
/// # Errors
///
/// Returns `TransportError::AuthenticationFailed` if the token cannot key
/// the MAC.
pub fn sign(token: &DerivedToken, nonce: &[u8]) -> Result<String, TransportError> {
    Ok(hex::encode(mac_for(token, nonce)?.finalize().into_bytes()))
}

/// Check a hex digest produced by [`sign`]
#[must_use]
pub fn verify(token: &DerivedToken, nonce: &[u8], digest_hex: &str) -> bool {
    let Ok(digest) = hex::decode(digest_hex) else {
        return false;
    };
    match mac_for(token, nonce) {
        Ok(mac) => mac.verify_slice(&digest).is_ok(),
        Err(_) => false,
    }
}

fn decode_nonce(nonce_hex: &str) -> Result<Vec<u8>, TransportError> {
    match hex::decode(nonce_hex) {
        Ok(bytes) if bytes.len() == NONCE_SIZE => Ok(bytes),
        _ => Err(TransportError::AuthenticationFailed(
            "malformed nonce".to_string(),
        )),
    }
}

/// Host side: challenge a freshly accepted peer
///
/// On failure the peer is sent a `Rejected` frame before the error is
/// returned; the caller then drops the connection.
///
/// # Errors
///
/// - `ProtocolMismatch` if the peer speaks another protocol version
/// - `AuthenticationFailed` if its digest or nonce is wrong
/// - `UnexpectedFrame` if it answers with anything but `Answer`
/// - any channel error while sending or receiving
pub async fn challenge_peer(
    channel: &mut FramedChannel,
    token: &DerivedToken,
) -> Result<(), TransportError> {
    let nonce = generate_nonce();
    channel
        .send(&HostFrame::Challenge {
            version: PROTOCOL_VERSION,
            nonce: hex::encode(nonce),
        })
        .await?;

    let (version, digest, peer_nonce) = match channel.recv::<PeerFrame>().await? {
        PeerFrame::Answer {
            version,
            digest,
            nonce,
        } => (version, digest, nonce),
        other => {
            reject(channel, "expected a challenge answer").await;
            return Err(TransportError::UnexpectedFrame(format!("{other:?}")));
        }
    };

    if version != PROTOCOL_VERSION {
        reject(channel, &format!("unsupported protocol version {version}")).await;
        return Err(TransportError::ProtocolMismatch {
            ours: PROTOCOL_VERSION,
            theirs: version,
        });
    }

    if !verify(token, &nonce, &digest) {
        reject(channel, "authentication failed").await;
        return Err(TransportError::AuthenticationFailed(
            "peer digest does not match".to_string(),
        ));
    }

    let peer_nonce = match decode_nonce(&peer_nonce) {
        Ok(bytes) => bytes,
        Err(e) => {
            reject(channel, "malformed nonce").await;
            return Err(e);
        }
    };

    channel
        .send(&HostFrame::Accepted {
            digest: sign(token, &peer_nonce)?,
        })
        .await
}

/// Peer side: answer the host's challenge and authenticate the host in turn
///
/// # Errors
///
/// - `Rejected` if the host refuses the connection before challenging
/// - `ProtocolMismatch` if the host speaks another protocol version
/// - `AuthenticationFailed` if the host rejects our digest or cannot prove
///   the token itself
/// - any channel error while sending or receiving
pub async fn answer_challenge(
    channel: &mut FramedChannel,
    token: &DerivedToken,
) -> Result<(), TransportError> {
    let (version, host_nonce) = match channel.recv::<HostFrame>().await? {
        HostFrame::Challenge { version, nonce } => (version, nonce),
        HostFrame::Rejected { reason } => return Err(TransportError::Rejected(reason)),
        other => return Err(TransportError::UnexpectedFrame(format!("{other:?}"))),
    };

    if version != PROTOCOL_VERSION {
        return Err(TransportError::ProtocolMismatch {
            ours: PROTOCOL_VERSION,
            theirs: version,
        });
    }

    let host_nonce = decode_nonce(&host_nonce)?;
    let our_nonce = generate_nonce();
    channel
        .send(&PeerFrame::Answer {
            version: PROTOCOL_VERSION,
            digest: sign(token, &host_nonce)?,
            nonce: hex::encode(our_nonce),
        })
        .await?;

    match channel.recv::<HostFrame>().await {
        Ok(HostFrame::Accepted { digest }) if verify(token, &our_nonce, &digest) => Ok(()),
        Ok(HostFrame::Accepted { .. }) => Err(TransportError::AuthenticationFailed(
            "host could not prove the shared token".to_string(),
        )),
        Ok(HostFrame::Rejected { reason }) => Err(TransportError::AuthenticationFailed(reason)),
        Ok(other) => Err(TransportError::UnexpectedFrame(format!("{other:?}"))),
        // Some hosts close before the rejection frame is flushed to us
        Err(TransportError::ConnectionClosed) => Err(TransportError::AuthenticationFailed(
            "host closed the connection during authentication".to_string(),
        )),
        Err(e) => Err(e),
    }
}

async fn reject(channel: &mut FramedChannel, reason: &str) {
    let frame = HostFrame::Rejected {
        reason: reason.to_string(),
    };
    if let Err(e) = channel.send(&frame).await {
        tracing::debug!(peer = %channel.peer_addr(), error = %e, "Could not deliver rejection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn pair() -> (FramedChannel, FramedChannel) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (
            FramedChannel::new(accepted.unwrap().0).unwrap(),
            FramedChannel::new(client.unwrap()).unwrap(),
        )
    }

    #[test]
    fn test_sign_verify() {
        let token = DerivedToken::derive(17310, None);
        let nonce = generate_nonce();
        let digest = sign(&token, &nonce).unwrap();

        assert!(verify(&token, &nonce, &digest));
        assert!(!verify(&token, &generate_nonce(), &digest));
        assert!(!verify(&DerivedToken::derive(17311, None), &nonce, &digest));
        assert!(!verify(&token, &nonce, "not hex"));
    }

    #[tokio::test]
    async fn test_handshake_same_token() {
        let (mut host, mut peer) = pair().await;
        let token = DerivedToken::derive(17310, Some("PASSWORD"));

        let (host_result, peer_result) = tokio::join!(
            challenge_peer(&mut host, &token),
            answer_challenge(&mut peer, &token)
        );
        host_result.unwrap();
        peer_result.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_token_mismatch() {
        let (mut host, mut peer) = pair().await;
        let host_token = DerivedToken::derive(17310, None);
        let peer_token = DerivedToken::derive(17311, None);

        let (host_result, peer_result) = tokio::join!(
            challenge_peer(&mut host, &host_token),
            answer_challenge(&mut peer, &peer_token)
        );
        assert!(matches!(
            host_result,
            Err(TransportError::AuthenticationFailed(_))
        ));
        assert!(matches!(
            peer_result,
            Err(TransportError::AuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_peer_detects_impostor_host() {
        let (mut host, mut peer) = pair().await;
        let token = DerivedToken::derive(17310, None);

        let impostor = async {
            host.send(&HostFrame::Challenge {
                version: PROTOCOL_VERSION,
                nonce: hex::encode(generate_nonce()),
            })
            .await
            .unwrap();
            let _answer: PeerFrame = host.recv().await.unwrap();
            // Accept without knowing the token
            host.send(&HostFrame::Accepted {
                digest: hex::encode([0u8; 32]),
            })
            .await
            .unwrap();
        };

        let (_, peer_result) = tokio::join!(impostor, answer_challenge(&mut peer, &token));
        assert!(matches!(
            peer_result,
            Err(TransportError::AuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (mut host, mut peer) = pair().await;
        let token = DerivedToken::derive(17310, None);

        host.send(&HostFrame::Challenge {
            version: PROTOCOL_VERSION + 1,
            nonce: hex::encode(generate_nonce()),
        })
        .await
        .unwrap();

        assert!(matches!(
            answer_challenge(&mut peer, &token).await,
            Err(TransportError::ProtocolMismatch { .. })
        ));
    }
}
