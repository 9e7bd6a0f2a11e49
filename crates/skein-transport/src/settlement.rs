//! Settlement handshake: after a factory produces an authenticated
//! transport, both ends agree on its canonical [`Entry`].
//!
//! The dialer proposes the entry and signs its hash; the acceptor
//! validates the proposal against its own derivation and the transport's
//! edges, countersigns, and echoes it back. Messages are JSON, framed by a
//! u16 length prefix.

use std::time::Duration;

use tokio::time::timeout;

use skein_crypto::{PublicKey, SecretKey};

use crate::entry::{remote_edge, Entry, SignedEntry};
use crate::error::SettlementError;
use crate::transport::Transport;

/// Bound on the dialer's settlement handshake.
pub const SETTLEMENT_DIAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Bound on the acceptor's settlement handshake.
pub const SETTLEMENT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

async fn send_msg(tr: &dyn Transport, msg: &[u8]) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(2 + msg.len());
    buf.extend_from_slice(&(msg.len() as u16).to_be_bytes());
    buf.extend_from_slice(msg);
    let mut sent = 0;
    while sent < buf.len() {
        let n = tr.send(&buf[sent..]).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::WriteZero.into());
        }
        sent += n;
    }
    Ok(())
}

async fn recv_exact(tr: &dyn Transport, buf: &mut [u8]) -> std::io::Result<()> {
    let mut read = 0;
    while read < buf.len() {
        let n = tr.recv(&mut buf[read..]).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        read += n;
    }
    Ok(())
}

async fn recv_msg(tr: &dyn Transport) -> std::io::Result<Vec<u8>> {
    let mut len = [0u8; 2];
    recv_exact(tr, &mut len).await?;
    let mut msg = vec![0u8; u16::from_be_bytes(len) as usize];
    recv_exact(tr, &mut msg).await?;
    Ok(msg)
}

/// Run the dialer side of settlement, producing the canonical entry.
///
/// # Errors
///
/// [`SettlementError::Timeout`] past the bound, or validation / transport
/// failures.
pub async fn initiate(
    local_pk: PublicKey,
    local_sk: &SecretKey,
    tr: &dyn Transport,
    tp_type: &str,
    public: bool,
    bound: Duration,
) -> Result<Entry, SettlementError> {
    timeout(bound, async {
        let edges = tr.edges();
        let remote = remote_edge(&edges, &local_pk).ok_or(SettlementError::UnknownRemote)?;
        let entry = Entry::new(tp_type, local_pk, remote, public);
        let init_sig = local_sk.sign(entry.hash().as_bytes());
        let proposal = SignedEntry {
            entry: entry.clone(),
            init_sig,
            resp_sig: None,
        };
        send_msg(tr, &serde_json::to_vec(&proposal).expect("entry serializes")).await?;

        let raw = recv_msg(tr).await?;
        let answer: SignedEntry =
            serde_json::from_slice(&raw).map_err(|_| SettlementError::Malformed)?;
        if answer.entry != entry || answer.init_sig != init_sig {
            return Err(SettlementError::InvalidEntry);
        }
        let resp_sig = answer.resp_sig.ok_or(SettlementError::Malformed)?;
        remote
            .verify(entry.hash().as_bytes(), &resp_sig)
            .map_err(|_| SettlementError::InvalidSignature)?;
        Ok(entry)
    })
    .await
    .map_err(|_| SettlementError::Timeout)?
}

/// Run the acceptor side of settlement, producing the canonical entry.
///
/// # Errors
///
/// [`SettlementError::Timeout`] past the bound, or validation / transport
/// failures.
pub async fn respond(
    local_pk: PublicKey,
    local_sk: &SecretKey,
    tr: &dyn Transport,
    bound: Duration,
) -> Result<Entry, SettlementError> {
    timeout(bound, async {
        let raw = recv_msg(tr).await?;
        let mut signed: SignedEntry =
            serde_json::from_slice(&raw).map_err(|_| SettlementError::Malformed)?;
        let entry = signed.entry.clone();
        if !entry.is_consistent() || entry.edges != tr.edges() {
            return Err(SettlementError::InvalidEntry);
        }
        let remote = entry
            .remote(&local_pk)
            .ok_or(SettlementError::UnknownRemote)?;
        remote
            .verify(entry.hash().as_bytes(), &signed.init_sig)
            .map_err(|_| SettlementError::InvalidSignature)?;
        signed.resp_sig = Some(local_sk.sign(entry.hash().as_bytes()));
        send_msg(tr, &serde_json::to_vec(&signed).expect("entry serializes")).await?;
        Ok(entry)
    })
    .await
    .map_err(|_| SettlementError::Timeout)?
}
