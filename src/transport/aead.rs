//! Shadowsocks AEAD channel
//!
//! Key schedule: the master key comes from the password through
//! EVP_BytesToKey (MD5); every stream direction and every datagram picks a
//! random salt and derives its subkey with HKDF-SHA1 (info `ss-subkey`).
//!
//! Stream framing, after the salt:
//!
//! ```text
//! +--------------------+--------------+---------------------+--------------+
//! | enc(len, 2 bytes)  | tag(16)      | enc(payload, len)   | tag(16)      |
//! +--------------------+--------------+---------------------+--------------+
//! ```
//!
//! with `len <= 0x3FFF` and a 12-byte little-endian nonce counter that
//! advances once per seal/open. A datagram is `[salt][enc(frame)]` sealed
//! with the all-zero nonce.

use super::{AddrMaybeCached, CipherKind, SecureChannel, StreamDyn, TcpDialer};
use crate::error::RelayError;
use aes_gcm::aead::generic_array::typenum::U12;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use md5::{Digest, Md5};
use rand::RngCore;
use sha1::Sha1;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

/// Largest payload carried by one stream chunk
pub const MAX_CHUNK_SIZE: usize = 0x3FFF;

const TAG_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const SUBKEY_INFO: &[u8] = b"ss-subkey";

/// Password-derived key shared by every channel using the same method
pub struct MasterKey {
    kind: CipherKind,
    bytes: Vec<u8>,
}

impl MasterKey {
    /// Derive the master key with EVP_BytesToKey(MD5, no salt, one round)
    pub fn derive(kind: CipherKind, password: &str) -> Self {
        let key_len = kind.key_len();
        let mut bytes = Vec::with_capacity(key_len + 16);
        let mut prev: Vec<u8> = Vec::new();
        while bytes.len() < key_len {
            let mut hasher = Md5::new();
            hasher.update(&prev);
            hasher.update(password.as_bytes());
            prev = hasher.finalize().to_vec();
            bytes.extend_from_slice(&prev);
        }
        bytes.truncate(key_len);
        MasterKey { kind, bytes }
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn subkey(&self, salt: &[u8]) -> Result<Vec<u8>, RelayError> {
        let hk = Hkdf::<Sha1>::new(Some(salt), &self.bytes);
        let mut okm = vec![0u8; self.bytes.len()];
        hk.expand(SUBKEY_INFO, &mut okm)
            .map_err(|e| RelayError::Crypto(format!("HKDF expand failed: {}", e)))?;
        Ok(okm)
    }

    fn cipher_for_salt(&self, salt: &[u8]) -> Result<AeadCipher, RelayError> {
        AeadCipher::new(self.kind, &self.subkey(salt)?)
    }

    fn random_salt(&self) -> Vec<u8> {
        let mut salt = vec![0u8; self.bytes.len()];
        rand::thread_rng().fill_bytes(&mut salt);
        salt
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

enum CipherInner {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
    Chacha(ChaCha20Poly1305),
}

/// One direction's cipher with its nonce counter
struct AeadCipher {
    inner: CipherInner,
    nonce: [u8; NONCE_LEN],
}

impl AeadCipher {
    fn new(kind: CipherKind, key: &[u8]) -> Result<Self, RelayError> {
        let bad_key = |_| RelayError::Crypto(format!("bad key length for {}", kind));
        let inner = match kind {
            CipherKind::Aes128Gcm => {
                CipherInner::Aes128(Aes128Gcm::new_from_slice(key).map_err(bad_key)?)
            }
            CipherKind::Aes256Gcm => {
                CipherInner::Aes256(Aes256Gcm::new_from_slice(key).map_err(bad_key)?)
            }
            CipherKind::Chacha20IetfPoly1305 => {
                CipherInner::Chacha(ChaCha20Poly1305::new_from_slice(key).map_err(bad_key)?)
            }
            CipherKind::Plain => {
                return Err(RelayError::Crypto("plain is not an AEAD method".to_string()))
            }
        };
        Ok(AeadCipher {
            inner,
            nonce: [0u8; NONCE_LEN],
        })
    }

    fn advance_nonce(&mut self) {
        for byte in self.nonce.iter_mut() {
            *byte = byte.wrapping_add(1);
            if *byte != 0 {
                break;
            }
        }
    }

    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, RelayError> {
        let nonce = GenericArray::<u8, U12>::from_slice(&self.nonce);
        let sealed = match &self.inner {
            CipherInner::Aes128(c) => c.encrypt(nonce, plaintext),
            CipherInner::Aes256(c) => c.encrypt(nonce, plaintext),
            CipherInner::Chacha(c) => c.encrypt(nonce, plaintext),
        }
        .map_err(|_| RelayError::Crypto("AEAD encrypt failed".to_string()))?;
        self.advance_nonce();
        Ok(sealed)
    }

    fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, RelayError> {
        let nonce = GenericArray::<u8, U12>::from_slice(&self.nonce);
        let opened = match &self.inner {
            CipherInner::Aes128(c) => c.decrypt(nonce, ciphertext),
            CipherInner::Aes256(c) => c.decrypt(nonce, ciphertext),
            CipherInner::Chacha(c) => c.decrypt(nonce, ciphertext),
        }
        .map_err(|_| RelayError::Crypto("AEAD authentication failed".to_string()))?;
        self.advance_nonce();
        Ok(opened)
    }
}

fn to_io(err: RelayError) -> io::Error {
    match err {
        RelayError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Salt,
    Length,
    Payload(usize),
}

/// Encrypted stream over any byte transport
pub struct AeadStream<S> {
    inner: S,
    key: Arc<MasterKey>,
    enc: AeadCipher,
    dec: Option<AeadCipher>,
    /// Sealed bytes not yet accepted by `inner`
    wbuf: Vec<u8>,
    wpos: usize,
    /// Ciphertext read from `inner` not yet opened
    rbuf: BytesMut,
    scratch: Box<[u8]>,
    read_state: ReadState,
    /// Opened payload not yet handed to the reader
    plain: Bytes,
}

impl<S> AeadStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `inner`; the outgoing salt is queued and goes out with the
    /// first write or flush.
    pub fn new(inner: S, key: Arc<MasterKey>) -> Result<Self, RelayError> {
        let salt = key.random_salt();
        let enc = key.cipher_for_salt(&salt)?;
        Ok(AeadStream {
            inner,
            key,
            enc,
            dec: None,
            wbuf: salt,
            wpos: 0,
            rbuf: BytesMut::with_capacity(MAX_CHUNK_SIZE + TAG_LEN),
            scratch: vec![0u8; MAX_CHUNK_SIZE + TAG_LEN].into_boxed_slice(),
            read_state: ReadState::Salt,
            plain: Bytes::new(),
        })
    }

    fn queue_chunk(&mut self, data: &[u8]) -> Result<(), RelayError> {
        let len = (data.len() as u16).to_be_bytes();
        let sealed_len = self.enc.seal(&len)?;
        let sealed_data = self.enc.seal(data)?;
        self.wbuf.extend_from_slice(&sealed_len);
        self.wbuf.extend_from_slice(&sealed_data);
        Ok(())
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.wpos < self.wbuf.len() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.wbuf[self.wpos..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.wpos += n;
        }
        self.wbuf.clear();
        self.wpos = 0;
        Poll::Ready(Ok(()))
    }

    fn needed(&self) -> usize {
        match self.read_state {
            ReadState::Salt => self.key.as_bytes().len(),
            ReadState::Length => 2 + TAG_LEN,
            ReadState::Payload(len) => len + TAG_LEN,
        }
    }

    /// Open one complete unit (salt, length or payload) from `rbuf`
    fn process(&mut self) -> Result<(), RelayError> {
        let need = self.needed();
        let unit = self.rbuf.split_to(need);
        match self.read_state {
            ReadState::Salt => {
                self.dec = Some(self.key.cipher_for_salt(&unit)?);
                self.read_state = ReadState::Length;
            }
            ReadState::Length => {
                let dec = self.dec.as_mut().ok_or_else(|| RelayError::Crypto("no salt".into()))?;
                let opened = dec.open(&unit)?;
                let len = u16::from_be_bytes([opened[0], opened[1]]) as usize;
                if len > MAX_CHUNK_SIZE {
                    return Err(RelayError::Crypto(format!(
                        "chunk length {} exceeds {}",
                        len, MAX_CHUNK_SIZE
                    )));
                }
                self.read_state = ReadState::Payload(len);
            }
            ReadState::Payload(_) => {
                let dec = self.dec.as_mut().ok_or_else(|| RelayError::Crypto("no salt".into()))?;
                self.plain = Bytes::from(dec.open(&unit)?);
                self.read_state = ReadState::Length;
            }
        }
        Ok(())
    }
}

impl<S> AsyncRead for AeadStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.plain.is_empty() {
                let n = this.plain.len().min(buf.remaining());
                buf.put_slice(&this.plain.split_to(n));
                return Poll::Ready(Ok(()));
            }

            if this.rbuf.len() >= this.needed() {
                this.process().map_err(to_io)?;
                continue;
            }

            let mut read_buf = ReadBuf::new(&mut this.scratch);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut read_buf))?;
            let filled = read_buf.filled();
            if filled.is_empty() {
                let at_boundary =
                    this.rbuf.is_empty() && !matches!(this.read_state, ReadState::Payload(_));
                return if at_boundary {
                    Poll::Ready(Ok(()))
                } else {
                    Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()))
                };
            }
            this.rbuf.extend_from_slice(filled);
        }
    }
}

impl<S> AsyncWrite for AeadStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let n = buf.len().min(MAX_CHUNK_SIZE);
        this.queue_chunk(&buf[..n]).map_err(to_io)?;

        // Anything left over goes out with the next write or flush
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

impl<S: fmt::Debug> fmt::Debug for AeadStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AeadStream")
            .field("inner", &self.inner)
            .field("kind", &self.key.kind)
            .field("read_state", &self.read_state)
            .field("pending_write", &(self.wbuf.len() - self.wpos))
            .finish()
    }
}

/// AEAD channel to one upstream server
#[derive(Debug, Clone)]
pub struct AeadChannel {
    server: AddrMaybeCached,
    kind: CipherKind,
    key: Arc<MasterKey>,
    dialer: TcpDialer,
}

impl AeadChannel {
    /// Create a channel; `key` must have been derived for `kind`
    pub fn new(
        server: AddrMaybeCached,
        kind: CipherKind,
        key: Arc<MasterKey>,
        dialer: TcpDialer,
    ) -> Result<Self, RelayError> {
        if kind == CipherKind::Plain || key.kind != kind {
            return Err(RelayError::Config(format!(
                "master key for {} cannot serve {}",
                key.kind, kind
            )));
        }
        Ok(AeadChannel {
            server,
            kind,
            key,
            dialer,
        })
    }
}

#[async_trait]
impl SecureChannel for AeadChannel {
    fn server(&self) -> &AddrMaybeCached {
        &self.server
    }

    fn kind(&self) -> CipherKind {
        self.kind
    }

    async fn open_stream(&self, raw_addr: &[u8]) -> Result<Box<dyn StreamDyn>, RelayError> {
        let tcp = self.dialer.connect(&self.server).await?;
        let mut stream = AeadStream::new(tcp, self.key.clone())?;
        stream.write_all(raw_addr).await?;
        stream.flush().await?;
        Ok(Box::new(stream))
    }

    fn encode_packet(&self, frame: &[u8]) -> Result<Vec<u8>, RelayError> {
        let mut packet = self.key.random_salt();
        let sealed = self.key.cipher_for_salt(&packet)?.seal(frame)?;
        packet.extend_from_slice(&sealed);
        Ok(packet)
    }

    fn decode_packet(&self, packet: &[u8]) -> Result<Vec<u8>, RelayError> {
        let salt_len = self.kind.key_len();
        if packet.len() < salt_len + TAG_LEN {
            return Err(RelayError::Crypto(format!(
                "datagram too short: {} bytes",
                packet.len()
            )));
        }
        let (salt, sealed) = packet.split_at(salt_len);
        self.key.cipher_for_salt(salt)?.open(sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    fn key(kind: CipherKind) -> Arc<MasterKey> {
        Arc::new(MasterKey::derive(kind, "test-password"))
    }

    #[test]
    fn test_master_key_matches_md5() {
        // MD5("password") = 5f4dcc3b5aa765d61d8327deb882cf99
        let expected = [
            0x5f, 0x4d, 0xcc, 0x3b, 0x5a, 0xa7, 0x65, 0xd6, 0x1d, 0x83, 0x27, 0xde, 0xb8, 0x82,
            0xcf, 0x99,
        ];
        let short = MasterKey::derive(CipherKind::Aes128Gcm, "password");
        assert_eq!(short.as_bytes(), &expected);

        let long = MasterKey::derive(CipherKind::Aes256Gcm, "password");
        assert_eq!(long.as_bytes().len(), 32);
        assert_eq!(&long.as_bytes()[..16], &expected);
    }

    #[test]
    fn test_nonce_is_little_endian_counter() {
        let mut cipher = AeadCipher::new(CipherKind::Aes128Gcm, &[7u8; 16]).unwrap();
        cipher.nonce[0] = 0xFF;
        cipher.advance_nonce();
        assert_eq!(&cipher.nonce[..2], &[0x00, 0x01]);
    }

    #[test]
    fn test_plain_kind_rejected() {
        assert!(AeadCipher::new(CipherKind::Plain, &[]).is_err());
        let channel = AeadChannel::new(
            "127.0.0.1:1".into(),
            CipherKind::Aes128Gcm,
            key(CipherKind::Aes256Gcm),
            TcpDialer::default(),
        );
        assert!(channel.is_err());
    }

    #[tokio::test]
    async fn test_stream_both_directions() {
        for kind in [
            CipherKind::Aes128Gcm,
            CipherKind::Aes256Gcm,
            CipherKind::Chacha20IetfPoly1305,
        ] {
            let (a, b) = duplex(64 * 1024);
            let mut client = AeadStream::new(a, key(kind)).unwrap();
            let mut server = AeadStream::new(b, key(kind)).unwrap();

            client.write_all(b"hello upstream").await.unwrap();
            client.flush().await.unwrap();
            let mut buf = [0u8; 14];
            server.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello upstream");

            server.write_all(b"hello client").await.unwrap();
            server.flush().await.unwrap();
            let mut buf = [0u8; 12];
            client.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello client");
        }
    }

    #[tokio::test]
    async fn test_stream_splits_large_writes() {
        let (a, b) = duplex(256 * 1024);
        let mut client = AeadStream::new(a, key(CipherKind::Aes256Gcm)).unwrap();
        let mut server = AeadStream::new(b, key(CipherKind::Aes256Gcm)).unwrap();

        let data: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let expected = data.clone();
        let writer = tokio::spawn(async move {
            client.write_all(&data).await.unwrap();
            client.shutdown().await.unwrap();
        });

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        writer.await.unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_stream_rejects_tampering() {
        let (a, mut tap) = duplex(64 * 1024);
        let mut client = AeadStream::new(a, key(CipherKind::Aes128Gcm)).unwrap();
        client.write_all(b"sensitive").await.unwrap();
        client.flush().await.unwrap();

        // salt(16) + len(2+16) + payload(9+16)
        let mut wire = vec![0u8; 16 + 18 + 25];
        tap.read_exact(&mut wire).await.unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;

        let (mut feed, b) = duplex(64 * 1024);
        let mut server = AeadStream::new(b, key(CipherKind::Aes128Gcm)).unwrap();
        feed.write_all(&wire).await.unwrap();

        let mut buf = [0u8; 9];
        let err = server.read_exact(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_stream_truncated_chunk_is_unexpected_eof() {
        let (a, mut tap) = duplex(64 * 1024);
        let mut client = AeadStream::new(a, key(CipherKind::Aes128Gcm)).unwrap();
        client.write_all(b"abc").await.unwrap();
        client.flush().await.unwrap();

        let mut wire = vec![0u8; 16 + 18 + 19];
        tap.read_exact(&mut wire).await.unwrap();

        let (mut feed, b) = duplex(64 * 1024);
        let mut server = AeadStream::new(b, key(CipherKind::Aes128Gcm)).unwrap();
        feed.write_all(&wire[..wire.len() - 4]).await.unwrap();
        drop(feed);

        let mut buf = Vec::new();
        let err = server.read_to_end(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_stream_rejects_oversized_chunk_length() {
        let key = key(CipherKind::Aes128Gcm);
        let salt = key.random_salt();
        let mut sender = key.cipher_for_salt(&salt).unwrap();

        let mut wire = salt;
        wire.extend_from_slice(&sender.seal(&0x4000u16.to_be_bytes()).unwrap());
        wire.extend_from_slice(&sender.seal(&[0u8; 0x4000]).unwrap());

        let (mut feed, b) = duplex(64 * 1024);
        let mut server = AeadStream::new(b, key).unwrap();
        feed.write_all(&wire).await.unwrap();

        let mut buf = [0u8; 16];
        let err = server.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_datagram_sealing() {
        let channel = AeadChannel::new(
            "127.0.0.1:8388".into(),
            CipherKind::Chacha20IetfPoly1305,
            key(CipherKind::Chacha20IetfPoly1305),
            TcpDialer::default(),
        )
        .unwrap();

        let frame = [0x01, 8, 8, 4, 4, 0x00, 0x35, 0xDE, 0xAD];
        let packet = channel.encode_packet(&frame).unwrap();
        assert_eq!(packet.len(), 32 + frame.len() + TAG_LEN);
        assert_eq!(channel.decode_packet(&packet).unwrap(), frame);

        // Fresh salt per datagram
        assert_ne!(channel.encode_packet(&frame).unwrap(), packet);

        assert!(channel.decode_packet(&packet[..40]).is_err());

        let other = AeadChannel::new(
            "127.0.0.1:8388".into(),
            CipherKind::Chacha20IetfPoly1305,
            Arc::new(MasterKey::derive(CipherKind::Chacha20IetfPoly1305, "other")),
            TcpDialer::default(),
        )
        .unwrap();
        assert!(other.decode_packet(&packet).is_err());
    }
}
