//! BOLT 8 encrypted transport: `Noise_XK_secp256k1_ChaChaPoly_SHA256`.
//!
//! [`initiate`] runs the three-act handshake as the dialing side,
//! [`accept`] as the listening side. Both return a [`NoiseStream`] that
//! reads and writes whole Lightning messages:
//!
//! ```text
//! ┌──────────────────────────────┬───────────────────────────────────┐
//! │ len (2 bytes BE) + MAC (16)  │ body (len bytes) + MAC (16)       │
//! └──────────────────────────────┴───────────────────────────────────┘
//! ```
//!
//! Each direction has its own ChaCha20-Poly1305 key; the key is rotated
//! with HKDF every 1000 nonces.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use secp256k1::ecdh::SharedSecret;
use secp256k1::{PublicKey, SecretKey};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::identity::{IdentityError, KeyPair};

const PROTOCOL_NAME: &[u8] = b"Noise_XK_secp256k1_ChaChaPoly_SHA256";
const PROLOGUE: &[u8] = b"lightning";
const HANDSHAKE_VERSION: u8 = 0;

const PUBKEY_SIZE: usize = 33;
const TAG_SIZE: usize = 16;
const ACT_ONE_SIZE: usize = 1 + PUBKEY_SIZE + TAG_SIZE;
const ACT_TWO_SIZE: usize = ACT_ONE_SIZE;
const ACT_THREE_SIZE: usize = 1 + PUBKEY_SIZE + TAG_SIZE + TAG_SIZE;
const LENGTH_HEADER_SIZE: usize = 2 + TAG_SIZE;
const KEY_ROTATION_INTERVAL: u64 = 1000;

/// Largest plaintext a single Lightning message may carry.
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Errors from the handshake and the encrypted message stream.
#[derive(Debug, thiserror::Error)]
pub enum NoiseError {
    #[error("transport I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported handshake version {0}")]
    BadVersion(u8),

    #[error("invalid public key in handshake: {0}")]
    InvalidKey(#[from] secp256k1::Error),

    #[error("ephemeral key generation failed: {0}")]
    Identity(#[from] IdentityError),

    #[error("message authentication failed")]
    Decryption,

    #[error("encryption failed")]
    Encryption,

    #[error("key derivation failed")]
    KeyDerivation,

    #[error("message of {0} bytes exceeds the {MAX_MESSAGE_SIZE} byte limit")]
    MessageTooLarge(usize),
}

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// HKDF-SHA256 with `salt` as salt, empty info, 64 bytes of output split in two.
fn hkdf2(salt: &[u8; 32], ikm: &[u8]) -> Result<([u8; 32], [u8; 32]), NoiseError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; 64];
    hk.expand(&[], &mut okm).map_err(|_| NoiseError::KeyDerivation)?;
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&okm[..32]);
    second.copy_from_slice(&okm[32..]);
    okm.zeroize();
    Ok((first, second))
}

fn ecdh(point: &PublicKey, scalar: &SecretKey) -> [u8; 32] {
    SharedSecret::new(point, scalar).secret_bytes()
}

/// 96-bit nonce: 32 zero bits followed by the little-endian counter.
fn nonce_bytes(n: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&n.to_le_bytes());
    nonce
}

fn encrypt_with_ad(
    key: &[u8; 32],
    n: u64,
    ad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, NoiseError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes(n)),
            Payload {
                msg: plaintext,
                aad: ad,
            },
        )
        .map_err(|_| NoiseError::Encryption)
}

fn decrypt_with_ad(
    key: &[u8; 32],
    n: u64,
    ad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, NoiseError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(&nonce_bytes(n)),
            Payload {
                msg: ciphertext,
                aad: ad,
            },
        )
        .map_err(|_| NoiseError::Decryption)
}

/// Chaining key and handshake hash carried through the three acts.
#[derive(Zeroize, ZeroizeOnDrop)]
struct HandshakeState {
    ck: [u8; 32],
    h: [u8; 32],
}

impl HandshakeState {
    /// Initialise with the responder's static key mixed in, as both sides know it.
    fn new(responder_static: &PublicKey) -> Self {
        let ck = sha256(&[PROTOCOL_NAME]);
        let h = sha256(&[&ck[..], PROLOGUE]);
        let h = sha256(&[&h[..], &responder_static.serialize()[..]]);
        Self { ck, h }
    }

    fn mix_hash(&mut self, data: &[u8]) {
        self.h = sha256(&[&self.h[..], data]);
    }

    /// Advance the chaining key with `ikm` and return the temporary key.
    fn mix_key(&mut self, ikm: &[u8]) -> Result<[u8; 32], NoiseError> {
        let (ck, temp_k) = hkdf2(&self.ck, ikm)?;
        self.ck = ck;
        Ok(temp_k)
    }

    /// Derive the two transport keys once the handshake is complete.
    fn split(&self) -> Result<([u8; 32], [u8; 32]), NoiseError> {
        hkdf2(&self.ck, &[])
    }
}

fn check_version(act: &[u8]) -> Result<(), NoiseError> {
    match act[0] {
        HANDSHAKE_VERSION => Ok(()),
        other => Err(NoiseError::BadVersion(other)),
    }
}

/// One direction of the transport: key, nonce, and chaining key for rotation.
#[derive(Zeroize, ZeroizeOnDrop)]
struct CipherState {
    key: [u8; 32],
    nonce: u64,
    ck: [u8; 32],
}

impl CipherState {
    fn new(key: [u8; 32], ck: [u8; 32]) -> Self {
        Self { key, nonce: 0, ck }
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let ciphertext = encrypt_with_ad(&self.key, self.nonce, &[], plaintext)?;
        self.advance()?;
        Ok(ciphertext)
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let plaintext = decrypt_with_ad(&self.key, self.nonce, &[], ciphertext)?;
        self.advance()?;
        Ok(plaintext)
    }

    fn advance(&mut self) -> Result<(), NoiseError> {
        self.nonce += 1;
        if self.nonce == KEY_ROTATION_INTERVAL {
            let (ck, key) = hkdf2(&self.ck, &self.key)?;
            self.ck = ck;
            self.key = key;
            self.nonce = 0;
        }
        Ok(())
    }
}

/// An established BOLT 8 session over `S`.
pub struct NoiseStream<S> {
    io: S,
    sender: CipherState,
    receiver: CipherState,
}

impl<S> NoiseStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(io: S, sk: [u8; 32], rk: [u8; 32], ck: [u8; 32]) -> Self {
        Self {
            io,
            sender: CipherState::new(sk, ck),
            receiver: CipherState::new(rk, ck),
        }
    }

    /// Encrypt and write one message. Returns the plaintext length written.
    pub async fn write_message(&mut self, msg: &[u8]) -> Result<usize, NoiseError> {
        if msg.len() > MAX_MESSAGE_SIZE {
            return Err(NoiseError::MessageTooLarge(msg.len()));
        }
        let len = (msg.len() as u16).to_be_bytes();
        let mut packet = self.sender.encrypt(&len)?;
        packet.extend_from_slice(&self.sender.encrypt(msg)?);
        self.io.write_all(&packet).await?;
        self.io.flush().await?;
        Ok(msg.len())
    }

    /// Read and decrypt the next whole message.
    ///
    /// Returns `Ok(None)` if the peer closed the stream cleanly between
    /// messages; EOF in the middle of a message is an I/O error.
    ///
    /// Not cancel safe: dropping the future after the header was decrypted
    /// loses the message and leaves the receive nonce ahead of the peer's.
    pub async fn read_message(&mut self) -> Result<Option<Vec<u8>>, NoiseError> {
        let mut header = [0u8; LENGTH_HEADER_SIZE];
        let first = self.io.read(&mut header).await?;
        if first == 0 {
            return Ok(None);
        }
        self.io.read_exact(&mut header[first..]).await?;

        let len_bytes = self.receiver.decrypt(&header)?;
        let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;

        let mut body = vec![0u8; len + TAG_SIZE];
        self.io.read_exact(&mut body).await?;
        Ok(Some(self.receiver.decrypt(&body)?))
    }

    /// Shut down the write half of the underlying stream.
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.io.shutdown().await
    }
}

/// Run the handshake as initiator against a responder whose static key is `remote`.
pub async fn initiate<S>(
    io: S,
    local: &KeyPair,
    remote: &PublicKey,
) -> Result<NoiseStream<S>, NoiseError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    initiate_with_ephemeral(io, local, KeyPair::generate()?, remote).await
}

async fn initiate_with_ephemeral<S>(
    mut io: S,
    local: &KeyPair,
    ephemeral: KeyPair,
    remote: &PublicKey,
) -> Result<NoiseStream<S>, NoiseError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = HandshakeState::new(remote);

    // Act one: -> e, es
    let e_pub = ephemeral.public_key().serialize();
    state.mix_hash(&e_pub);
    let temp_k1 = state.mix_key(&ecdh(remote, ephemeral.secret_key()))?;
    let c = encrypt_with_ad(&temp_k1, 0, &state.h, &[])?;
    state.mix_hash(&c);

    let mut act_one = Vec::with_capacity(ACT_ONE_SIZE);
    act_one.push(HANDSHAKE_VERSION);
    act_one.extend_from_slice(&e_pub);
    act_one.extend_from_slice(&c);
    io.write_all(&act_one).await?;
    io.flush().await?;

    // Act two: <- e, ee
    let mut act_two = [0u8; ACT_TWO_SIZE];
    io.read_exact(&mut act_two).await?;
    check_version(&act_two)?;
    let re = PublicKey::from_slice(&act_two[1..1 + PUBKEY_SIZE])?;
    let c = &act_two[1 + PUBKEY_SIZE..];
    state.mix_hash(&re.serialize());
    let temp_k2 = state.mix_key(&ecdh(&re, ephemeral.secret_key()))?;
    decrypt_with_ad(&temp_k2, 0, &state.h, c)?;
    state.mix_hash(c);

    // Act three: -> s, se
    let c = encrypt_with_ad(&temp_k2, 1, &state.h, &local.public_key().serialize())?;
    state.mix_hash(&c);
    let temp_k3 = state.mix_key(&ecdh(&re, local.secret_key()))?;
    let t = encrypt_with_ad(&temp_k3, 0, &state.h, &[])?;
    let (sk, rk) = state.split()?;

    let mut act_three = Vec::with_capacity(ACT_THREE_SIZE);
    act_three.push(HANDSHAKE_VERSION);
    act_three.extend_from_slice(&c);
    act_three.extend_from_slice(&t);
    io.write_all(&act_three).await?;
    io.flush().await?;

    Ok(NoiseStream::new(io, sk, rk, state.ck))
}

/// Run the handshake as responder. Returns the stream and the initiator's static key.
pub async fn accept<S>(
    io: S,
    local: &KeyPair,
) -> Result<(NoiseStream<S>, PublicKey), NoiseError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    accept_with_ephemeral(io, local, KeyPair::generate()?).await
}

async fn accept_with_ephemeral<S>(
    mut io: S,
    local: &KeyPair,
    ephemeral: KeyPair,
) -> Result<(NoiseStream<S>, PublicKey), NoiseError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = HandshakeState::new(&local.public_key());

    // Act one: <- e, es
    let mut act_one = [0u8; ACT_ONE_SIZE];
    io.read_exact(&mut act_one).await?;
    check_version(&act_one)?;
    let re = PublicKey::from_slice(&act_one[1..1 + PUBKEY_SIZE])?;
    let c = &act_one[1 + PUBKEY_SIZE..];
    state.mix_hash(&re.serialize());
    let temp_k1 = state.mix_key(&ecdh(&re, local.secret_key()))?;
    decrypt_with_ad(&temp_k1, 0, &state.h, c)?;
    state.mix_hash(c);

    // Act two: -> e, ee
    let e_pub = ephemeral.public_key().serialize();
    state.mix_hash(&e_pub);
    let temp_k2 = state.mix_key(&ecdh(&re, ephemeral.secret_key()))?;
    let c = encrypt_with_ad(&temp_k2, 0, &state.h, &[])?;
    state.mix_hash(&c);

    let mut act_two = Vec::with_capacity(ACT_TWO_SIZE);
    act_two.push(HANDSHAKE_VERSION);
    act_two.extend_from_slice(&e_pub);
    act_two.extend_from_slice(&c);
    io.write_all(&act_two).await?;
    io.flush().await?;

    // Act three: <- s, se
    let mut act_three = [0u8; ACT_THREE_SIZE];
    io.read_exact(&mut act_three).await?;
    check_version(&act_three)?;
    let c = &act_three[1..1 + PUBKEY_SIZE + TAG_SIZE];
    let t = &act_three[1 + PUBKEY_SIZE + TAG_SIZE..];
    let rs_bytes = decrypt_with_ad(&temp_k2, 1, &state.h, c)?;
    let rs = PublicKey::from_slice(&rs_bytes)?;
    state.mix_hash(c);
    let temp_k3 = state.mix_key(&ecdh(&rs, ephemeral.secret_key()))?;
    decrypt_with_ad(&temp_k3, 0, &state.h, t)?;
    let (rk, sk) = state.split()?;

    Ok((NoiseStream::new(io, sk, rk, state.ck), rs))
}
