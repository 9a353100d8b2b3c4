//! Authentication plugins.
//!
//! - `mysql_native_password`: `SHA1(pw) XOR SHA1(seed + SHA1(SHA1(pw)))`
//! - `caching_sha2_password`: `SHA256(pw) XOR SHA256(SHA256(SHA256(pw)) + seed)`
//!   for the fast path; the full path sends the password in clear over TLS,
//!   or RSA-encrypted with the server's public key otherwise.
//! - `mysql_clear_password`: NUL-terminated password, only sensible over TLS.

use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// caching_sha2_password exchange markers.
pub mod caching_sha2 {
    /// Client asks for the server's RSA public key
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    /// Server: scramble matched the cache
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// Server: send the full password
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// Supported authentication plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    NativePassword,
    CachingSha2,
    Sha256,
    ClearPassword,
}

impl AuthPlugin {
    /// Unknown plugin names fall back to `mysql_native_password`, which every
    /// server version accepts as an auth-switch target.
    pub fn from_name(name: &str) -> Self {
        match name {
            "caching_sha2_password" => AuthPlugin::CachingSha2,
            "sha256_password" => AuthPlugin::Sha256,
            "mysql_clear_password" => AuthPlugin::ClearPassword,
            _ => AuthPlugin::NativePassword,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            AuthPlugin::NativePassword => "mysql_native_password",
            AuthPlugin::CachingSha2 => "caching_sha2_password",
            AuthPlugin::Sha256 => "sha256_password",
            AuthPlugin::ClearPassword => "mysql_clear_password",
        }
    }

    /// First auth response sent with the handshake response or an auth switch.
    ///
    /// `sha256_password` over an unencrypted link asks for the public key
    /// instead of sending anything derived from the password.
    pub fn initial_response(self, password: &str, seed: &[u8], encrypted: bool) -> Vec<u8> {
        match self {
            AuthPlugin::NativePassword => mysql_native_password(password, seed),
            AuthPlugin::CachingSha2 => caching_sha2_password(password, seed),
            AuthPlugin::Sha256 if password.is_empty() => vec![0],
            AuthPlugin::Sha256 if !encrypted => vec![1],
            AuthPlugin::Sha256 | AuthPlugin::ClearPassword => cleartext(password),
        }
    }
}

fn sha1(parts: &[&[u8]]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

/// Scramble seeds are 20 bytes; servers often append a NUL.
fn trim_seed(seed: &[u8]) -> &[u8] {
    match seed {
        [head @ .., 0] if head.len() == 20 => head,
        _ if seed.len() > 20 => &seed[..20],
        _ => seed,
    }
}

/// Empty passwords produce an empty response.
pub fn mysql_native_password(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let seed = trim_seed(seed);
    let stage1 = sha1(&[password.as_bytes()]);
    let stage2 = sha1(&[&stage1]);
    let stage3 = sha1(&[seed, &stage2]);
    xor(&stage1, &stage3)
}

/// Fast-path scramble; empty passwords produce an empty response.
pub fn caching_sha2_password(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let seed = trim_seed(seed);
    let hash1 = sha256(&[password.as_bytes()]);
    let hash2 = sha256(&[&hash1]);
    let scramble = sha256(&[&hash2, seed]);
    xor(&hash1, &scramble)
}

/// NUL-terminated cleartext password.
pub fn cleartext(password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len() + 1);
    out.extend_from_slice(password.as_bytes());
    out.push(0);
    out
}

/// Encrypt the password for full authentication without TLS.
///
/// The NUL-terminated password is XOR-ed with the rotating seed and encrypted
/// with the server's PEM public key (PKCS#8 or PKCS#1) using OAEP padding.
pub fn rsa_encrypt_password(
    password: &str,
    seed: &[u8],
    public_key_pem: &[u8],
) -> Result<Vec<u8>, String> {
    let seed = trim_seed(seed);
    if seed.is_empty() {
        return Err("empty authentication seed".to_string());
    }

    let mut plain = cleartext(password);
    for (i, byte) in plain.iter_mut().enumerate() {
        *byte ^= seed[i % seed.len()];
    }

    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|e| format!("server public key is not valid PEM: {e}"))?;
    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| format!("cannot parse server public key: {e}"))?;

    key.encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &plain)
        .map_err(|e| format!("RSA encryption failed: {e}"))
}
