//! Cryptographic primitives used by the wallet
//!
//! Keys are Ristretto points/scalars. The functions follow the CryptoNote
//! one-time key scheme:
//!
//! - derivation `D = a * R` (view secret times transaction public key)
//! - one-time output key `P = Hs(D || i) * G + B`
//! - one-time secret `x = Hs(D || i) + b`
//! - key image `I = x * Hp(P)`
//! - ring signatures over the transaction prefix hash

use blake2::{Blake2b, Digest};
use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT,
    ristretto::{CompressedRistretto, RistrettoPoint},
    scalar::Scalar,
};
use digest::consts::{U32, U64};
use rand_core::{CryptoRng, RngCore};

use crate::{
    common::write_varint,
    data_structures::types::{
        Hash, KeyDerivation, KeyImage, KeyPair, PublicKey, SecretKey, Signature,
    },
};

const HASH_TO_POINT_DOMAIN: &[u8] = b"cryptonote.hash_to_point";
const HASH_TO_SCALAR_DOMAIN: &[u8] = b"cryptonote.hash_to_scalar";

/// 32-byte Blake2b hash
pub fn fast_hash(data: &[u8]) -> Hash {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Hash::new(out)
}

/// Hash arbitrary data to a scalar (Hs)
pub fn hash_to_scalar(data: &[u8]) -> Scalar {
    let mut hasher = Blake2b::<U64>::new();
    hasher.update(HASH_TO_SCALAR_DOMAIN);
    hasher.update(data);
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    Scalar::from_bytes_mod_order_wide(&wide)
}

fn hash_to_point(key: &PublicKey) -> RistrettoPoint {
    let mut hasher = Blake2b::<U64>::new();
    hasher.update(HASH_TO_POINT_DOMAIN);
    hasher.update(key.as_bytes());
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    RistrettoPoint::from_uniform_bytes(&wide)
}

pub fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    let mut wide = [0u8; 64];
    rng.fill_bytes(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

fn decompress(key: &PublicKey) -> Option<RistrettoPoint> {
    CompressedRistretto(key.0).decompress()
}

fn to_public(point: &RistrettoPoint) -> PublicKey {
    PublicKey::new(point.compress().to_bytes())
}

fn to_scalar(secret: &SecretKey) -> Scalar {
    Scalar::from_bytes_mod_order(secret.0)
}

/// Generate a fresh key pair
pub fn generate_keys<R: RngCore + CryptoRng>(rng: &mut R) -> KeyPair {
    let secret = random_scalar(rng);
    KeyPair {
        public_key: to_public(&(secret * RISTRETTO_BASEPOINT_POINT)),
        secret_key: SecretKey::new(secret.to_bytes()),
    }
}

/// Whether the bytes are a valid encoded group element
pub fn check_key(key: &PublicKey) -> bool {
    decompress(key).is_some()
}

pub fn secret_key_to_public_key(secret: &SecretKey) -> PublicKey {
    to_public(&(to_scalar(secret) * RISTRETTO_BASEPOINT_POINT))
}

/// `D = secret * public`
pub fn generate_key_derivation(public: &PublicKey, secret: &SecretKey) -> Option<KeyDerivation> {
    let point = decompress(public)?;
    Some(KeyDerivation::new(
        (to_scalar(secret) * point).compress().to_bytes(),
    ))
}

fn derivation_to_scalar(derivation: &KeyDerivation, output_index: usize) -> Scalar {
    let mut buffer = Vec::with_capacity(42);
    buffer.extend_from_slice(derivation.as_bytes());
    write_varint(&mut buffer, output_index as u64);
    hash_to_scalar(&buffer)
}

/// One-time public key `Hs(D || i) * G + base`
pub fn derive_public_key(
    derivation: &KeyDerivation,
    output_index: usize,
    base: &PublicKey,
) -> Option<PublicKey> {
    let base = decompress(base)?;
    let scalar = derivation_to_scalar(derivation, output_index);
    Some(to_public(&(scalar * RISTRETTO_BASEPOINT_POINT + base)))
}

/// Inverse of [`derive_public_key`]: recovers the spend public key from an output key
pub fn underive_public_key(
    derivation: &KeyDerivation,
    output_index: usize,
    output_key: &PublicKey,
) -> Option<PublicKey> {
    let output = decompress(output_key)?;
    let scalar = derivation_to_scalar(derivation, output_index);
    Some(to_public(&(output - scalar * RISTRETTO_BASEPOINT_POINT)))
}

/// One-time secret key `Hs(D || i) + base`
pub fn derive_secret_key(
    derivation: &KeyDerivation,
    output_index: usize,
    base: &SecretKey,
) -> SecretKey {
    let scalar = derivation_to_scalar(derivation, output_index) + to_scalar(base);
    SecretKey::new(scalar.to_bytes())
}

/// `I = x * Hp(P)`
pub fn generate_key_image(public: &PublicKey, secret: &SecretKey) -> KeyImage {
    let point = to_scalar(secret) * hash_to_point(public);
    KeyImage::new(point.compress().to_bytes())
}

fn ring_challenge(prefix_hash: &Hash, points: &[(RistrettoPoint, RistrettoPoint)]) -> Scalar {
    let mut buffer = Vec::with_capacity(32 + points.len() * 64);
    buffer.extend_from_slice(prefix_hash.as_bytes());
    for (l, r) in points {
        buffer.extend_from_slice(l.compress().as_bytes());
        buffer.extend_from_slice(r.compress().as_bytes());
    }
    hash_to_scalar(&buffer)
}

/// Ring signature proving knowledge of the secret key of `public_keys[secret_index]`
/// whose key image is `image`. Returns `None` if any key is malformed or the
/// index is out of range.
pub fn generate_ring_signature<R: RngCore + CryptoRng>(
    prefix_hash: &Hash,
    image: &KeyImage,
    public_keys: &[PublicKey],
    secret: &SecretKey,
    secret_index: usize,
    rng: &mut R,
) -> Option<Vec<Signature>> {
    if secret_index >= public_keys.len() {
        return None;
    }
    let image_point = CompressedRistretto(image.0).decompress()?;
    let secret = to_scalar(secret);
    let mut points = Vec::with_capacity(public_keys.len());
    let mut cs = vec![Scalar::ZERO; public_keys.len()];
    let mut rs = vec![Scalar::ZERO; public_keys.len()];
    let mut sum = Scalar::ZERO;
    let mut k = Scalar::ZERO;

    for (i, key) in public_keys.iter().enumerate() {
        let point = decompress(key)?;
        let hp = hash_to_point(key);
        if i == secret_index {
            k = random_scalar(rng);
            points.push((k * RISTRETTO_BASEPOINT_POINT, k * hp));
        } else {
            cs[i] = random_scalar(rng);
            rs[i] = random_scalar(rng);
            points.push((
                rs[i] * RISTRETTO_BASEPOINT_POINT + cs[i] * point,
                rs[i] * hp + cs[i] * image_point,
            ));
            sum += cs[i];
        }
    }

    let challenge = ring_challenge(prefix_hash, &points);
    cs[secret_index] = challenge - sum;
    rs[secret_index] = k - cs[secret_index] * secret;

    Some(
        cs.iter()
            .zip(rs.iter())
            .map(|(c, r)| Signature {
                c: c.to_bytes(),
                r: r.to_bytes(),
            })
            .collect(),
    )
}

pub fn check_ring_signature(
    prefix_hash: &Hash,
    image: &KeyImage,
    public_keys: &[PublicKey],
    signatures: &[Signature],
) -> bool {
    if public_keys.is_empty() || public_keys.len() != signatures.len() {
        return false;
    }
    let Some(image_point) = CompressedRistretto(image.0).decompress() else {
        return false;
    };
    let mut points = Vec::with_capacity(public_keys.len());
    let mut sum = Scalar::ZERO;
    for (key, signature) in public_keys.iter().zip(signatures) {
        let Some(point) = decompress(key) else {
            return false;
        };
        let c = Scalar::from_bytes_mod_order(signature.c);
        let r = Scalar::from_bytes_mod_order(signature.r);
        let hp = hash_to_point(key);
        points.push((
            r * RISTRETTO_BASEPOINT_POINT + c * point,
            r * hp + c * image_point,
        ));
        sum += c;
    }
    ring_challenge(prefix_hash, &points) == sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_keys_match() {
        let mut rng = rand::thread_rng();
        let view = generate_keys(&mut rng);
        let spend = generate_keys(&mut rng);
        let tx_key = generate_keys(&mut rng);

        // sender side: r * A, receiver side: a * R
        let sender = generate_key_derivation(&view.public_key, &tx_key.secret_key).unwrap();
        let receiver = generate_key_derivation(&tx_key.public_key, &view.secret_key).unwrap();
        assert_eq!(sender, receiver);

        let output_key = derive_public_key(&sender, 3, &spend.public_key).unwrap();
        let output_secret = derive_secret_key(&receiver, 3, &spend.secret_key);
        assert_eq!(secret_key_to_public_key(&output_secret), output_key);
        assert_eq!(
            underive_public_key(&receiver, 3, &output_key),
            Some(spend.public_key)
        );
        assert_ne!(
            derive_public_key(&sender, 4, &spend.public_key).unwrap(),
            output_key
        );
    }

    #[test]
    fn ring_signature_verifies_and_binds_message() {
        let mut rng = rand::thread_rng();
        let real = generate_keys(&mut rng);
        let mut ring: Vec<PublicKey> = (0..4).map(|_| generate_keys(&mut rng).public_key).collect();
        ring.insert(2, real.public_key);
        let image = generate_key_image(&real.public_key, &real.secret_key);
        let message = fast_hash(b"prefix");

        let signature =
            generate_ring_signature(&message, &image, &ring, &real.secret_key, 2, &mut rng)
                .unwrap();
        assert!(check_ring_signature(&message, &image, &ring, &signature));
        assert!(!check_ring_signature(
            &fast_hash(b"other"),
            &image,
            &ring,
            &signature
        ));

        let other = generate_keys(&mut rng);
        let wrong_image = generate_key_image(&other.public_key, &other.secret_key);
        assert!(!check_ring_signature(&message, &wrong_image, &ring, &signature));
    }

    #[test]
    fn key_image_is_deterministic() {
        let mut rng = rand::thread_rng();
        let keys = generate_keys(&mut rng);
        assert_eq!(
            generate_key_image(&keys.public_key, &keys.secret_key),
            generate_key_image(&keys.public_key, &keys.secret_key)
        );
    }
}
