//! Transaction `extra` field: tagged fields carrying the transaction public key
//! and an optional nonce (which may hold a payment id)

use crate::data_structures::types::{Hash, PublicKey};

pub const TX_EXTRA_TAG_PADDING: u8 = 0x00;
pub const TX_EXTRA_TAG_PUBKEY: u8 = 0x01;
pub const TX_EXTRA_NONCE: u8 = 0x02;
pub const TX_EXTRA_NONCE_PAYMENT_ID: u8 = 0x00;
pub const TX_EXTRA_NONCE_MAX_COUNT: usize = 255;

/// One parsed field of the extra blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    Padding(usize),
    PublicKey(PublicKey),
    Nonce(Vec<u8>),
}

/// Parse the extra blob. Returns the fields read before the first malformed one
/// and whether the whole blob was consumed.
pub fn parse_extra(extra: &[u8]) -> (Vec<ExtraField>, bool) {
    let mut fields = Vec::new();
    let mut pos = 0;
    while pos < extra.len() {
        match extra[pos] {
            TX_EXTRA_TAG_PADDING => {
                let size = extra[pos..].iter().take_while(|b| **b == 0).count();
                if pos + size != extra.len() {
                    return (fields, false);
                }
                fields.push(ExtraField::Padding(size));
                pos += size;
            }
            TX_EXTRA_TAG_PUBKEY => {
                if pos + 33 > extra.len() {
                    return (fields, false);
                }
                let mut key = [0u8; 32];
                key.copy_from_slice(&extra[pos + 1..pos + 33]);
                fields.push(ExtraField::PublicKey(PublicKey::new(key)));
                pos += 33;
            }
            TX_EXTRA_NONCE => {
                if pos + 2 > extra.len() {
                    return (fields, false);
                }
                let size = extra[pos + 1] as usize;
                if pos + 2 + size > extra.len() {
                    return (fields, false);
                }
                fields.push(ExtraField::Nonce(extra[pos + 2..pos + 2 + size].to_vec()));
                pos += 2 + size;
            }
            _ => return (fields, false),
        }
    }
    (fields, true)
}

pub fn add_transaction_public_key_to_extra(extra: &mut Vec<u8>, key: &PublicKey) {
    extra.push(TX_EXTRA_TAG_PUBKEY);
    extra.extend_from_slice(key.as_bytes());
}

pub fn get_transaction_public_key_from_extra(extra: &[u8]) -> Option<PublicKey> {
    parse_extra(extra).0.into_iter().find_map(|field| match field {
        ExtraField::PublicKey(key) => Some(key),
        _ => None,
    })
}

/// Append a nonce field. Returns false if the nonce is too long.
pub fn add_extra_nonce_to_extra(extra: &mut Vec<u8>, nonce: &[u8]) -> bool {
    if nonce.len() > TX_EXTRA_NONCE_MAX_COUNT {
        return false;
    }
    extra.push(TX_EXTRA_NONCE);
    extra.push(nonce.len() as u8);
    extra.extend_from_slice(nonce);
    true
}

pub fn set_payment_id_to_extra_nonce(payment_id: &Hash) -> Vec<u8> {
    let mut nonce = Vec::with_capacity(33);
    nonce.push(TX_EXTRA_NONCE_PAYMENT_ID);
    nonce.extend_from_slice(payment_id.as_bytes());
    nonce
}

pub fn get_payment_id_from_extra_nonce(nonce: &[u8]) -> Option<Hash> {
    if nonce.len() != 33 || nonce[0] != TX_EXTRA_NONCE_PAYMENT_ID {
        return None;
    }
    let mut id = [0u8; 32];
    id.copy_from_slice(&nonce[1..]);
    Some(Hash::new(id))
}

/// Build an extra blob holding only a payment id given as 64 hex characters
pub fn create_tx_extra_with_payment_id(payment_id: &str) -> Option<Vec<u8>> {
    let payment_id = Hash::from_hex(payment_id)?;
    let mut extra = Vec::new();
    add_extra_nonce_to_extra(&mut extra, &set_payment_id_to_extra_nonce(&payment_id));
    Some(extra)
}

pub fn get_payment_id_from_extra(extra: &[u8]) -> Option<Hash> {
    parse_extra(extra).0.into_iter().find_map(|field| match field {
        ExtraField::Nonce(nonce) => get_payment_id_from_extra_nonce(&nonce),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_and_payment_id_are_found() {
        let key = PublicKey::new([3u8; 32]);
        let payment_id = Hash::new([9u8; 32]);
        let mut extra = Vec::new();
        add_transaction_public_key_to_extra(&mut extra, &key);
        assert!(add_extra_nonce_to_extra(
            &mut extra,
            &set_payment_id_to_extra_nonce(&payment_id)
        ));

        assert_eq!(get_transaction_public_key_from_extra(&extra), Some(key));
        assert_eq!(get_payment_id_from_extra(&extra), Some(payment_id));
        let (fields, complete) = parse_extra(&extra);
        assert!(complete);
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn malformed_extra_keeps_prefix_fields() {
        let mut extra = Vec::new();
        add_transaction_public_key_to_extra(&mut extra, &PublicKey::new([1u8; 32]));
        extra.extend_from_slice(&[TX_EXTRA_NONCE, 10, 1, 2]);
        let (fields, complete) = parse_extra(&extra);
        assert!(!complete);
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn payment_id_from_hex() {
        let extra = create_tx_extra_with_payment_id(&"ab".repeat(32)).unwrap();
        assert_eq!(
            get_payment_id_from_extra(&extra),
            Some(Hash::new([0xab; 32]))
        );
        assert!(create_tx_extra_with_payment_id("xyz").is_none());
    }
}
