use serde::{Deserialize, Serialize};

use crate::{
    common::decompose_amount_into_digits,
    data_structures::{account::AccountPublicAddress, types::Amount},
};

/// What to do with change below the dust threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DustPolicy {
    /// Add it to the fee
    #[default]
    AddToFee,
    /// Send it back as an extra change output
    SendAsOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub address: AccountPublicAddress,
    pub amount: Amount,
}

/// Outputs after digit splitting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitDestinations {
    pub outputs: Vec<Destination>,
    /// Change dust folded into the fee
    pub dust_to_fee: Amount,
}

/// Split every destination and the change into `digit * 10^k` amounts.
///
/// Low-order parts of a destination that fall under `dust_threshold` still go
/// to the destination as one output. For the change they follow `policy`.
pub fn split_destinations(
    destinations: &[Destination],
    change: Option<Destination>,
    dust_threshold: Amount,
    policy: DustPolicy,
) -> SplitDestinations {
    let mut split = SplitDestinations::default();
    for destination in destinations {
        let (chunks, dust) = decompose_amount_into_digits(destination.amount, dust_threshold);
        push_chunks(&mut split.outputs, destination.address, chunks);
        if dust > 0 {
            split.outputs.push(Destination {
                address: destination.address,
                amount: dust,
            });
        }
    }
    if let Some(change) = change {
        let (chunks, dust) = decompose_amount_into_digits(change.amount, dust_threshold);
        push_chunks(&mut split.outputs, change.address, chunks);
        if dust > 0 {
            match policy {
                DustPolicy::AddToFee => split.dust_to_fee = dust,
                DustPolicy::SendAsOutput => split.outputs.push(Destination {
                    address: change.address,
                    amount: dust,
                }),
            }
        }
    }
    split
}

fn push_chunks(outputs: &mut Vec<Destination>, address: AccountPublicAddress, chunks: Vec<Amount>) {
    outputs.extend(chunks.into_iter().map(|amount| Destination { address, amount }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::types::PublicKey;

    fn address(seed: u8) -> AccountPublicAddress {
        AccountPublicAddress {
            spend_public_key: PublicKey::new([seed; 32]),
            view_public_key: PublicKey::new([seed; 32]),
        }
    }

    fn amounts(split: &SplitDestinations) -> Vec<Amount> {
        split.outputs.iter().map(|d| d.amount).collect()
    }

    #[test]
    fn destination_keeps_full_amount() {
        let split = split_destinations(
            &[Destination {
                address: address(1),
                amount: 1234,
            }],
            None,
            10,
            DustPolicy::AddToFee,
        );
        assert_eq!(amounts(&split), vec![30, 200, 1000, 4]);
        assert_eq!(split.dust_to_fee, 0);
    }

    #[test]
    fn change_dust_follows_policy() {
        let change = Destination {
            address: address(2),
            amount: 507,
        };
        let to_fee = split_destinations(&[], Some(change), 10, DustPolicy::AddToFee);
        assert_eq!(amounts(&to_fee), vec![500]);
        assert_eq!(to_fee.dust_to_fee, 7);

        let as_output = split_destinations(&[], Some(change), 10, DustPolicy::SendAsOutput);
        assert_eq!(amounts(&as_output), vec![500, 7]);
        assert_eq!(as_output.dust_to_fee, 0);
    }
}
