use rand::{seq::SliceRandom, Rng};

use crate::{data_structures::types::Amount, storage::stored_output::TransactionOutputInformation};

#[derive(Debug, Clone, Default)]
pub struct InputSelection {
    pub outputs: Vec<TransactionOutputInformation>,
    pub total_value: Amount,
}

impl InputSelection {
    pub fn is_sufficient(&self, needed: Amount) -> bool {
        self.total_value >= needed
    }
}

/// Random selection of spendable outputs covering a target amount.
///
/// Outputs below the dust threshold are skipped unless `allow_dust` is set, in
/// which case at most one of them is picked first. The selection may fall
/// short of the target when the candidates run out; callers check
/// [`InputSelection::is_sufficient`].
pub struct InputSelector {
    pub dust_threshold: Amount,
    pub allow_dust: bool,
}

impl InputSelector {
    pub fn new(dust_threshold: Amount, allow_dust: bool) -> Self {
        Self {
            dust_threshold,
            allow_dust,
        }
    }

    pub fn select<R: Rng + ?Sized>(
        &self,
        candidates: Vec<TransactionOutputInformation>,
        needed: Amount,
        rng: &mut R,
    ) -> InputSelection {
        let (mut dust, mut regular): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|output| output.amount < self.dust_threshold);
        if !self.allow_dust {
            dust.clear();
        }
        regular.shuffle(rng);
        dust.shuffle(rng);

        let mut selection = InputSelection::default();
        let mut dust_selected = false;
        while selection.total_value < needed {
            let next = if !dust_selected && !dust.is_empty() {
                dust_selected = true;
                dust.pop()
            } else {
                regular.pop().or_else(|| dust.pop())
            };
            let Some(output) = next else {
                break;
            };
            selection.total_value = selection.total_value.saturating_add(output.amount);
            selection.outputs.push(output);
        }
        selection
    }
}
