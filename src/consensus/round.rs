// This file is part of LATTICE.
//
// Copyright (C) 2022 Affidaty Spa.
//
// LATTICE is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// LATTICE is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with LATTICE. If not, see <https://www.gnu.org/licenses/>.

//! DPoS round bookkeeping.
//!
//! A round holds one production slot per miner plus a closing extra-block
//! slot. During its slot a miner publishes an out value, the revealed in
//! value of the previous round and a signature; the signature modulus fixes
//! the miner's slot in the round that follows.

use crate::{
    crypto::{Hash, HashAlgorithm},
    error::{Error, ErrorKind, Result},
};

use rand::Rng;
use std::collections::BTreeMap;

/// Term length used by the term-change check, expressed in minutes.
pub const TERM_SPAN_MINUTES: u64 = 7;

/// Mining interval of a round with less than two slots, in milliseconds.
const SINGLE_MINER_INTERVAL: u64 = 1000;

/// Per-miner slot within a round.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct MinerSlot {
    /// Production order within the round, starting from 1.
    pub order: u32,
    /// Set on the miner in charge of the round-closing extra block.
    pub is_extra_block_producer: bool,
    /// Scheduled production time (ms since epoch).
    pub expected_time: u64,
    /// Observed production time.
    pub actual_time: Option<u64>,
    /// Published commitment.
    pub out_value: Option<Hash>,
    /// Revealed preimage of the previous round commitment.
    pub in_value: Option<Hash>,
    /// Published signature, drives the next round ordering.
    pub signature: Option<Hash>,
    /// Blocks produced by this miner so far.
    pub produced_blocks: u64,
    /// Time slots this miner failed to honor so far.
    pub missed_slots: u64,
    /// Order won for the next round, 0 while unpublished.
    pub next_round_order: u32,
}

/// One DPoS round.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct Round {
    /// Monotonic round number, starting from 1.
    pub number: u64,
    /// Term this round belongs to, starting from 1.
    pub term: u64,
    /// Miner slots keyed by miner account id.
    pub miners: BTreeMap<String, MinerSlot>,
}

impl Round {
    /// Builds the opening round of a new term.
    ///
    /// Miners are ordered by leading identifier character, descending.
    /// Signatures are randomized since there is no previous round to derive
    /// them from, and the extra-block producer is picked at random.
    pub fn first_of_term(
        miner_ids: &[String],
        interval: u64,
        now: u64,
        current_round: u64,
        current_term: u64,
    ) -> Round {
        let mut sorted: Vec<&String> = miner_ids.iter().collect();
        sorted.sort_by(|a, b| b.chars().next().cmp(&a.chars().next()));

        let mut rng = rand::thread_rng();
        let extra_index = rng.gen_range(0, sorted.len().max(1));

        let mut miners = BTreeMap::new();
        for (i, id) in sorted.iter().enumerate() {
            let seed: [u8; 32] = rng.gen();
            let slot = MinerSlot {
                order: i as u32 + 1,
                is_extra_block_producer: i == extra_index,
                expected_time: now + i as u64 * interval + interval,
                signature: Some(Hash::from_data(HashAlgorithm::Sha256, &seed)),
                ..Default::default()
            };
            miners.insert((*id).clone(), slot);
        }
        Round {
            number: current_round + 1,
            term: current_term + 1,
            miners,
        }
    }

    pub fn is_miner(&self, id: &str) -> bool {
        self.miners.contains_key(id)
    }

    pub fn slot(&self, id: &str) -> Option<&MinerSlot> {
        self.miners.get(id)
    }

    pub fn slot_mut(&mut self, id: &str) -> Option<&mut MinerSlot> {
        self.miners.get_mut(id)
    }

    pub fn slot_of_order(&self, order: u32) -> Option<&MinerSlot> {
        self.miners.values().find(|slot| slot.order == order)
    }

    /// Distance between the first two slots, in milliseconds.
    pub fn mining_interval(&self) -> u64 {
        if self.miners.len() < 2 {
            return SINGLE_MINER_INTERVAL;
        }
        let first = self.expected_time_of_order(1);
        let second = self.expected_time_of_order(2);
        if second > first {
            second - first
        } else {
            first - second
        }
    }

    /// Overall round duration: one slot per miner plus the extra-block slot.
    pub fn total_millis(&self) -> u64 {
        (self.miners.len() as u64 + 1) * self.mining_interval()
    }

    /// Expected production time of the first slot.
    pub fn start_time(&self) -> u64 {
        self.expected_time_of_order(1)
    }

    /// Time at which the round is over, shifted forward by the number of
    /// full rounds the caller stayed offline.
    pub fn expected_end_time(&self, missed_rounds: u64) -> u64 {
        self.start_time() + self.total_millis() * (missed_rounds + 1)
    }

    pub fn expected_mining_time(&self, id: &str) -> Option<u64> {
        self.miners.get(id).map(|slot| slot.expected_time)
    }

    /// A slot counts as missed once half the mining interval has elapsed
    /// past its expected time.
    pub fn is_time_slot_passed(&self, id: &str, now: u64) -> bool {
        match self.miners.get(id) {
            Some(slot) => slot.expected_time + self.mining_interval() / 2 < now,
            None => false,
        }
    }

    /// Expected time of the round-closing extra block.
    pub fn extra_block_mining_time(&self) -> u64 {
        let last = self
            .miners
            .values()
            .map(|slot| slot.expected_time)
            .max()
            .unwrap_or(0);
        last + self.mining_interval()
    }

    pub fn extra_block_producer(&self) -> Option<&str> {
        self.miners
            .iter()
            .find(|(_, slot)| slot.is_extra_block_producer)
            .map(|(id, _)| id.as_str())
    }

    /// Arranges a recovery production time for a miner that already produced
    /// or missed its regular slot.
    ///
    /// The extra-block producer gets the round-closing slot when it is still
    /// ahead. Everyone else is scheduled `order` intervals past the round
    /// end, accounting for rounds entirely missed. Returns `None` while the
    /// regular slot is still usable.
    pub fn arrange_abnormal_mining_time(&self, id: &str, now: u64) -> Option<u64> {
        let slot = self.miners.get(id)?;
        if !self.is_time_slot_passed(id, now) && slot.out_value.is_none() {
            return None;
        }
        if slot.is_extra_block_producer {
            let extra_time = self.extra_block_mining_time();
            if extra_time > now {
                return Some(extra_time);
            }
        }
        let interval = self.mining_interval();
        if interval == 0 {
            return None;
        }
        let missed_rounds = now.saturating_sub(self.start_time()) / self.total_millis();
        Some(self.expected_end_time(missed_rounds) + slot.order as u64 * interval)
    }

    /// Records the data published by `id` during its slot and derives the
    /// miner's next-round order from the signature modulus.
    ///
    /// First-round slots keep their seeded signature, so the opening order
    /// stays randomized. A miner already holding the computed order is
    /// shifted to the first free order after its own slot.
    pub fn apply_mining_data(
        &mut self,
        id: &str,
        in_value: Option<Hash>,
        out_value: Hash,
        signature: Hash,
        now: u64,
    ) -> Result<()> {
        let miners_count = self.miners.len() as u64;
        let first_round = self.number == 1;
        let slot = self
            .miners
            .get_mut(id)
            .ok_or_else(|| Error::new_ext(ErrorKind::ResourceNotFound, "miner not in round"))?;

        slot.actual_time = Some(now);
        slot.in_value = in_value;
        slot.out_value = Some(out_value);
        let effective = if first_round {
            *slot.signature.get_or_insert(signature)
        } else {
            slot.signature = Some(signature);
            signature
        };
        let supposed = signature_modulus(&effective, miners_count);

        let conflicts: Vec<String> = self
            .miners
            .iter()
            .filter(|(key, other)| key.as_str() != id && other.next_round_order == supposed)
            .map(|(key, _)| key.clone())
            .collect();
        for key in conflicts {
            self.shift_next_round_order(&key);
        }
        if let Some(slot) = self.miners.get_mut(id) {
            slot.next_round_order = supposed;
        }
        Ok(())
    }

    /// Moves the next-round order of `id` to the first free order found
    /// scanning past its current slot, wrapping around the round.
    fn shift_next_round_order(&mut self, id: &str) {
        let count = self.miners.len() as u32;
        let start = match self.miners.get(id) {
            Some(slot) => slot.order,
            None => return,
        };
        for i in 1..=count {
            let candidate = (start + i - 1) % count + 1;
            let free = self
                .miners
                .values()
                .all(|slot| slot.next_round_order != candidate);
            if free {
                if let Some(slot) = self.miners.get_mut(id) {
                    slot.next_round_order = candidate;
                }
                return;
            }
        }
    }

    /// Builds the round that follows this one.
    ///
    /// Miners that published take the order won by their signature, scheduled
    /// one extra interval past `now`. Absent miners fill the leftover orders
    /// in ascending sequence and get a missed-slot increment. The extra-block
    /// producer is derived from the first-place signature modulus.
    pub fn next_round(&self, now: u64) -> Result<Round> {
        let interval = self.mining_interval();
        let count = self.miners.len() as u32;

        let mut published: Vec<(&String, &MinerSlot)> = self
            .miners
            .iter()
            .filter(|(_, slot)| slot.next_round_order != 0)
            .collect();
        if published.iter().any(|(_, slot)| slot.signature.is_none()) {
            return Err(Error::new_ext(
                ErrorKind::Other,
                "ordered miner without signature",
            ));
        }
        published.sort_by_key(|(_, slot)| slot.next_round_order);

        let mut next = Round {
            number: self.number + 1,
            term: self.term,
            miners: BTreeMap::new(),
        };
        for (id, slot) in &published {
            let order = slot.next_round_order;
            let next_slot = MinerSlot {
                order,
                expected_time: now + interval * (order as u64 + 1),
                produced_blocks: slot.produced_blocks + 1,
                missed_slots: slot.missed_slots,
                ..Default::default()
            };
            next.miners.insert((*id).clone(), next_slot);
        }

        let taken: Vec<u32> = published
            .iter()
            .map(|(_, slot)| slot.next_round_order)
            .collect();
        let free_orders = (1..=count).filter(|order| !taken.contains(order));
        let absent = self
            .miners
            .iter()
            .filter(|(_, slot)| slot.next_round_order == 0);
        for ((id, slot), order) in absent.zip(free_orders) {
            let next_slot = MinerSlot {
                order,
                expected_time: now + interval * order as u64,
                produced_blocks: slot.produced_blocks,
                missed_slots: slot.missed_slots + 1,
                ..Default::default()
            };
            next.miners.insert(id.clone(), next_slot);
        }

        let extra_order = self.next_extra_block_producer_order();
        let chosen = if next.miners.values().any(|slot| slot.order == extra_order) {
            extra_order
        } else {
            1
        };
        if let Some(slot) = next.miners.values_mut().find(|slot| slot.order == chosen) {
            slot.is_extra_block_producer = true;
        }
        Ok(next)
    }

    /// Signature modulus of the first slot that actually published, the
    /// first miner when nobody did.
    fn next_extra_block_producer_order(&self) -> u32 {
        let first_place = self
            .miners
            .values()
            .filter(|slot| slot.signature.is_some())
            .min_by_key(|slot| slot.order);
        match first_place.and_then(|slot| slot.signature) {
            Some(signature) => signature_modulus(&signature, self.miners.len() as u64),
            None => 1,
        }
    }

    /// Aggregates every miner signature with the given in value. Miners that
    /// never published contribute a hash of their identity instead.
    pub fn calculate_signature(&self, in_value: &Hash) -> Hash {
        let mut aggregate = Hash::default();
        for (id, slot) in &self.miners {
            let signature = slot
                .signature
                .unwrap_or_else(|| Hash::from_data(HashAlgorithm::Sha256, id.as_bytes()));
            aggregate = hash_pair(&aggregate, &signature);
        }
        hash_pair(in_value, &aggregate)
    }

    /// Term-change vote: at least 2/3 + 1 of the miners that produced during
    /// the previous round must have published, within this round, a block
    /// whose time falls past the current term span.
    pub fn is_time_to_change_term(
        &self,
        previous_round: &Round,
        chain_start: u64,
        term_number: u64,
    ) -> bool {
        let eligible = previous_round
            .miners
            .values()
            .filter(|slot| slot.out_value.is_some())
            .count() as u64;
        let minimum = eligible * 2 / 3 + 1;
        let approvals = self
            .miners
            .values()
            .filter_map(|slot| slot.actual_time)
            .filter(|time| crossed_term_boundary(chain_start, *time, term_number))
            .count() as u64;
        approvals >= minimum
    }

    fn expected_time_of_order(&self, order: u32) -> u64 {
        self.slot_of_order(order)
            .map_or(0, |slot| slot.expected_time)
    }
}

/// Interprets the trailing eight digest bytes of `signature` as a big-endian
/// signed number and folds it into the 1-based order space of the round.
fn signature_modulus(signature: &Hash, miners_count: u64) -> u32 {
    let digest = signature.hash_value();
    let mut tail = [0u8; 8];
    let take = digest.len().min(8);
    tail[8 - take..].copy_from_slice(&digest[digest.len() - take..]);
    let num = i64::from_be_bytes(tail);
    (num.unsigned_abs() % miners_count.max(1)) as u32 + 1
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut buf = Vec::with_capacity(left.size() + right.size());
    buf.extend_from_slice(left.as_bytes());
    buf.extend_from_slice(right.as_bytes());
    Hash::from_data(HashAlgorithm::Sha256, &buf)
}

/// Whether `produced` falls outside the span of term `term_number`.
fn crossed_term_boundary(chain_start: u64, produced: u64, term_number: u64) -> bool {
    let minutes = produced.saturating_sub(chain_start) / 60_000;
    minutes / TERM_SPAN_MINUTES != term_number.saturating_sub(1)
}
