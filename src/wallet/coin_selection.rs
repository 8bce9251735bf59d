// Bitcoin Dev Kit
// Written in 2020 by Alekos Filini <alekos.filini@gmail.com>
//
// Copyright (c) 2020-2021 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Coin selection
//!
//! This module provides the trait [`CoinSelectionAlgorithm`] that can be implemented to
//! define custom coin selection algorithms.
//!
//! You can specify a custom coin selection algorithm through the [`coin_selection`] method on
//! [`TxBuilder`]. [`DefaultCoinSelectionAlgorithm`] aliases the coin selection algorithm that will
//! be used if it is not explicitly set.
//!
//! [`TxBuilder`]: super::tx_builder::TxBuilder
//! [`coin_selection`]: super::tx_builder::TxBuilder::coin_selection
//!
//! ## Example
//!
//! ```no_run
//! # use changekit::wallet::coin_selection::*;
//! # use changekit::*;
//! # const TXIN_BASE_WEIGHT: usize = (32 + 4 + 4) * 4;
//! #[derive(Debug)]
//! struct AlwaysSpendEverything;
//!
//! impl CoinSelectionAlgorithm for AlwaysSpendEverything {
//!     fn coin_select(
//!         &self,
//!         required_utxos: Vec<WeightedUtxo>,
//!         optional_utxos: Vec<WeightedUtxo>,
//!         fee_rate: FeeRate,
//!         target_amount: u64,
//!     ) -> Result<CoinSelectionResult, Error> {
//!         let mut fee_amount = 0;
//!         let selected = required_utxos
//!             .into_iter()
//!             .chain(optional_utxos)
//!             .map(|weighted_utxo| {
//!                 fee_amount +=
//!                     fee_rate.fee_wu(TXIN_BASE_WEIGHT + weighted_utxo.satisfaction_weight);
//!                 weighted_utxo.utxo
//!             })
//!             .collect::<Vec<_>>();
//!         let selected_amount = selected.iter().map(|u| u.txout.value).sum::<u64>();
//!
//!         if selected_amount < target_amount + fee_amount {
//!             return Err(Error::InsufficientFunds {
//!                 needed: target_amount + fee_amount,
//!                 available: selected_amount,
//!             });
//!         }
//!
//!         Ok(CoinSelectionResult {
//!             selected,
//!             fee_amount,
//!         })
//!     }
//! }
//! ```

use std::collections::BTreeMap;

use bitcoin::consensus::encode::serialize;
use bitcoin::Script;

use log::debug;

use crate::error::Error;
use crate::types::{FeeRate, LocalUtxo, WeightedUtxo};

/// Default coin selection algorithm used by [`TxBuilder`](super::tx_builder::TxBuilder) if not
/// overridden
pub type DefaultCoinSelectionAlgorithm = LargestFirstCoinSelection;

// Base weight of a TxIn, not counting the weight needed for satisfying it.
// prev_txid (32 bytes) + prev_vout (4 bytes) + sequence (4 bytes)
pub(crate) const TXIN_BASE_WEIGHT: usize = (32 + 4 + 4) * 4;

/// Result of a successful coin selection
#[derive(Debug)]
pub struct CoinSelectionResult {
    /// List of outputs selected for use as inputs
    pub selected: Vec<LocalUtxo>,
    /// Total fee amount for the selected utxos in satoshis
    pub fee_amount: u64,
}

impl CoinSelectionResult {
    /// The total value of the inputs selected.
    pub fn selected_amount(&self) -> u64 {
        self.selected.iter().map(|u| u.txout.value).sum()
    }
}

/// Trait for generalized coin selection algorithms
///
/// This trait can be implemented to make the [`Wallet`](super::Wallet) use a customized coin
/// selection algorithm when it creates transactions.
///
/// For an example see [this module](crate::wallet::coin_selection)'s documentation.
pub trait CoinSelectionAlgorithm: std::fmt::Debug {
    /// Perform the coin selection
    ///
    /// - `required_utxos`: the utxos that must be spent regardless of `target_amount` with their
    ///                     weight cost
    /// - `optional_utxos`: the remaining available utxos to satisfy `target_amount` with their
    ///                     weight cost
    /// - `fee_rate`: fee rate to use
    /// - `target_amount`: the outgoing amount in satoshis and the fees already accumulated from
    ///                    added outputs and the transaction's header
    fn coin_select(
        &self,
        required_utxos: Vec<WeightedUtxo>,
        optional_utxos: Vec<WeightedUtxo>,
        fee_rate: FeeRate,
        target_amount: u64,
    ) -> Result<CoinSelectionResult, Error>;
}

/// Simple and dumb coin selection
///
/// This coin selection algorithm sorts the available UTXOs by value and then picks them starting
/// from the largest ones until the required amount is reached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LargestFirstCoinSelection;

impl CoinSelectionAlgorithm for LargestFirstCoinSelection {
    fn coin_select(
        &self,
        required_utxos: Vec<WeightedUtxo>,
        mut optional_utxos: Vec<WeightedUtxo>,
        fee_rate: FeeRate,
        target_amount: u64,
    ) -> Result<CoinSelectionResult, Error> {
        debug!(
            "target_amount = `{}`, fee_rate = `{:?}`",
            target_amount, fee_rate
        );

        // We put the "required UTXOs" first and make sure the optional UTXOs are sorted,
        // initially smallest to largest, before being reversed with `.rev()`.
        let utxos = {
            optional_utxos.sort_unstable_by_key(|wu| wu.utxo.txout.value);
            required_utxos
                .into_iter()
                .map(|utxo| (true, utxo))
                .chain(optional_utxos.into_iter().rev().map(|utxo| (false, utxo)))
        };

        select_sorted_utxos(utxos, fee_rate, target_amount)
    }
}

/// Coin selection that never splits the coins sitting on an address
///
/// Spendable outputs are clustered by script pubkey and spent all-or-none: selecting any output
/// of an address drags every other spendable output of that address into the input set. This
/// trades fee efficiency (and a much higher chance of producing leftover value, hence a change
/// output) for not letting an observer correlate the remaining outputs of the address with the
/// sender.
///
/// Clusters are considered largest total first, so the fewest whole clusters are spent; equal
/// totals fall back to comparing the script pubkeys, keeping the selection fully deterministic.
#[derive(Debug, Default, Clone, Copy)]
pub struct AvoidPartialSpends;

impl CoinSelectionAlgorithm for AvoidPartialSpends {
    fn coin_select(
        &self,
        required_utxos: Vec<WeightedUtxo>,
        optional_utxos: Vec<WeightedUtxo>,
        fee_rate: FeeRate,
        target_amount: u64,
    ) -> Result<CoinSelectionResult, Error> {
        debug!(
            "target_amount = `{}`, fee_rate = `{:?}`",
            target_amount, fee_rate
        );

        let mut clusters: BTreeMap<Script, (u64, Vec<WeightedUtxo>)> = BTreeMap::new();
        for weighted_utxo in optional_utxos {
            let cluster = clusters
                .entry(weighted_utxo.utxo.txout.script_pubkey.clone())
                .or_insert((0, vec![]));
            cluster.0 += weighted_utxo.utxo.txout.value;
            cluster.1.push(weighted_utxo);
        }

        let mut clusters = clusters.into_iter().collect::<Vec<_>>();
        clusters.sort_by(|(script_a, (total_a, _)), (script_b, (total_b, _))| {
            total_b.cmp(total_a).then_with(|| script_a.cmp(script_b))
        });

        let mut selected_amount = 0;
        let mut fee_amount = 0;
        let mut selected = Vec::new();

        for weighted_utxo in required_utxos {
            fee_amount += fee_rate.fee_wu(TXIN_BASE_WEIGHT + weighted_utxo.satisfaction_weight);
            selected_amount += weighted_utxo.utxo.txout.value;
            selected.push(weighted_utxo.utxo);
        }

        for (script, (total, cluster)) in clusters {
            if selected_amount >= target_amount + fee_amount {
                break;
            }

            debug!(
                "including {} utxos clustered on `{}`, total = `{}`",
                cluster.len(),
                script,
                total
            );
            for weighted_utxo in cluster {
                fee_amount += fee_rate.fee_wu(TXIN_BASE_WEIGHT + weighted_utxo.satisfaction_weight);
                selected_amount += weighted_utxo.utxo.txout.value;
                selected.push(weighted_utxo.utxo);
            }
        }

        if selected_amount < target_amount + fee_amount {
            return Err(Error::InsufficientFunds {
                needed: target_amount + fee_amount,
                available: selected_amount,
            });
        }

        Ok(CoinSelectionResult {
            selected,
            fee_amount,
        })
    }
}

fn select_sorted_utxos(
    utxos: impl Iterator<Item = (bool, WeightedUtxo)>,
    fee_rate: FeeRate,
    target_amount: u64,
) -> Result<CoinSelectionResult, Error> {
    let mut selected_amount = 0;
    let mut fee_amount = 0;
    let selected = utxos
        .scan(
            (&mut selected_amount, &mut fee_amount),
            |(selected_amount, fee_amount), (must_use, weighted_utxo)| {
                if must_use || **selected_amount < target_amount + **fee_amount {
                    **fee_amount +=
                        fee_rate.fee_wu(TXIN_BASE_WEIGHT + weighted_utxo.satisfaction_weight);
                    **selected_amount += weighted_utxo.utxo.txout.value;

                    debug!(
                        "selected {}, updated fee_amount = `{}`",
                        weighted_utxo.utxo.outpoint, fee_amount
                    );

                    Some(weighted_utxo.utxo)
                } else {
                    None
                }
            },
        )
        .collect::<Vec<_>>();

    if selected_amount < target_amount + fee_amount {
        return Err(Error::InsufficientFunds {
            needed: target_amount + fee_amount,
            available: selected_amount,
        });
    }

    Ok(CoinSelectionResult {
        selected,
        fee_amount,
    })
}

/// Remaining amount after performing coin selection
#[derive(Debug)]
pub enum Excess {
    /// The remaining amount is not enough for a spendable change output; it is absorbed by the fee
    NoChange {
        /// Threshold below which the remaining amount is not turned into a change output
        dust_threshold: u64,
        /// Exceeding amount of current selection over outgoing value and fee costs
        remaining_amount: u64,
        /// The calculated fee for the change output with the selected script pubkey
        change_fee: u64,
    },
    /// The remaining amount is enough for a spendable change output
    Change {
        /// Effective amount available to create change after deducting the change output fee
        amount: u64,
        /// The deducted change output fee
        fee: u64,
    },
}

/// Decide if change can be created
///
/// - `remaining_amount`: the amount in which the selected coins exceed the target amount
/// - `fee_rate`: required fee rate for the current selection
/// - `drain_script`: script to consider change creation
/// - `discard_fee`: wallet-configured floor below which leftover value is given up to the fee
///   rather than turned into an output of its own
pub fn decide_change(
    remaining_amount: u64,
    fee_rate: FeeRate,
    drain_script: &Script,
    discard_fee: u64,
) -> Excess {
    // drain_output_len = size(len(script_pubkey)) + len(script_pubkey) + size(output_value)
    let drain_output_len = serialize(drain_script).len() + 8;
    let change_fee = fee_rate.fee_vb(drain_output_len);
    let drain_val = remaining_amount.saturating_sub(change_fee);

    let dust_threshold = drain_script.dust_value().to_sat().max(discard_fee);
    if drain_val < dust_threshold {
        Excess::NoChange {
            dust_threshold,
            change_fee,
            remaining_amount,
        }
    } else {
        Excess::Change {
            amount: drain_val,
            fee: change_fee,
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;
    use std::str::FromStr;

    use bitcoin::{OutPoint, Script, TxOut};

    use assert_matches::assert_matches;

    use super::*;
    use crate::types::*;

    const P2WPKH_SATISFACTION_SIZE: usize = 73 + 33 + 2;

    fn utxo(value: u64, index: u32, script_pubkey: Script) -> WeightedUtxo {
        let outpoint = OutPoint::from_str(&format!(
            "ebd9813ecebc57ff8f30797de7c205e3c7498ca950ea4341ee51a685ff2fa30a:{}",
            index
        ))
        .unwrap();
        WeightedUtxo {
            satisfaction_weight: P2WPKH_SATISFACTION_SIZE,
            utxo: LocalUtxo {
                outpoint,
                txout: TxOut {
                    value,
                    script_pubkey,
                },
                keychain: KeychainKind::External,
            },
        }
    }

    fn get_test_utxos() -> Vec<WeightedUtxo> {
        vec![
            utxo(100_000, 0, Script::new()),
            utxo(200_000, 1, Script::new()),
        ]
    }

    // two addresses, each holding a 30k and a 15k output
    fn get_clustered_utxos() -> (Script, Script, Vec<WeightedUtxo>) {
        let script_a = Script::from(vec![0x51, 0xaa]);
        let script_b = Script::from(vec![0x51, 0xbb]);
        let utxos = vec![
            utxo(30_000, 0, script_a.clone()),
            utxo(15_000, 1, script_a.clone()),
            utxo(30_000, 2, script_b.clone()),
            utxo(15_000, 3, script_b.clone()),
        ];

        (script_a, script_b, utxos)
    }

    #[test]
    fn test_largest_first_coin_selection_success() {
        let utxos = get_test_utxos();

        let result = LargestFirstCoinSelection::default()
            .coin_select(utxos, vec![], FeeRate::from_sat_per_vb(1.0), 250_000)
            .unwrap();

        assert_eq!(result.selected.len(), 2);
        assert_eq!(result.selected_amount(), 300_000);
        assert_eq!(result.fee_amount, 134);
    }

    #[test]
    fn test_largest_first_coin_selection_use_all() {
        let utxos = get_test_utxos();

        let result = LargestFirstCoinSelection::default()
            .coin_select(utxos, vec![], FeeRate::from_sat_per_vb(1.0), 20_000)
            .unwrap();

        assert_eq!(result.selected.len(), 2);
        assert_eq!(result.selected_amount(), 300_000);
    }

    #[test]
    fn test_largest_first_coin_selection_use_only_necessary() {
        let utxos = get_test_utxos();

        let result = LargestFirstCoinSelection::default()
            .coin_select(vec![], utxos, FeeRate::from_sat_per_vb(1.0), 20_000)
            .unwrap();

        assert_eq!(result.selected.len(), 1);
        assert_eq!(result.selected_amount(), 200_000);
        assert_eq!(result.fee_amount, 67);
    }

    #[test]
    #[should_panic(expected = "InsufficientFunds")]
    fn test_largest_first_coin_selection_insufficient_funds() {
        let utxos = get_test_utxos();

        LargestFirstCoinSelection::default()
            .coin_select(vec![], utxos, FeeRate::from_sat_per_vb(1.0), 500_000)
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "InsufficientFunds")]
    fn test_largest_first_coin_selection_insufficient_funds_high_fees() {
        let utxos = get_test_utxos();

        LargestFirstCoinSelection::default()
            .coin_select(vec![], utxos, FeeRate::from_sat_per_vb(1000.0), 250_000)
            .unwrap();
    }

    #[test]
    fn test_avoid_partial_spends_takes_whole_cluster() {
        let (script_a, _, utxos) = get_clustered_utxos();

        let result = AvoidPartialSpends::default()
            .coin_select(vec![], utxos, FeeRate::from_sat_per_vb(1.0), 29_000)
            .unwrap();

        // a single 30k output would have covered the target, but the whole
        // cluster comes along
        assert_eq!(result.selected.len(), 2);
        assert_eq!(result.selected_amount(), 45_000);
        assert!(result
            .selected
            .iter()
            .all(|u| u.txout.script_pubkey == script_a));
    }

    #[test]
    fn test_avoid_partial_spends_grouping_is_exhaustive() {
        let (_, _, utxos) = get_clustered_utxos();
        let all = utxos.clone();

        let result = AvoidPartialSpends::default()
            .coin_select(vec![], utxos, FeeRate::from_sat_per_vb(1.0), 50_000)
            .unwrap();

        // every selected input's address must have all of its other spendable
        // outputs in the selection too
        let selected: HashSet<_> = result.selected.iter().map(|u| u.outpoint).collect();
        for utxo in result.selected.iter() {
            for other in all.iter() {
                if other.utxo.txout.script_pubkey == utxo.txout.script_pubkey {
                    assert!(selected.contains(&other.utxo.outpoint));
                }
            }
        }
        assert_eq!(result.selected.len(), 4);
    }

    #[test]
    fn test_avoid_partial_spends_deterministic_tie_break() {
        let (script_a, _, utxos) = get_clustered_utxos();

        // both clusters total 45k; the lexicographically smaller script wins
        let first = AvoidPartialSpends::default()
            .coin_select(vec![], utxos.clone(), FeeRate::from_sat_per_vb(1.0), 29_000)
            .unwrap();
        let second = AvoidPartialSpends::default()
            .coin_select(
                vec![],
                utxos.into_iter().rev().collect(),
                FeeRate::from_sat_per_vb(1.0),
                29_000,
            )
            .unwrap();

        assert!(first
            .selected
            .iter()
            .all(|u| u.txout.script_pubkey == script_a));
        let first_outpoints: HashSet<_> = first.selected.iter().map(|u| u.outpoint).collect();
        let second_outpoints: HashSet<_> = second.selected.iter().map(|u| u.outpoint).collect();
        assert_eq!(first_outpoints, second_outpoints);
    }

    #[test]
    #[should_panic(expected = "InsufficientFunds")]
    fn test_avoid_partial_spends_insufficient_funds() {
        let (_, _, utxos) = get_clustered_utxos();

        AvoidPartialSpends::default()
            .coin_select(vec![], utxos, FeeRate::from_sat_per_vb(1.0), 1_000_000)
            .unwrap();
    }

    fn drain_script() -> Script {
        // a p2wpkh script, 22 bytes
        Script::new_v0_p2wpkh(&bitcoin::WPubkeyHash::from_str("02306a7c23f3e8010de41e9e591348bb83f11daa").unwrap())
    }

    #[test]
    fn test_decide_change_creates_change() {
        let excess = decide_change(50_000, FeeRate::from_sat_per_vb(1.0), &drain_script(), 0);

        assert_matches!(
            excess,
            Excess::Change {
                amount: 49_969,
                fee: 31
            }
        );
    }

    #[test]
    fn test_decide_change_dust() {
        // 300 - 31 = 269 sat, below the 294 sat dust threshold of a p2wpkh output
        let excess = decide_change(300, FeeRate::from_sat_per_vb(1.0), &drain_script(), 0);

        assert_matches!(
            excess,
            Excess::NoChange {
                dust_threshold: 294,
                remaining_amount: 300,
                ..
            }
        );
    }

    #[test]
    fn test_decide_change_discard_fee_raises_threshold() {
        // 10k sat of leftover would normally create change, but the wallet
        // prefers to give it up to the fee
        let excess = decide_change(10_000, FeeRate::from_sat_per_vb(1.0), &drain_script(), 20_000);

        assert_matches!(
            excess,
            Excess::NoChange {
                dust_threshold: 20_000,
                remaining_amount: 10_000,
                ..
            }
        );

        let excess = decide_change(30_000, FeeRate::from_sat_per_vb(1.0), &drain_script(), 20_000);
        assert_matches!(excess, Excess::Change { amount: 29_969, .. });
    }
}
