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

//! Wallet
//!
//! This module defines the [`Wallet`] structure and the send pipeline built
//! around it.
//!
//! A send request goes through up to two build attempts. The first one uses
//! the coin selection algorithm carried by the [`TxBuilder`]. When the wallet
//! is configured with [`avoid_partial_spends`](WalletConfig::avoid_partial_spends)
//! a second attempt runs with [`AvoidPartialSpends`] and, if it succeeds, it
//! is the one that gets finalized: grouping is a policy, not a fallback.
//! Either attempt may reserve a fresh change address; the reservation of
//! whichever attempt loses is burned, never reused, so discarded drafts can't
//! cause address reuse later. A change position requested by the caller is
//! honored by every attempt, and therefore by the final transaction.

use std::fmt;
use std::ops::Deref;
use std::sync::{Mutex, MutexGuard};

use bitcoin::consensus::encode::serialize;
use bitcoin::util::bip32::{ChildNumber, DerivationPath, ExtendedPrivKey};
use bitcoin::{
    Address, Network, OutPoint, PackedLockTime, Script, Sequence, Transaction, TxIn, TxOut,
    Witness,
};

use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub mod change;
pub mod coin_selection;
pub mod tx_builder;
pub mod utils;

use change::{ChangeAddress, ReservationLedger};
use coin_selection::{decide_change, AvoidPartialSpends, CoinSelectionAlgorithm, Excess};
use tx_builder::TxBuilder;
use utils::{resolve_change_position, IsDust};

use crate::database::{Database, DatabaseUtils};
use crate::error::Error;
use crate::keys::HdKeychain;
use crate::types::*;

// Maximum weight of the witness satisfying a p2wpkh input: signature (73) +
// compressed pubkey (33) + witness item count bytes
pub(crate) const P2WPKH_SATISFACTION_WEIGHT: usize = 73 + 33 + 2;

/// Configuration consulted at the start of each send request
#[derive(Debug, Clone, Copy, Default)]
pub struct WalletConfig {
    /// Spend all-or-none of the outputs sitting on an address
    ///
    /// When set, [`AvoidPartialSpends`] is the authoritative selection for
    /// every send.
    pub avoid_partial_spends: bool,
    /// Leftover value at or below this amount is given up to the fee instead
    /// of becoming a change output
    pub discard_fee: u64,
}

/// A derived address with the information needed to introspect it
///
/// For convenience this automatically derefs to `Address`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    /// Address
    pub address: Address,
    /// Whether the address belongs to this wallet
    pub is_mine: bool,
    /// Whether the address was used as the change output of a finalized
    /// transaction
    pub is_change: bool,
    /// The derivation path of the address, ending in its child index
    pub hd_keypath: Option<DerivationPath>,
    /// Child index of the address
    pub index: Option<u32>,
    /// Type of keychain the address was derived on
    pub keychain: Option<KeychainKind>,
}

impl Deref for AddressInfo {
    type Target = Address;

    fn deref(&self) -> &Self::Target {
        &self.address
    }
}

impl fmt::Display for AddressInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

// One attempt at building the requested transaction. Attempts are immutable
// values: the coordinator picks among them, and a discarded attempt leaves
// nothing behind but its burned reservation.
#[derive(Debug)]
struct Candidate {
    tx: Transaction,
    selected: Vec<LocalUtxo>,
    fee_amount: u64,
    change: Option<(ChangeAddress, usize)>,
    received: u64,
    sent: u64,
}

/// An HD wallet that decides whether, where and under which key index change
/// outputs are created
pub struct Wallet<D: Database> {
    keys: HdKeychain,
    network: Network,
    config: WalletConfig,

    database: Mutex<D>,
    reservations: Mutex<ReservationLedger>,
}

impl<D: Database> Wallet<D> {
    /// Create a new wallet with the default configuration
    pub fn new(master: ExtendedPrivKey, network: Network, database: D) -> Self {
        Self::with_config(master, network, WalletConfig::default(), database)
    }

    /// Create a new wallet
    pub fn with_config(
        master: ExtendedPrivKey,
        network: Network,
        config: WalletConfig,
        database: D,
    ) -> Self {
        Wallet {
            keys: HdKeychain::new(master),
            network,
            config,
            database: Mutex::new(database),
            reservations: Mutex::new(ReservationLedger::default()),
        }
    }

    /// Return the network the wallet is on
    pub fn network(&self) -> Network {
        self.network
    }

    // The database guard serializes every derivation-counter access: the
    // counter is the one piece of state shared by concurrent send requests.
    fn database(&self) -> MutexGuard<'_, D> {
        self.database.lock().expect("database lock poisoned")
    }

    fn reservations(&self) -> MutexGuard<'_, ReservationLedger> {
        self.reservations.lock().expect("reservation lock poisoned")
    }

    /// Return a newly derived address on the external keychain
    pub fn get_new_address(&self) -> Result<Address, Error> {
        let (_, script_pubkey) = {
            let mut database = self.database();
            self.fetch_and_increment_index(&mut *database, KeychainKind::External)?
        };

        Address::from_script(&script_pubkey, self.network)
            .map_err(|_| Error::ScriptDoesntHaveAddressForm)
    }

    /// Return whether or not a `script` is part of this wallet (either internal or external)
    pub fn is_mine(&self, script: &Script) -> Result<bool, Error> {
        self.database().is_mine(script)
    }

    /// Return the list of unspent outputs of this wallet
    pub fn list_unspent(&self) -> Result<Vec<LocalUtxo>, Error> {
        self.database().iter_utxos()
    }

    /// Return the spendable balance in satoshi
    pub fn get_balance(&self) -> Result<u64, Error> {
        Ok(self
            .list_unspent()?
            .iter()
            .fold(0, |sum, utxo| sum + utxo.txout.value))
    }

    /// The next derivation index that will be used on `keychain`
    pub fn next_derivation_index(&self, keychain: KeychainKind) -> Result<u32, Error> {
        Ok(self
            .database()
            .get_last_index(keychain)?
            .map(|index| index + 1)
            .unwrap_or(0))
    }

    /// Introspect an address
    ///
    /// For the wallet's own addresses this reports the keychain, the child
    /// index and the full derivation path. `is_change` is only set for
    /// addresses that ended up as the change output of a finalized
    /// transaction: an address reserved by a discarded attempt stays burned
    /// and is never reported as change.
    pub fn address_info(&self, address: &Address) -> Result<AddressInfo, Error> {
        let script_pubkey = address.script_pubkey();
        let path = self.database().get_path_from_script_pubkey(&script_pubkey)?;

        let info = match path {
            None => AddressInfo {
                address: address.clone(),
                is_mine: false,
                is_change: false,
                hd_keypath: None,
                index: None,
                keychain: None,
            },
            Some((keychain, index)) => AddressInfo {
                address: address.clone(),
                is_mine: true,
                is_change: keychain == KeychainKind::Internal
                    && self.reservations().is_committed(index),
                hd_keypath: Some(self.keys.hd_keypath(keychain, index)),
                index: Some(index),
                keychain: Some(keychain),
            },
        };

        Ok(info)
    }

    /// Index a transaction that pays this wallet
    ///
    /// The outputs belonging to the wallet become spendable. Mostly useful to
    /// seed a wallet with funds coming from elsewhere.
    pub fn insert_tx(&self, tx: &Transaction) -> Result<(), Error> {
        let mut database = self.database();
        database.set_raw_tx(tx)?;
        Self::index_owned_outputs(&mut *database, tx)
    }

    /// Build and finalize the transaction described by `builder`
    ///
    /// Returns the details of the finalized transaction, or an error if no
    /// candidate could be built. On any error path no reservation stays
    /// pending and no wallet state changes.
    pub fn send<Cs: CoinSelectionAlgorithm>(
        &self,
        builder: TxBuilder<Cs>,
    ) -> Result<TransactionDetails, Error> {
        if builder.recipients.is_empty() {
            return Err(Error::NoRecipients);
        }
        if let Some(requested) = builder.change_position {
            // reject before building anything: every candidate would fail the
            // same way
            if requested > builder.recipients.len() {
                return Err(Error::InvalidChangePosition {
                    requested,
                    outputs: builder.recipients.len(),
                });
            }
        }

        let fee_rate = builder.fee_rate.unwrap_or_default();
        let mut rng = rand::thread_rng();

        let candidate = self.create_candidate(
            &builder.recipients,
            builder.change_position,
            fee_rate,
            &builder.coin_selection,
            &mut rng,
        )?;

        let winner = if self.config.avoid_partial_spends {
            // grouped selection is the wallet's policy, so when it succeeds
            // it wins even though the first attempt may not have needed
            // change at all
            match self.create_candidate(
                &builder.recipients,
                builder.change_position,
                fee_rate,
                &AvoidPartialSpends,
                &mut rng,
            ) {
                Ok(grouped) => {
                    self.discard_candidate(candidate);
                    grouped
                }
                Err(err) => {
                    debug!("grouped selection failed, keeping plain candidate: {}", err);
                    candidate
                }
            }
        } else {
            candidate
        };

        if let (Some(requested), Some((_, position))) =
            (builder.change_position, winner.change.as_ref())
        {
            // the caller's placement must hold no matter which attempt won
            debug_assert_eq!(requested, *position);
        }

        self.finalize(winner)
    }

    fn create_candidate<Cs: CoinSelectionAlgorithm, R: Rng>(
        &self,
        recipients: &[(Script, u64)],
        change_position: Option<usize>,
        fee_rate: FeeRate,
        coin_selection: &Cs,
        rng: &mut R,
    ) -> Result<Candidate, Error> {
        let mut tx = Transaction {
            version: 1,
            lock_time: PackedLockTime::ZERO,
            input: vec![],
            output: vec![],
        };

        let mut fee_amount = fee_rate.fee_wu(tx.weight());
        let mut outgoing: u64 = 0;
        let mut received: u64 = 0;

        for (index, (script_pubkey, value)) in recipients.iter().enumerate() {
            if value.is_dust(script_pubkey) {
                return Err(Error::OutputBelowDustLimit(index));
            }

            if self.is_mine(script_pubkey)? {
                received += *value;
            }

            let new_out = TxOut {
                script_pubkey: script_pubkey.clone(),
                value: *value,
            };
            fee_amount += fee_rate.fee_vb(serialize(&new_out).len());

            tx.output.push(new_out);
            outgoing += *value;
        }

        // a read-only snapshot of the spendable outputs for this attempt
        let optional_utxos = self
            .database()
            .iter_utxos()?
            .into_iter()
            .map(|utxo| WeightedUtxo {
                satisfaction_weight: P2WPKH_SATISFACTION_WEIGHT,
                utxo,
            })
            .collect();

        let selection =
            coin_selection.coin_select(vec![], optional_utxos, fee_rate, outgoing + fee_amount)?;
        let selected_amount = selection.selected_amount();
        fee_amount += selection.fee_amount;

        let remaining_amount = selected_amount - (outgoing + fee_amount);

        // peeked, not reserved: when the leftover turns out to be dust no
        // index must be consumed
        let drain_script = self.peek_change_script()?;

        let discard_fee = self.config.discard_fee;
        let change = match decide_change(remaining_amount, fee_rate, &drain_script, discard_fee) {
            Excess::NoChange {
                remaining_amount, ..
            } => {
                debug!("no change, {} sats folded into the fee", remaining_amount);
                fee_amount += remaining_amount;
                None
            }
            Excess::Change { amount, fee } => {
                let change_address = self.reserve_change_address()?;
                fee_amount += fee;
                received += amount;

                let position = resolve_change_position(change_position, tx.output.len(), rng);
                tx.output.insert(
                    position,
                    TxOut {
                        script_pubkey: change_address.script_pubkey.clone(),
                        value: amount,
                    },
                );

                Some((change_address, position))
            }
        };

        tx.input = selection
            .selected
            .iter()
            .map(|utxo| TxIn {
                previous_output: utxo.outpoint,
                script_sig: Script::default(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::default(),
            })
            .collect();

        Ok(Candidate {
            tx,
            selected: selection.selected,
            fee_amount,
            change,
            received,
            sent: selected_amount,
        })
    }

    // Advance the derivation counter of `keychain` and record the new script
    // pubkey. Callers hold the database guard for the whole step, so
    // concurrent requests always observe distinct, increasing indexes.
    fn fetch_and_increment_index(
        &self,
        database: &mut D,
        keychain: KeychainKind,
    ) -> Result<(u32, Script), Error> {
        let index = database.increment_last_index(keychain)?;
        if ChildNumber::from_normal_idx(index).is_err() {
            return Err(Error::KeychainExhausted);
        }

        let script_pubkey = self.keys.script_pubkey(keychain, index)?;
        database.set_script_pubkey(&script_pubkey, keychain, index)?;

        Ok((index, script_pubkey))
    }

    fn peek_change_script(&self) -> Result<Script, Error> {
        let next_index = self.next_derivation_index(KeychainKind::Internal)?;
        self.keys.script_pubkey(KeychainKind::Internal, next_index)
    }

    fn reserve_change_address(&self) -> Result<ChangeAddress, Error> {
        let (index, script_pubkey) = {
            let mut database = self.database();
            self.fetch_and_increment_index(&mut *database, KeychainKind::Internal)?
        };

        let change_address = ChangeAddress {
            index,
            script_pubkey,
            keypath: self.keys.hd_keypath(KeychainKind::Internal, index),
        };
        self.reservations().open(&change_address);
        debug!("reserved change index {}", index);

        Ok(change_address)
    }

    fn discard_candidate(&self, candidate: Candidate) {
        if let Some((change_address, _)) = candidate.change {
            self.reservations().burn(change_address.index);
        }
    }

    fn finalize(&self, candidate: Candidate) -> Result<TransactionDetails, Error> {
        let Candidate {
            tx,
            selected,
            fee_amount,
            change,
            received,
            sent,
        } = candidate;
        let txid = tx.txid();

        {
            let mut database = self.database();
            for utxo in &selected {
                database.del_utxo(&utxo.outpoint)?;
            }
            Self::index_owned_outputs(&mut *database, &tx)?;
            database.set_tx(&TransactionDetails {
                transaction: Some(tx.clone()),
                txid,
                received,
                sent,
                fee: fee_amount,
            })?;
        }

        if let Some((change_address, position)) = change {
            debug!(
                "committed change index {} at output {}",
                change_address.index, position
            );
            self.reservations().commit(change_address.index);
        }

        Ok(TransactionDetails {
            transaction: Some(tx),
            txid,
            received,
            sent,
            fee: fee_amount,
        })
    }

    fn index_owned_outputs(database: &mut D, tx: &Transaction) -> Result<(), Error> {
        let txid = tx.txid();
        for (vout, output) in tx.output.iter().enumerate() {
            if let Some((keychain, _)) =
                database.get_path_from_script_pubkey(&output.script_pubkey)?
            {
                database.set_utxo(&LocalUtxo {
                    outpoint: OutPoint::new(txid, vout as u32),
                    txout: output.clone(),
                    keychain,
                })?;
            }
        }

        Ok(())
    }
}
