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

//! Change address reservations
//!
//! A freshly derived change address is *reserved* for the candidate
//! transaction that asked for it. The reservation is committed when that
//! candidate is the one actually finalized, or burned when the candidate is
//! discarded. A burned index is never handed out again: the derivation
//! counter only ever moves forward, so discarded attempts leave permanent
//! gaps instead of reusing addresses.

use std::collections::BTreeMap;

use bitcoin::util::bip32::DerivationPath;
use bitcoin::Script;

use log::debug;

/// A change destination reserved for a transaction under construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeAddress {
    /// Derivation index on the internal keychain
    pub index: u32,
    /// The script pubkey derived at `index`
    pub script_pubkey: Script,
    /// The full derivation path, ending in `index`
    pub keypath: DerivationPath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReservationState {
    /// Reserved by a candidate that hasn't been finalized or discarded yet
    Pending,
    /// Used as the change output of a finalized transaction
    Committed,
    /// Reserved by a discarded candidate; the index stays consumed
    Burned,
}

/// Tracks the lifecycle of every reserved change index
#[derive(Debug, Default)]
pub(crate) struct ReservationLedger {
    entries: BTreeMap<u32, (Script, ReservationState)>,
}

impl ReservationLedger {
    pub(crate) fn open(&mut self, change: &ChangeAddress) {
        let replaced = self.entries.insert(
            change.index,
            (change.script_pubkey.clone(), ReservationState::Pending),
        );
        // the allocator never hands out the same index twice
        debug_assert!(replaced.is_none());
    }

    pub(crate) fn commit(&mut self, index: u32) {
        debug!("committing change reservation {}", index);
        self.transition(index, ReservationState::Committed);
    }

    pub(crate) fn burn(&mut self, index: u32) {
        debug!("burning change reservation {}", index);
        self.transition(index, ReservationState::Burned);
    }

    fn transition(&mut self, index: u32, to: ReservationState) {
        match self.entries.get_mut(&index) {
            Some((_, state)) => {
                debug_assert_eq!(*state, ReservationState::Pending);
                *state = to;
            }
            None => debug_assert!(false, "unknown reservation {}", index),
        }
    }

    pub(crate) fn state(&self, index: u32) -> Option<ReservationState> {
        self.entries.get(&index).map(|(_, state)| *state)
    }

    pub(crate) fn is_committed(&self, index: u32) -> bool {
        self.state(index) == Some(ReservationState::Committed)
    }
}
