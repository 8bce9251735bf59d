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

//! Transaction builder
//!
//! A [`TxBuilder`] collects the recipients of a send request and its options
//! before it is handed to [`Wallet::send`](super::Wallet::send).
//!
//! ## Example
//!
//! ```
//! # use bitcoin::Script;
//! # use changekit::*;
//! let builder = TxBuilder::with_recipients(vec![(Script::new(), 50_000)])
//!     .fee_rate(FeeRate::from_sat_per_vb(2.0))
//!     .change_position(0);
//! ```

use std::default::Default;

use bitcoin::Script;

use super::coin_selection::{CoinSelectionAlgorithm, DefaultCoinSelectionAlgorithm};
use crate::types::FeeRate;

/// A transaction builder
///
/// The builder is generic over the coin selection algorithm used for the first
/// build attempt; wallets configured to avoid partial spends run a second,
/// authoritative attempt with
/// [`AvoidPartialSpends`](super::coin_selection::AvoidPartialSpends) on their
/// own.
#[derive(Debug, Default)]
pub struct TxBuilder<Cs: CoinSelectionAlgorithm> {
    pub(crate) recipients: Vec<(Script, u64)>,
    pub(crate) fee_rate: Option<FeeRate>,
    pub(crate) change_position: Option<usize>,
    pub(crate) coin_selection: Cs,
}

impl TxBuilder<DefaultCoinSelectionAlgorithm> {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for the given list of recipients
    pub fn with_recipients(recipients: Vec<(Script, u64)>) -> Self {
        Self::default().set_recipients(recipients)
    }
}

impl<Cs: CoinSelectionAlgorithm> TxBuilder<Cs> {
    /// Replace the recipients already added with a new list
    pub fn set_recipients(mut self, recipients: Vec<(Script, u64)>) -> Self {
        self.recipients = recipients;
        self
    }

    /// Add a recipient to the internal list
    pub fn add_recipient(mut self, script_pubkey: Script, amount: u64) -> Self {
        self.recipients.push((script_pubkey, amount));
        self
    }

    /// Set a custom fee rate
    pub fn fee_rate(mut self, fee_rate: FeeRate) -> Self {
        self.fee_rate = Some(fee_rate);
        self
    }

    /// Pin the change output, if one is created, at `position` in the output
    /// list
    ///
    /// The position survives every internal rebuild of the transaction:
    /// whichever candidate ends up being finalized carries its change output
    /// exactly there. Without this option the position is picked at random.
    /// Positions beyond the end of the recipient list are rejected before
    /// anything is built.
    pub fn change_position(mut self, position: usize) -> Self {
        self.change_position = Some(position);
        self
    }

    /// Choose the coin selection algorithm for the first build attempt
    ///
    /// Overrides the [`DefaultCoinSelectionAlgorithm`].
    pub fn coin_selection<P: CoinSelectionAlgorithm>(self, coin_selection: P) -> TxBuilder<P> {
        TxBuilder {
            recipients: self.recipients,
            fee_rate: self.fee_rate,
            change_position: self.change_position,
            coin_selection,
        }
    }
}

#[cfg(test)]
mod test {
    use bitcoin::Script;

    use super::super::coin_selection::AvoidPartialSpends;
    use super::*;

    #[test]
    fn test_fields_default_to_none() {
        let builder = TxBuilder::new();

        assert!(builder.recipients.is_empty());
        assert_eq!(builder.fee_rate, None);
        assert_eq!(builder.change_position, None);
    }

    #[test]
    fn test_add_recipient_appends() {
        let builder = TxBuilder::with_recipients(vec![(Script::new(), 1_000)])
            .add_recipient(Script::new(), 2_000);

        assert_eq!(
            builder.recipients.iter().map(|(_, v)| *v).collect::<Vec<_>>(),
            vec![1_000, 2_000]
        );
    }

    #[test]
    fn test_swapping_coin_selection_keeps_options() {
        let builder = TxBuilder::with_recipients(vec![(Script::new(), 1_000)])
            .change_position(1)
            .coin_selection(AvoidPartialSpends);

        assert_eq!(builder.change_position, Some(1));
        assert_eq!(builder.recipients.len(), 1);
    }
}
