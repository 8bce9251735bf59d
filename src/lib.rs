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

//! A lightweight change-output engine for hierarchical deterministic wallets.
//!
//! This crate decides, for every transaction a wallet builds, whether a
//! change output is created, at which position of the output list it sits,
//! and which derivation index of the internal keychain backs it. Indexes are
//! handed out strictly increasing and are never reused, not even when the
//! transaction draft that reserved one is thrown away; wallets configured to
//! avoid partial spends get their transactions rebuilt with whole-address
//! input clusters, and a caller-pinned change position survives the rebuild.
//!
//! ## Example
//!
//! ```no_run
//! use bitcoin::util::bip32::ExtendedPrivKey;
//! use bitcoin::Network;
//! use changekit::database::MemoryDatabase;
//! use changekit::{TxBuilder, Wallet};
//!
//! # fn main() -> Result<(), changekit::Error> {
//! let master = ExtendedPrivKey::new_master(Network::Regtest, &[0x00; 32])?;
//! let wallet = Wallet::new(master, Network::Regtest, MemoryDatabase::new());
//!
//! let recipient = wallet.get_new_address()?.script_pubkey();
//! let details = wallet.send(
//!     TxBuilder::with_recipients(vec![(recipient, 50_000)]).change_position(0),
//! )?;
//!
//! println!("sent {}", details.txid);
//! # Ok(())
//! # }
//! ```

// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

pub extern crate bitcoin;
extern crate log;
extern crate rand;
extern crate serde;
#[macro_use]
extern crate serde_json;

pub mod database;
pub(crate) mod error;
pub(crate) mod keys;
pub(crate) mod types;
pub mod wallet;

pub use error::Error;
pub use types::*;
pub use wallet::tx_builder::TxBuilder;
pub use wallet::{AddressInfo, Wallet, WalletConfig};
