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

//! Key derivation
//!
//! Derives the per-keychain P2WPKH scripts of a wallet from a single master
//! key: `m/0/*` for the external keychain, `m/1/*` for the internal (change)
//! keychain. Derivation is pure; index bookkeeping lives in the
//! [`Database`](crate::database::Database).

use bitcoin::secp256k1::Secp256k1;
use bitcoin::util::bip32::{ChildNumber, DerivationPath, ExtendedPrivKey};
use bitcoin::{Address, Network, PublicKey, Script};

use crate::error::Error;
use crate::types::KeychainKind;
use crate::wallet::utils::SecpCtx;

/// A pair of BIP32 keychains rooted at a single master key
pub(crate) struct HdKeychain {
    master: ExtendedPrivKey,
    secp: SecpCtx,
}

impl std::fmt::Debug for HdKeychain {
    // never print the key material
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdKeychain").finish()
    }
}

impl HdKeychain {
    pub(crate) fn new(master: ExtendedPrivKey) -> Self {
        HdKeychain {
            master,
            secp: Secp256k1::new(),
        }
    }

    /// The full derivation path for a child of the given keychain
    pub(crate) fn hd_keypath(&self, keychain: KeychainKind, index: u32) -> DerivationPath {
        // both components are < 2^31, the allocator enforces the bound on `index`
        DerivationPath::from(vec![
            ChildNumber::Normal {
                index: keychain as u32,
            },
            ChildNumber::Normal { index },
        ])
    }

    pub(crate) fn public_key(&self, keychain: KeychainKind, index: u32) -> Result<PublicKey, Error> {
        let derived = self
            .master
            .derive_priv(&self.secp, &self.hd_keypath(keychain, index))?;

        Ok(derived.to_priv().public_key(&self.secp))
    }

    pub(crate) fn script_pubkey(&self, keychain: KeychainKind, index: u32) -> Result<Script, Error> {
        let pubkey = self.public_key(keychain, index)?;
        let wpkh = pubkey
            .wpubkey_hash()
            .ok_or(Error::ScriptDoesntHaveAddressForm)?;

        Ok(Script::new_v0_p2wpkh(&wpkh))
    }

    pub(crate) fn address(
        &self,
        keychain: KeychainKind,
        index: u32,
        network: Network,
    ) -> Result<Address, Error> {
        Ok(Address::p2wpkh(
            &self.public_key(keychain, index)?,
            network,
        )?)
    }
}
