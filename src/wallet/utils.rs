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

use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::Script;

use rand::Rng;

pub(crate) type SecpCtx = Secp256k1<All>;

/// Trait to check if a value is below the dust limit.
// We implement this trait to make sure we don't mess up the comparison with off-by-one like a <
// instead of a <= etc.
pub trait IsDust {
    /// Check whether or not a value is below dust limit
    fn is_dust(&self, script: &Script) -> bool;
}

impl IsDust for u64 {
    fn is_dust(&self, script: &Script) -> bool {
        *self < script.dust_value().to_sat()
    }
}

/// Pick the position of the change output among `outputs + 1` insertion points.
///
/// A caller-provided position always wins; otherwise one is drawn uniformly
/// from the RNG, so that the change output doesn't always sit in the same spot.
/// The RNG is a parameter to keep this reproducible under test.
pub(crate) fn resolve_change_position<R: Rng>(
    requested: Option<usize>,
    outputs: usize,
    rng: &mut R,
) -> usize {
    match requested {
        Some(position) => position,
        None => rng.gen_range(0..=outputs),
    }
}
