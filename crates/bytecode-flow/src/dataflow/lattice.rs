// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Debug;

/// A join semilattice over analysis states.
///
/// `join` must be commutative, associative and idempotent, and `init_state` must be its identity
/// (`join(x, init_state()) == x`). The fixed-point engine relies on these laws but does not check
/// them.
pub trait Lattice {
    type State: Clone + PartialEq + Debug;

    fn init_state(&self) -> Self::State;

    fn join(&self, left: &Self::State, right: &Self::State) -> Self::State;

    /// Joins all `states`, yielding `init_state` if there are none.
    fn join_all<'s, I>(&self, states: I) -> Self::State
    where
        I: IntoIterator<Item = &'s Self::State>,
        Self::State: 's,
    {
        states
            .into_iter()
            .fold(self.init_state(), |acc, state| self.join(&acc, state))
    }
}
