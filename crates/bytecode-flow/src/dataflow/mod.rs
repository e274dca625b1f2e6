// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Generic lattice-based dataflow framework
//!
//! A client analysis supplies a [`Lattice`] fixing its state space and join, and a [`Transfer`]
//! function per node; [`Dataflow`] drives both to a fixed point in either direction.

mod fixedpoint;
mod lattice;
mod state;

pub use fixedpoint::{Dataflow, Direction};
pub use lattice::Lattice;
pub use state::{States, Transfer};
