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

//! Delegated proof of stake consensus.
//!
//! Round bookkeeping plus the scheduler service arming one cancellable
//! production timer per consensus command.

pub mod round;
pub mod scheduler;

pub use round::{MinerSlot, Round, TERM_SPAN_MINUTES};
pub use scheduler::{consensus_command, Behaviour, ConsensusCommand, SchedulerService};
