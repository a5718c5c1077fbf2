// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bonwerk: core types, codec operations, errors and configuration shared
// across all crates.

pub mod config;
pub mod error;
pub mod ops;
pub mod types;

pub use config::BonwerkConfig;
pub use error::BonwerkError;
pub use ops::*;
pub use types::*;
