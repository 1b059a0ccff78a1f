// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
//! Emulator hardware configuration and preferences.

/// The hardware model being emulated.
///
/// Only the original Game Boy (DMG) is supported; Game Boy Color is an
/// explicit non-goal of this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HardwareModel {
	/// Original Game Boy (DMG).
	#[default]
	Dmg,
}

/// Emulation settings and preferences.
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
	/// The model of the emulated machine.
	pub model: HardwareModel,
}
