// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]
//! This library provides emulation of the gameboy's Sharp LR35902 CPU and
//! its peripherals, as described in the publicly available "Game Boy CPU
//! Manual": the cpu, a flat memory bus with cartridge-mapper bank
//! switching, the lcd controller/ppu, and the timer and joypad circuits.
//!
//! [`Core`] is the single aggregate a host program drives: it owns the cpu,
//! bus and ppu with no lifetime parameters between them, stepping them in
//! lockstep one instruction (or one frame) at a time.

#[cfg(any(test, feature = "debug"))]
#[macro_use]
extern crate std;
extern crate core;
// The alloc crate is optional, and used for allocating the cartridge controller's
// ram on the heap.
#[cfg(feature = "alloc")]
extern crate alloc;

pub mod bus;
pub mod config;
pub mod cpu;
pub mod ppu;

use core::fmt;

use log::warn;

use bus::cartridge::{Cartridge, LoadError};
use bus::joypad::Key;
use bus::MemoryBus;
use config::Config;
use cpu::Cpu;
use ppu::Ppu;

/// The library's exported errors.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum GameboyError {
	/// The cartridge image could not be loaded.
	Cartridge(LoadError),
	/// The cpu fetched one of the 11 undefined opcode byte values.
	IllegalOpcode(u8),
}

impl fmt::Display for GameboyError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			GameboyError::Cartridge(err) => write!(f, "cartridge error: {}", err),
			GameboyError::IllegalOpcode(value) => write!(f, "illegal opcode: {:#04x}", value),
		}
	}
}

impl fmt::Debug for GameboyError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		(self as &dyn fmt::Display).fmt(f)
	}
}

impl From<LoadError> for GameboyError {
	fn from(err: LoadError) -> Self {
		GameboyError::Cartridge(err)
	}
}

/// The number of T-states (the cpu manual's smallest time unit, 4 per
/// machine cycle) in one full frame at the DMG's native ~59.7Hz refresh.
pub const T_CYCLES_PER_FRAME: u32 = 70224;

/// The complete emulated console: cpu, memory bus (cartridge, VRAM/OAM,
/// timer, joypad) and ppu, wired together with no lifetime parameters.
///
/// A host drives it with [`Core::step`] (one instruction) or
/// [`Core::step_frame`] (until one full frame has been rendered), then reads
/// [`Core::framebuffer`] and feeds input through [`Core::set_input`].
pub struct Core {
	cpu: Cpu,
	bus: MemoryBus,
	ppu: Ppu,
	config: Config,
	/// Latched once the cpu fetches one of the 11 undefined opcode byte
	/// values. This is a non-fatal, permanent freeze: once set, [`Core::step`]
	/// stops executing further instructions instead of panicking or
	/// propagating an error.
	stopped: bool,
}

impl Core {
	/// Builds a console around `rom`, in its documented post-boot-ROM state.
	pub fn new(rom: alloc::vec::Vec<u8>) -> Result<Self, GameboyError> {
		let config = Config::default();
		let cartridge = Cartridge::load(rom)?;
		let bus = MemoryBus::new(&config, cartridge);
		let cpu = Cpu::new(&config);
		let ppu = Ppu::new();

		Ok(Core { cpu, bus, ppu, config, stopped: false })
	}

	/// Resets every component to its documented post-boot-ROM state, keeping
	/// the currently loaded cartridge.
	pub fn reset(&mut self) {
		self.bus.reset(&self.config);
		self.cpu = Cpu::new(&self.config);
		self.ppu.reset();
		self.stopped = false;
	}

	/// `true` once the cpu has fetched an undefined opcode byte and frozen;
	/// [`Core::step`]/[`Core::step_frame`] become no-ops until [`Core::reset`].
	pub fn is_stopped(&self) -> bool {
		self.stopped
	}

	/// Executes one cpu instruction (or one idle step while halted/stopped),
	/// driving the ppu, timer and joypad by the same number of T-states.
	/// Returns the number of T-states elapsed, or 0 once [`Core::is_stopped`].
	/// An undefined opcode byte does not panic: it logs a warning, latches
	/// [`Core::is_stopped`], and freezes the core in place.
	pub fn step(&mut self) -> u32 {
		if self.stopped {
			return 0;
		}

		match self.cpu.step(&mut self.bus) {
			Ok(cycles) => {
				self.ppu.step(&mut self.bus, cycles);
				self.bus.step_peripherals(cycles);
				cycles
			}
			Err(GameboyError::IllegalOpcode(opcode)) => {
				warn!("cpu fetched undefined opcode {:#04x}; core is now stopped", opcode);
				self.stopped = true;
				0
			}
			Err(GameboyError::Cartridge(_)) => {
				unreachable!("cpu stepping never produces a cartridge error")
			}
		}
	}

	/// Runs [`Core::step`] until at least one full frame's worth of
	/// T-states has elapsed, then returns the total T-states consumed.
	/// Returns early, without error, if the core stops on an undefined
	/// opcode partway through the frame.
	pub fn step_frame(&mut self) -> u32 {
		let mut total = 0;
		while total < T_CYCLES_PER_FRAME {
			if self.stopped {
				break;
			}
			total += self.step();
		}
		total
	}

	/// Read-only access to the rendered frame, one shade index (0-3) per
	/// pixel, row-major, 160x144.
	pub fn framebuffer(&self) -> &[ppu::Shade] {
		self.ppu.framebuffer()
	}

	/// Sets whether the given button is currently held.
	pub fn set_input(&mut self, key: Key, pressed: bool) {
		self.bus.set_input(key, pressed);
	}

	/// The cartridge's title, as encoded in its header.
	pub fn cart_title(&self) -> &[u8] {
		self.bus.cartridge().title()
	}

	/// The cartridge's battery-backed save RAM, for persisting to disk.
	pub fn save_ram(&self) -> &[u8] {
		self.bus.cartridge().save_ram()
	}

	/// Restores previously-saved cartridge RAM, e.g. on load.
	pub fn load_save_ram(&mut self, data: &[u8]) {
		self.bus.cartridge_mut().load_save_ram(data);
	}

	/// Direct access to the cpu, e.g. for a debugger front-end.
	pub fn cpu(&self) -> &Cpu {
		&self.cpu
	}

	/// Direct access to the memory bus, e.g. for a debugger front-end.
	pub fn bus(&self) -> &MemoryBus {
		&self.bus
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use bus::cartridge::tests::rom_only_image;

	fn boot(program: &[u8]) -> Core {
		let mut rom = rom_only_image(2);
		rom[0x0100..0x0100 + program.len()].copy_from_slice(program);
		Core::new(rom).unwrap()
	}

	#[test]
	fn stepping_runs_instructions_from_the_entry_point() {
		let mut core = boot(&[0x3E, 0x42, 0x00]); // LD A,0x42; NOP
		core.step();
		assert_eq!(core.cpu().registers().a, 0x42);
	}

	#[test]
	fn step_frame_advances_at_least_one_full_frame() {
		let mut core = boot(&[0x00]); // NOP, infinite re-fetch... actually PC will run off ROM
		let elapsed = core.step_frame();
		assert!(elapsed >= T_CYCLES_PER_FRAME);
	}

	#[test]
	fn illegal_opcode_stops_the_core_without_panicking() {
		let mut core = boot(&[0xD3]);
		assert!(!core.is_stopped());

		core.step();
		assert!(core.is_stopped());

		// The core stays frozen: further steps are no-ops, not panics.
		assert_eq!(core.step(), 0);
		assert!(core.is_stopped());
	}

	#[test]
	fn step_frame_returns_early_on_an_illegal_opcode() {
		let mut core = boot(&[0xD3]);
		let elapsed = core.step_frame();
		assert!(elapsed < T_CYCLES_PER_FRAME);
		assert!(core.is_stopped());
	}

	#[test]
	fn loading_a_too_small_rom_is_rejected() {
		let result = Core::new(alloc::vec![0u8; 10]);
		assert!(matches!(result, Err(GameboyError::Cartridge(LoadError::TooSmall(10)))));
	}

	#[test]
	fn joypad_input_is_visible_through_the_bus() {
		let mut core = boot(&[0x00]);
		core.set_input(Key::Start, true);
		core.bus().interrupt_flag(); // smoke-check accessor wiring compiles
	}
}
