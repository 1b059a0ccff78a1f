// Copyright 2021 Nir H. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
//! Gameboy's Sharp LR35902 processor emulation.

pub mod alu;
pub mod decode;
pub mod interrupts;
pub mod state;

use log::trace;

use crate::bus::MemoryBus;
use crate::config::Config;
use crate::GameboyError;
use interrupts::Interrupt;
use state::Registers;

/// The gameboy's processor: registers plus the handful of bits of control
/// state (`HALT`, the `EI` delay, the halt bug) that the CPU manual
/// describes as part of its execution model rather than as a register.
///
/// The cpu does not own the bus, cartridge or ppu — see [`crate::Core`] for
/// the aggregate that wires them together — so every stepping operation
/// takes the bus it should act on as an explicit argument.
pub struct Cpu {
	registers: Registers,
	ime: bool,
	/// `Some(enable)` for the one instruction after `EI`/`DI`, after which
	/// `ime` is set to `enable`.
	ime_pending: Option<bool>,
	halting: bool,
	/// Set when `HALT` is executed while `IME` is clear and an interrupt is
	/// already pending: the next opcode fetch fails to advance `PC`.
	halt_bug: bool,
	/// Set by the `STOP` instruction; cleared only by a pending joypad
	/// interrupt, i.e. a button press, unlike `HALT`'s wake on any interrupt.
	stopped: bool,
}

impl Cpu {
	/// Initializes a cpu in its documented post-boot-ROM state.
	pub fn new(config: &Config) -> Self {
		let mut registers = Registers::default();
		registers.reset(config);

		Cpu {
			registers,
			ime: false,
			ime_pending: None,
			halting: false,
			halt_bug: false,
			stopped: false,
		}
	}

	/// Direct access to the register file, e.g. for test fixtures or a
	/// debugger front-end.
	pub fn registers(&self) -> &Registers {
		&self.registers
	}

	/// Mutable access to the register file.
	pub fn registers_mut(&mut self) -> &mut Registers {
		&mut self.registers
	}

	/// `true` while the cpu is halted awaiting an interrupt.
	pub fn is_halted(&self) -> bool {
		self.halting
	}

	/// `true` after `STOP`, until woken by a pending joypad interrupt.
	pub fn is_stopped(&self) -> bool {
		self.stopped
	}

	/// Executes one step: services a pending interrupt if `IME` allows it,
	/// otherwise fetches, decodes and executes one instruction (or, while
	/// halted, idles for a single M-cycle). Returns the number of T-states
	/// elapsed, for driving the ppu/timer/joypad the same amount. Fails if
	/// the fetched opcode is one of the 11 undefined byte values.
	pub fn step(&mut self, bus: &mut MemoryBus) -> Result<u32, GameboyError> {
		if self.stopped {
			// Unlike HALT, STOP does not wake on any pending interrupt: only
			// joypad input (a falling edge on a selected P1 line) resumes it.
			if bus.interrupt_flag() & bus.interrupt_enable() & Interrupt::Joypad.value() != 0 {
				self.stopped = false;
			} else {
				return Ok(4);
			}
		}

		let interrupt_cycles = self.service_interrupt(bus);
		if interrupt_cycles > 0 {
			return Ok(interrupt_cycles);
		}

		let cycles = if self.halting {
			if bus.interrupt_flag() & bus.interrupt_enable() != 0 {
				self.halting = false;
			}
			4
		} else {
			self.fetch_decode_execute(bus)?
		};

		if let Some(enable) = self.ime_pending.take() {
			self.ime = enable;
		}

		Ok(cycles)
	}

	fn service_interrupt(&mut self, bus: &mut MemoryBus) -> u32 {
		if !self.ime {
			return 0;
		}

		let pending = Interrupt::lowest_pending(bus.interrupt_flag(), bus.interrupt_enable());
		let Some(interrupt) = pending else { return 0 };

		self.halting = false;
		self.ime = false;
		bus.ack_interrupt(interrupt);

		let sp = self.registers.sp.wrapping_sub(2);
		bus.write16_stack(sp.wrapping_add(2).wrapping_sub(1), self.registers.pc);
		self.registers.sp = sp;
		self.registers.pc = interrupt.vector();

		trace!("servicing interrupt {:?} -> {:#06x}", interrupt, interrupt.vector());

		20
	}

	fn fetch_decode_execute(&mut self, bus: &mut MemoryBus) -> Result<u32, GameboyError> {
		let pc = self.registers.pc;
		let opcode = bus.read8(pc);

		if self.halt_bug {
			self.halt_bug = false;
		} else {
			self.registers.pc = pc.wrapping_add(1);
		}

		decode::execute(self, bus, opcode)
	}

	/// Reads the byte at `PC` and advances it; used by instruction bodies
	/// that need an immediate operand.
	fn fetch8(&mut self, bus: &mut MemoryBus) -> u8 {
		let value = bus.read8(self.registers.pc);
		self.registers.pc = self.registers.pc.wrapping_add(1);
		value
	}

	/// Reads the little-endian 16-bit immediate at `PC` and advances it by 2.
	fn fetch16(&mut self, bus: &mut MemoryBus) -> u16 {
		let low = self.fetch8(bus) as u16;
		let high = self.fetch8(bus) as u16;
		(high << 8) | low
	}

	/// Enters `HALT`. If `IME` is clear and an interrupt is already pending,
	/// the next instruction fetch will not advance `PC` (the halt bug).
	fn enter_halt(&mut self, bus: &MemoryBus) {
		self.halting = true;
		if !self.ime && bus.interrupt_flag() & bus.interrupt_enable() != 0 {
			self.halt_bug = true;
		}
	}

	/// Enters `STOP`.
	fn enter_stop(&mut self) {
		self.stopped = true;
	}

	/// Schedules `IME` to change after the current instruction completes,
	/// modeling `EI`'s one-instruction delay. `DI` takes effect immediately.
	fn set_ime_delayed(&mut self, enable: bool) {
		if enable {
			self.ime_pending = Some(true);
		} else {
			self.ime = false;
			self.ime_pending = None;
		}
	}
}

#[cfg(test)]
#[allow(missing_docs)]
pub mod tests {
	use super::*;
	use crate::bus::cartridge::{tests::rom_only_image, Cartridge};

	/// Build a `Cpu`/`MemoryBus` pair wired to a minimal ROM-only cartridge.
	pub fn new_test_cpu() -> (Cpu, MemoryBus) {
		let config = Config::default();
		let cart = Cartridge::load(rom_only_image(2)).unwrap();
		let bus = MemoryBus::new(&config, cart);
		(Cpu::new(&config), bus)
	}

	fn load_program(bus: &mut MemoryBus, program: &[u8]) {
		bus.cartridge_mut().write_rom(0x2000, 0x01); // select ROM bank 1 (no-op for NoMapper)
		for (i, &byte) in program.iter().enumerate() {
			// Route through bank-0's RAM-shadowed region isn't writable on
			// NoMapper carts, so tests execute directly out of WRAM instead.
			bus.write8(0xC000 + i as u16, byte);
		}
	}

	#[test]
	fn nop_advances_pc_and_takes_4_cycles() {
		let (mut cpu, mut bus) = new_test_cpu();
		cpu.registers.pc = 0xC000;
		load_program(&mut bus, &[0x00]);

		let cycles = cpu.step(&mut bus).unwrap();
		assert_eq!(cycles, 4);
		assert_eq!(cpu.registers.pc, 0xC001);
	}

	#[test]
	fn interrupt_is_serviced_when_ime_set() {
		let (mut cpu, mut bus) = new_test_cpu();
		cpu.registers.pc = 0xC000;
		cpu.registers.sp = 0xFFFE;
		cpu.ime = true;
		load_program(&mut bus, &[0x00]);

		bus.write8(0xFFFF, 0x01); // IE: vblank
		bus.request_interrupt(Interrupt::VerticalBlank);

		let cycles = cpu.step(&mut bus).unwrap();
		assert_eq!(cycles, 20);
		assert_eq!(cpu.registers.pc, Interrupt::VerticalBlank.vector());
		assert_eq!(cpu.registers.sp, 0xFFFC);
		assert!(!cpu.ime);
	}

	#[test]
	fn halt_bug_does_not_advance_pc_on_next_fetch() {
		let (mut cpu, mut bus) = new_test_cpu();
		cpu.registers.pc = 0xC000;
		load_program(&mut bus, &[0x76, 0x3C]); // HALT; INC A

		bus.write8(0xFFFF, 0x01);
		bus.request_interrupt(Interrupt::VerticalBlank); // pending while IME=0

		cpu.step(&mut bus).unwrap(); // executes HALT, triggers the bug
		assert!(cpu.halt_bug);
		assert!(!cpu.halting); // woken immediately since IME=0 and IF&IE != 0

		let pc_before = cpu.registers.pc;
		cpu.step(&mut bus).unwrap(); // re-fetches 0x76 due to the bug, not 0x3C
		assert_eq!(pc_before, cpu.registers.pc.wrapping_sub(1));
	}

	#[test]
	fn ei_takes_effect_after_following_instruction() {
		let (mut cpu, mut bus) = new_test_cpu();
		cpu.registers.pc = 0xC000;
		load_program(&mut bus, &[0xFB, 0x00]); // EI; NOP

		cpu.step(&mut bus).unwrap(); // EI
		assert!(!cpu.ime);
		cpu.step(&mut bus).unwrap(); // NOP: IME now takes effect
		assert!(cpu.ime);
	}

	#[test]
	fn stop_does_not_wake_on_a_non_joypad_interrupt() {
		let (mut cpu, mut bus) = new_test_cpu();
		cpu.registers.pc = 0xC000;
		load_program(&mut bus, &[0x10, 0x00]); // STOP; NOP

		cpu.step(&mut bus).unwrap(); // STOP
		assert!(cpu.is_stopped());

		bus.write8(0xFFFF, 0xFF);
		bus.request_interrupt(Interrupt::VerticalBlank);
		cpu.step(&mut bus).unwrap();
		assert!(cpu.is_stopped()); // vblank alone does not wake STOP

		bus.request_interrupt(Interrupt::Joypad);
		cpu.step(&mut bus).unwrap();
		assert!(!cpu.is_stopped());
	}
}
