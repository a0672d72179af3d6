// CHIP-8 / CHIP-48 / S-CHIP interpreter core, based on:
// - RCA COSMAC VIP CDP18S711 Instruction Manual
// - http://devernay.free.fr/hacks/chip8/schip.txt
// - https://github.com/mattmikolay/chip-8/wiki/CHIP%E2%80%908-Instruction-Set

pub const MEMORY_SIZE: usize = 0x1000;
pub const ROM_START: u16 = 0x200;
pub const MAX_ROM_SIZE: usize = MEMORY_SIZE - ROM_START as usize;
pub const FONT_OFFSET: u16 = 0x50;
pub const HFONT_OFFSET: u16 = 0xA0;
pub const STACK_SIZE: usize = 16;
pub const KEY_COUNT: usize = 0x10;
pub const SCREEN_WIDTH: usize = 128;
pub const SCREEN_HEIGHT: usize = 64;
pub const SCREEN_SIZE: usize = SCREEN_WIDTH * SCREEN_HEIGHT / 8;

// Timers and the host frame loop both run at this fixed rate
pub const TIMER_HZ: u32 = 60;

const ROW_BYTES: usize = SCREEN_WIDTH / 8;

/// Behavior profile for the ambiguous instructions (8xy6/8xyE shifts,
/// Bnnn jump, Fx55/Fx65 index increment). Each variant resolves them
/// the way a specific historical interpreter did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Chip8,
    Schip1_0,
    Schip1_1,
}

/// The only error `cycle` surfaces: an instruction bit pattern outside
/// the implemented table. Everything else (stack over/underflow, bad
/// register counts, oversized ROMs) is caller misuse and is handled by
/// debug assertions plus documented clamping in release builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("unknown opcode {opcode:#06X} at {pc:#06X}")]
    UnknownOpcode { opcode: u16, pc: u16 },
}

// Fx0A registers a key only once it has been pressed *and* released,
// matching the COSMAC VIP. The instruction rewinds PC until the state
// machine completes, so it spans several cycle() calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyWait {
    Idle,
    AwaitingPress,
    AwaitingRelease,
}

const FONT: [u8; 16 * 5 + 10 * 10] = [
    // Standard 8x5 font
    0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
    0x20, 0x60, 0x20, 0x20, 0x70, // 1
    0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
    0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
    0x90, 0x90, 0xF0, 0x10, 0x10, // 4
    0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
    0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
    0xF0, 0x10, 0x20, 0x40, 0x40, // 7
    0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
    0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
    0xF0, 0x90, 0xF0, 0x90, 0x90, // A
    0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
    0xF0, 0x80, 0x80, 0x80, 0xF0, // C
    0xE0, 0x90, 0x90, 0x90, 0xE0, // D
    0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
    0xF0, 0x80, 0xF0, 0x80, 0x80, // F
    // Hi-res 8x10 font (S-CHIP)
    0x3C, 0x7E, 0xE7, 0xC3, 0xC3, 0xC3, 0xC3, 0xE7, 0x7E, 0x3C, // 0
    0x18, 0x38, 0x58, 0x18, 0x18, 0x18, 0x18, 0x18, 0x18, 0x3C, // 1
    0x3E, 0x7F, 0xC3, 0x06, 0x0C, 0x18, 0x30, 0x60, 0xFF, 0xFF, // 2
    0x3C, 0x7E, 0xC3, 0x03, 0x0E, 0x0E, 0x03, 0xC3, 0x7E, 0x3C, // 3
    0x06, 0x0E, 0x1E, 0x36, 0x66, 0xC6, 0xFF, 0xFF, 0x06, 0x06, // 4
    0xFF, 0xFF, 0xC0, 0xC0, 0xFC, 0xFE, 0x03, 0xC3, 0x7E, 0x3C, // 5
    0x3E, 0x7C, 0xC0, 0xC0, 0xFC, 0xFE, 0xC3, 0xC3, 0x7E, 0x3C, // 6
    0xFF, 0xFF, 0x03, 0x06, 0x0C, 0x18, 0x30, 0x60, 0x60, 0x60, // 7
    0x3C, 0x7E, 0xC3, 0xC3, 0x7E, 0x7E, 0xC3, 0xC3, 0x7E, 0x3C, // 8
    0x3C, 0x7E, 0xC3, 0xC3, 0x7F, 0x3F, 0x03, 0x03, 0x3E, 0x7C, // 9
];

fn rand_byte(state: &mut u64) -> u8 {
    *state = state.wrapping_mul(0x3243_F6A8_885A_308D).wrapping_add(1);
    (*state >> 56) as u8
}

fn ipf_from(emu_freq: u32) -> u32 {
    (emu_freq as f64 / TIMER_HZ as f64 + 0.5) as u32
}

/// The whole machine: memory, registers, stack, timers, framebuffer
/// and keypad latch. One value per emulated machine, exclusively owned
/// by the host; every mutation goes through `cycle`, `tick_timers`,
/// the key calls or the reconfiguration setters.
///
/// The framebuffer is always allocated at 128x64; in low-res mode each
/// logical pixel occupies a 2x2 physical block.
pub struct Chip8 {
    memory: [u8; MEMORY_SIZE],

    i: u16,
    pc: u16,

    stack: [u16; STACK_SIZE],
    sp: u8, // one-based: 0 means empty, first CALL writes slot 1

    v: [u8; 16],
    hp48_flags: [u8; 8], // HP-48 "RPL user flag" registers (S-CHIP)

    screen: [u8; SCREEN_SIZE],
    keypad: [bool; KEY_COUNT],
    wait_for_key: KeyWait,

    dt: u8,
    st: u8,

    opcode: u16,
    rng: u64,
    ipf: u32,

    hi_res: bool,
    screen_updated: bool,

    platform: Platform,
}

impl Chip8 {
    /// Fully reset machine and configure it: `emu_freq` is the emulated
    /// speed in instructions per second (the per-frame instruction count
    /// is derived from it against the fixed 60 Hz frame rate), `seed`
    /// primes the deterministic byte generator behind Cxkk.
    pub fn new(emu_freq: u32, platform: Platform, seed: u64) -> Self {
        let mut vm = Self {
            memory: [0; MEMORY_SIZE],
            i: 0,
            pc: ROM_START,
            stack: [0; STACK_SIZE],
            sp: 0,
            v: [0; 16],
            hp48_flags: [0; 8],
            screen: [0; SCREEN_SIZE],
            keypad: [false; KEY_COUNT],
            wait_for_key: KeyWait::Idle,
            dt: 0,
            st: 0,
            opcode: 0,
            rng: seed,
            ipf: ipf_from(emu_freq),
            hi_res: false,
            screen_updated: false,
            platform,
        };
        vm.memory[FONT_OFFSET as usize..FONT_OFFSET as usize + FONT.len()]
            .copy_from_slice(&FONT);
        vm
    }

    /// Fully reset the machine: zero memory (fonts are reinstalled, the
    /// loaded program is gone) and everything `soft_reset` clears. The
    /// configured frequency, platform and generator state survive; use
    /// the setters or build a fresh `Chip8` to change those.
    pub fn reset(&mut self) {
        self.memory = [0; MEMORY_SIZE];
        self.memory[FONT_OFFSET as usize..FONT_OFFSET as usize + FONT.len()]
            .copy_from_slice(&FONT);
        self.soft_reset();
    }

    /// Reset everything except memory: fonts and the loaded program
    /// survive, registers, stack, timers, keypad and the framebuffer do
    /// not. The emulated frequency, platform and PRNG state are
    /// configuration, not program state, and are kept as well, so a
    /// rerun after a soft reset does NOT replay the same Cxkk sequence;
    /// reseed with a fresh `Chip8` for deterministic replay. Marks the
    /// screen dirty so the host redraws the cleared framebuffer.
    pub fn soft_reset(&mut self) {
        self.i = 0;
        self.pc = ROM_START;
        self.stack = [0; STACK_SIZE];
        self.sp = 0;
        self.v = [0; 16];
        self.hp48_flags = [0; 8];
        self.screen = [0; SCREEN_SIZE];
        self.keypad = [false; KEY_COUNT];
        self.wait_for_key = KeyWait::Idle;
        self.dt = 0;
        self.st = 0;
        self.opcode = 0;
        self.hi_res = false;
        self.screen_updated = true;
    }

    /// Copy a program into memory starting at 0x200.
    /// ASSERT: `rom.len() <= 3584`; release builds truncate.
    pub fn load_rom(&mut self, rom: &[u8]) {
        debug_assert!(rom.len() <= MAX_ROM_SIZE, "rom larger than {} bytes", MAX_ROM_SIZE);
        let len = rom.len().min(MAX_ROM_SIZE);
        self.memory[ROM_START as usize..ROM_START as usize + len]
            .copy_from_slice(&rom[..len]);
        log::debug!("loaded {} byte rom at {:#06X}", len, ROM_START);
    }

    pub fn set_frequency(&mut self, emu_freq: u32) {
        self.ipf = ipf_from(emu_freq);
    }

    pub fn set_platform(&mut self, platform: Platform) {
        self.platform = platform;
    }

    /// Instructions executed per `cycle` call, derived from the
    /// configured frequency against the fixed 60 Hz frame rate.
    pub fn instructions_per_frame(&self) -> u32 {
        self.ipf
    }

    /// Decrement DT/ST if non-zero. Must be called at a constant 60 Hz,
    /// independent of the emulated speed.
    pub fn tick_timers(&mut self) {
        self.dt = self.dt.saturating_sub(1);
        self.st = self.st.saturating_sub(1);
    }

    /// True while the sound timer is running; the host keeps its tone
    /// generator on exactly as long as this holds.
    pub fn sound_active(&self) -> bool {
        self.st > 0
    }

    /// True if any instruction of the last `cycle` call wrote to the
    /// framebuffer (draw, clear, scroll or resolution switch).
    pub fn screen_updated(&self) -> bool {
        self.screen_updated
    }

    /// True once the program executed EXIT (00FD). The instruction
    /// rewinds PC onto itself, so the condition latches.
    pub fn ended(&self) -> bool {
        self.opcode == 0x00FD
    }

    /// Last fetched opcode, for diagnostics.
    pub fn last_opcode(&self) -> u16 {
        self.opcode
    }

    /// Read one physical pixel of the 128x64 grid.
    /// ASSERT: `row < 64 && col < 128`; out of range reads false.
    pub fn pixel(&self, row: usize, col: usize) -> bool {
        debug_assert!(row < SCREEN_HEIGHT && col < SCREEN_WIDTH);
        if row < SCREEN_HEIGHT && col < SCREEN_WIDTH {
            self.screen[(SCREEN_WIDTH * row + col) / 8] & (0x80 >> (col % 8)) != 0
        } else {
            false
        }
    }

    /// ASSERT: `key < 16`; out of range is ignored.
    pub fn press_key(&mut self, key: usize) {
        debug_assert!(key < KEY_COUNT);
        if key < KEY_COUNT {
            self.keypad[key] = true;
        }
    }

    /// ASSERT: `key < 16`; out of range is ignored.
    pub fn release_key(&mut self, key: usize) {
        debug_assert!(key < KEY_COUNT);
        if key < KEY_COUNT {
            self.keypad[key] = false;
        }
    }

    /// Fetch-decode-execute one frame's worth of instructions (IPF).
    /// Stops at the first unknown opcode; instructions already executed
    /// in the same call stay applied. Once EXIT has latched, the rest
    /// of the frame is skipped, which no accessor can observe.
    pub fn cycle(&mut self) -> Result<(), Fault> {
        self.screen_updated = false;

        for _ in 0..self.ipf {
            if self.ended() {
                break;
            }
            let pc = self.pc as usize & (MEMORY_SIZE - 1);
            self.opcode = u16::from_be_bytes([
                self.memory[pc],
                self.memory[(pc + 1) & (MEMORY_SIZE - 1)],
            ]);
            self.pc = self.pc.wrapping_add(2);
            self.execute()?;
        }

        Ok(())
    }

    fn unknown(&self) -> Fault {
        Fault::UnknownOpcode {
            opcode: self.opcode,
            pc: self.pc.wrapping_sub(2),
        }
    }

    fn execute(&mut self) -> Result<(), Fault> {
        let op = self.opcode;
        let x = ((op & 0x0F00) >> 8) as usize;
        let y = ((op & 0x00F0) >> 4) as usize;
        let n = (op & 0x000F) as u8;
        let kk = (op & 0x00FF) as u8;
        let nnn = op & 0x0FFF;

        match op & 0xF000 {
            0x0000 => {
                if op & 0xFFF0 == 0x00C0 {
                    // SCD nibble (00Cn) - S-CHIP
                    self.scroll_down(n);
                    self.screen_updated = true;
                } else {
                    match op {
                        // CLS (00E0)
                        0x00E0 => {
                            self.screen = [0; SCREEN_SIZE];
                            self.screen_updated = true;
                        }
                        // RET (00EE)
                        // ASSERT: SP > 0; release reads slot 0 as 0
                        0x00EE => {
                            debug_assert!(self.sp > 0, "stack underflow");
                            self.pc = self.stack[self.sp as usize];
                            self.sp = self.sp.saturating_sub(1);
                        }
                        // SCR (00FB) - S-CHIP
                        0x00FB => {
                            self.scroll_right();
                            self.screen_updated = true;
                        }
                        // SCL (00FC) - S-CHIP
                        0x00FC => {
                            self.scroll_left();
                            self.screen_updated = true;
                        }
                        // EXIT (00FD) - S-CHIP
                        // PC rewinds onto the instruction itself, so
                        // every later fetch sees 00FD and ended() holds
                        0x00FD => {
                            self.pc = self.pc.wrapping_sub(2);
                        }
                        // LOW (00FE) - S-CHIP
                        0x00FE => {
                            if self.hi_res {
                                self.screen_updated = true;
                            }
                            self.hi_res = false;
                        }
                        // HIGH (00FF) - S-CHIP
                        0x00FF => {
                            if !self.hi_res {
                                self.screen_updated = true;
                            }
                            self.hi_res = true;
                        }
                        // SYS addr (0nnn) - not implemented
                        _ => {}
                    }
                }
            }

            // JP addr (1nnn)
            0x1000 => self.pc = nnn,

            // CALL addr (2nnn)
            // ASSERT: SP < 15; release overwrites the top slot
            0x2000 => {
                debug_assert!(self.sp < STACK_SIZE as u8 - 1, "stack overflow");
                self.sp = (self.sp + 1).min(STACK_SIZE as u8 - 1);
                self.stack[self.sp as usize] = self.pc;
                self.pc = nnn;
            }

            // SE Vx, byte (3xkk)
            0x3000 => {
                if self.v[x] == kk {
                    self.pc = self.pc.wrapping_add(2);
                }
            }

            // SNE Vx, byte (4xkk)
            0x4000 => {
                if self.v[x] != kk {
                    self.pc = self.pc.wrapping_add(2);
                }
            }

            // SE Vx, Vy (5xy0)
            0x5000 => {
                if n != 0 {
                    return Err(self.unknown());
                }
                if self.v[x] == self.v[y] {
                    self.pc = self.pc.wrapping_add(2);
                }
            }

            // LD Vx, byte (6xkk)
            0x6000 => self.v[x] = kk,

            // ADD Vx, byte (7xkk)
            0x7000 => self.v[x] = self.v[x].wrapping_add(kk),

            0x8000 => match op & 0x000F {
                // LD Vx, Vy (8xy0)
                0x0 => self.v[x] = self.v[y],

                // OR Vx, Vy (8xy1)
                0x1 => self.v[x] |= self.v[y],

                // AND Vx, Vy (8xy2)
                0x2 => self.v[x] &= self.v[y],

                // XOR Vx, Vy (8xy3)
                0x3 => self.v[x] ^= self.v[y],

                // ADD Vx, Vy (8xy4)
                // VF is written last: VF may itself be an operand
                0x4 => {
                    let (sum, carry) = self.v[x].overflowing_add(self.v[y]);
                    self.v[x] = sum;
                    self.v[0xF] = carry as u8;
                }

                // SUB Vx, Vy (8xy5)
                // The flag is strict greater-than: equal operands clear VF
                0x5 => {
                    let no_borrow = self.v[x] > self.v[y];
                    self.v[x] = self.v[x].wrapping_sub(self.v[y]);
                    self.v[0xF] = no_borrow as u8;
                }

                // SHR Vx {, Vy} (8xy6) - ambiguous instruction
                0x6 => {
                    if self.platform == Platform::Chip8 {
                        self.v[x] = self.v[y];
                    }
                    let bit = self.v[x] & 0x01;
                    self.v[x] >>= 1;
                    self.v[0xF] = bit;
                }

                // SUBN Vx, Vy (8xy7)
                0x7 => {
                    let no_borrow = self.v[y] > self.v[x];
                    self.v[x] = self.v[y].wrapping_sub(self.v[x]);
                    self.v[0xF] = no_borrow as u8;
                }

                // SHL Vx {, Vy} (8xyE) - ambiguous instruction
                0xE => {
                    if self.platform == Platform::Chip8 {
                        self.v[x] = self.v[y];
                    }
                    let bit = self.v[x] >> 7;
                    self.v[x] <<= 1;
                    self.v[0xF] = bit;
                }

                _ => return Err(self.unknown()),
            },

            // SNE Vx, Vy (9xy0)
            0x9000 => {
                if n != 0 {
                    return Err(self.unknown());
                }
                if self.v[x] != self.v[y] {
                    self.pc = self.pc.wrapping_add(2);
                }
            }

            // LD I, addr (Annn)
            0xA000 => self.i = nnn,

            // JP V0, addr (Bnnn) - ambiguous instruction
            // CHIP-48/S-CHIP misread the offset register as Vx
            0xB000 => {
                let base = match self.platform {
                    Platform::Chip8 => self.v[0x0],
                    Platform::Schip1_0 | Platform::Schip1_1 => self.v[x],
                };
                self.pc = nnn.wrapping_add(base as u16);
            }

            // RND Vx, byte (Cxkk)
            0xC000 => {
                let byte = rand_byte(&mut self.rng);
                self.v[x] = byte & kk;
            }

            // DRW Vx, Vy, nibble (Dxyn / Dxy0)
            0xD000 => {
                if self.hi_res && n == 0 {
                    self.draw_sprite16(x, y);
                } else {
                    self.draw_sprite(x, y, n);
                }
                self.screen_updated = true;
            }

            0xE000 => match op & 0x00FF {
                // SKP Vx (Ex9E)
                0x9E => {
                    if self.keypad[(self.v[x] & 0x0F) as usize] {
                        self.pc = self.pc.wrapping_add(2);
                    }
                }

                // SKNP Vx (ExA1)
                0xA1 => {
                    if !self.keypad[(self.v[x] & 0x0F) as usize] {
                        self.pc = self.pc.wrapping_add(2);
                    }
                }

                _ => return Err(self.unknown()),
            },

            0xF000 => match op & 0x00FF {
                // LD Vx, DT (Fx07)
                0x07 => self.v[x] = self.dt,

                // LD Vx, K (Fx0A)
                0x0A => self.key_wait(x),

                // LD DT, Vx (Fx15)
                0x15 => self.dt = self.v[x],

                // LD ST, Vx (Fx18)
                0x18 => self.st = self.v[x],

                // ADD I, Vx (Fx1E)
                0x1E => self.i = self.i.wrapping_add(self.v[x] as u16),

                // LD F, Vx (Fx29) - font sprites are 5 bytes
                0x29 => self.i = FONT_OFFSET + self.v[x] as u16 * 5,

                // LD HF, Vx (Fx30) - hi-res font sprites are 10 bytes
                0x30 => self.i = HFONT_OFFSET + self.v[x] as u16 * 10,

                // LD B, Vx (Fx33)
                0x33 => {
                    let i = self.i as usize;
                    self.memory[i & (MEMORY_SIZE - 1)] = self.v[x] / 100 % 10;
                    self.memory[(i + 1) & (MEMORY_SIZE - 1)] = self.v[x] / 10 % 10;
                    self.memory[(i + 2) & (MEMORY_SIZE - 1)] = self.v[x] % 10;
                }

                // LD [I], Vx (Fx55) - ambiguous instruction
                0x55 => {
                    for r in 0..=x {
                        self.memory[(self.i as usize + r) & (MEMORY_SIZE - 1)] = self.v[r];
                    }
                    match self.platform {
                        Platform::Chip8 => self.i = self.i.wrapping_add(x as u16 + 1),
                        Platform::Schip1_0 => self.i = self.i.wrapping_add(x as u16),
                        Platform::Schip1_1 => {}
                    }
                }

                // LD Vx, [I] (Fx65) - ambiguous instruction
                0x65 => {
                    for r in 0..=x {
                        self.v[r] = self.memory[(self.i as usize + r) & (MEMORY_SIZE - 1)];
                    }
                    match self.platform {
                        Platform::Chip8 => self.i = self.i.wrapping_add(x as u16 + 1),
                        Platform::Schip1_0 => self.i = self.i.wrapping_add(x as u16),
                        Platform::Schip1_1 => {}
                    }
                }

                // LD R, Vx (Fx75) - S-CHIP
                // ASSERT: x <= 7; release clamps to 8 registers
                0x75 => {
                    debug_assert!(x <= 7, "Fx75 with x > 7");
                    let count = x.min(7) + 1;
                    self.hp48_flags[..count].copy_from_slice(&self.v[..count]);
                }

                // LD Vx, R (Fx85) - S-CHIP
                // ASSERT: x <= 7; release clamps to 8 registers
                0x85 => {
                    debug_assert!(x <= 7, "Fx85 with x > 7");
                    let count = x.min(7) + 1;
                    self.v[..count].copy_from_slice(&self.hp48_flags[..count]);
                }

                _ => return Err(self.unknown()),
            },

            _ => return Err(self.unknown()),
        }

        Ok(())
    }

    // Wait for a key press, store the key in Vx. Spans multiple steps:
    // while unsatisfied, PC is rewound so the instruction re-executes on
    // the next step and the whole machine stalls cooperatively.
    fn key_wait(&mut self, x: usize) {
        match self.wait_for_key {
            KeyWait::Idle => {
                self.pc = self.pc.wrapping_sub(2);
                if self.keypad.iter().any(|&k| k) {
                    self.wait_for_key = KeyWait::AwaitingPress;
                }
            }
            KeyWait::AwaitingPress => {
                self.pc = self.pc.wrapping_sub(2);
                if let Some(key) = self.keypad.iter().position(|&k| k) {
                    self.v[x] = key as u8;
                    self.wait_for_key = KeyWait::AwaitingRelease;
                }
            }
            KeyWait::AwaitingRelease => {
                if self.keypad.iter().any(|&k| k) {
                    self.pc = self.pc.wrapping_sub(2);
                } else {
                    // Released: PC falls through, the wait is complete
                    self.wait_for_key = KeyWait::Idle;
                }
            }
        }
    }

    fn set_pixel(&mut self, row: usize, col: usize) {
        self.screen[(SCREEN_WIDTH * row + col) / 8] |= 0x80 >> (col % 8);
    }

    fn clear_pixel(&mut self, row: usize, col: usize) {
        self.screen[(SCREEN_WIDTH * row + col) / 8] &= !(0x80 >> (col % 8));
    }

    // XOR one sprite pixel onto one physical pixel, accumulating the
    // collision flag.
    fn blit(&mut self, row: usize, col: usize, sprite_on: bool) {
        let screen_on = self.pixel(row, col);
        self.v[0xF] |= (screen_on && sprite_on) as u8;
        if screen_on ^ sprite_on {
            self.set_pixel(row, col);
        } else {
            self.clear_pixel(row, col);
        }
    }

    // Display an n-byte sprite from memory[I..] at (Vx, Vy) with edge
    // clipping, VF = collision. In low-res mode coordinates live on the
    // 64x32 logical grid and every logical pixel maps to a 2x2 physical
    // block of the 128x64 framebuffer.
    fn draw_sprite(&mut self, x: usize, y: usize, n: u8) {
        self.v[0xF] = 0;
        let (width, height) = if self.hi_res { (128, 64) } else { (64, 32) };

        let xo = self.v[x] as usize % width;
        let yo = self.v[y] as usize % height;

        for row in 0..n as usize {
            if yo + row >= height {
                break;
            }
            let bits = self.memory[(self.i as usize + row) & (MEMORY_SIZE - 1)];

            for col in 0..8 {
                if xo + col >= width {
                    break;
                }
                let sprite_on = bits & (0x80 >> col) != 0;

                if self.hi_res {
                    self.blit(yo + row, xo + col, sprite_on);
                } else {
                    let (r, c) = (2 * (yo + row), 2 * (xo + col));
                    let screen_on = self.pixel(r, c);
                    self.v[0xF] |= (screen_on && sprite_on) as u8;
                    for dr in 0..2 {
                        for dc in 0..2 {
                            if screen_on ^ sprite_on {
                                self.set_pixel(r + dr, c + dc);
                            } else {
                                self.clear_pixel(r + dr, c + dc);
                            }
                        }
                    }
                }
            }
        }
    }

    // Dxy0 in hi-res mode: a 16x16 sprite read as 16 big-endian words
    // from memory[I..I+32), drawn one-to-one onto the physical grid.
    fn draw_sprite16(&mut self, x: usize, y: usize) {
        self.v[0xF] = 0;

        let xo = self.v[x] as usize % SCREEN_WIDTH;
        let yo = self.v[y] as usize % SCREEN_HEIGHT;

        for row in 0..16 {
            if yo + row >= SCREEN_HEIGHT {
                break;
            }
            let bits = u16::from_be_bytes([
                self.memory[(self.i as usize + 2 * row) & (MEMORY_SIZE - 1)],
                self.memory[(self.i as usize + 2 * row + 1) & (MEMORY_SIZE - 1)],
            ]);

            for col in 0..16 {
                if xo + col >= SCREEN_WIDTH {
                    break;
                }
                self.blit(yo + row, xo + col, bits & (0x8000 >> col) != 0);
            }
        }
    }

    // Scroll instructions always move the 128x64 physical grid; in
    // low-res mode one logical row/pixel is two physical ones, so the
    // shift distances double.

    fn scroll_down(&mut self, n: u8) {
        let shift = if self.hi_res { n as usize } else { 2 * n as usize };
        for row in (shift..SCREEN_HEIGHT).rev() {
            let src = (row - shift) * ROW_BYTES;
            self.screen.copy_within(src..src + ROW_BYTES, row * ROW_BYTES);
        }
        self.screen[..shift * ROW_BYTES].fill(0);
    }

    fn scroll_right(&mut self) {
        let hi_res = self.hi_res;
        for row in self.screen.chunks_exact_mut(ROW_BYTES) {
            if hi_res {
                for i in (1..ROW_BYTES).rev() {
                    row[i] = row[i] >> 4 | row[i - 1] << 4;
                }
                row[0] >>= 4;
            } else {
                for i in (1..ROW_BYTES).rev() {
                    row[i] = row[i - 1];
                }
                row[0] = 0;
            }
        }
    }

    fn scroll_left(&mut self) {
        let hi_res = self.hi_res;
        for row in self.screen.chunks_exact_mut(ROW_BYTES) {
            if hi_res {
                for i in 0..ROW_BYTES - 1 {
                    row[i] = row[i] << 4 | row[i + 1] >> 4;
                }
                row[ROW_BYTES - 1] <<= 4;
            } else {
                for i in 0..ROW_BYTES - 1 {
                    row[i] = row[i + 1];
                }
                row[ROW_BYTES - 1] = 0;
            }
        }
    }
}
