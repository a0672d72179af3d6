extern crate sdl2;

use std::fs;
use std::time::{Duration, Instant};

use sdl2::event::Event;
use sdl2::keyboard::{Keycode, Scancode};
use sdl2::pixels::Color;
use sdl2::rect::Rect;

use clap::{Parser, ValueEnum};

pub mod buzzer;
pub mod chip8;

use buzzer::Buzzer;
use chip8::{Chip8, Platform, KEY_COUNT, MAX_ROM_SIZE, SCREEN_HEIGHT, SCREEN_WIDTH, TIMER_HZ};

// Historical 4x4 keypad mapped onto the left side of a QWERTY layout
const SCANCODE_MAPPING: [Scancode; KEY_COUNT] = [
    Scancode::X,
    Scancode::Num1, Scancode::Num2, Scancode::Num3,
    Scancode::Q, Scancode::W, Scancode::E,
    Scancode::A, Scancode::S, Scancode::D,
    Scancode::Z, Scancode::C,
    Scancode::Num4, Scancode::R, Scancode::F, Scancode::V,
];

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PlatformArg {
    /// "Modern" CHIP-8 behavior
    Chip8,
    /// CHIP-48/S-CHIP 1.0 behavior
    Schip10,
    /// S-CHIP 1.1 behavior
    Schip11,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Chip8 => Platform::Chip8,
            PlatformArg::Schip10 => Platform::Schip1_0,
            PlatformArg::Schip11 => Platform::Schip1_1,
        }
    }
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg()]
    file: String,

    #[arg(short, long, default_value_t = 540, help = "Emulated speed in instructions per second")]
    freq: u32,

    #[arg(short, long, default_value_t = 8, help = "Window scale factor (the display is 128x64)")]
    scale: u32,

    #[arg(short, long, value_enum, default_value_t = PlatformArg::Schip11,
          help = "Which historical interpreter resolves the ambiguous instructions")]
    platform: PlatformArg,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let rom = match fs::read(&args.file) {
        Ok(bytes) => bytes,
        Err(err) => {
            log::error!("could not open {}: {}", args.file, err);
            std::process::exit(1);
        }
    };
    if rom.len() > MAX_ROM_SIZE {
        log::error!(
            "{} is {} bytes, the maximum rom size is {}",
            args.file, rom.len(), MAX_ROM_SIZE
        );
        std::process::exit(1);
    }

    let mut vm = Chip8::new(args.freq, args.platform.into(), rand::random::<u64>());
    vm.load_rom(&rom);
    log::info!(
        "running {} at {} ips ({} instructions per frame), platform {:?}",
        args.file, args.freq, vm.instructions_per_frame(), args.platform
    );

    // Init SDL2, get a window and a buzzer
    let sdl_context = sdl2::init().unwrap();
    let video_subsystem = sdl_context.video().unwrap();

    let window = video_subsystem
        .window(
            "schip8",
            SCREEN_WIDTH as u32 * args.scale,
            SCREEN_HEIGHT as u32 * args.scale,
        )
        .position_centered()
        .build()
        .unwrap();

    let mut canvas = window.into_canvas().accelerated().build().unwrap();
    canvas.set_draw_color(Color::RGB(0, 0, 0));
    canvas.clear();
    canvas.present();

    let mut event_pump = sdl_context.event_pump().unwrap();
    let buzzer = Buzzer::new(&sdl_context);

    // Both the instruction cadence (IPF instructions per cycle call)
    // and the timer cadence run off this 60 Hz frame loop
    let frame_interval = Duration::from_nanos(1_000_000_000 / TIMER_HZ as u64);

    'running: loop {
        let frame_start = Instant::now();

        for event in event_pump.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown { keycode: Some(Keycode::Escape), .. } => break 'running,
                _ => {}
            }
        }

        let keyboard_state = event_pump.keyboard_state();
        for (key, scancode) in SCANCODE_MAPPING.iter().enumerate() {
            if keyboard_state.is_scancode_pressed(*scancode) {
                vm.press_key(key);
            } else {
                vm.release_key(key);
            }
        }

        if let Err(fault) = vm.cycle() {
            log::error!("{}", fault);
            break;
        }
        vm.tick_timers();

        if vm.ended() {
            log::info!("program exited");
            break;
        }

        if vm.sound_active() && !buzzer.is_on() {
            buzzer.start();
        } else if !vm.sound_active() && buzzer.is_on() {
            buzzer.stop();
        }

        if vm.screen_updated() {
            canvas.set_draw_color(Color::RGB(0, 0, 0));
            canvas.clear();
            canvas.set_draw_color(Color::WHITE);
            for row in 0..SCREEN_HEIGHT {
                for col in 0..SCREEN_WIDTH {
                    if vm.pixel(row, col) {
                        let _ = canvas.fill_rect(Rect::new(
                            col as i32 * args.scale as i32,
                            row as i32 * args.scale as i32,
                            args.scale,
                            args.scale,
                        ));
                    }
                }
            }
            canvas.present();
        }

        std::thread::sleep(frame_interval.saturating_sub(frame_start.elapsed()));
    }
}
