use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use quick_xml::Reader;
use quick_xml::events::Event;
use sha1::{Digest, Sha1};
use shadowmask::nes::Nes;

#[derive(Debug, Clone)]
struct SuiteTest {
    filename: String,
    system: String,
    runframes: u32,
    tvsha1: String,
    recordedinput: String,
}

#[derive(Debug, Clone)]
struct Config {
    suite: PathBuf,
    rom_root: PathBuf,
    max_tests: usize,
    include_recorded_input: bool,
    include_pal: bool,
    contains: Vec<String>,
    extra_frames: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            suite: PathBuf::from("external/nes-test-roms/test_roms.xml"),
            rom_root: PathBuf::from("external/nes-test-roms"),
            max_tests: 80,
            include_recorded_input: false,
            include_pal: false,
            contains: Vec::new(),
            extra_frames: 0,
        }
    }
}

fn parse_args() -> Result<Config> {
    let mut cfg = Config::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--suite" => {
                let value = args.next().context(
                    "--suite requires a path, e.g. --suite external/nes-test-roms/test_roms.xml",
                )?;
                cfg.suite = PathBuf::from(value);
            }
            "--rom-root" => {
                let value = args
                    .next()
                    .context("--rom-root requires a path, e.g. --rom-root external/nes-test-roms")?;
                cfg.rom_root = PathBuf::from(value);
            }
            "--max-tests" => {
                let value = args
                    .next()
                    .context("--max-tests requires an integer, e.g. --max-tests 120")?;
                cfg.max_tests = value
                    .parse::<usize>()
                    .with_context(|| format!("invalid --max-tests value: {value}"))?;
            }
            "--include-recorded-input" => cfg.include_recorded_input = true,
            "--include-pal" => cfg.include_pal = true,
            "--contains" => {
                let value = args
                    .next()
                    .context("--contains requires a substring, e.g. --contains vbl_nmi_timing")?;
                cfg.contains.push(value.to_lowercase());
            }
            "--extra-frames" => {
                let value = args
                    .next()
                    .context("--extra-frames requires an integer, e.g. --extra-frames 120")?;
                cfg.extra_frames = value
                    .parse::<u32>()
                    .with_context(|| format!("invalid --extra-frames value: {value}"))?;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                anyhow::bail!("unknown argument: {other}\nUse --help to view supported options.");
            }
        }
    }

    Ok(cfg)
}

fn print_help() {
    println!(
        "ROM suite runner\n\n\
Usage:\n\
  cargo run --bin rom_test_runner -- [options]\n\n\
Options:\n\
  --suite <path>                 Path to test_roms.xml\n\
  --rom-root <path>              Root path containing ROM files\n\
  --max-tests <n>                Maximum number of tests to run (default 80)\n\
  --include-recorded-input       Include tests that require replay input\n\
  --include-pal                  Include PAL tests\n\
  --contains <substr>            Only run tests whose filename contains this text (repeatable)\n\
  --extra-frames <n>             Add n frames after XML runframes (default 0)\n\
  -h, --help                     Show this help\n"
    );
}

fn parse_suite_xml(path: &Path) -> Result<Vec<SuiteTest>> {
    let xml = fs::read_to_string(path)
        .with_context(|| format!("failed to read suite XML: {}", path.display()))?;

    let mut reader = Reader::from_str(&xml);
    reader.config_mut().trim_text(true);

    let mut tests = Vec::new();
    let mut current: Option<SuiteTest> = None;
    let mut reading_tvsha1 = false;
    let mut reading_recorded = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                if name.as_ref() == b"test" {
                    let mut filename = String::new();
                    let mut system = String::new();
                    let mut runframes = 0u32;

                    for attr in e.attributes().flatten() {
                        let key = attr.key.as_ref();
                        let value = attr
                            .decode_and_unescape_value(reader.decoder())
                            .map(|v| v.to_string())
                            .unwrap_or_default();
                        match key {
                            b"filename" => filename = value,
                            b"system" => system = value,
                            b"runframes" => runframes = value.parse::<u32>().unwrap_or(0),
                            _ => {}
                        }
                    }

                    current = Some(SuiteTest {
                        filename,
                        system,
                        runframes,
                        tvsha1: String::new(),
                        recordedinput: String::new(),
                    });
                } else if name.as_ref() == b"tvsha1" {
                    reading_tvsha1 = true;
                } else if name.as_ref() == b"recordedinput" {
                    reading_recorded = true;
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map(|v| v.to_string()).unwrap_or_default();
                if let Some(test) = current.as_mut() {
                    if reading_tvsha1 {
                        test.tvsha1.push_str(&text);
                    } else if reading_recorded {
                        test.recordedinput.push_str(&text);
                    }
                }
            }
            Ok(Event::CData(e)) => {
                let text = e.decode().map(|v| v.to_string()).unwrap_or_default();
                if let Some(test) = current.as_mut() {
                    if reading_tvsha1 {
                        test.tvsha1.push_str(&text);
                    } else if reading_recorded {
                        test.recordedinput.push_str(&text);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                if name.as_ref() == b"tvsha1" {
                    reading_tvsha1 = false;
                } else if name.as_ref() == b"recordedinput" {
                    reading_recorded = false;
                } else if name.as_ref() == b"test" {
                    if let Some(mut test) = current.take() {
                        test.tvsha1 = test.tvsha1.trim().to_string();
                        test.recordedinput = test.recordedinput.trim().to_string();
                        tests.push(test);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                anyhow::bail!("failed to parse suite XML: {err}");
            }
            _ => {}
        }
    }

    Ok(tests)
}

fn should_run(test: &SuiteTest, cfg: &Config) -> bool {
    if !cfg.include_pal && test.system.eq_ignore_ascii_case("pal") {
        return false;
    }

    if !cfg.include_recorded_input && !test.recordedinput.is_empty() {
        return false;
    }

    if !cfg.contains.is_empty() {
        let lower = test.filename.to_lowercase();
        if !cfg.contains.iter().any(|f| lower.contains(f)) {
            return false;
        }
    }

    true
}

fn frame_rgb_bytes(frame: &[u32]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(frame.len() * 3);
    for px in frame {
        rgb.push((px >> 16) as u8);
        rgb.push((px >> 8) as u8);
        rgb.push(*px as u8);
    }
    rgb
}

fn hash_frame_rgb(frame: &[u32]) -> String {
    let digest = Sha1::digest(frame_rgb_bytes(frame));
    BASE64_STANDARD.encode(digest)
}

fn hash_frame_argb(frame: &[u32]) -> String {
    let mut argb = Vec::with_capacity(frame.len() * 4);
    for px in frame {
        argb.extend_from_slice(&px.to_be_bytes());
    }
    let digest = Sha1::digest(&argb);
    BASE64_STANDARD.encode(digest)
}

struct RunOutcome {
    rgb: String,
    argb: String,
    frames: u32,
    halted: bool,
}

fn run_test(test: &SuiteTest, cfg: &Config) -> Result<RunOutcome> {
    let rom_path = cfg.rom_root.join(&test.filename);
    let mut nes = Nes::new();
    nes.load_rom_from_path(&rom_path)
        .with_context(|| format!("failed to load {}", rom_path.display()))?;

    let input: Vec<u8> = if test.recordedinput.is_empty() {
        Vec::new()
    } else {
        BASE64_STANDARD
            .decode(test.recordedinput.as_bytes())
            .context("failed to decode recorded input")?
    };

    let frames = test.runframes.max(1) + cfg.extra_frames;
    for frame in 0..frames {
        let buttons = input.get(frame as usize).copied().unwrap_or(0);
        nes.set_controller_state(0, buttons);
        nes.run_frame();
        let _ = nes.take_audio_samples();
    }

    let frame = nes.frame_buffer();
    Ok(RunOutcome {
        rgb: hash_frame_rgb(frame),
        argb: hash_frame_argb(frame),
        frames,
        halted: nes.is_halted(),
    })
}

fn main() -> Result<()> {
    let cfg = parse_args()?;
    let start = Instant::now();

    let tests = parse_suite_xml(&cfg.suite)?;
    let selected: Vec<&SuiteTest> = tests
        .iter()
        .filter(|t| should_run(t, &cfg))
        .take(cfg.max_tests)
        .collect();

    println!(
        "selected {} of {} tests from {}",
        selected.len(),
        tests.len(),
        cfg.suite.display()
    );

    let mut passed = 0usize;
    let mut failed = 0usize;
    let mut errored = 0usize;

    for test in &selected {
        match run_test(test, &cfg) {
            Ok(outcome) => {
                let matches = !test.tvsha1.is_empty()
                    && (outcome.rgb == test.tvsha1 || outcome.argb == test.tvsha1);
                if matches {
                    passed += 1;
                    println!("PASS {} ({} frames)", test.filename, outcome.frames);
                } else {
                    failed += 1;
                    println!(
                        "FAIL {} ({} frames{}) rgb={} argb={} expected={}",
                        test.filename,
                        outcome.frames,
                        if outcome.halted { ", halted" } else { "" },
                        outcome.rgb,
                        outcome.argb,
                        test.tvsha1
                    );
                }
            }
            Err(err) => {
                errored += 1;
                println!("ERROR {}: {err}", test.filename);
            }
        }
    }

    println!();
    println!("Suite Summary");
    println!("- passed: {passed}");
    println!("- failed: {failed}");
    println!("- errored: {errored}");
    println!("- elapsed: {:.2}s", start.elapsed().as_secs_f32());

    Ok(())
}
