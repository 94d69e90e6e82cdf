//! Code 128 symbols for SKUs.
//!
//! Each symbol is six alternating bar/space widths (in modules) summing to 11;
//! the stop symbol has seven widths summing to 13.

use anyhow::{Result, anyhow};

const PATTERNS: [[u8; 6]; 106] = [
    [2, 1, 2, 2, 2, 2], [2, 2, 2, 1, 2, 2], [2, 2, 2, 2, 2, 1], [1, 2, 1, 2, 2, 3],
    [1, 2, 1, 3, 2, 2], [1, 3, 1, 2, 2, 2], [1, 2, 2, 2, 1, 3], [1, 2, 2, 3, 1, 2],
    [1, 3, 2, 2, 1, 2], [2, 2, 1, 2, 1, 3], [2, 2, 1, 3, 1, 2], [2, 3, 1, 2, 1, 2],
    [1, 1, 2, 2, 3, 2], [1, 2, 2, 1, 3, 2], [1, 2, 2, 2, 3, 1], [1, 1, 3, 2, 2, 2],
    [1, 2, 3, 1, 2, 2], [1, 2, 3, 2, 2, 1], [2, 2, 3, 2, 1, 1], [2, 2, 1, 1, 3, 2],
    [2, 2, 1, 2, 3, 1], [2, 1, 3, 2, 1, 2], [2, 2, 3, 1, 1, 2], [3, 1, 2, 1, 3, 1],
    [3, 1, 1, 2, 2, 2], [3, 2, 1, 1, 2, 2], [3, 2, 1, 2, 2, 1], [3, 1, 2, 2, 1, 2],
    [3, 2, 2, 1, 1, 2], [3, 2, 2, 2, 1, 1], [2, 1, 2, 1, 2, 3], [2, 1, 2, 3, 2, 1],
    [2, 3, 2, 1, 2, 1], [1, 1, 1, 3, 2, 3], [1, 3, 1, 1, 2, 3], [1, 3, 1, 3, 2, 1],
    [1, 1, 2, 3, 1, 3], [1, 3, 2, 1, 1, 3], [1, 3, 2, 3, 1, 1], [2, 1, 1, 3, 1, 3],
    [2, 3, 1, 1, 1, 3], [2, 3, 1, 3, 1, 1], [1, 1, 2, 1, 3, 3], [1, 1, 2, 3, 3, 1],
    [1, 3, 2, 1, 3, 1], [1, 1, 3, 1, 2, 3], [1, 1, 3, 3, 2, 1], [1, 3, 3, 1, 2, 1],
    [3, 1, 3, 1, 2, 1], [2, 1, 1, 3, 3, 1], [2, 3, 1, 1, 3, 1], [2, 1, 3, 1, 1, 3],
    [2, 1, 3, 3, 1, 1], [2, 1, 3, 1, 3, 1], [3, 1, 1, 1, 2, 3], [3, 1, 1, 3, 2, 1],
    [3, 3, 1, 1, 2, 1], [3, 1, 2, 1, 1, 3], [3, 1, 2, 3, 1, 1], [3, 3, 2, 1, 1, 1],
    [3, 1, 4, 1, 1, 1], [2, 2, 1, 4, 1, 1], [4, 3, 1, 1, 1, 1], [1, 1, 1, 2, 2, 4],
    [1, 1, 1, 4, 2, 2], [1, 2, 1, 1, 2, 4], [1, 2, 1, 4, 2, 1], [1, 4, 1, 1, 2, 2],
    [1, 4, 1, 2, 2, 1], [1, 1, 2, 2, 1, 4], [1, 1, 2, 4, 1, 2], [1, 2, 2, 1, 1, 4],
    [1, 2, 2, 4, 1, 1], [1, 4, 2, 1, 1, 2], [1, 4, 2, 2, 1, 1], [2, 4, 1, 2, 1, 1],
    [2, 2, 1, 1, 1, 4], [4, 1, 3, 1, 1, 1], [2, 4, 1, 1, 1, 2], [1, 3, 4, 1, 1, 1],
    [1, 1, 1, 2, 4, 2], [1, 2, 1, 1, 4, 2], [1, 2, 1, 2, 4, 1], [1, 1, 4, 2, 1, 2],
    [1, 2, 4, 1, 1, 2], [1, 2, 4, 2, 1, 1], [4, 1, 1, 2, 1, 2], [4, 2, 1, 1, 1, 2],
    [4, 2, 1, 2, 1, 1], [2, 1, 2, 1, 4, 1], [2, 1, 4, 1, 2, 1], [4, 1, 2, 1, 2, 1],
    [1, 1, 1, 1, 4, 3], [1, 1, 1, 3, 4, 1], [1, 3, 1, 1, 4, 1], [1, 1, 4, 1, 1, 3],
    [1, 1, 4, 3, 1, 1], [4, 1, 1, 1, 1, 3], [4, 1, 1, 3, 1, 1], [1, 1, 3, 1, 4, 1],
    [1, 1, 4, 1, 3, 1], [3, 1, 1, 1, 4, 1], [4, 1, 1, 1, 3, 1], [2, 1, 1, 4, 1, 2],
    [2, 1, 1, 2, 1, 4], [2, 1, 1, 2, 3, 2],
];
const STOP: [u8; 7] = [2, 3, 3, 1, 1, 1, 2];

const START_A: u8 = 103;
const START_B: u8 = 104;
const START_C: u8 = 105;
const CODE_C: u8 = 99;
const CODE_B: u8 = 100;
const CODE_A: u8 = 101;

/// Blank modules required on each side of the symbol.
pub const QUIET_ZONE_MODULES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeSet {
    A,
    B,
    C,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Barcode {
    pub payload: String,
    /// Symbol values including start and checksum, excluding stop.
    pub codes: Vec<u8>,
    /// `true` for a dark module, left to right, without quiet zones.
    pub modules: Vec<bool>,
}

impl Barcode {
    pub fn width_with_quiet_zone(&self) -> usize {
        self.modules.len() + QUIET_ZONE_MODULES * 2
    }

    /// Dark runs as `(start_module, length)`.
    pub fn bars(&self) -> Vec<(usize, usize)> {
        let mut bars = Vec::new();
        let mut start = None;
        for (index, dark) in self.modules.iter().enumerate() {
            match (dark, start) {
                (true, None) => start = Some(index),
                (false, Some(begin)) => {
                    bars.push((begin, index - begin));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(begin) = start {
            bars.push((begin, self.modules.len() - begin));
        }
        bars
    }
}

pub fn encode(payload: &str) -> Result<Barcode> {
    if payload.is_empty() {
        return Err(anyhow!("sku is empty"));
    }
    let mut codes = Vec::with_capacity(payload.len() + 2);
    let use_c = payload.len() >= 4
        && payload.len() % 2 == 0
        && payload.bytes().all(|byte| byte.is_ascii_digit());
    if use_c {
        codes.push(START_C);
        for pair in payload.as_bytes().chunks(2) {
            codes.push((pair[0] - b'0') * 10 + (pair[1] - b'0'));
        }
    } else {
        codes.push(START_B);
        for ch in payload.chars() {
            if !(' '..='~').contains(&ch) {
                return Err(anyhow!(
                    "sku contains '{}' which Code 128 cannot encode (printable ASCII only)",
                    ch.escape_default()
                ));
            }
            codes.push(ch as u8 - 32);
        }
    }
    codes.push(checksum(&codes));

    let mut modules = Vec::with_capacity(codes.len() * 11 + 13);
    for code in &codes {
        push_widths(&mut modules, &PATTERNS[*code as usize]);
    }
    push_widths(&mut modules, &STOP);

    Ok(Barcode {
        payload: payload.to_string(),
        codes,
        modules,
    })
}

fn checksum(codes: &[u8]) -> u8 {
    let sum = codes
        .iter()
        .enumerate()
        .map(|(index, code)| index.max(1) * *code as usize)
        .sum::<usize>();
    (sum % 103) as u8
}

fn push_widths(modules: &mut Vec<bool>, widths: &[u8]) {
    for (index, width) in widths.iter().enumerate() {
        let dark = index % 2 == 0;
        modules.extend(std::iter::repeat_n(dark, *width as usize));
    }
}

/// Reads one scanline (`true` = dark pixel) the way a hand scanner would:
/// the module width is taken from the start symbol, every run is rounded to
/// whole modules, the checksum is verified and code set switches are honoured.
pub fn decode_row(row: &[bool]) -> Result<String> {
    let first = row
        .iter()
        .position(|dark| *dark)
        .ok_or_else(|| anyhow!("no bars found in scanline"))?;
    let last = row.iter().rposition(|dark| *dark).unwrap_or(first);

    let mut runs: Vec<usize> = Vec::new();
    let mut current = row[first];
    let mut length = 0usize;
    for dark in &row[first..=last] {
        if *dark == current {
            length += 1;
        } else {
            runs.push(length);
            current = *dark;
            length = 1;
        }
    }
    runs.push(length);

    if runs.len() < 6 * 3 + 7 || (runs.len() - 7) % 6 != 0 {
        return Err(anyhow!("scanline has {} runs; not a Code 128 symbol", runs.len()));
    }
    let module = runs[..6].iter().sum::<usize>() as f32 / 11.0;
    let widths = runs
        .iter()
        .map(|run| ((*run as f32 / module).round() as u8).clamp(1, 4))
        .collect::<Vec<_>>();

    let (body, stop) = widths.split_at(widths.len() - 7);
    if stop != STOP {
        return Err(anyhow!("stop pattern not found"));
    }
    let mut codes = Vec::with_capacity(body.len() / 6);
    for symbol in body.chunks(6) {
        let value = PATTERNS
            .iter()
            .position(|pattern| pattern == symbol)
            .ok_or_else(|| anyhow!("unknown symbol {:?}", symbol))?;
        codes.push(value as u8);
    }

    let (expected, data) = codes
        .split_last()
        .ok_or_else(|| anyhow!("empty symbol"))?;
    if checksum(data) != *expected {
        return Err(anyhow!("checksum mismatch"));
    }

    let mut set = match data[0] {
        START_A => CodeSet::A,
        START_B => CodeSet::B,
        START_C => CodeSet::C,
        other => return Err(anyhow!("missing start symbol (found {})", other)),
    };
    let mut text = String::new();
    for code in &data[1..] {
        match (set, *code) {
            (CodeSet::A | CodeSet::B, CODE_C) => set = CodeSet::C,
            (CodeSet::A | CodeSet::C, CODE_B) => set = CodeSet::B,
            (CodeSet::B | CodeSet::C, CODE_A) => set = CodeSet::A,
            (CodeSet::C, value) if value < 100 => text.push_str(&format!("{:02}", value)),
            (CodeSet::B, value) if value < 96 => text.push((value + 32) as char),
            (CodeSet::A, value) if value < 64 => text.push((value + 32) as char),
            (CodeSet::A, value) if value < 96 => text.push((value - 64) as char),
            (_, value) => return Err(anyhow!("unsupported function code {}", value)),
        }
    }
    Ok(text)
}
