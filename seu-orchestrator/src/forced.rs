//! Forced-injection scripting (spec §9: parse `"set ADDR = VAL"` once at
//! startup into a typed `ForcedInjection`, instead of re-parsing per
//! iteration as the original read it).

use seu_core::target::InjectionTarget;

#[derive(Debug, Clone, PartialEq)]
pub struct ForcedInjection {
    pub iteration: Option<u64>,
    pub target: ForcedTarget,
    pub value: u32,
    /// Number of consecutive iterations, starting at `iteration`, this
    /// injection stays forced for (spec §9 `-c/--breakCount`). Ignored for
    /// `iteration: None` (the "always" form already applies to every pass).
    pub break_count: u32,
    /// Fixed sleep time to use instead of `0.0` while this injection is
    /// forced (spec §9 `-z/--breakSleep`).
    pub break_sleep: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForcedTarget {
    Register(String),
    MemoryWord(u32),
}

impl ForcedTarget {
    pub fn into_injection_target(self) -> InjectionTarget {
        match self {
            ForcedTarget::Register(name) => InjectionTarget::Register(name),
            ForcedTarget::MemoryWord(addr) => InjectionTarget::MemoryWord(addr),
        }
    }
}

/// Parses `"set <addr-or-reg> = <val>"`, or `"always: set ..."` for a
/// forced injection that applies to every iteration.
pub fn parse_forced(raw: &str) -> Result<ForcedInjection, String> {
    let raw = raw.trim();
    let (iteration, rest) = if let Some(stripped) = raw.strip_prefix("always:") {
        (None, stripped.trim())
    } else if let Some(colon_idx) = raw.find(':') {
        let (prefix, rest) = raw.split_at(colon_idx);
        let n: u64 = prefix
            .trim()
            .parse()
            .map_err(|_| format!("invalid iteration number: {}", prefix))?;
        (Some(n), rest[1..].trim())
    } else {
        (None, raw)
    };

    let rest = rest
        .strip_prefix("set ")
        .ok_or_else(|| format!("expected `set <target> = <val>`, got: {}", rest))?;
    let mut parts = rest.splitn(2, '=');
    let target_str = parts
        .next()
        .ok_or_else(|| "missing target".to_string())?
        .trim();
    let value_str = parts
        .next()
        .ok_or_else(|| "missing value".to_string())?
        .trim();

    let value = parse_numeric(value_str)?;
    let target = if let Some(addr_str) = target_str.strip_prefix("0x") {
        ForcedTarget::MemoryWord(
            u32::from_str_radix(addr_str, 16).map_err(|_| format!("bad address: {}", target_str))?,
        )
    } else if target_str.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        ForcedTarget::MemoryWord(
            target_str
                .parse()
                .map_err(|_| format!("bad address: {}", target_str))?,
        )
    } else {
        ForcedTarget::Register(target_str.to_string())
    };

    Ok(ForcedInjection {
        iteration,
        target,
        value,
        break_count: 1,
        break_sleep: None,
    })
}

fn parse_numeric(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x") {
        u32::from_str_radix(hex, 16).map_err(|_| format!("bad value: {}", s))
    } else {
        s.parse().map_err(|_| format!("bad value: {}", s))
    }
}
