//! Next-version policy driven by conventional commit messages.

use std::cmp::Ordering;

use anyhow::{Context, Result, bail};
use semver::{Prerelease, Version};

use crate::types::{BumpType, CandidateVersion, UpgradePath};

/// Classify a single commit message.
///
/// `BREAKING CHANGE` anywhere or a `!` before the header colon forces MAJOR;
/// a `feat` type forces MINOR; everything else is PATCH.
pub fn classify_commit(message: &str) -> BumpType {
    if message.contains("BREAKING CHANGE") || message.contains("BREAKING-CHANGE") {
        return BumpType::Major;
    }

    let subject = message.lines().next().unwrap_or("").trim();
    let Some((header, _)) = subject.split_once(':') else {
        return BumpType::Patch;
    };
    if header.contains(char::is_whitespace) {
        return BumpType::Patch;
    }
    if header.ends_with('!') {
        return BumpType::Major;
    }

    let kind = header.split('(').next().unwrap_or(header);
    if kind.eq_ignore_ascii_case("feat") || kind.eq_ignore_ascii_case("feature") {
        BumpType::Minor
    } else {
        BumpType::Patch
    }
}

/// Highest bump required by any message. An empty history is a PATCH.
pub fn determine_bump(messages: &[String]) -> BumpType {
    messages
        .iter()
        .map(|m| classify_commit(m))
        .max()
        .unwrap_or(BumpType::Patch)
}

pub fn apply_bump(current: &Version, bump: BumpType) -> Result<Version> {
    let next = match bump {
        BumpType::Major => current.major.checked_add(1).map(|major| Version::new(major, 0, 0)),
        BumpType::Minor => current
            .minor
            .checked_add(1)
            .map(|minor| Version::new(current.major, minor, 0)),
        BumpType::Patch => current
            .patch
            .checked_add(1)
            .map(|patch| Version::new(current.major, current.minor, patch)),
    };
    next.with_context(|| format!("cannot apply a {bump} bump to {current}: version component overflows"))
}

/// Compute the candidate for the next release.
///
/// `prerelease` is appended verbatim (a leading `-` is tolerated) and marks
/// the candidate as a prerelease, which exempts it from the strictly-greater
/// check.
pub fn determine_candidate(
    current_version: &str,
    commit_messages: &[String],
    prerelease: Option<&str>,
) -> Result<CandidateVersion> {
    let current = parse_lenient(current_version)
        .with_context(|| format!("invalid current version '{current_version}'"))?;
    let bump_type = determine_bump(commit_messages);
    let mut next = apply_bump(&current, bump_type)?;

    let suffix = prerelease
        .map(|s| s.trim().trim_start_matches('-').to_string())
        .filter(|s| !s.is_empty());

    if let Some(ref s) = suffix {
        next.pre = Prerelease::new(s).with_context(|| format!("invalid prerelease suffix '{s}'"))?;
    } else if next <= current {
        bail!("next version {next} is not greater than current version {current}");
    }

    Ok(CandidateVersion {
        current_version: current_version.to_string(),
        bump_type,
        next_version: next.to_string(),
        commit_messages: commit_messages.to_vec(),
        is_prerelease: suffix.is_some(),
        prerelease_suffix: suffix,
    })
}

/// Parse a version, accepting a leading `v`, missing minor/patch parts and
/// the PEP 440 spellings Python package managers report (`2.0.0rc1`,
/// `1.0.0.dev3`, `1.0.post2`).
pub fn parse_lenient(input: &str) -> Result<Version> {
    let trimmed = input.trim().trim_start_matches(['v', 'V']);
    if let Ok(v) = Version::parse(trimmed) {
        return Ok(v);
    }
    match parse_padded(trimmed).or_else(|| parse_pep440(trimmed)) {
        Some(v) => Ok(v),
        None => bail!("not a semantic version: {input}"),
    }
}

fn parse_padded(trimmed: &str) -> Option<Version> {
    let (core, rest) = match trimmed.find(['-', '+']) {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, ""),
    };
    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(rest);
    Version::parse(&padded).ok()
}

/// PEP 440 mapped onto semver: `aN`, `bN` and `rcN` become `alpha.N`,
/// `beta.N` and `rc.N`; `devN` is appended to the prerelease as `dev.N`;
/// post releases and local labels become build metadata.
fn parse_pep440(input: &str) -> Option<Version> {
    let lower = input.to_ascii_lowercase();
    let (public, local) = match lower.split_once('+') {
        Some((public, local)) => (public, Some(local)),
        None => (lower.as_str(), None),
    };

    let release_end = public
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(public.len());
    let release: Vec<&str> = public[..release_end].trim_end_matches('.').split('.').collect();
    if release.len() > 3 || release.iter().any(|p| p.is_empty()) {
        return None;
    }
    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&release) {
        *slot = part.parse().ok()?;
    }

    let mut pre: Vec<String> = Vec::new();
    let mut dev: Option<u64> = None;
    let mut build: Vec<String> = Vec::new();
    let mut rest = &public[release_end..];
    while !rest.is_empty() {
        rest = rest.trim_start_matches(['.', '-', '_']);
        let label_end = rest.find(|c: char| !c.is_ascii_alphabetic()).unwrap_or(rest.len());
        let (label, tail) = rest.split_at(label_end);
        let tail = tail.strip_prefix(['.', '-', '_']).unwrap_or(tail);
        let digits_end = tail.find(|c: char| !c.is_ascii_digit()).unwrap_or(tail.len());
        let (digits, tail) = tail.split_at(digits_end);
        if label.is_empty() && digits.is_empty() {
            return None;
        }
        let number: u64 = if digits.is_empty() { 0 } else { digits.parse().ok()? };

        match label {
            "a" | "alpha" | "b" | "beta" | "c" | "rc" | "pre" | "preview"
                if pre.is_empty() && dev.is_none() && build.is_empty() =>
            {
                let name = match label {
                    "a" | "alpha" => "alpha",
                    "b" | "beta" => "beta",
                    _ => "rc",
                };
                pre.push(name.to_string());
                pre.push(number.to_string());
            }
            "" | "post" | "rev" | "r" if dev.is_none() && build.is_empty() => {
                build.push("post".to_string());
                build.push(number.to_string());
            }
            "dev" if dev.is_none() => dev = Some(number),
            _ => return None,
        }
        rest = tail;
    }

    if let Some(n) = dev {
        pre.push("dev".to_string());
        pre.push(n.to_string());
    }
    if let Some(local) = local {
        build.extend(
            local
                .split(|c: char| !c.is_ascii_alphanumeric())
                .filter(|piece| !piece.is_empty())
                .map(str::to_string),
        );
    }

    let mut text = format!("{}.{}.{}", numbers[0], numbers[1], numbers[2]);
    if !pre.is_empty() {
        text.push('-');
        text.push_str(&pre.join("."));
    }
    if !build.is_empty() {
        text.push('+');
        text.push_str(&build.join("."));
    }
    Version::parse(&text).ok()
}

/// Order two version strings. Unparseable inputs fall back to equality of
/// the raw strings, with any difference treated as newer.
pub fn compare_versions(installed: &str, target: &str) -> Ordering {
    match (parse_lenient(installed), parse_lenient(target)) {
        (Ok(a), Ok(b)) => b.cmp(&a),
        _ if installed.trim() == target.trim() => Ordering::Equal,
        _ => Ordering::Greater,
    }
}

/// Classify an install relative to what is currently installed.
pub fn detect_upgrade_path(installed: Option<&str>, target: &str) -> UpgradePath {
    match installed {
        None => UpgradePath::FreshInstall,
        Some(installed) => match compare_versions(installed, target) {
            Ordering::Greater => UpgradePath::Upgrade,
            Ordering::Equal => UpgradePath::Reinstall,
            Ordering::Less => UpgradePath::Downgrade,
        },
    }
}

/// Only a fresh install goes ahead without a backup.
pub fn should_create_backup(path: UpgradePath) -> bool {
    path != UpgradePath::FreshInstall
}
