//! AS extractor / router inspector (C3): parses Juniper BGP configuration text into AS
//! numbers and BGP-group membership.
//!
//! Pattern-based extraction over BGP configuration text; the parsing itself is simple enough
//! to implement directly against the known pattern list.

use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use crate::types::{AsNumber, AsNumberError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    PeerAs,
    AsToken,
    AutonomousSystem,
}

#[derive(Error, Debug)]
pub enum InspectorError {
    #[error("invalid AS number: {0}")]
    InvalidAsNumber(#[from] AsNumberError),
}

#[derive(Debug, Default, Clone)]
pub struct ExtractionResult {
    pub as_numbers: IndexSet<AsNumber>,
    pub bgp_groups: IndexMap<String, Vec<AsNumber>>,
    pub warnings: Vec<String>,
}

/// Reserved/out-of-context AS values strict mode additionally filters.
const RESERVED_STRICT: &[u32] = &[0, 23456, 4_294_967_295];

fn peer_as_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"peer-as\s+(\d+)\s*;").unwrap())
}

fn as_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bAS(\d+)\b").unwrap())
}

fn autonomous_system_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"autonomous-system\s+(\d+)\s*;").unwrap())
}

fn group_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"group\s+(\S+)\s*\{").unwrap())
}

/// Given the index just after an opening `{`, walks forward tracking brace depth and returns
/// the index of the matching closing `}` (`None` if the braces never balance). A regex can't
/// express balanced nesting, and a `group` block nests at least one level of `neighbor { ... }`.
fn matching_brace_end(text: &str, body_start: usize) -> Option<usize> {
    let mut depth: i32 = 1;
    for (offset, ch) in text[body_start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(body_start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// `extract(text, pattern) -> {as_numbers, warnings}`. `min_as`/`max_as`
/// bound the accepted numeric range (defaults 256 / 2^32-1); `strict` additionally drops the
/// reserved values are filtered in strict mode.
pub fn extract(
    text: &str,
    pattern: Pattern,
    min_as: u32,
    max_as: u32,
    strict: bool,
) -> ExtractionResult {
    let re = match pattern {
        Pattern::PeerAs => peer_as_re(),
        Pattern::AsToken => as_token_re(),
        Pattern::AutonomousSystem => autonomous_system_re(),
    };

    let mut result = ExtractionResult::default();
    for caps in re.captures_iter(text) {
        let raw: u64 = match caps[1].parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        push_as(&mut result, raw, min_as, max_as, strict);
    }

    if matches!(pattern, Pattern::PeerAs | Pattern::AutonomousSystem) {
        extract_groups(text, &mut result, min_as, max_as, strict);
    }

    result
}

fn extract_groups(text: &str, result: &mut ExtractionResult, min_as: u32, max_as: u32, strict: bool) {
    for caps in group_header_re().captures_iter(text) {
        let group_name = caps[1].to_string();
        let body_start = caps.get(0).unwrap().end();
        let Some(body_end) = matching_brace_end(text, body_start) else { continue };
        let body = &text[body_start..body_end];
        for neighbor_caps in peer_as_re().captures_iter(body) {
            let Ok(raw) = neighbor_caps[1].parse::<u64>() else { continue };
            if let Some(as_number) = validate(raw, min_as, max_as, strict, &mut result.warnings) {
                result.as_numbers.insert(as_number);
                result.bgp_groups.entry(group_name.clone()).or_default().push(as_number);
            }
        }
    }
}

fn push_as(result: &mut ExtractionResult, raw: u64, min_as: u32, max_as: u32, strict: bool) {
    if let Some(as_number) = validate(raw, min_as, max_as, strict, &mut result.warnings) {
        result.as_numbers.insert(as_number);
    }
}

fn validate(
    raw: u64,
    min_as: u32,
    max_as: u32,
    strict: bool,
    warnings: &mut Vec<String>,
) -> Option<AsNumber> {
    let as_number = match AsNumber::new(raw) {
        Ok(v) => v,
        Err(e) => {
            warnings.push(format!("rejected out-of-range AS token: {e}"));
            return None;
        }
    };

    if (as_number.get() as u64) < min_as as u64 || (as_number.get() as u64) > max_as as u64 {
        warnings.push(format!(
            "AS{} outside configured bounds [{min_as}, {max_as}]",
            as_number.get()
        ));
        return None;
    }

    if strict && RESERVED_STRICT.contains(&as_number.get()) {
        warnings.push(format!("AS{} is reserved (RFC 7607 / AS_TRANS / reserved)", as_number.get()));
        return None;
    }

    Some(as_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"
group CUSTOMERS {
    type external;
    neighbor 192.0.2.1 {
        peer-as 65001;
    }
    neighbor 192.0.2.2 {
        peer-as 65002;
    }
}
group TRANSIT {
    neighbor 198.51.100.1 {
        peer-as 7922;
    }
}
"#;

    #[test]
    fn extracts_distinct_as_numbers_as_a_set() {
        let result = extract(SAMPLE_CONFIG, Pattern::PeerAs, 256, u32::MAX, false);
        let nums: Vec<u32> = result.as_numbers.iter().map(|a| a.get()).collect();
        assert_eq!(nums.len(), 3);
        assert!(nums.contains(&65001));
        assert!(nums.contains(&7922));
    }

    #[test]
    fn group_membership_is_insertion_ordered() {
        let result = extract(SAMPLE_CONFIG, Pattern::PeerAs, 256, u32::MAX, false);
        let customers: Vec<u32> = result.bgp_groups["CUSTOMERS"].iter().map(|a| a.get()).collect();
        assert_eq!(customers, vec![65001, 65002]);
        assert_eq!(result.bgp_groups["TRANSIT"][0].get(), 7922);
    }

    #[test]
    fn strict_mode_filters_reserved_as_numbers() {
        let text = "neighbor x { peer-as 0; } neighbor y { peer-as 23456; } neighbor z { peer-as 65010; }";
        let result = extract(text, Pattern::PeerAs, 0, u32::MAX, true);
        let nums: Vec<u32> = result.as_numbers.iter().map(|a| a.get()).collect();
        assert_eq!(nums, vec![65010]);
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn as_token_pattern_matches_explicit_tokens() {
        let result = extract("path includes AS65010 AS65020 and AS65010 again", Pattern::AsToken, 256, u32::MAX, false);
        let nums: Vec<u32> = result.as_numbers.iter().map(|a| a.get()).collect();
        assert_eq!(nums.len(), 2);
    }

    #[test]
    fn bounds_reject_below_minimum() {
        let result = extract("peer-as 10;", Pattern::PeerAs, 256, u32::MAX, false);
        assert!(result.as_numbers.is_empty());
        assert_eq!(result.warnings.len(), 1);
    }
}
