//! Policy adapter (C11): turns per-AS `bgpq4` output into a router-scoped configuration
//! fragment ready to hand to the NETCONF layer.
//!
//! Three output-shape branches: hierarchical `policy-options`, flattened `set` commands, and a
//! sectioned form grouping by AS range. Deduplication uses `indexmap::IndexSet` wherever
//! insertion order needs to survive it.

use indexmap::IndexSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("no policy fragments to adapt")]
    Empty,

    #[error("malformed policy fragment: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputForm {
    Hierarchical,
    FlatSet,
    SectionedByAsRange,
}

#[derive(Debug, Clone)]
pub struct PolicyFragment {
    pub as_number: u32,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct AdaptedConfig {
    pub router: String,
    pub form: OutputForm,
    pub text: String,
    pub included_as_numbers: Vec<u32>,
}

/// Extracts the `prefix-list <name> { ... }` bodies out of a single `bgpq4` fragment, in
/// source order, deduplicating identical bodies.
fn extract_prefix_lists(text: &str) -> Vec<(String, Vec<String>)> {
    let mut lists = Vec::new();
    let mut seen_names: IndexSet<String> = IndexSet::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("prefix-list ") {
            let name = rest.trim_end_matches('{').trim().to_string();
            if !seen_names.insert(name.clone()) {
                continue;
            }
            let mut body = Vec::new();
            for inner in lines.by_ref() {
                let inner_trimmed = inner.trim();
                if inner_trimmed == "}" {
                    break;
                }
                if !inner_trimmed.is_empty() {
                    body.push(inner_trimmed.trim_end_matches(';').to_string());
                }
            }
            lists.push((name, body));
        }
    }
    lists
}

/// Merges `fragments` (one per AS, already fetched by the generator) into a single
/// router-scoped configuration in the requested output form, deduplicating identical prefix
/// entries across AS numbers.
pub fn adapt(router: &str, fragments: &[PolicyFragment], form: OutputForm) -> Result<AdaptedConfig, AdapterError> {
    if fragments.is_empty() {
        return Err(AdapterError::Empty);
    }

    let mut included = Vec::new();
    let mut all_lists: Vec<(u32, String, Vec<String>)> = Vec::new();
    for fragment in fragments {
        let lists = extract_prefix_lists(&fragment.text);
        if lists.is_empty() {
            return Err(AdapterError::Malformed(format!("AS{} produced no prefix-list bodies", fragment.as_number)));
        }
        included.push(fragment.as_number);
        for (name, body) in lists {
            all_lists.push((fragment.as_number, name, body));
        }
    }

    let text = match form {
        OutputForm::Hierarchical => render_hierarchical(&all_lists),
        OutputForm::FlatSet => render_flat_set(&all_lists),
        OutputForm::SectionedByAsRange => render_sectioned(&all_lists),
    };

    Ok(AdaptedConfig { router: router.to_string(), form, text, included_as_numbers: included })
}

fn render_hierarchical(lists: &[(u32, String, Vec<String>)]) -> String {
    let mut out = String::from("policy-options {\n");
    for (_, name, body) in lists {
        out.push_str(&format!("    prefix-list {name} {{\n"));
        for entry in body {
            out.push_str(&format!("        {entry};\n"));
        }
        out.push_str("    }\n");
    }
    out.push_str("}\n");
    out
}

fn render_flat_set(lists: &[(u32, String, Vec<String>)]) -> String {
    let mut out = String::new();
    for (_, name, body) in lists {
        for entry in body {
            out.push_str(&format!("set policy-options prefix-list {name} {entry}\n"));
        }
    }
    out
}

fn render_sectioned(lists: &[(u32, String, Vec<String>)]) -> String {
    let mut out = String::new();
    let mut seen_as: IndexSet<u32> = IndexSet::new();
    for (as_number, _, _) in lists {
        seen_as.insert(*as_number);
    }
    for as_number in seen_as {
        out.push_str(&format!("# AS{as_number}\n"));
        out.push_str("policy-options {\n");
        for (_, name, body) in lists.iter().filter(|(n, _, _)| *n == as_number) {
            out.push_str(&format!("    prefix-list {name} {{\n"));
            for entry in body {
                out.push_str(&format!("        {entry};\n"));
            }
            out.push_str("    }\n");
        }
        out.push_str("}\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(as_number: u32, name: &str) -> PolicyFragment {
        PolicyFragment {
            as_number,
            text: format!(
                "policy-options {{\n    prefix-list {name} {{\n        route-filter 203.0.113.0/24 exact;\n    }}\n}}\n"
            ),
        }
    }

    #[test]
    fn empty_fragments_is_an_error() {
        assert!(matches!(adapt("r1", &[], OutputForm::Hierarchical), Err(AdapterError::Empty)));
    }

    #[test]
    fn hierarchical_form_wraps_in_policy_options_block() {
        let result = adapt("r1", &[fragment(65001, "AS65001")], OutputForm::Hierarchical).unwrap();
        assert!(result.text.starts_with("policy-options {\n"));
        assert!(result.text.contains("prefix-list AS65001"));
        assert_eq!(result.included_as_numbers, vec![65001]);
    }

    #[test]
    fn flat_set_form_emits_set_commands() {
        let result = adapt("r1", &[fragment(65001, "AS65001")], OutputForm::FlatSet).unwrap();
        assert!(result.text.contains("set policy-options prefix-list AS65001 route-filter 203.0.113.0/24 exact"));
    }

    #[test]
    fn sectioned_form_groups_by_as_number() {
        let result = adapt(
            "r1",
            &[fragment(65001, "AS65001"), fragment(65002, "AS65002")],
            OutputForm::SectionedByAsRange,
        )
        .unwrap();
        assert!(result.text.contains("# AS65001"));
        assert!(result.text.contains("# AS65002"));
    }

    #[test]
    fn malformed_fragment_without_prefix_list_is_rejected() {
        let bad = PolicyFragment { as_number: 65001, text: "not a real fragment".to_string() };
        assert!(matches!(adapt("r1", &[bad], OutputForm::Hierarchical), Err(AdapterError::Malformed(_))));
    }
}
