//! RPKI data model.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vrp {
    pub prefix: ipnet::IpNet,
    pub origin_as: u32,
    pub max_length: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationState {
    Valid,
    Invalid,
    NotFound,
    Error,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub prefix: ipnet::IpNet,
    pub as_number: u32,
    pub state: ValidationState,
    pub reason: String,
    pub allowlisted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AggregateSummary {
    pub valid: usize,
    pub invalid: usize,
    pub not_found: usize,
    pub error: usize,
    pub allowlisted: usize,
}

impl AggregateSummary {
    /// Single-pass accumulation over a slice of results.
    pub fn from_results(results: &[ValidationResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.state {
                ValidationState::Valid => summary.valid += 1,
                ValidationState::Invalid => summary.invalid += 1,
                ValidationState::NotFound => summary.not_found += 1,
                ValidationState::Error => summary.error += 1,
            }
            if result.allowlisted {
                summary.allowlisted += 1;
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.valid + self.invalid + self.not_found + self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(state: ValidationState, allowlisted: bool) -> ValidationResult {
        ValidationResult {
            prefix: "203.0.113.0/24".parse().unwrap(),
            as_number: 65001,
            state,
            reason: String::new(),
            allowlisted,
        }
    }

    #[test]
    fn aggregate_counts_by_state_and_allowlist_in_one_pass() {
        let results = vec![
            result(ValidationState::Valid, false),
            result(ValidationState::Invalid, true),
            result(ValidationState::NotFound, false),
            result(ValidationState::Invalid, false),
        ];
        let summary = AggregateSummary::from_results(&results);
        assert_eq!(summary.valid, 1);
        assert_eq!(summary.invalid, 2);
        assert_eq!(summary.not_found, 1);
        assert_eq!(summary.allowlisted, 1);
        assert_eq!(summary.total(), 4);
    }
}
