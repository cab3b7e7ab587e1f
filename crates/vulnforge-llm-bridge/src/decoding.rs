/// Sampling parameters for a single `generate` call.
///
/// Spec §3 names two canonical presets: a near-deterministic profile for
/// PoC synthesis (`temperature=0.0, top_p=1.0, seed=1`) and a more
/// exploratory one for Reviewer critique (`temperature=0.7, top_p=0.95,
/// max_retries=5`). Both live here as `Default`-free constructors rather
/// than parsed config, per the typed-configuration-surface rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub seed: Option<u64>,
    pub max_tokens: Option<u32>,
}

impl DecodingParams {
    /// Near-deterministic synthesis profile: `(0.0, 1.0, seed=1)`.
    pub fn deterministic() -> Self {
        Self { temperature: 0.0, top_p: 1.0, seed: Some(1), max_tokens: None }
    }

    /// Exploratory review profile: `(0.7, 0.95)`, no fixed seed.
    pub fn exploratory() -> Self {
        Self { temperature: 0.7, top_p: 0.95, seed: None, max_tokens: None }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_profile_matches_spec_defaults() {
        let p = DecodingParams::deterministic();
        assert_eq!(p.temperature, 0.0);
        assert_eq!(p.top_p, 1.0);
        assert_eq!(p.seed, Some(1));
    }

    #[test]
    fn exploratory_profile_matches_spec_defaults() {
        let p = DecodingParams::exploratory();
        assert_eq!(p.temperature, 0.7);
        assert_eq!(p.top_p, 0.95);
        assert_eq!(p.seed, None);
    }
}
