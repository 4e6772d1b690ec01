use candle_transformers::generation::{LogitsProcessor, Sampling};

/// Per-request sampling knobs. Built fresh for every completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: usize,
    pub stop: Vec<String>,
}

impl SamplingParams {
    pub(super) fn sampling(&self) -> Sampling {
        if self.temperature <= 0.0 {
            Sampling::ArgMax
        } else if self.top_p > 0.0 && self.top_p < 1.0 {
            Sampling::TopP {
                p: self.top_p,
                temperature: self.temperature,
            }
        } else {
            Sampling::All {
                temperature: self.temperature,
            }
        }
    }

    pub(super) fn logits_processor(&self, seed: u64) -> LogitsProcessor {
        LogitsProcessor::from_sampling(seed, self.sampling())
    }

    /// Index of the earliest stop string in `text`, if any.
    pub(super) fn find_stop(&self, text: &str) -> Option<usize> {
        self.stop
            .iter()
            .filter(|s| !s.is_empty())
            .filter_map(|s| text.find(s.as_str()))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use candle_transformers::generation::Sampling;

    use super::SamplingParams;

    fn params(temperature: f64, top_p: f64) -> SamplingParams {
        SamplingParams {
            temperature,
            top_p,
            max_tokens: 16,
            stop: vec!["\ndef".to_string(), "\n#".to_string()],
        }
    }

    #[test]
    fn zero_temperature_is_greedy() {
        assert!(matches!(params(0.0, 0.95).sampling(), Sampling::ArgMax));
    }

    #[test]
    fn nucleus_only_below_one() {
        assert!(matches!(params(0.2, 0.95).sampling(), Sampling::TopP { .. }));
        assert!(matches!(params(0.8, 1.0).sampling(), Sampling::All { .. }));
    }

    #[test]
    fn earliest_stop_wins() {
        let p = params(0.2, 0.95);
        assert_eq!(p.find_stop("    return x\n# done\ndef f():"), Some(12));
        assert_eq!(p.find_stop("    return x"), None);
    }
}
