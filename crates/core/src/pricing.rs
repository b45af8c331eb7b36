use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{LlmTraceError, Result};

/// Price per 1 000 tokens, split by prompt and completion, in USD.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ModelRate {
    pub prompt: f64,
    pub completion: f64,
}

/// Static per-model pricing. Stateless lookup: unknown models price to zero
/// with a logged notice, because pricing tables lag new model releases and
/// must never block tracing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingTable {
    models: HashMap<String, ModelRate>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut models = HashMap::new();
        let mut add = |name: &str, prompt: f64, completion: f64| {
            models.insert(name.to_string(), ModelRate { prompt, completion });
        };

        // Groq catalogue, USD per 1k tokens.
        add("llama3-8b-8192", 0.00005, 0.00008);
        add("llama3-70b-8192", 0.00059, 0.00079);
        add("llama-3.1-8b-instant", 0.00005, 0.00008);
        add("llama-3.1-70b-versatile", 0.00059, 0.00079);
        add("llama-3.2-1b-preview", 0.00004, 0.00004);
        add("llama-3.2-3b-preview", 0.00006, 0.00006);
        add("llama-3.2-11b-vision-preview", 0.00018, 0.00018);
        add("llama-3.2-90b-vision-preview", 0.0009, 0.0009);
        add("llama-3.3-70b-versatile", 0.00059, 0.00079);
        add("mixtral-8x7b-32768", 0.00024, 0.00024);
        add("gemma-7b-it", 0.00007, 0.00007);
        add("gemma2-9b-it", 0.0002, 0.0002);

        Self { models }
    }
}

#[derive(Debug, Deserialize)]
struct PricingFile {
    models: HashMap<String, ModelRate>,
}

impl PricingTable {
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    /// Loads a TOML pricing file and overlays it on the built-in table.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| LlmTraceError::Config(format!("failed reading {}: {e}", path.display())))?;
        let parsed: PricingFile = toml::from_str(&raw)
            .map_err(|e| LlmTraceError::Config(format!("failed parsing {}: {e}", path.display())))?;

        let mut table = Self::default();
        table.models.extend(parsed.models);
        Ok(table)
    }

    pub fn insert(&mut self, model: impl Into<String>, rate: ModelRate) {
        self.models.insert(model.into(), rate);
    }

    pub fn rate(&self, model: &str) -> Option<ModelRate> {
        self.models.get(model).copied()
    }

    /// `prompt_tokens * prompt_rate / 1000 + completion_tokens *
    /// completion_rate / 1000`, rounded to 4 decimal places so aggregate
    /// sums stay reproducible. Unknown model yields 0.0.
    pub fn cost(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        let Some(rate) = self.rate(model) else {
            warn!(model, "unpriced model, cost recorded as zero");
            return 0.0;
        };

        let amount = prompt_tokens as f64 * rate.prompt / 1000.0
            + completion_tokens as f64 * rate.completion / 1000.0;
        round_currency(amount)
    }
}

fn round_currency(amount: f64) -> f64 {
    (amount * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn unknown_model_is_free() {
        let table = PricingTable::default();
        assert_eq!(table.cost("gpt-0", 1_000_000, 1_000_000), 0.0);
    }

    #[test]
    fn cost_is_monotone_in_tokens() {
        let table = PricingTable::default();
        let base = table.cost("llama3-70b-8192", 10_000, 10_000);
        assert!(table.cost("llama3-70b-8192", 20_000, 10_000) >= base);
        assert!(table.cost("llama3-70b-8192", 10_000, 20_000) >= base);
    }

    #[test]
    fn cost_matches_rate_formula() {
        let mut table = PricingTable::empty();
        table.insert(
            "m",
            ModelRate {
                prompt: 0.03,
                completion: 0.06,
            },
        );
        // 1200/1000 * 0.03 + 300/1000 * 0.06 = 0.036 + 0.018
        assert_eq!(table.cost("m", 1200, 300), 0.054);
    }

    #[test]
    fn rounds_to_currency_precision() {
        let mut table = PricingTable::empty();
        table.insert(
            "m",
            ModelRate {
                prompt: 0.0001,
                completion: 0.0,
            },
        );
        // 333/1000 * 0.0001 = 0.0000333 -> rounds to 0.0
        assert_eq!(table.cost("m", 333, 0), 0.0);
        assert_eq!(table.cost("m", 5000, 0), 0.0005);
    }

    #[test]
    fn file_overlays_builtin_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pricing.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[models.\"custom-model\"]\nprompt = 0.5\ncompletion = 1.0"
        )
        .unwrap();

        let table = PricingTable::load(&path).unwrap();
        assert!(table.rate("custom-model").is_some());
        assert!(table.rate("llama3-8b-8192").is_some());
        assert_eq!(table.cost("custom-model", 1000, 1000), 1.5);
    }
}
