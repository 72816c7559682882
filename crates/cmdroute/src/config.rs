use cmdroute_args::TokenizerOptions;
use serde::{Deserialize, Serialize};

/// Engine settings, fixed before the dispatcher is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchConfig {
    /// Joins the tokens of a non-collection remainder parameter.
    pub remainder_separator: String,
    /// Characters the tokenizer treats as quotes.
    pub quotes: Vec<char>,
    /// Run each request on its own task instead of awaiting it inline.
    pub async_dispatch: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            remainder_separator: " ".to_string(),
            quotes: TokenizerOptions::default().quotes,
            async_dispatch: false,
        }
    }
}

impl DispatchConfig {
    pub fn tokenizer_options(&self) -> TokenizerOptions {
        TokenizerOptions {
            quotes: self.quotes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: DispatchConfig =
            serde_json::from_str(r#"{ "asyncDispatch": true, "quotes": ["`"] }"#).unwrap();
        assert!(config.async_dispatch);
        assert_eq!(config.quotes, vec!['`']);
        assert_eq!(config.remainder_separator, " ");
    }
}
