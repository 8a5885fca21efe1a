//! USD prices per million tokens
//!
//! Estimates only. Unknown models fall back to a per-provider default.

use super::provider::CloudProvider;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Price {
    pub input: f64,
    pub output: f64,
}

const fn price(input: f64, output: f64) -> Price {
    Price { input, output }
}

const OPENAI: &[(&str, Price)] = &[
    ("gpt-4o", price(2.50, 10.00)),
    ("gpt-4o-mini", price(0.15, 0.60)),
    ("gpt-4-turbo", price(10.00, 30.00)),
    ("gpt-4", price(30.00, 60.00)),
    ("gpt-3.5-turbo", price(0.50, 1.50)),
];

const ANTHROPIC: &[(&str, Price)] = &[
    ("claude-3-5-sonnet-20241022", price(3.00, 15.00)),
    ("claude-3-5-haiku-20241022", price(0.80, 4.00)),
    ("claude-3-opus-20240229", price(15.00, 75.00)),
    ("claude-3-sonnet-20240229", price(3.00, 15.00)),
];

const GOOGLE: &[(&str, Price)] = &[
    ("gemini-pro", price(0.50, 1.50)),
    ("gemini-1.5-pro", price(3.50, 10.50)),
    ("gemini-1.5-flash", price(0.075, 0.30)),
];

const DEEPSEEK: &[(&str, Price)] = &[
    ("deepseek-chat", price(0.14, 0.28)),
    ("deepseek-coder", price(0.14, 0.28)),
];

pub fn table(provider: CloudProvider) -> &'static [(&'static str, Price)] {
    match provider {
        CloudProvider::OpenAi => OPENAI,
        CloudProvider::Anthropic => ANTHROPIC,
        CloudProvider::Google => GOOGLE,
        CloudProvider::DeepSeek => DEEPSEEK,
    }
}

pub fn default_price(provider: CloudProvider) -> Price {
    match provider {
        CloudProvider::OpenAi => price(2.50, 10.00),
        CloudProvider::Anthropic => price(3.00, 15.00),
        CloudProvider::Google => price(0.50, 1.50),
        CloudProvider::DeepSeek => price(0.14, 0.28),
    }
}

pub fn lookup(provider: CloudProvider, model: &str) -> Price {
    table(provider)
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, p)| *p)
        .unwrap_or_else(|| default_price(provider))
}

pub fn estimate(provider: CloudProvider, model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    let p = lookup(provider, model);
    (prompt_tokens as f64 / 1_000_000.0) * p.input + (completion_tokens as f64 / 1_000_000.0) * p.output
}
