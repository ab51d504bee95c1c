//! Message templates.
//!
//! Templates use `{name}` placeholders. A placeholder with no value in the
//! context is left verbatim, so a typo shows up in the posted text rather than
//! silently disappearing. When a template set holds several variants, one is
//! chosen through an injectable `TemplatePicker`.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// One template, or a list of variants to pick from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateSet {
    /// A single template.
    One(String),
    /// Variants; one is picked per message.
    Many(Vec<String>),
}

impl TemplateSet {
    /// All variants.
    #[must_use]
    pub fn variants(&self) -> &[String] {
        match self {
            Self::One(t) => std::slice::from_ref(t),
            Self::Many(ts) => ts,
        }
    }

    /// True when there is nothing to render.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variants().iter().all(|t| t.trim().is_empty())
    }

    /// Picks a variant and renders it.
    pub fn render(&self, picker: &mut dyn TemplatePicker, context: &MessageContext) -> String {
        let variants = self.variants();
        if variants.is_empty() {
            return String::new();
        }
        let index = picker.pick(variants.len()).min(variants.len() - 1);
        render(&variants[index], context)
    }
}

/// Chooses among template variants.
pub trait TemplatePicker: Send {
    /// Returns an index in `0..len`. `len` is never zero.
    fn pick(&mut self, len: usize) -> usize;
}

/// Uniform random picker over a seedable `StdRng`.
#[derive(Debug, Clone)]
pub struct SeededPicker {
    rng: StdRng,
}

impl SeededPicker {
    /// Reproducible picker.
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Picker seeded from the OS.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl TemplatePicker for SeededPicker {
    fn pick(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }
}

/// Always picks the first variant.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstVariant;

impl TemplatePicker for FirstVariant {
    fn pick(&mut self, _len: usize) -> usize {
        0
    }
}

/// Placeholder values for one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageContext {
    values: BTreeMap<String, String>,
}

impl MessageContext {
    /// Empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Builder form of `insert`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Copies every pair of `vars` into the context, overriding existing keys.
    pub fn extend<'a>(&mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) {
        for (k, v) in vars {
            self.values.insert(k.clone(), v.clone());
        }
    }
}

fn placeholder() -> Option<&'static Regex> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{([^{}\s]+)\}").ok())
        .as_ref()
}

/// Substitutes every known `{key}` in `template`.
#[must_use]
pub fn render(template: &str, context: &MessageContext) -> String {
    let Some(re) = placeholder() else {
        return template.to_string();
    };
    re.replace_all(template, |caps: &Captures<'_>| match context.get(&caps[1]) {
        Some(value) => value.to_string(),
        None => caps[0].to_string(),
    })
    .into_owned()
}

/// How numbers appear in messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberStyle {
    /// `1,234,567`
    Grouped,
    /// `123万`, `1億2000万`
    #[default]
    Japanese,
}

/// Formats `n` in the given style.
///
/// Japanese style rounds down to whole 万 (10⁴) at or above one 万, and to
/// whole 億 (10⁸) at or above one 億 unless the remainder is at least 1000万.
#[must_use]
pub fn format_number(n: u64, style: NumberStyle) -> String {
    const MAN: u64 = 10_000;
    const OKU: u64 = 100_000_000;

    match style {
        NumberStyle::Grouped => group_digits(n),
        NumberStyle::Japanese if n >= OKU => {
            let oku = n / OKU;
            let rest = n % OKU;
            if rest >= 1_000 * MAN {
                format!("{oku}億{}万", rest / MAN)
            } else {
                format!("{oku}億")
            }
        }
        NumberStyle::Japanese if n >= MAN => format!("{}万", n / MAN),
        NumberStyle::Japanese => group_digits(n),
    }
}

fn group_digits(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_and_keeps_unknown() {
        let ctx = MessageContext::new().with("title", "Song").with("milestone", "100万");
        assert_eq!(
            render("{title} passed {milestone}! {unknown}", &ctx),
            "Song passed 100万! {unknown}"
        );
    }

    #[test]
    fn test_render_handles_repeated_and_adjacent_placeholders() {
        let ctx = MessageContext::new().with("a", "x").with("b", "y");
        assert_eq!(render("{a}{b}{a} {}", &ctx), "xyx {}");
    }

    #[test]
    fn test_render_non_ascii_keys() {
        let ctx = MessageContext::new().with("推し", "Snow Man").with("fan-name", "すの担");
        assert_eq!(
            render("{推し}最高 {fan-name} {not a key}", &ctx),
            "Snow Man最高 すの担 {not a key}"
        );
    }

    #[test]
    fn test_template_set_yaml_forms() {
        let one: TemplateSet = serde_yaml::from_str("\"hi {title}\"").unwrap();
        assert_eq!(one.variants().len(), 1);

        let many: TemplateSet = serde_yaml::from_str("[\"a\", \"b\"]").unwrap();
        assert_eq!(many.variants().len(), 2);
        assert!(!many.is_empty());
        assert!(TemplateSet::Many(vec![]).is_empty());
    }

    #[test]
    fn test_seeded_picker_is_reproducible() {
        let set = TemplateSet::Many((0..10).map(|i| format!("v{i}")).collect());
        let ctx = MessageContext::new();

        let mut a = SeededPicker::from_seed(42);
        let mut b = SeededPicker::from_seed(42);
        let first: Vec<_> = (0..5).map(|_| set.render(&mut a, &ctx)).collect();
        let second: Vec<_> = (0..5).map(|_| set.render(&mut b, &ctx)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_format_number_japanese() {
        let j = |n| format_number(n, NumberStyle::Japanese);
        assert_eq!(j(100_000_000), "1億");
        assert_eq!(j(150_000_000), "1億5000万");
        assert_eq!(j(105_000_000), "1億");
        assert_eq!(j(50_000_000), "5000万");
        assert_eq!(j(1_000_000), "100万");
        assert_eq!(j(10_000), "1万");
        assert_eq!(j(1_234), "1,234");
        assert_eq!(j(0), "0");
    }

    #[test]
    fn test_format_number_grouped() {
        let g = |n| format_number(n, NumberStyle::Grouped);
        assert_eq!(g(999), "999");
        assert_eq!(g(1_000), "1,000");
        assert_eq!(g(1_234_567), "1,234,567");
    }
}
