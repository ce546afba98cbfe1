//! Location-search categories and the keyword rules that detect them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of place types a user can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Atm,
    Restaurant,
    Pharmacy,
    GasStation,
    Hospital,
    Hotel,
}

impl Category {
    /// All categories, in rule priority order.
    pub const ALL: [Category; 6] = [
        Category::Atm,
        Category::Restaurant,
        Category::Pharmacy,
        Category::GasStation,
        Category::Hospital,
        Category::Hotel,
    ];

    /// Name the oracle is asked to emit after the marker.
    pub fn marker_name(self) -> &'static str {
        match self {
            Self::Atm => "atm",
            Self::Restaurant => "restaurants",
            Self::Pharmacy => "pharmacy",
            Self::GasStation => "gas_station",
            Self::Hospital => "hospital",
            Self::Hotel => "hotel",
        }
    }

    /// Human label used in replies.
    pub fn label(self) -> &'static str {
        match self {
            Self::Atm => "ATM",
            Self::Restaurant => "restoran",
            Self::Pharmacy => "apotek",
            Self::GasStation => "SPBU",
            Self::Hospital => "rumah sakit",
            Self::Hotel => "hotel",
        }
    }

    pub fn canned_reply(self) -> String {
        format!("Saya akan carikan {} untuk Anda.", self.label())
    }

    /// Strict parse of a category name produced by the oracle.
    ///
    /// Accepts the marker names plus a few plural and Indonesian aliases.
    /// Anything else is `None`.
    pub fn from_marker(name: &str) -> Option<Category> {
        let key = name
            .trim()
            .trim_matches(|c: char| matches!(c, '[' | ']' | '.' | '\'' | '"' | '`'))
            .trim()
            .to_lowercase()
            .replace(['-', ' '], "_");

        let category = match key.as_str() {
            "atm" | "atms" => Self::Atm,
            "restaurant" | "restaurants" | "restoran" | "rumah_makan" => Self::Restaurant,
            "pharmacy" | "pharmacies" | "apotek" => Self::Pharmacy,
            "gas_station" | "gas_stations" | "gasstation" | "spbu" => Self::GasStation,
            "hospital" | "hospitals" | "rumah_sakit" => Self::Hospital,
            "hotel" | "hotels" | "penginapan" => Self::Hotel,
            _ => return None,
        };
        Some(category)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.marker_name())
    }
}

/// Trim and lower-case user text.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}

/// One `(predicate, category)` pair: the predicate holds if any keyword
/// phrase appears in the text on whole-word boundaries.
#[derive(Debug, Clone)]
pub struct CategoryRule {
    category: Category,
    phrases: Vec<Vec<String>>,
}

impl CategoryRule {
    pub fn new(category: Category, phrases: &[&str]) -> Self {
        let phrases = phrases
            .iter()
            .map(|p| tokenize(&normalize(p)).into_iter().map(str::to_string).collect::<Vec<_>>())
            .filter(|p| !p.is_empty())
            .collect();
        Self { category, phrases }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Keyword phrases, space-joined.
    pub fn phrases(&self) -> Vec<String> {
        self.phrases.iter().map(|p| p.join(" ")).collect()
    }

    fn matches_tokens(&self, tokens: &[&str]) -> bool {
        self.phrases.iter().any(|phrase| {
            tokens
                .windows(phrase.len())
                .any(|w| w.iter().zip(phrase).all(|(t, p)| *t == p.as_str()))
        })
    }

    pub fn matches(&self, normalized: &str) -> bool {
        self.matches_tokens(&tokenize(normalized))
    }
}

/// Ordered rules; the first matching rule decides.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<CategoryRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    /// Category of the first rule whose predicate holds, in list order.
    pub fn first_match(&self, normalized: &str) -> Option<Category> {
        let tokens = tokenize(normalized);
        self.rules
            .iter()
            .find(|r| r.matches_tokens(&tokens))
            .map(|r| r.category)
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new(vec![
            CategoryRule::new(
                Category::Atm,
                &["atm", "anjungan tunai", "tarik tunai", "cash machine", "cashpoint"],
            ),
            CategoryRule::new(
                Category::Restaurant,
                &["restoran", "restaurant", "resto", "rumah makan", "warung makan", "tempat makan", "kafe", "cafe"],
            ),
            CategoryRule::new(
                Category::Pharmacy,
                &["apotek", "apotik", "pharmacy", "farmasi", "toko obat", "drugstore"],
            ),
            CategoryRule::new(
                Category::GasStation,
                &["spbu", "pom bensin", "gas station", "petrol station", "pertamina", "isi bensin", "bensin"],
            ),
            CategoryRule::new(
                Category::Hospital,
                &["rumah sakit", "hospital", "rs", "klinik", "puskesmas", "igd", "ugd"],
            ),
            CategoryRule::new(
                Category::Hotel,
                &["hotel", "penginapan", "losmen", "homestay", "hostel", "motel", "tempat menginap"],
            ),
        ])
    }
}
