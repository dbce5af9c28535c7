use serde::{Deserialize, Serialize};

/// Token used for "pass" when no deck is configured explicitly.
pub const DEFAULT_PASS_TOKEN: &str = "?";

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeckError {
    #[error("vote deck is empty")]
    Empty,
    #[error("duplicate vote value: {0}")]
    Duplicate(String),
    #[error("vote deck may contain only one non-numeric value, found {0} and {1}")]
    MultiplePassTokens(String, String),
    #[error("numeric vote value must be finite and non-negative: {0}")]
    InvalidNumber(String),
    #[error("vote value must not be blank")]
    Blank,
}

/// Ordered set of allowed vote values: numeric tokens plus at most one
/// non-numeric pass token. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct VoteDeck {
    values: Vec<String>,
}

impl VoteDeck {
    pub fn new<I, S>(values: I) -> Result<Self, DeckError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(DeckError::Empty);
        }
        let mut pass: Option<&str> = None;
        for (i, value) in values.iter().enumerate() {
            if value.trim().is_empty() {
                return Err(DeckError::Blank);
            }
            if values[..i].contains(value) {
                return Err(DeckError::Duplicate(value.clone()));
            }
            match value.parse::<f64>() {
                Ok(n) if n.is_finite() && n >= 0.0 => {}
                Ok(_) => return Err(DeckError::InvalidNumber(value.clone())),
                Err(_) => {
                    if let Some(first) = pass {
                        return Err(DeckError::MultiplePassTokens(first.to_string(), value.clone()));
                    }
                    pass = Some(value);
                }
            }
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }

    /// The deck's own spelling of `value`: the exact token, or the numeric
    /// token equal to it (`5.0` reads as `5`).
    pub fn canonical(&self, value: &str) -> Option<&str> {
        if let Some(exact) = self.values.iter().find(|v| *v == value) {
            return Some(exact);
        }
        let n = value.trim().parse::<f64>().ok()?;
        self.values
            .iter()
            .find(|v| v.parse::<f64>().ok() == Some(n))
            .map(String::as_str)
    }

    /// Numeric reading of an allowed value; `None` for the pass token or
    /// anything outside the deck.
    pub fn numeric(&self, value: &str) -> Option<f64> {
        if !self.contains(value) {
            return None;
        }
        value.parse::<f64>().ok()
    }

    /// Numeric deck values in ascending order.
    pub fn numeric_values(&self) -> Vec<f64> {
        let mut nums: Vec<f64> = self.values.iter().filter_map(|v| v.parse().ok()).collect();
        nums.sort_by(f64::total_cmp);
        nums
    }

    pub fn pass_token(&self) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.parse::<f64>().is_err())
            .map(String::as_str)
    }
}

impl Default for VoteDeck {
    fn default() -> Self {
        let values = [
            "0", "0.5", "1", "2", "3", "5", "8", "13", "20", "40", "100", DEFAULT_PASS_TOKEN,
        ];
        Self {
            values: values.iter().map(|v| (*v).to_string()).collect(),
        }
    }
}

impl TryFrom<Vec<String>> for VoteDeck {
    type Error = DeckError;
    fn try_from(values: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<VoteDeck> for Vec<String> {
    fn from(deck: VoteDeck) -> Self {
        deck.values
    }
}
