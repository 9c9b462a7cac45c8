use std::fmt;

/// Balances are whole credits; there is no fractional unit.
pub type Coins = i64;

/// Format credits the way the bot shows them.
/// Example: 500 -> "$500", -20 -> "-$20", 1200 -> "$1,200"
pub fn format_coins(coins: Coins) -> String {
    let sign = if coins < 0 { "-" } else { "" };
    let digits = coins.unsigned_abs().to_string();

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{}${}", sign, grouped)
}

/// Parse a user-supplied amount. Accepts an optional leading `$` and
/// thousands separators.
/// Example: "500" -> 500, "$1,200" -> 1200
pub fn parse_coins(input: &str) -> Result<Coins, ParseCoinsError> {
    let input = input.trim();
    let input = input.strip_prefix('$').unwrap_or(input);
    let cleaned: String = input.chars().filter(|c| *c != ',').collect();

    if cleaned.is_empty() {
        return Err(ParseCoinsError::InvalidFormat);
    }

    cleaned
        .parse::<Coins>()
        .map_err(|_| ParseCoinsError::InvalidFormat)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseCoinsError {
    InvalidFormat,
}

impl fmt::Display for ParseCoinsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseCoinsError::InvalidFormat => write!(f, "invalid credit amount"),
        }
    }
}

impl std::error::Error for ParseCoinsError {}
