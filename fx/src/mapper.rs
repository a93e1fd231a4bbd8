//! Stablecoin to real-world currency mapping.

use interstellar_common::CurrencyCode;

/// Wallet-native stablecoin symbols and the currency the rate provider quotes them as.
const STABLECOIN_CODES: &[(&str, &str)] = &[
    ("cNGN", "NGN"),
    ("cXAF", "XAF"),
    ("USDx", "USD"),
    ("EURx", "EUR"),
    ("cGHS", "GHS"),
    ("cKES", "KES"),
];

/// Map a wallet currency code to the code the rate provider understands.
///
/// Codes that are not stablecoins pass through unchanged.
pub fn map_to_real_currency(code: &CurrencyCode) -> CurrencyCode {
    STABLECOIN_CODES
        .iter()
        .find(|(stable, _)| *stable == code.as_str())
        .and_then(|(_, real)| CurrencyCode::new(*real).ok())
        .unwrap_or_else(|| code.clone())
}

/// Check whether a code is one of the known stablecoin symbols.
pub fn is_stablecoin(code: &CurrencyCode) -> bool {
    STABLECOIN_CODES
        .iter()
        .any(|(stable, _)| *stable == code.as_str())
}
