use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Amount of tokens authorized per box, in base units (`10 * 1e9`).
pub const DEFAULT_TOKEN_AMOUNT: u64 = 10_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoxType(pub u32);

impl Display for BoxType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "box#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricingError {
    #[error("unknown box type {0}")]
    UnknownBox(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxQuote {
    pub box_type: BoxType,
    pub price_cents: u64,
    pub token_amount: u64,
}

impl BoxQuote {
    pub fn price_usd(&self) -> f64 {
        self.price_cents as f64 / 100.0
    }
}

/// Fixed USD price per box type.
///
/// The authorized token amount is a flat configured value and does not scale
/// with the box price.
#[derive(Debug, Clone)]
pub struct PriceTable {
    prices: BTreeMap<BoxType, u64>,
    token_amount: u64,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_AMOUNT)
            .with_price(BoxType(1), 1_750)
            .with_price(BoxType(2), 3_500)
            .with_price(BoxType(3), 7_500)
    }
}

impl PriceTable {
    pub fn new(token_amount: u64) -> Self {
        Self {
            prices: BTreeMap::new(),
            token_amount,
        }
    }

    /// Default prices with a different token amount.
    pub fn with_token_amount(token_amount: u64) -> Self {
        Self {
            token_amount,
            ..Self::default()
        }
    }

    pub fn with_price(mut self, box_type: BoxType, price_cents: u64) -> Self {
        self.prices.insert(box_type, price_cents);
        self
    }

    pub fn token_amount(&self) -> u64 {
        self.token_amount
    }

    pub fn box_types(&self) -> impl Iterator<Item = BoxType> + '_ {
        self.prices.keys().copied()
    }

    pub fn quote(&self, box_type: BoxType) -> Result<BoxQuote, PricingError> {
        let price_cents = *self
            .prices
            .get(&box_type)
            .ok_or(PricingError::UnknownBox(box_type.0))?;
        Ok(BoxQuote {
            box_type,
            price_cents,
            token_amount: self.token_amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_one_costs_seventeen_fifty() {
        let quote = PriceTable::default().quote(BoxType(1)).unwrap();
        assert_eq!(quote.price_cents, 1_750);
        assert_eq!(quote.price_usd(), 17.5);
        assert_eq!(quote.token_amount, 10_000_000_000);
    }

    #[test]
    fn token_amount_ignores_box_type() {
        let table = PriceTable::default();
        let amounts: Vec<u64> = table
            .box_types()
            .map(|b| table.quote(b).unwrap().token_amount)
            .collect();
        assert_eq!(amounts.len(), 3);
        assert!(amounts.iter().all(|a| *a == DEFAULT_TOKEN_AMOUNT));
    }

    #[test]
    fn unknown_box_is_rejected() {
        assert_eq!(
            PriceTable::default().quote(BoxType(9)),
            Err(PricingError::UnknownBox(9))
        );
    }

    #[test]
    fn custom_token_amount_keeps_prices() {
        let table = PriceTable::with_token_amount(5);
        assert_eq!(table.quote(BoxType(2)).unwrap().token_amount, 5);
        assert_eq!(table.quote(BoxType(2)).unwrap().price_cents, 3_500);
    }
}
