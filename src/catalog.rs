use crate::errors::{Result, RewardsEngineError};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::error;

/// Product metadata from the external catalog. Unknown fields in the
/// upstream payload are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogProduct {
    pub title: String,
    pub price: Decimal,
}

pub struct CatalogClient {
    base_url: String,
    points_per_unit: i64,
    client: Client,
}

impl CatalogClient {
    pub fn new(base_url: String, points_per_unit: i64, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap();

        CatalogClient {
            base_url,
            points_per_unit,
            client,
        }
    }

    /// Look up one product. Upstream failures map to "unavailable for
    /// redemption", never to a ledger error.
    pub async fn fetch_product(&self, product_id: &str) -> Result<CatalogProduct> {
        let url = format!("{}/products/{}", self.base_url, product_id);

        let response = self.client.get(&url).send().await.map_err(|e| {
            error!("Catalog request failed for product {}: {}", product_id, e);
            RewardsEngineError::CatalogUnavailable(format!("Catalog request failed: {}", e))
        })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RewardsEngineError::ProductNotFound(product_id.to_string()));
        }

        if !response.status().is_success() {
            let status = response.status();
            return Err(RewardsEngineError::CatalogUnavailable(format!(
                "Catalog returned status {} for product {}",
                status, product_id
            )));
        }

        let product = response.json::<CatalogProduct>().await.map_err(|e| {
            RewardsEngineError::CatalogUnavailable(format!("Failed to parse catalog response: {}", e))
        })?;

        Ok(product)
    }

    /// Point cost of one product at the configured conversion rate
    pub fn cost_of(&self, product: &CatalogProduct) -> Result<i64> {
        points_cost(product.price, self.points_per_unit).ok_or_else(|| {
            RewardsEngineError::Validation(format!(
                "Product '{}' has an unusable price {}",
                product.title, product.price
            ))
        })
    }
}

/// Price-to-points conversion, rounded up so a fractional remainder
/// always costs a whole point. None for non-positive or overflowing
/// prices.
pub fn points_cost(price: Decimal, points_per_unit: i64) -> Option<i64> {
    if price <= Decimal::ZERO || points_per_unit <= 0 {
        return None;
    }
    price
        .checked_mul(Decimal::from(points_per_unit))?
        .ceil()
        .to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn whole_prices_convert_exactly() {
        assert_eq!(points_cost(dec!(2), 100), Some(200));
        assert_eq!(points_cost(dec!(10.00), 100), Some(1000));
    }

    #[test]
    fn fractional_remainders_round_up() {
        assert_eq!(points_cost(dec!(1.99), 100), Some(199));
        assert_eq!(points_cost(dec!(1.991), 100), Some(200));
        assert_eq!(points_cost(dec!(0.001), 100), Some(1));
    }

    #[test]
    fn non_positive_prices_are_rejected() {
        assert_eq!(points_cost(dec!(0), 100), None);
        assert_eq!(points_cost(dec!(-3.50), 100), None);
        assert_eq!(points_cost(dec!(5), 0), None);
    }
}
