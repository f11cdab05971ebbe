use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::application::error::ExecutorError;
use crate::application::pipeline::{HookContext, TransformHook};
use crate::application::repos::PriceSource;
use crate::domain::types::{EntityId, Method};

const BASE_PRICE: &str = "BASE_PRICE";
const PRICE: &str = "PRICE";
const CAN_BUY: &str = "CAN_BUY";
const PRICES: &str = "PRICES";

/// Enriches catalog records with pricing: the base price, whether the item
/// can be bought, and any additional price groups.
pub struct CatalogPrices {
    source: Arc<dyn PriceSource>,
    groups: Vec<String>,
    id_field: String,
}

impl CatalogPrices {
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        Self {
            source,
            groups: Vec::new(),
            id_field: "ID".to_string(),
        }
    }

    /// Price groups reported under `PRICES`, besides the base group.
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }
}

#[async_trait]
impl TransformHook for CatalogPrices {
    fn name(&self) -> &'static str {
        "catalog_prices"
    }

    async fn apply(&self, context: &mut HookContext) -> Result<(), ExecutorError> {
        if context.method == Method::Count {
            return Ok(());
        }

        for record in &mut context.records {
            let Some(id) = record
                .get(&self.id_field)
                .and_then(|value| EntityId::from_value(value).ok())
            else {
                continue;
            };

            let base = self.source.base_price(&id).await?;
            let can_buy = base.as_ref().is_some_and(|price| price.can_buy());

            let mut prices = Map::new();
            for group in &self.groups {
                if base
                    .as_ref()
                    .is_some_and(|price| &price.catalog_group_name == group)
                {
                    continue;
                }
                let row = self.source.group_price(&id, group).await?;
                prices.insert(group.clone(), row.map(Value::Object).unwrap_or(Value::Null));
            }
            if !prices.is_empty() {
                record.insert(PRICES.to_string(), Value::Object(prices));
            }

            let has_price = record.get(PRICE).is_some_and(is_truthy);
            match base {
                Some(base) => {
                    let base = serde_json::to_value(base)
                        .map_err(|err| ExecutorError::internal(err.to_string()))?;
                    record.insert(BASE_PRICE.to_string(), base);
                    record.insert(CAN_BUY.to_string(), Value::Bool(can_buy));
                }
                None if has_price => {
                    record.insert(BASE_PRICE.to_string(), Value::Null);
                    record.insert(CAN_BUY.to_string(), Value::Bool(false));
                }
                None => {
                    record.remove(BASE_PRICE);
                    record.remove(PRICE);
                    record.remove(CAN_BUY);
                }
            }
        }
        Ok(())
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty() && text != "0",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::repos::{BasePrice, DataError};
    use crate::domain::Record;
    use crate::domain::schema::Schema;
    use crate::domain::types::{Actor, ContainerRef};

    struct Prices;

    #[async_trait]
    impl PriceSource for Prices {
        async fn base_price(&self, product: &EntityId) -> Result<Option<BasePrice>, DataError> {
            Ok(match product {
                EntityId::Int(1) => Some(BasePrice {
                    price: Some(100.0),
                    currency: "RUB".into(),
                    catalog_group_name: "BASE".into(),
                    product_can_buy_zero: false,
                    product_negative_amount_trace: false,
                    product_quantity: 3,
                }),
                _ => None,
            })
        }

        async fn group_price(
            &self,
            product: &EntityId,
            group: &str,
        ) -> Result<Option<Record>, DataError> {
            let mut row = Record::new();
            row.insert("PRODUCT_ID".into(), product.to_value());
            row.insert("CATALOG_GROUP_NAME".into(), json!(group));
            Ok(Some(row))
        }
    }

    fn context(method: Method, records: Vec<Value>) -> HookContext {
        HookContext::new(
            method,
            Actor::user(1, [1]),
            ContainerRef::new("catalog", json!(4)),
            Arc::new(Schema::new()),
        )
        .with_records(
            records
                .into_iter()
                .filter_map(|value| match value {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
        )
    }

    fn hook() -> CatalogPrices {
        CatalogPrices::new(Arc::new(Prices)).with_groups(["BASE", "WHOLESALE"])
    }

    #[tokio::test]
    async fn priced_items_get_base_price_and_extra_groups() {
        let mut ctx = context(Method::ReadMany, vec![json!({"ID": 1, "NAME": "Tea"})]);
        hook().apply(&mut ctx).await.unwrap();

        let record = &ctx.records[0];
        assert_eq!(record[BASE_PRICE]["PRICE"], json!(100.0));
        assert_eq!(record[CAN_BUY], json!(true));
        let prices = record[PRICES].as_object().unwrap();
        assert_eq!(prices.keys().collect::<Vec<_>>(), vec!["WHOLESALE"]);
    }

    #[tokio::test]
    async fn unpriced_items_lose_price_fields() {
        let mut ctx = context(
            Method::ReadMany,
            vec![json!({"ID": 2, "PRICE": null, "CAN_BUY": true})],
        );
        hook().apply(&mut ctx).await.unwrap();

        let record = &ctx.records[0];
        assert!(!record.contains_key(BASE_PRICE));
        assert!(!record.contains_key(PRICE));
        assert!(!record.contains_key(CAN_BUY));
    }

    #[tokio::test]
    async fn count_is_skipped() {
        let mut ctx = context(Method::Count, vec![json!({"count": 3})]);
        hook().apply(&mut ctx).await.unwrap();
        assert_eq!(Value::Object(ctx.records[0].clone()), json!({"count": 3}));
    }
}
