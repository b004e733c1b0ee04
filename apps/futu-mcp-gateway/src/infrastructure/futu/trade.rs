//! Trade session adapter.
//!
//! Read-only: lists accounts and queries funds, positions and orders.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::client::FutuClient;
use super::messages::{ReplyShape, as_i64, as_u64, flatten_object, shape_payload};
use super::protocol;
use crate::application::ports::{TradeAccount, TradeChannel, TradeQuery, TradeScope};
use crate::domain::market::TrdEnv;
use crate::domain::payload::{VendorFailure, VendorPayload};

/// Securities trading category.
const TRD_CATEGORY_SECURITY: i32 = 1;

/// [`TradeChannel`] over an OpenD session.
pub struct FutuTradeChannel {
    client: Arc<FutuClient>,
    scope: TradeScope,
}

impl FutuTradeChannel {
    /// Wrap an initialized session.
    #[must_use]
    pub const fn new(client: Arc<FutuClient>, scope: TradeScope) -> Self {
        Self { client, scope }
    }

    async fn call(&self, proto_id: u32, c2s: Value) -> Result<Value, VendorFailure> {
        Ok(self.client.request(proto_id, c2s).await?)
    }
}

/// Parse one `accList` entry, keeping it only if it can trade in `scope`.
fn account_in_scope(item: &Value, scope: TradeScope) -> Option<TradeAccount> {
    let Value::Object(map) = item else {
        return None;
    };
    let acc_id = map.get("accID").and_then(as_u64)?;
    let trd_env = map.get("trdEnv").and_then(as_i64).and_then(TrdEnv::from_code)?;

    let authorized = map
        .get("trdMarketAuthList")
        .and_then(Value::as_array)
        .is_some_and(|markets| {
            markets
                .iter()
                .filter_map(as_i64)
                .any(|m| m == i64::from(scope.market.code()))
        });
    if !authorized {
        return None;
    }
    // Simulated accounts carry no firm.
    if let Some(firm) = map.get("securityFirm").and_then(as_i64)
        && firm != 0
        && firm != i64::from(scope.firm.code())
    {
        return None;
    }

    let mut record = flatten_object(map);
    record.insert("acc_id".to_string(), json!(acc_id));
    record.insert("trd_env".to_string(), json!(trd_env.as_str()));
    Some(TradeAccount {
        acc_id,
        trd_env,
        record,
    })
}

fn header(account: &TradeAccount, scope: TradeScope) -> Value {
    json!({
        "trdEnv": account.trd_env.code(),
        "accID": account.acc_id,
        "trdMarket": scope.market.code(),
    })
}

#[async_trait]
impl TradeChannel for FutuTradeChannel {
    async fn account_list(&self) -> Result<Vec<TradeAccount>, VendorFailure> {
        let s2c = self
            .call(
                protocol::TRD_GET_ACC_LIST,
                json!({
                    "userID": 0,
                    "trdCategory": TRD_CATEGORY_SECURITY,
                    "needGeneralSecAccount": true,
                }),
            )
            .await?;

        let accounts: Vec<TradeAccount> = s2c
            .get("accList")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| account_in_scope(item, self.scope))
                    .collect()
            })
            .unwrap_or_default();
        tracing::debug!(
            market = self.scope.market.as_str(),
            count = accounts.len(),
            "Accounts in scope"
        );
        Ok(accounts)
    }

    async fn query(
        &self,
        account: &TradeAccount,
        query: TradeQuery,
    ) -> Result<VendorPayload, VendorFailure> {
        let (proto_id, shape) = match query {
            TradeQuery::Funds => (protocol::TRD_GET_FUNDS, ReplyShape::Nested("funds")),
            TradeQuery::Positions => (
                protocol::TRD_GET_POSITION_LIST,
                ReplyShape::List("positionList"),
            ),
            TradeQuery::Orders => (protocol::TRD_GET_ORDER_LIST, ReplyShape::List("orderList")),
        };
        let s2c = self
            .call(proto_id, json!({ "header": header(account, self.scope) }))
            .await?;
        Ok(shape_payload(s2c, shape))
    }

    fn is_open(&self) -> bool {
        self.client.is_open()
    }

    async fn close(&self) {
        self.client.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{SecurityFirm, TrdMarket};

    fn hk_scope() -> TradeScope {
        TradeScope {
            market: TrdMarket::Hk,
            firm: SecurityFirm::FutuSecurities,
            env: TrdEnv::Simulate,
        }
    }

    #[test]
    fn string_account_id_is_parsed() {
        let account = account_in_scope(
            &json!({"accID": "281756460288", "trdEnv": 0, "trdMarketAuthList": [1]}),
            hk_scope(),
        )
        .unwrap();
        assert_eq!(account.acc_id, 281_756_460_288);
        assert_eq!(account.trd_env, TrdEnv::Simulate);
        assert_eq!(account.record["acc_id"], json!(281_756_460_288_u64));
        assert_eq!(account.record["trd_env"], json!("SIMULATE"));
    }

    #[test]
    fn account_without_market_authority_is_skipped() {
        let item = json!({"accID": 1, "trdEnv": 1, "trdMarketAuthList": [2]});
        assert!(account_in_scope(&item, hk_scope()).is_none());
    }

    #[test]
    fn account_at_another_firm_is_skipped() {
        let item = json!({"accID": 1, "trdEnv": 1, "trdMarketAuthList": [1], "securityFirm": 2});
        assert!(account_in_scope(&item, hk_scope()).is_none());
    }

    #[test]
    fn header_carries_account_and_market() {
        let account = account_in_scope(
            &json!({"accID": 7, "trdEnv": 1, "trdMarketAuthList": [1], "securityFirm": 1}),
            hk_scope(),
        )
        .unwrap();
        assert_eq!(
            header(&account, hk_scope()),
            json!({"trdEnv": 1, "accID": 7, "trdMarket": 1})
        );
    }
}
