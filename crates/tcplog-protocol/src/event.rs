//! Event taxonomy.
//!
//! Every record shape (plain named event, purchases, currency grants, errors,
//! progress markers) is one [`EventKind`] variant carrying its fixed fields,
//! plus the open-ended attribute list shared by all of them.

use crate::attribute::{Attribute, AttributeValue};
use serde::{Deserialize, Serialize};

/// Name of the event that opens every session.
pub const SESSION_START_EVENT: &str = "Session.Start";
/// Name of the record that closes a line-framed session.
pub const SESSION_END_EVENT: &str = "Session.End";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Custom {
        name: String,
    },
    ItemPurchase {
        item_id: String,
        item_quantity: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        currency: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        per_item_cost: Option<i64>,
    },
    CurrencyPurchase {
        game_currency_type: String,
        game_currency_amount: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        real_currency_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        real_money_cost: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payment_provider: Option<String>,
    },
    CurrencyGiven {
        game_currency_type: String,
        game_currency_amount: i64,
    },
    Error {
        error: String,
    },
    Progress {
        progress_type: String,
        progress_hierarchy: String,
    },
}

impl EventKind {
    /// Value of the `eventName` key.
    pub fn event_name(&self) -> &str {
        match self {
            Self::Custom { name } => name,
            Self::ItemPurchase { .. } => "ItemPurchase",
            Self::CurrencyPurchase { .. } => "CurrencyPurchase",
            Self::CurrencyGiven { .. } => "CurrencyGiven",
            Self::Error { .. } => "Error",
            Self::Progress { .. } => "Progress",
        }
    }

    /// Fixed fields in wire order. Absent optional fields are skipped.
    pub fn fixed_fields(&self) -> Vec<(&'static str, AttributeValue)> {
        let mut fields = Vec::new();
        match self {
            Self::Custom { .. } => {}
            Self::ItemPurchase {
                item_id,
                item_quantity,
                currency,
                per_item_cost,
            } => {
                fields.push(("itemId", AttributeValue::text(item_id.clone())));
                fields.push(("itemQuantity", AttributeValue::from(*item_quantity)));
                if let Some(currency) = currency {
                    fields.push(("currency", AttributeValue::text(currency.clone())));
                }
                if let Some(cost) = per_item_cost {
                    fields.push(("perItemCost", AttributeValue::from(*cost)));
                }
            }
            Self::CurrencyPurchase {
                game_currency_type,
                game_currency_amount,
                real_currency_type,
                real_money_cost,
                payment_provider,
            } => {
                fields.push((
                    "gameCurrencyType",
                    AttributeValue::text(game_currency_type.clone()),
                ));
                fields.push((
                    "gameCurrencyAmount",
                    AttributeValue::from(*game_currency_amount),
                ));
                if let Some(kind) = real_currency_type {
                    fields.push(("realCurrencyType", AttributeValue::text(kind.clone())));
                }
                if let Some(cost) = real_money_cost {
                    fields.push(("realMoneyCost", AttributeValue::from(*cost)));
                }
                if let Some(provider) = payment_provider {
                    fields.push(("paymentProvider", AttributeValue::text(provider.clone())));
                }
            }
            Self::CurrencyGiven {
                game_currency_type,
                game_currency_amount,
            } => {
                fields.push((
                    "gameCurrencyType",
                    AttributeValue::text(game_currency_type.clone()),
                ));
                fields.push((
                    "gameCurrencyAmount",
                    AttributeValue::from(*game_currency_amount),
                ));
            }
            Self::Error { error } => {
                fields.push(("error", AttributeValue::text(error.clone())));
            }
            Self::Progress {
                progress_type,
                progress_hierarchy,
            } => {
                fields.push(("progressType", AttributeValue::text(progress_type.clone())));
                fields.push((
                    "progressHierarchy",
                    AttributeValue::text(progress_hierarchy.clone()),
                ));
            }
        }
        fields
    }
}

/// One structured occurrence submitted for recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl Event {
    /// Plain named event.
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_kind(EventKind::Custom { name: name.into() })
    }

    pub fn from_kind(kind: EventKind) -> Self {
        Self {
            kind,
            attributes: Vec::new(),
        }
    }

    pub fn session_start(attributes: Vec<Attribute>) -> Self {
        Self::new(SESSION_START_EVENT).with_attributes(attributes)
    }

    pub fn item_purchase(item_id: impl Into<String>, item_quantity: i64) -> Self {
        Self::from_kind(EventKind::ItemPurchase {
            item_id: item_id.into(),
            item_quantity,
            currency: None,
            per_item_cost: None,
        })
    }

    pub fn currency_purchase(
        game_currency_type: impl Into<String>,
        game_currency_amount: i64,
    ) -> Self {
        Self::from_kind(EventKind::CurrencyPurchase {
            game_currency_type: game_currency_type.into(),
            game_currency_amount,
            real_currency_type: None,
            real_money_cost: None,
            payment_provider: None,
        })
    }

    pub fn currency_given(game_currency_type: impl Into<String>, game_currency_amount: i64) -> Self {
        Self::from_kind(EventKind::CurrencyGiven {
            game_currency_type: game_currency_type.into(),
            game_currency_amount,
        })
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::from_kind(EventKind::Error {
            error: error.into(),
        })
    }

    pub fn progress(progress_type: impl Into<String>, progress_hierarchy: impl Into<String>) -> Self {
        Self::from_kind(EventKind::Progress {
            progress_type: progress_type.into(),
            progress_hierarchy: progress_hierarchy.into(),
        })
    }

    pub fn with_attributes(mut self, attributes: Vec<Attribute>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Append one attribute, keeping insertion order.
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.push(Attribute::new(name, value));
        self
    }

    pub fn name(&self) -> &str {
        self.kind.event_name()
    }
}
