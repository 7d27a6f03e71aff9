use serde::{Deserialize, Serialize};
use std::fmt;

/// The business collections served by the data layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Trucks,
    Maintenance,
    Parts,
    Suppliers,
    PurchaseOrders,
    Notifications,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Trucks,
        Collection::Maintenance,
        Collection::Parts,
        Collection::Suppliers,
        Collection::PurchaseOrders,
        Collection::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Trucks => "trucks",
            Collection::Maintenance => "maintenance",
            Collection::Parts => "parts",
            Collection::Suppliers => "suppliers",
            Collection::PurchaseOrders => "purchase_orders",
            Collection::Notifications => "notifications",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "trucks" => Ok(Collection::Trucks),
            "maintenance" => Ok(Collection::Maintenance),
            "parts" => Ok(Collection::Parts),
            "suppliers" => Ok(Collection::Suppliers),
            "purchase_orders" => Ok(Collection::PurchaseOrders),
            "notifications" => Ok(Collection::Notifications),
            other => Err(format!("Unknown collection: {other}")),
        }
    }

    /// Endpoint pattern used for write admission on this collection.
    pub fn write_endpoint(&self) -> String {
        format!("{}/write", self.as_str())
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
