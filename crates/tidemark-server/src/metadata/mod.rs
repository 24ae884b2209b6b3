pub use tidemark_metadata::{
    EventWarehouse, ImportLedger, SubscriptionSource, UnlimitedSubscriptions,
};

pub mod duckdb;
