//! Configuration Module
//!
//! Environment-driven configuration for the hub.

mod settings;

pub use settings::{
    AggregationSettings, AppConfig, ConfigError, HistorySettings, HubSettings, InstrumentRoute,
    ServerSettings, WebSocketSettings,
};
