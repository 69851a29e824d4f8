// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for Tawreed live collections.
//!
//! This crate holds the vocabulary shared by every other crate in the
//! workspace: marketplace entity kinds, normalized rows, the change-event
//! model, the error taxonomy, and the adapter traits that a hosted backend
//! (bulk query, change feed, row writes) and a notification sink implement.

pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use error::{
    NormalizationWarning, RemoteWriteError, SubscriptionError, TawreedError, TransportError,
    WriteFailure,
};
pub use event::{Change, ChangeEvent, ChangeOperation, RawChange, ReceiptStamp};
pub use types::{
    ActorIdentity, ActorRole, AdapterType, EntityId, EntityKind, Filter, HealthStatus, Row,
    RowPage, RowQuery, Severity, SortKey, SubscriptionStatus, TEMPORARY_ID_PREFIX,
};

pub use traits::{ChangeFeed, DataService, NotificationSink, ServiceAdapter, TracingNotifier};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tawreed_error_wraps_every_concern() {
        let _config = TawreedError::Config("bad".into());
        let _sub = TawreedError::from(SubscriptionError {
            entity: EntityKind::Request,
            filter: Filter::All,
            attempts: 5,
            last_error: Some("refused".into()),
        });
        let _transport = TawreedError::from(TransportError::new("reset"));
        let _write = TawreedError::from(RemoteWriteError::rejected("denied"));
        let _norm = TawreedError::from(NormalizationWarning::MissingId);
        let _unconfirmed = TawreedError::Unconfirmed {
            id: EntityId::new("tmp-1"),
        };
        let _missing = TawreedError::NotFound {
            entity: EntityKind::Offer,
            id: EntityId::new("o1"),
        };
        let _unmounted = TawreedError::Unmounted;
        let _internal = TawreedError::Internal("oops".into());
    }

    #[test]
    fn adapter_type_round_trips_through_strings() {
        use std::str::FromStr;

        for variant in [
            AdapterType::DataService,
            AdapterType::ChangeFeed,
            AdapterType::Notifier,
        ] {
            let parsed = AdapterType::from_str(&variant.to_string()).expect("should parse back");
            assert_eq!(variant, parsed);
        }
    }

    #[test]
    fn all_traits_are_exported() {
        fn _assert_data<T: DataService>() {}
        fn _assert_feed<T: ChangeFeed>() {}
        fn _assert_sink<T: NotificationSink>() {}
        fn _assert_adapter<T: ServiceAdapter>() {}
    }
}
