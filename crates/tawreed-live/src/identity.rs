// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Default change-feed filters derived from the current actor.

use tawreed_core::{ActorIdentity, ActorRole, EntityKind, Filter};

/// The rows an actor sees by default for an entity stream.
///
/// Admins see everything. Vendors browse every request but only their own
/// offers and orders. Clients see their own requests and orders, and the
/// offers the backend's row-level security lets through. Personal streams
/// (messages, notifications, transactions, tickets, profile) are scoped to
/// the actor for everyone but admins.
pub fn default_filter(entity: EntityKind, actor: &ActorIdentity) -> Filter {
    use ActorRole::{Admin, Client, Vendor};
    use EntityKind::*;

    let own = |column: &str| Filter::eq(column, actor.id.as_str());
    match (actor.role, entity) {
        (Admin, _) => Filter::All,
        (Client, Request) | (Client, Order) => own("client_id"),
        (Client, Offer) | (Vendor, Request) => Filter::All,
        (Vendor, Offer) | (Vendor, Order) => own("vendor_id"),
        (_, Message) => own("recipient_id"),
        (_, Notification) | (_, Transaction) | (_, SupportTicket) => own("user_id"),
        (_, Profile) => own("id"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_sees_everything() {
        let admin = ActorIdentity::new("a1", ActorRole::Admin);
        for kind in EntityKind::ALL {
            assert_eq!(default_filter(kind, &admin), Filter::All);
        }
    }

    #[test]
    fn client_and_vendor_scopes() {
        let client = ActorIdentity::new("c1", ActorRole::Client);
        let vendor = ActorIdentity::new("v1", ActorRole::Vendor);

        assert_eq!(
            default_filter(EntityKind::Request, &client),
            Filter::eq("client_id", "c1")
        );
        assert_eq!(default_filter(EntityKind::Request, &vendor), Filter::All);
        assert_eq!(
            default_filter(EntityKind::Offer, &vendor),
            Filter::eq("vendor_id", "v1")
        );
        assert_eq!(
            default_filter(EntityKind::SupportTicket, &client),
            Filter::eq("user_id", "c1")
        );
        assert_eq!(default_filter(EntityKind::Profile, &vendor), Filter::eq("id", "v1"));
    }
}
