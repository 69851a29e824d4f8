// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-entity knowledge: required columns, derived display fields, and the
//! announcement a confirmed remote change produces.

use serde_json::{Map, Value};
use tawreed_core::{Change, ChangeEvent, EntityKind, Row, Severity};

/// Currency assumed when a row carries none.
pub const DEFAULT_CURRENCY: &str = "SAR";

/// A user-facing message for a confirmed remote change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

impl Announcement {
    fn info(title: &str, message: String) -> Self {
        Self {
            title: title.to_string(),
            message,
            severity: Severity::Info,
        }
    }
}

/// Entity-specific hooks used by the normalizer and the live collection.
pub trait EntityAdapter: Send + Sync + 'static {
    fn kind(&self) -> EntityKind;

    /// Columns a locally created row must carry (besides `id`).
    fn required_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Adds derived fields. Must only derive from columns present in
    /// `fields`, since update payloads may be partial.
    fn derive(&self, _fields: &mut Map<String, Value>) {}

    /// What to tell the user about a change made elsewhere. `current` is
    /// the reconciled row after the change was applied.
    fn announce(&self, _event: &ChangeEvent, _current: Option<&Row>) -> Option<Announcement> {
        None
    }
}

pub struct RequestAdapter;
pub struct OfferAdapter;
pub struct MessageAdapter;
pub struct NotificationAdapter;
pub struct OrderAdapter;
pub struct ProfileAdapter;
pub struct TransactionAdapter;
pub struct SupportTicketAdapter;

/// The adapter for an entity stream.
pub fn adapter_for(kind: EntityKind) -> &'static dyn EntityAdapter {
    match kind {
        EntityKind::Request => &RequestAdapter,
        EntityKind::Offer => &OfferAdapter,
        EntityKind::Message => &MessageAdapter,
        EntityKind::Notification => &NotificationAdapter,
        EntityKind::Order => &OrderAdapter,
        EntityKind::Profile => &ProfileAdapter,
        EntityKind::Transaction => &TransactionAdapter,
        EntityKind::SupportTicket => &SupportTicketAdapter,
    }
}

impl EntityAdapter for RequestAdapter {
    fn kind(&self) -> EntityKind {
        EntityKind::Request
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["title"]
    }

    fn derive(&self, fields: &mut Map<String, Value>) {
        alias(fields, "client_id", "user_id");
        let min = fields.get("budget_min").and_then(amount);
        let max = fields.get("budget_max").and_then(amount);
        let display = match (min, max) {
            (Some(lo), Some(hi)) if lo == hi => Some(format_amount(lo)),
            (Some(lo), Some(hi)) => Some(format!("{}-{}", format_amount(lo), format_amount(hi))),
            (Some(lo), None) => Some(format!("from {}", format_amount(lo))),
            (None, Some(hi)) => Some(format!("up to {}", format_amount(hi))),
            (None, None) => None,
        };
        if let Some(display) = display {
            let currency = currency(fields);
            fields.insert("budget_display".into(), format!("{display} {currency}").into());
        }
    }

    fn announce(&self, event: &ChangeEvent, current: Option<&Row>) -> Option<Announcement> {
        let status = changed_status(event)?;
        let title = current.and_then(|r| r.get_str("title")).unwrap_or("Your request");
        Some(Announcement::info(
            "Request status changed",
            format!("\"{title}\" is now {status}"),
        ))
    }
}

impl EntityAdapter for OfferAdapter {
    fn kind(&self) -> EntityKind {
        EntityKind::Offer
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["request_id"]
    }

    fn derive(&self, fields: &mut Map<String, Value>) {
        alias(fields, "vendor_id", "user_id");
        money(fields, "price", "price_display");
    }

    fn announce(&self, event: &ChangeEvent, current: Option<&Row>) -> Option<Announcement> {
        match &event.change {
            Change::Insert { new } => {
                let price = current
                    .and_then(|r| r.get_str("price_display"))
                    .map(|p| format!(" ({p})"))
                    .unwrap_or_default();
                let request = new.get_str("request_id").unwrap_or("your request");
                Some(Announcement::info(
                    "New offer",
                    format!("An offer was submitted on {request}{price}"),
                ))
            }
            _ => {
                let status = changed_status(event)?;
                Some(Announcement::info(
                    "Offer updated",
                    format!("Offer {} is now {status}", event.id()),
                ))
            }
        }
    }
}

impl EntityAdapter for MessageAdapter {
    fn kind(&self) -> EntityKind {
        EntityKind::Message
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["sender_id"]
    }

    fn derive(&self, fields: &mut Map<String, Value>) {
        alias(fields, "sender_id", "user_id");
        if fields.contains_key("sender_id") {
            fields.entry("is_read").or_insert(Value::Bool(false));
        }
    }

    fn announce(&self, event: &ChangeEvent, current: Option<&Row>) -> Option<Announcement> {
        let Change::Insert { .. } = event.change else {
            return None;
        };
        let preview = current
            .and_then(|r| r.get_str("content"))
            .map(preview)
            .unwrap_or_else(|| "You have a new message".to_string());
        Some(Announcement::info("New message", preview))
    }
}

impl EntityAdapter for NotificationAdapter {
    fn kind(&self) -> EntityKind {
        EntityKind::Notification
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["user_id"]
    }

    fn derive(&self, fields: &mut Map<String, Value>) {
        if fields.contains_key("user_id") {
            fields.entry("read").or_insert(Value::Bool(false));
        }
    }

    fn announce(&self, event: &ChangeEvent, current: Option<&Row>) -> Option<Announcement> {
        let Change::Insert { .. } = event.change else {
            return None;
        };
        let row = current?;
        let severity = match row.get_str("type") {
            Some("error") => Severity::Error,
            Some("warning") => Severity::Warning,
            Some("success") => Severity::Success,
            _ => Severity::Info,
        };
        Some(Announcement {
            title: row.get_str("title").unwrap_or("Notification").to_string(),
            message: row.get_str("message").unwrap_or_default().to_string(),
            severity,
        })
    }
}

impl EntityAdapter for OrderAdapter {
    fn kind(&self) -> EntityKind {
        EntityKind::Order
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["request_id"]
    }

    fn derive(&self, fields: &mut Map<String, Value>) {
        alias(fields, "client_id", "user_id");
        money(fields, "total_amount", "amount_display");
    }

    fn announce(&self, event: &ChangeEvent, current: Option<&Row>) -> Option<Announcement> {
        match event.change {
            Change::Insert { .. } => {
                let amount = current
                    .and_then(|r| r.get_str("amount_display"))
                    .map(|a| format!(" for {a}"))
                    .unwrap_or_default();
                Some(Announcement {
                    title: "New order".to_string(),
                    message: format!("Order {} was placed{amount}", event.id()),
                    severity: Severity::Success,
                })
            }
            _ => {
                let status = changed_status(event)?;
                Some(Announcement::info(
                    "Order updated",
                    format!("Order {} is now {status}", event.id()),
                ))
            }
        }
    }
}

impl EntityAdapter for ProfileAdapter {
    fn kind(&self) -> EntityKind {
        EntityKind::Profile
    }

    fn derive(&self, fields: &mut Map<String, Value>) {
        let text = |key: &str| {
            fields
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let joined = [text("first_name"), text("last_name")]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        let display = text("full_name")
            .or_else(|| (!joined.is_empty()).then_some(joined))
            .or_else(|| text("email"));
        if let Some(display) = display {
            fields.insert("display_name".into(), display.into());
        }
    }
}

impl EntityAdapter for TransactionAdapter {
    fn kind(&self) -> EntityKind {
        EntityKind::Transaction
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["amount"]
    }

    fn derive(&self, fields: &mut Map<String, Value>) {
        money(fields, "amount", "amount_display");
    }
}

impl EntityAdapter for SupportTicketAdapter {
    fn kind(&self) -> EntityKind {
        EntityKind::SupportTicket
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["subject"]
    }

    fn derive(&self, fields: &mut Map<String, Value>) {
        if fields.contains_key("subject") {
            fields.entry("status").or_insert_with(|| "open".into());
            fields.entry("priority").or_insert_with(|| "medium".into());
        }
    }

    fn announce(&self, event: &ChangeEvent, current: Option<&Row>) -> Option<Announcement> {
        let status = changed_status(event)?;
        let subject = current
            .and_then(|r| r.get_str("subject"))
            .unwrap_or("Your ticket");
        Some(Announcement::info(
            "Support ticket updated",
            format!("\"{subject}\" is now {status}"),
        ))
    }
}

/// The new `status` of an update that changed it.
fn changed_status(event: &ChangeEvent) -> Option<&str> {
    let Change::Update { new, old } = &event.change else {
        return None;
    };
    let status = new.get_str("status")?;
    match old.as_ref().and_then(|o| o.get_str("status")) {
        Some(previous) if previous == status => None,
        _ => Some(status),
    }
}

fn alias(fields: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = fields.get(from).filter(|v| !v.is_null()).cloned() {
        fields.insert(to.to_string(), value);
    }
}

fn money(fields: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = fields.get(from).and_then(amount) {
        let display = format!("{} {}", format_amount(value), currency(fields));
        fields.insert(to.to_string(), display.into());
    }
}

fn currency(fields: &Map<String, Value>) -> String {
    fields
        .get("currency")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CURRENCY)
        .to_uppercase()
}

/// Numeric columns arrive as JSON numbers or as numeric strings.
fn amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

fn preview(content: &str) -> String {
    const MAX: usize = 80;
    match content.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tawreed_core::ReceiptStamp;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn update(kind: EntityKind, new: Row, old: Option<Row>) -> ChangeEvent {
        ChangeEvent {
            entity: kind,
            change: Change::Update { new, old },
            committed_at: None,
            received_at: ReceiptStamp(1),
        }
    }

    #[test]
    fn every_kind_has_its_adapter() {
        for kind in EntityKind::ALL {
            assert_eq!(adapter_for(kind).kind(), kind);
        }
    }

    #[test]
    fn request_derives_owner_and_budget() {
        let mut f = fields(json!({"client_id": "c1", "budget_min": 1000, "budget_max": "2500.5"}));
        RequestAdapter.derive(&mut f);
        assert_eq!(f["user_id"], "c1");
        assert_eq!(f["budget_display"], "1000-2500.50 SAR");

        let mut f = fields(json!({"budget_max": 900, "currency": "usd"}));
        RequestAdapter.derive(&mut f);
        assert_eq!(f["budget_display"], "up to 900 USD");
        assert!(!f.contains_key("user_id"));
    }

    #[test]
    fn partial_payloads_get_no_defaults() {
        let mut f = fields(json!({"priority": "high"}));
        SupportTicketAdapter.derive(&mut f);
        assert!(!f.contains_key("status"));

        let mut f = fields(json!({"subject": "Refund", "priority": "high"}));
        SupportTicketAdapter.derive(&mut f);
        assert_eq!(f["status"], "open");
        assert_eq!(f["priority"], "high");
    }

    #[test]
    fn profile_display_name_falls_back() {
        let mut f = fields(json!({"first_name": "Sara", "last_name": " Ali "}));
        ProfileAdapter.derive(&mut f);
        assert_eq!(f["display_name"], "Sara Ali");

        let mut f = fields(json!({"full_name": "", "email": "s@example.com"}));
        ProfileAdapter.derive(&mut f);
        assert_eq!(f["display_name"], "s@example.com");
    }

    #[test]
    fn status_change_is_announced_once() {
        let current = Row::new("r1").with_field("title", "Audio gear");
        let changed = update(
            EntityKind::Request,
            Row::new("r1").with_field("status", "awarded"),
            Some(Row::new("r1").with_field("status", "open")),
        );
        let announcement = RequestAdapter.announce(&changed, Some(&current)).unwrap();
        assert_eq!(announcement.message, "\"Audio gear\" is now awarded");

        let unchanged = update(
            EntityKind::Request,
            Row::new("r1").with_field("status", "open"),
            Some(Row::new("r1").with_field("status", "open")),
        );
        assert!(RequestAdapter.announce(&unchanged, Some(&current)).is_none());
    }

    #[test]
    fn long_messages_are_previewed() {
        let long = "x".repeat(200);
        assert_eq!(preview(&long).len(), 83);
        assert_eq!(preview("hi"), "hi");
    }
}
