//! Wire models for the Mailbucket backend.

use serde::{Deserialize, Serialize};

/// A temporary mailbox issued by the backend.
///
/// This is also the record persisted by [`AddressStore`](crate::AddressStore),
/// so it serializes back to the same JSON shape it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Backend identifier of the address.
    pub id: String,
    /// Full email address (e.g. `alice@example.com`).
    pub email: String,
    /// Bearer token scoping all mail access to this address.
    pub token: String,
    /// Creation timestamp as sent by the backend.
    pub created_at: String,
    /// Expiry timestamp as sent by the backend.
    pub expires_at: String,
}

/// Request body for `POST /addresses`.
///
/// Both fields are optional; the backend picks a random username and its
/// default domain for whatever is left out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddressCreate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl AddressCreate {
    pub fn new(username: Option<String>, domain: Option<String>) -> Self {
        fn non_empty(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }
        Self {
            username: non_empty(username),
            domain: non_empty(domain),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DomainList {
    pub domains: Vec<String>,
}

/// An inbox entry as returned by the list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSummary {
    /// Backend identifier of the message.
    pub id: String,
    /// Subject line, if the message had one.
    pub subject: Option<String>,
    /// Sender address.
    pub from_address: String,
    /// Recipient address (the temporary mailbox).
    pub to_address: String,
    /// Receipt timestamp as sent by the backend.
    pub received_at: String,
    /// Whether the message was opened.
    pub is_read: bool,
    /// Whether the message carries attachments.
    pub has_attachments: bool,
    /// Size of the raw message in bytes.
    pub size_bytes: u64,
}

/// One page of inbox entries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmailList {
    /// Entries of this page.
    pub emails: Vec<EmailSummary>,
    /// Number of entries matching the filters across all pages.
    pub total: u64,
    /// 1-based page number.
    pub page: u32,
    /// Page size the backend applied.
    pub per_page: u32,
    /// Whether a following page exists.
    pub has_next: bool,
    /// Whether a preceding page exists.
    pub has_prev: bool,
}

/// Attachment descriptor of an [`EmailDetail`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    /// Backend identifier, used in the download URL.
    pub id: String,
    /// Original file name.
    pub filename: String,
    /// MIME type (e.g. `application/pdf`).
    pub content_type: String,
    /// Decoded size in bytes.
    pub size_bytes: u64,
}

/// Full message content.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmailDetail {
    /// Backend identifier of the message.
    pub id: String,
    /// `Message-ID` header, if present.
    pub message_id: Option<String>,
    /// Subject line, if the message had one.
    pub subject: Option<String>,
    /// Sender address.
    pub from_address: String,
    /// Recipient address (the temporary mailbox).
    pub to_address: String,
    /// Header block of the raw message.
    pub raw_headers: String,
    /// Plain-text body.
    pub body_plain: Option<String>,
    /// HTML body.
    pub body_html: Option<String>,
    /// Size of the raw message in bytes.
    pub size_bytes: u64,
    /// DKIM signature check; `None` when it was not performed.
    pub dkim_valid: Option<bool>,
    /// SPF result label (`"pass"`, `"fail"`, `"softfail"`, ...).
    pub spf_result: Option<String>,
    /// DMARC result label.
    pub dmarc_result: Option<String>,
    /// Whether the message carries attachments.
    pub has_attachments: bool,
    /// Receipt timestamp as sent by the backend.
    pub received_at: String,
    /// Whether the message was opened.
    pub is_read: bool,
    /// Attachment descriptors. Missing in the response means none.
    #[serde(default)]
    pub attachments: Vec<AttachmentInfo>,
}

/// Outcome of one sender authentication check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    /// Failed; carries the backend's label (`"softfail"`, `"none"`, ...).
    Fail(String),
    Unknown,
}

impl Verdict {
    fn from_result(result: Option<&str>) -> Self {
        match result {
            None => Verdict::Unknown,
            Some(r) if r.eq_ignore_ascii_case("pass") => Verdict::Pass,
            Some(r) => Verdict::Fail(r.to_string()),
        }
    }
}

impl EmailDetail {
    pub fn dkim(&self) -> Verdict {
        match self.dkim_valid {
            Some(true) => Verdict::Pass,
            Some(false) => Verdict::Fail("invalid".to_string()),
            None => Verdict::Unknown,
        }
    }

    pub fn spf(&self) -> Verdict {
        Verdict::from_result(self.spf_result.as_deref())
    }

    pub fn dmarc(&self) -> Verdict {
        Verdict::from_result(self.dmarc_result.as_deref())
    }
}

/// Query parameters for the list endpoint.
///
/// Unset values are not sent, leaving the backend defaults in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub unread_only: bool,
    pub search: Option<String>,
}

impl ListQuery {
    pub(crate) fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(page) = self.page {
            params.push(("page", page.to_string()));
        }
        if let Some(per_page) = self.per_page {
            params.push(("per_page", per_page.to_string()));
        }
        if self.unread_only {
            params.push(("unread_only", "true".to_string()));
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            params.push(("search", search.to_string()));
        }
        params
    }
}
