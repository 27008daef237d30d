//! Plain-text rendering of the inbox.

use crate::state::{InboxState, ViewMode};
use crate::{Address, Client, EmailDetail, EmailSummary, Verdict};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt::Write;

/// Parse a backend timestamp.
///
/// The backend sends either RFC 3339 or naive ISO 8601 timestamps; the latter
/// are taken to be UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// "just now", "5m ago", "3h ago", "2d ago".
pub fn format_relative(raw: &str, now: DateTime<Utc>) -> String {
    let Some(at) = parse_timestamp(raw) else {
        return raw.to_string();
    };
    let secs = (now - at).num_seconds();
    match secs {
        s if s < 60 => "just now".to_string(),
        s if s < 3600 => format!("{}m ago", s / 60),
        s if s < 86_400 => format!("{}h ago", s / 3600),
        s => format!("{}d ago", s / 86_400),
    }
}

/// Time left until `expires_at` as `Xh Ym`.
pub fn time_until_expiry(expires_at: &str, now: DateTime<Utc>) -> String {
    let Some(expiry) = parse_timestamp(expires_at) else {
        return "unknown".to_string();
    };
    let minutes = (expiry - now).num_minutes();
    if minutes <= 0 {
        return "expired".to_string();
    }
    format!("{}h {}m", minutes / 60, minutes % 60)
}

pub fn render_address(address: &Address, now: DateTime<Utc>) -> String {
    format!(
        "{}\nExpires in {}",
        address.email,
        time_until_expiry(&address.expires_at, now)
    )
}

fn summary_line(email: &EmailSummary, now: DateTime<Utc>) -> String {
    let marker = if email.is_read { ' ' } else { '*' };
    let clip = if email.has_attachments { " [att]" } else { "" };
    format!(
        "{marker} {:<12} {:<28} {}{clip}  {}  {}",
        email.id,
        email.from_address,
        email.subject.as_deref().unwrap_or("(no subject)"),
        format_relative(&email.received_at, now),
        format_bytes(email.size_bytes),
    )
}

/// The inbox list, with a header describing filters and paging.
pub fn render_inbox(state: &InboxState, now: DateTime<Utc>) -> String {
    let mut out = String::new();

    if let Some(address) = &state.address {
        let _ = writeln!(out, "Inbox of {}", address.email);
    }
    if !state.search.is_empty() {
        let _ = writeln!(out, "Search: {}", state.search);
    }
    if state.unread_only {
        let _ = writeln!(out, "Showing unread only");
    }

    if state.emails.is_empty() {
        let _ = writeln!(out, "No emails yet.");
    } else {
        for email in &state.emails {
            let _ = writeln!(out, "{}", summary_line(email, now));
        }
    }

    if let Some(info) = state.page_info {
        let _ = write!(out, "Page {} ({} total)", info.page, info.total);
        if info.has_prev {
            let _ = write!(out, "  [prev]");
        }
        if info.has_next {
            let _ = write!(out, "  [next]");
        }
        out.push('\n');
    }
    if let Some(at) = state.last_refresh {
        let _ = writeln!(out, "Last refreshed: {}", at.format("%H:%M:%S"));
    }
    out
}

fn verdict_label(name: &str, verdict: &Verdict) -> Option<String> {
    match verdict {
        Verdict::Pass => Some(format!("{name}: pass")),
        Verdict::Fail(label) => Some(format!("{name}: {label}")),
        Verdict::Unknown => None,
    }
}

/// Message body for the given mode. HTML falls back to plain text when absent.
pub fn render_body(detail: &EmailDetail, mode: ViewMode, width: usize) -> String {
    let html = detail.body_html.as_deref().filter(|h| !h.trim().is_empty());
    match (mode, html) {
        (ViewMode::Html, Some(html)) => html2text::from_read(html.as_bytes(), width),
        _ => detail
            .body_plain
            .clone()
            .or_else(|| html.map(|h| html2text::from_read(h.as_bytes(), width)))
            .unwrap_or_default(),
    }
}

pub fn render_detail(detail: &EmailDetail, mode: ViewMode, width: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Subject: {}",
        detail.subject.as_deref().unwrap_or("(no subject)")
    );
    let _ = writeln!(out, "From:    {}", detail.from_address);
    let _ = writeln!(out, "To:      {}", detail.to_address);
    let _ = writeln!(out, "Date:    {}", detail.received_at);

    let verdicts: Vec<String> = [
        verdict_label("DKIM", &detail.dkim()),
        verdict_label("SPF", &detail.spf()),
        verdict_label("DMARC", &detail.dmarc()),
    ]
    .into_iter()
    .flatten()
    .collect();
    if !verdicts.is_empty() {
        let _ = writeln!(out, "Auth:    {}", verdicts.join(", "));
    }
    if detail.has_attachments {
        let _ = writeln!(out, "{} attachment(s)", detail.attachments.len());
    }

    out.push('\n');
    out.push_str(render_body(detail, mode, width).trim_end());
    out.push('\n');
    out
}

/// One line per attachment with its download URL.
pub fn render_attachments(client: &Client, token: &str, detail: &EmailDetail) -> String {
    let mut out = String::new();
    for att in &detail.attachments {
        let _ = writeln!(
            out,
            "{} ({}, {})\n  {}",
            att.filename,
            att.content_type,
            format_bytes(att.size_bytes),
            client.attachment_url(token, &detail.id, &att.id)
        );
    }
    out
}
