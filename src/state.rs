//! In-memory view model of the inbox and the request sequencer guarding it.
//!
//! Every request takes a [`Ticket`] before it is sent. Replacing the active
//! address starts a new generation; responses carrying an older generation,
//! or an older sequence number than the last one applied to the same slot,
//! are dropped instead of overwriting fresher state.

use crate::{Address, EmailDetail, EmailList, EmailSummary, ListQuery};
use chrono::{DateTime, Utc};

/// The state slots a response can write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The active address. Only rotation tickets are bound to a generation,
    /// since user-requested addresses are what create new ones.
    Address,
    List,
    Detail,
    /// Available domains. Not address-scoped.
    Domains,
}

impl Slot {
    const COUNT: usize = 4;

    fn index(self) -> usize {
        match self {
            Slot::Address => 0,
            Slot::List => 1,
            Slot::Detail => 2,
            Slot::Domains => 3,
        }
    }

    fn address_scoped(self) -> bool {
        matches!(self, Slot::List | Slot::Detail)
    }
}

/// Proof of when a request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub slot: Slot,
    pub generation: u64,
    pub seq: u64,
    /// Rejected once the generation moves on.
    pub pinned: bool,
}

#[derive(Debug, Clone, Default)]
struct Sequencer {
    generation: u64,
    issued: [u64; Slot::COUNT],
    applied: [u64; Slot::COUNT],
}

impl Sequencer {
    fn issue(&mut self, slot: Slot) -> Ticket {
        let i = slot.index();
        self.issued[i] += 1;
        Ticket {
            slot,
            generation: self.generation,
            seq: self.issued[i],
            pinned: slot.address_scoped(),
        }
    }

    fn issue_pinned(&mut self, slot: Slot) -> Ticket {
        Ticket {
            pinned: true,
            ..self.issue(slot)
        }
    }

    fn accept(&mut self, ticket: Ticket) -> bool {
        if ticket.pinned && ticket.generation != self.generation {
            return false;
        }
        let i = ticket.slot.index();
        if ticket.seq <= self.applied[i] {
            return false;
        }
        self.applied[i] = ticket.seq;
        true
    }

    fn advance(&mut self) {
        self.generation += 1;
    }
}

/// Which body of a message to display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViewMode {
    #[default]
    Html,
    Plain,
}

/// Coarse state of the inbox page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxStatus {
    NoAddress,
    Empty,
    Populated,
    Selected,
}

/// Paging data of the last applied list response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

/// The single in-memory view model.
#[derive(Debug, Clone)]
pub struct InboxState {
    pub address: Option<Address>,
    pub emails: Vec<EmailSummary>,
    pub selected: Option<EmailDetail>,
    pub page_info: Option<PageInfo>,
    pub domains: Vec<String>,
    pub selected_domain: Option<String>,
    pub search: String,
    pub unread_only: bool,
    pub page: u32,
    pub auto_refresh: bool,
    pub view_mode: ViewMode,
    pub last_refresh: Option<DateTime<Utc>>,
    pending: u32,
    rotating: Option<u64>,
    sequencer: Sequencer,
}

impl Default for InboxState {
    fn default() -> Self {
        Self {
            address: None,
            emails: Vec::new(),
            selected: None,
            page_info: None,
            domains: Vec::new(),
            selected_domain: None,
            search: String::new(),
            unread_only: false,
            page: 1,
            auto_refresh: true,
            view_mode: ViewMode::default(),
            last_refresh: None,
            pending: 0,
            rotating: None,
            sequencer: Sequencer::default(),
        }
    }
}

impl InboxState {
    pub fn status(&self) -> InboxStatus {
        match (&self.address, &self.selected) {
            (None, _) => InboxStatus::NoAddress,
            (Some(_), Some(_)) => InboxStatus::Selected,
            (Some(_), None) if self.emails.is_empty() => InboxStatus::Empty,
            (Some(_), None) => InboxStatus::Populated,
        }
    }

    /// True while a user-visible request is in flight.
    pub fn is_loading(&self) -> bool {
        self.pending > 0
    }

    pub fn generation(&self) -> u64 {
        self.sequencer.generation
    }

    pub fn unread_count(&self) -> usize {
        self.emails.iter().filter(|e| !e.is_read).count()
    }

    pub(crate) fn begin(&mut self, slot: Slot) -> Ticket {
        self.sequencer.issue(slot)
    }

    pub(crate) fn loading_started(&mut self) {
        self.pending += 1;
    }

    pub(crate) fn loading_finished(&mut self) {
        self.pending = self.pending.saturating_sub(1);
    }

    pub(crate) fn list_query(&self, per_page: u32) -> ListQuery {
        ListQuery {
            page: (self.page > 1).then_some(self.page),
            per_page: Some(per_page),
            unread_only: self.unread_only,
            search: Some(self.search.trim().to_string()).filter(|s| !s.is_empty()),
        }
    }

    /// Make `address` the active one, dropping everything scoped to the old one.
    pub(crate) fn install_address(&mut self, address: Address) {
        self.address = Some(address);
        self.reset_mailbox();
    }

    pub(crate) fn remove_address(&mut self) {
        self.address = None;
        self.reset_mailbox();
    }

    fn reset_mailbox(&mut self) {
        self.emails.clear();
        self.selected = None;
        self.page_info = None;
        self.last_refresh = None;
        self.rotating = None;
        self.sequencer.advance();
    }

    /// Apply a newly created address. Returns false if the response is stale.
    pub(crate) fn apply_address(&mut self, ticket: Ticket, address: Address) -> bool {
        if !self.sequencer.accept(ticket) {
            return false;
        }
        self.install_address(address);
        self.page = 1;
        true
    }

    pub(crate) fn apply_list(&mut self, ticket: Ticket, list: EmailList, now: DateTime<Utc>) -> bool {
        if !self.sequencer.accept(ticket) {
            return false;
        }
        self.page_info = Some(PageInfo {
            total: list.total,
            page: list.page,
            per_page: list.per_page,
            has_next: list.has_next,
            has_prev: list.has_prev,
        });
        self.emails = list.emails;
        self.last_refresh = Some(now);
        true
    }

    /// Show `detail`, flipping the matching summary to read if `marked_read`.
    pub(crate) fn apply_detail(&mut self, ticket: Ticket, detail: EmailDetail, marked_read: bool) -> bool {
        if !self.sequencer.accept(ticket) {
            return false;
        }
        if marked_read {
            if let Some(summary) = self.emails.iter_mut().find(|e| e.id == detail.id) {
                summary.is_read = true;
            }
        }
        self.selected = Some(detail);
        true
    }

    pub(crate) fn apply_domains(&mut self, ticket: Ticket, domains: Vec<String>) -> bool {
        if !self.sequencer.accept(ticket) {
            return false;
        }
        let keep_current = self
            .selected_domain
            .as_ref()
            .is_some_and(|d| domains.contains(d));
        if !keep_current {
            self.selected_domain = domains.first().cloned();
        }
        self.domains = domains;
        true
    }

    /// Drop a deleted message from the list. Ignored for a superseded address.
    pub(crate) fn remove_email(&mut self, generation: u64, email_id: &str) -> bool {
        if generation != self.sequencer.generation {
            return false;
        }
        self.emails.retain(|e| e.id != email_id);
        if self.selected.as_ref().is_some_and(|s| s.id == email_id) {
            self.selected = None;
        }
        true
    }

    /// Claim the rotation of the address of `generation`.
    ///
    /// Returns the expiring address and the ticket for its replacement if the
    /// caller should rotate it, `None` if the address was already replaced or
    /// another rotation is under way. The ticket is void as soon as any other
    /// address is installed.
    pub(crate) fn begin_rotation(&mut self, generation: u64) -> Option<(Address, Ticket)> {
        if generation != self.sequencer.generation || self.rotating == Some(generation) {
            return None;
        }
        let address = self.address.clone()?;
        self.rotating = Some(generation);
        Some((address, self.sequencer.issue_pinned(Slot::Address)))
    }

    pub(crate) fn abort_rotation(&mut self, generation: u64) {
        if self.rotating == Some(generation) {
            self.rotating = None;
        }
    }
}
