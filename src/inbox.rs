//! Inbox orchestrator.
//!
//! [`Inbox`] drives the page-level state machine: it restores or creates the
//! active address, polls for mail, tracks selection and read state, and
//! rotates to a fresh address when the backend reports expiry.
//!
//! `Inbox` is a cheap-to-clone handle. Operations may run concurrently; each
//! one takes a [`Ticket`](crate::state::Ticket) before going to the network and
//! its response is dropped if the state moved on in the meantime.

use crate::state::{InboxState, Slot, Ticket, ViewMode};
use crate::{Address, AddressCreate, AddressStore, Client, Error, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Default auto-refresh period.
pub const AUTO_REFRESH_INTERVAL: Duration = Duration::from_secs(15);
/// Default page size of list fetches.
pub const DEFAULT_PER_PAGE: u32 = 50;

/// Tunables of an [`Inbox`].
#[derive(Debug, Clone, Copy)]
pub struct InboxOptions {
    pub refresh_interval: Duration,
    pub per_page: u32,
}

impl Default for InboxOptions {
    fn default() -> Self {
        Self {
            refresh_interval: AUTO_REFRESH_INTERVAL,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

/// User-facing notifications emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The active address expired and was replaced.
    AddressRotated { expired: String, replacement: String },
    UsernameTaken,
    CreateFailed(String),
    RefreshFailed(String),
    LoadFailed(String),
    DeleteFailed(String),
    /// The address is active but could not be saved for the next session.
    PersistFailed(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::AddressRotated {
                expired,
                replacement,
            } => write!(f, "{expired} has expired. New address: {replacement}"),
            Notice::UsernameTaken => f.write_str(
                "This username is currently taken. Please choose a different username \
                 or leave it blank for a random email address.",
            ),
            Notice::CreateFailed(_) => {
                f.write_str("Failed to create email address. Please try again.")
            }
            Notice::RefreshFailed(_) => f.write_str("Failed to fetch emails. Please try again."),
            Notice::LoadFailed(_) => f.write_str("Failed to load email. Please try again."),
            Notice::DeleteFailed(_) => f.write_str("Failed to delete email. Please try again."),
            Notice::PersistFailed(reason) => {
                write!(f, "The address could not be saved: {reason}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RefreshKey {
    generation: Option<u64>,
    enabled: bool,
}

struct Shared {
    client: Client,
    store: Arc<dyn AddressStore>,
    options: InboxOptions,
    state: Mutex<InboxState>,
    notices: mpsc::UnboundedSender<Notice>,
    refresh_key: watch::Sender<RefreshKey>,
}

/// Handle to the inbox orchestrator.
#[derive(Clone)]
pub struct Inbox {
    shared: Arc<Shared>,
}

impl fmt::Debug for Inbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbox")
            .field("client", &self.shared.client)
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}

/// Marks the view model as loading until dropped.
struct Loading<'a>(&'a Inbox);

impl<'a> Loading<'a> {
    fn start(inbox: &'a Inbox) -> Self {
        inbox.with_state(InboxState::loading_started);
        Self(inbox)
    }
}

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        self.0.with_state(InboxState::loading_finished);
    }
}

impl Inbox {
    /// Create an orchestrator and the receiving end of its notifications.
    ///
    /// Nothing is fetched until [`Inbox::mount`] is called.
    pub fn new(
        client: Client,
        store: Arc<dyn AddressStore>,
        options: InboxOptions,
    ) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let (refresh_key, _) = watch::channel(RefreshKey {
            generation: None,
            enabled: true,
        });
        let inbox = Self {
            shared: Arc::new(Shared {
                client,
                store,
                options,
                state: Mutex::new(InboxState::default()),
                notices,
                refresh_key,
            }),
        };
        (inbox, notice_rx)
    }

    pub fn client(&self) -> &Client {
        &self.shared.client
    }

    /// Snapshot of the view model.
    pub fn state(&self) -> InboxState {
        self.with_state(|s| s.clone())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut InboxState) -> T) -> T {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    fn notify(&self, notice: Notice) {
        info!("{notice}");
        if self.shared.notices.send(notice).is_err() {
            debug!("notice receiver dropped");
        }
    }

    fn publish_refresh_key(&self) {
        let key = self.with_state(|s| RefreshKey {
            generation: s.address.as_ref().map(|_| s.generation()),
            enabled: s.auto_refresh,
        });
        self.shared.refresh_key.send_if_modified(|current| {
            let changed = *current != key;
            *current = key;
            changed
        });
    }

    /// Restore the persisted address, or create one, then fetch mail.
    ///
    /// Domains are loaded alongside.
    pub async fn mount(&self) -> Result<()> {
        let (restored, _) = tokio::join!(self.restore_or_create(), self.load_domains());
        restored
    }

    /// Make the persisted address active without fetching anything.
    ///
    /// Unlike [`Inbox::mount`] this never creates an address; it fails with
    /// [`Error::NoAddress`] when none is saved.
    pub fn resume(&self) -> Result<Address> {
        let address = self.shared.store.get()?.ok_or(Error::NoAddress)?;
        self.install_saved(address.clone());
        Ok(address)
    }

    fn install_saved(&self, address: Address) {
        debug!("restored address {}", address.email);
        self.with_state(|s| s.install_address(address));
        self.publish_refresh_key();
    }

    async fn restore_or_create(&self) -> Result<()> {
        match self.shared.store.get() {
            Ok(Some(address)) => {
                self.install_saved(address);
                self.refresh().await
            }
            Ok(None) => self.create_address(None, None).await.map(|_| ()),
            Err(e) => {
                warn!("failed to load saved address: {e}");
                self.create_address(None, None).await.map(|_| ())
            }
        }
    }

    /// Fetch the available domains. Failures are only logged.
    pub async fn load_domains(&self) -> Result<()> {
        let ticket = self.with_state(|s| s.begin(Slot::Domains));
        match self.shared.client.domains().await {
            Ok(domains) => {
                self.with_state(|s| s.apply_domains(ticket, domains));
                Ok(())
            }
            Err(e) => {
                warn!("failed to fetch domains: {e}");
                Err(e)
            }
        }
    }

    /// Replace the active address with a newly created one.
    ///
    /// `domain` falls back to the selected domain. On failure the current
    /// address and inbox are left untouched and a notice is emitted;
    /// [`Error::is_conflict`] tells a taken username apart. If a newer address
    /// was made active while the request was in flight, the created one is
    /// dropped and [`Error::Superseded`] is returned.
    pub async fn create_address(
        &self,
        username: Option<String>,
        domain: Option<String>,
    ) -> Result<Address> {
        self.create(username, domain, None).await
    }

    /// `rotation` carries the expiring address and the ticket claimed for its
    /// replacement.
    async fn create(
        &self,
        username: Option<String>,
        domain: Option<String>,
        rotation: Option<(Address, Ticket)>,
    ) -> Result<Address> {
        let (expired, ticket) = match rotation {
            Some((expired, ticket)) => (Some(expired), Some(ticket)),
            None => (None, None),
        };
        let (ticket, body) = self.with_state(|s| {
            let domain = domain.or_else(|| s.selected_domain.clone());
            let ticket = ticket.unwrap_or_else(|| s.begin(Slot::Address));
            (ticket, AddressCreate::new(username, domain))
        });

        let created = {
            let _loading = Loading::start(self);
            self.shared.client.create_address(&body).await
        };

        let address = match created {
            Ok(address) => address,
            Err(e) => {
                error!("failed to create address: {e}");
                if e.is_conflict() {
                    self.notify(Notice::UsernameTaken);
                } else {
                    self.notify(Notice::CreateFailed(e.to_string()));
                }
                return Err(e);
            }
        };

        if !self.with_state(|s| s.apply_address(ticket, address.clone())) {
            warn!("discarding superseded address {}", address.email);
            return Err(Error::Superseded(address.email));
        }
        self.publish_refresh_key();

        if let Err(e) = self.shared.store.set(&address) {
            error!("failed to save address: {e}");
            self.notify(Notice::PersistFailed(e.to_string()));
        }

        if let Some(old) = expired {
            self.notify(Notice::AddressRotated {
                expired: old.email,
                replacement: address.email.clone(),
            });
        }

        // A brand new address is not rotated again if the backend calls it expired.
        let (_, fetched) = self.fetch_list(false).await;
        if let Err(e) = self.report_list_result(false, fetched) {
            debug!("initial fetch for {} failed: {e}", address.email);
        }
        Ok(address)
    }

    /// Refetch the inbox, showing the loading indicator and reporting failures.
    pub async fn refresh(&self) -> Result<()> {
        self.fetch_emails(false).await
    }

    /// Refetch the inbox without touching the loading indicator or notifying.
    ///
    /// This is what the auto-refresh timer runs.
    pub async fn refresh_silently(&self) -> Result<()> {
        self.fetch_emails(true).await
    }

    async fn fetch_emails(&self, silent: bool) -> Result<()> {
        match self.fetch_list(silent).await {
            (generation, Err(e)) if e.is_expired() => {
                warn!("address expired while fetching emails");
                self.rotate(generation).await
            }
            (_, fetched) => self.report_list_result(silent, fetched),
        }
    }

    /// Fetch and apply one page of the inbox.
    ///
    /// Returns the generation the request was issued under next to the outcome.
    async fn fetch_list(&self, silent: bool) -> (u64, Result<()>) {
        let per_page = self.shared.options.per_page;
        let (generation, request) = self.with_state(|s| {
            let request = s.address.as_ref().map(|a| a.token.clone()).map(|token| {
                (token, s.begin(Slot::List), s.list_query(per_page))
            });
            (s.generation(), request)
        });
        let Some((token, ticket, query)) = request else {
            return (generation, Err(Error::NoAddress));
        };

        let fetched = {
            let _loading = (!silent).then(|| Loading::start(self));
            self.shared.client.list_emails(&token, &query).await
        };

        let outcome = fetched.map(|list| {
            if !self.with_state(|s| s.apply_list(ticket, list, Utc::now())) {
                debug!("discarding stale email list");
            }
        });
        (ticket.generation, outcome)
    }

    fn report_list_result(&self, silent: bool, fetched: Result<()>) -> Result<()> {
        match fetched {
            Ok(()) => Ok(()),
            Err(Error::NoAddress) if silent => Ok(()),
            Err(Error::NoAddress) => Err(Error::NoAddress),
            Err(e) if silent => {
                warn!("auto-refresh failed: {e}");
                Err(e)
            }
            Err(e) => {
                error!("failed to fetch emails: {e}");
                self.notify(Notice::RefreshFailed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Replace the expired address of `generation` with a fresh one.
    async fn rotate(&self, generation: u64) -> Result<()> {
        let Some((expired, ticket)) = self.with_state(|s| s.begin_rotation(generation)) else {
            debug!("rotation for generation {generation} already handled");
            return Ok(());
        };
        info!("rotating expired address {}", expired.email);

        match self.create(None, None, Some((expired, ticket))).await {
            Ok(_) => Ok(()),
            // Another address took over; the expired one is gone either way.
            Err(Error::Superseded(_)) => Ok(()),
            Err(e) => {
                self.with_state(|s| s.abort_rotation(generation));
                Err(e)
            }
        }
    }

    /// Open a message: fetch its detail (marking it read on the backend) and
    /// flip its summary to read.
    pub async fn select_email(&self, email_id: &str) -> Result<()> {
        self.open_email(email_id, true).await
    }

    /// Show a message without marking it read anywhere.
    pub async fn peek_email(&self, email_id: &str) -> Result<()> {
        self.open_email(email_id, false).await
    }

    async fn open_email(&self, email_id: &str, mark_read: bool) -> Result<()> {
        let (token, ticket) = self.with_state(|s| {
            let token = s.address.as_ref().map(|a| a.token.clone());
            (token, s.begin(Slot::Detail))
        });
        let token = token.ok_or(Error::NoAddress)?;

        let fetched = {
            let _loading = Loading::start(self);
            self.shared.client.get_email(&token, email_id, mark_read).await
        };

        match fetched {
            Ok(detail) => {
                if !self.with_state(|s| s.apply_detail(ticket, detail, mark_read)) {
                    debug!("discarding stale detail for {email_id}");
                }
                Ok(())
            }
            Err(e) if e.is_expired() => self.rotate(ticket.generation).await,
            Err(e) => {
                error!("failed to fetch email detail: {e}");
                self.notify(Notice::LoadFailed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Close the detail view.
    pub fn clear_selection(&self) {
        self.with_state(|s| s.selected = None);
    }

    /// Delete a message on the backend and drop it from the list.
    pub async fn delete_email(&self, email_id: &str) -> Result<()> {
        let (token, generation) = self.with_state(|s| {
            (s.address.as_ref().map(|a| a.token.clone()), s.generation())
        });
        let token = token.ok_or(Error::NoAddress)?;

        match self.shared.client.delete_email(&token, email_id).await {
            Ok(()) => {
                self.with_state(|s| s.remove_email(generation, email_id));
                Ok(())
            }
            Err(e) if e.is_expired() => self.rotate(generation).await,
            Err(e) => {
                error!("failed to delete email: {e}");
                self.notify(Notice::DeleteFailed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Set every list filter at once without fetching, e.g. before [`Inbox::mount`].
    pub fn set_filters(&self, search: impl Into<String>, unread_only: bool, page: u32) {
        let search = search.into();
        self.with_state(|s| {
            s.search = search;
            s.unread_only = unread_only;
            s.page = page.max(1);
        });
    }

    /// Set the search filter and refetch. An empty query clears the filter.
    pub async fn search(&self, query: impl Into<String>) -> Result<()> {
        let query = query.into();
        self.with_state(|s| {
            s.search = query;
            s.page = 1;
        });
        self.refresh().await
    }

    /// Show only unread messages (or all of them again) and refetch.
    pub async fn set_unread_only(&self, unread_only: bool) -> Result<()> {
        self.with_state(|s| {
            s.unread_only = unread_only;
            s.page = 1;
        });
        self.refresh().await
    }

    /// Move to another page of results and refetch.
    pub async fn go_to_page(&self, page: u32) -> Result<()> {
        self.with_state(|s| s.page = page.max(1));
        self.refresh().await
    }

    pub fn set_auto_refresh(&self, enabled: bool) {
        self.with_state(|s| s.auto_refresh = enabled);
        self.publish_refresh_key();
    }

    pub fn set_view_mode(&self, mode: ViewMode) {
        self.with_state(|s| s.view_mode = mode);
    }

    /// Domain used when creating an address without an explicit one.
    pub fn select_domain(&self, domain: impl Into<String>) {
        let domain = domain.into();
        self.with_state(|s| s.selected_domain = Some(domain));
    }

    /// Drop the active address locally and from the store.
    pub fn forget(&self) -> Result<()> {
        self.shared.store.clear()?;
        self.with_state(InboxState::remove_address);
        self.publish_refresh_key();
        Ok(())
    }

    /// Start the auto-refresh timer.
    ///
    /// Ticks every [`InboxOptions::refresh_interval`] while auto-refresh is
    /// enabled and an address is active, running [`Inbox::refresh_silently`].
    /// The interval restarts whenever the address changes. The timer stops
    /// when the returned handle is dropped.
    pub fn spawn_auto_refresh(&self) -> AutoRefresh {
        let inbox = self.clone();
        let mut key_rx = self.shared.refresh_key.subscribe();
        let period = self.shared.options.refresh_interval;

        let handle = tokio::spawn(async move {
            loop {
                let key = *key_rx.borrow_and_update();
                if !key.enabled || key.generation.is_none() {
                    if key_rx.changed().await.is_err() {
                        return;
                    }
                    continue;
                }

                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        changed = key_rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                            break;
                        }
                        _ = ticker.tick() => {
                            // Failures were logged; the next tick retries.
                            let _ = inbox.refresh_silently().await;
                        }
                    }
                }
            }
        });

        AutoRefresh { handle }
    }
}

/// Running auto-refresh timer. Dropping it stops the timer.
#[derive(Debug)]
pub struct AutoRefresh {
    handle: JoinHandle<()>,
}

impl AutoRefresh {
    pub fn stop(self) {}
}

impl Drop for AutoRefresh {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
