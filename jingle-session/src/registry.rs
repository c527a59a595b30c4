//! Session registry
//!
//! One registry serves one local endpoint (one IM connection). It owns every
//! live session, routes inbound actions to the handlers, and runs the work
//! handlers ask for: outbound messages, transport establishment, fallback,
//! transfers and termination.
//!
//! Locking: the session map is a plain mutex held only to look up, insert
//! or remove entries. Each session has its own async mutex, so actions on
//! one session are serialized while different sessions proceed in parallel.
//! Listener callbacks always run after the session lock is released.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use jingle_common::protocol::{
    ContentElement, Creator, DescriptionElement, Jid, JingleAction, JingleMessage,
    JingleResponse, Reason, ReasonElement, Role, SecurityElement, Senders, SessionId,
    SessionInfo,
};
use jingle_common::validators::validate_content_name;
use jingle_common::{NS_HASHES, NS_JINGLE, NegotiationError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, mpsc};
use tracing::{debug, info, warn};

use crate::capability::{CapabilityRegistry, Discovery};
use crate::config::{ConfigError, EngineConfig};
use crate::content::{Content, ContentState, OutcomeReceiver, record_outcome};
use crate::digest::{DigestService, Sha2Digests};
use crate::error::{ContentError, JingleError, TransferFailure, TransportError};
use crate::events::{EventHub, SessionEvent, TransferEvent, TransferEventKind, TransferOutcome};
use crate::file_transfer::{IncomingFileOffer, IncomingFileRequest};
use crate::messaging::{FailurePolicy, MessageSender, Outbound};
use crate::security::{SecurityLayer, SecurityRegistry};
use crate::session::handlers::{ContentKind, Effect, HandlerContext, handler_for};
use crate::session::{Session, SessionKey, SessionSnapshot, SessionState};
use crate::transfers::task::{self, TransferJob};
use crate::transfers::{
    ActiveTransfer, TransferDirection, TransferGuard, TransferRegistry, TransferSpec,
};
use crate::transports::{
    ByteChannel, EstablishParams, TransportManager, TransportPlugin,
};

/// Read-only collaborators the handlers consult
pub(crate) struct Environment {
    pub local: Jid,
    pub config: EngineConfig,
    pub transports: TransportManager,
    pub security: SecurityRegistry,
    pub digests: Arc<dyn DigestService>,
}

type SessionHandle = Arc<AsyncMutex<Session>>;

struct RegistryInner {
    env: Environment,
    capabilities: CapabilityRegistry,
    sessions: Mutex<HashMap<SessionKey, SessionHandle>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: EventHub,
    transfers: Arc<TransferRegistry>,
}

/// Listener work collected under a session lock and run after it is released
enum Notice {
    Offer(IncomingFileOffer),
    Request(IncomingFileRequest),
    Transfer(TransferEvent),
    Session(SessionEvent),
}

/// A content to propose in a new session or via content-add
#[derive(Debug, Clone)]
pub struct OutgoingContent {
    pub name: String,
    pub senders: Senders,
    pub description: DescriptionElement,
    /// Local file to send from or receive into
    pub endpoint: PathBuf,
    pub security: Option<SecurityElement>,
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SessionRegistry`]
pub struct SessionRegistryBuilder {
    local: Jid,
    sender: Arc<dyn MessageSender>,
    discovery: Arc<dyn Discovery>,
    config: EngineConfig,
    transports: Vec<Arc<dyn TransportPlugin>>,
    security: Vec<Arc<dyn SecurityLayer>>,
    digests: Arc<dyn DigestService>,
}

impl SessionRegistryBuilder {
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn transport(mut self, plugin: Arc<dyn TransportPlugin>) -> Self {
        self.transports.push(plugin);
        self
    }

    #[must_use]
    pub fn security_layer(mut self, layer: Arc<dyn SecurityLayer>) -> Self {
        self.security.push(layer);
        self
    }

    #[must_use]
    pub fn digests(mut self, digests: Arc<dyn DigestService>) -> Self {
        self.digests = digests;
        self
    }

    /// Validate the configuration, announce local features and start the
    /// outbound writer
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<SessionRegistry, JingleError> {
        self.config.validate()?;
        if !self.digests.is_supported(self.config.digest_algorithm) {
            return Err(ConfigError::Invalid(format!(
                "digest service cannot compute {}",
                self.config.digest_algorithm
            ))
            .into());
        }
        if self.transports.is_empty() {
            return Err(
                ConfigError::Invalid("at least one transport plugin is required".into()).into(),
            );
        }

        let transports = TransportManager::new(self.transports, &self.config.transport_preference);
        let (outbound, queue) = mpsc::unbounded_channel();
        let inner = Arc::new(RegistryInner {
            env: Environment {
                local: self.local,
                config: self.config,
                transports,
                security: SecurityRegistry::new(self.security),
                digests: self.digests,
            },
            capabilities: CapabilityRegistry::new(self.discovery),
            sessions: Mutex::new(HashMap::new()),
            outbound,
            events: EventHub::default(),
            transfers: Arc::new(TransferRegistry::new()),
        });
        spawn_writer(Arc::downgrade(&inner), self.sender, queue);

        let registry = SessionRegistry { inner };
        registry.announce_features();
        info!(
            local = %registry.local(),
            transports = ?registry.inner.env.transports.namespaces(),
            "session registry ready"
        );
        Ok(registry)
    }
}

/// Drain the outbound queue in order
///
/// Holds only a weak reference so dropping the last [`SessionRegistry`]
/// closes the queue and ends the task.
fn spawn_writer(
    registry: Weak<RegistryInner>,
    sender: Arc<dyn MessageSender>,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
) {
    tokio::spawn(async move {
        while let Some(Outbound { message, policy }) = queue.recv().await {
            let to = message.to.clone();
            let sid = message.sid.clone();
            let action = message.action;
            let (error, reason) = match sender.send(&to, message).await {
                Ok(JingleResponse::Result) => continue,
                Ok(JingleResponse::Error { condition, .. }) => {
                    (JingleError::Remote(condition), Reason::GeneralError)
                }
                Err(e) => (e, Reason::ConnectivityError),
            };

            match policy {
                FailurePolicy::LogOnly => {
                    warn!(peer = %to, %sid, %action, error = %error, "jingle request failed");
                }
                FailurePolicy::TerminateOnFailure(key) => {
                    warn!(
                        peer = %to,
                        %sid,
                        %action,
                        error = %error,
                        "jingle request failed, ending session"
                    );
                    let Some(inner) = registry.upgrade() else {
                        break;
                    };
                    SessionRegistry { inner }
                        .finish_session(&key, ReasonElement::new(reason), false)
                        .await;
                }
            }
        }
        debug!("outbound writer stopped");
    });
}

// =============================================================================
// Registry
// =============================================================================

/// All live sessions of one local endpoint
///
/// Cloning is cheap and yields another handle to the same registry.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

/// Non-owning handle held by background tasks and caller-facing handles
#[derive(Clone)]
pub struct WeakSessionRegistry {
    inner: Weak<RegistryInner>,
}

impl WeakSessionRegistry {
    pub fn upgrade(&self) -> Option<SessionRegistry> {
        self.inner.upgrade().map(|inner| SessionRegistry { inner })
    }
}

impl fmt::Debug for WeakSessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSessionRegistry")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("local", &self.inner.env.local)
            .field("sessions", &self.session_count())
            .finish()
    }
}

impl SessionRegistry {
    pub fn builder(
        local: Jid,
        sender: Arc<dyn MessageSender>,
        discovery: Arc<dyn Discovery>,
    ) -> SessionRegistryBuilder {
        SessionRegistryBuilder {
            local,
            sender,
            discovery,
            config: EngineConfig::default(),
            transports: Vec::new(),
            security: Vec::new(),
            digests: Arc::new(Sha2Digests),
        }
    }

    pub fn local(&self) -> &Jid {
        &self.inner.env.local
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.env.config
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.inner.capabilities
    }

    pub fn events(&self) -> &EventHub {
        &self.inner.events
    }

    pub(crate) fn digests(&self) -> &dyn DigestService {
        self.inner.env.digests.as_ref()
    }

    pub fn downgrade(&self) -> WeakSessionRegistry {
        WeakSessionRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Running transfers, for monitoring
    pub fn transfers(&self) -> Vec<Arc<ActiveTransfer>> {
        self.inner.transfers.snapshot()
    }

    pub fn session_keys(&self) -> Vec<SessionKey> {
        let mut keys: Vec<SessionKey> = self
            .inner
            .sessions
            .lock()
            .expect("session map lock poisoned")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn session_count(&self) -> usize {
        self.inner
            .sessions
            .lock()
            .expect("session map lock poisoned")
            .len()
    }

    pub async fn session(&self, key: &SessionKey) -> Option<SessionSnapshot> {
        let handle = self.session_handle(key)?;
        let session = handle.lock().await;
        Some(session.snapshot())
    }

    /// Whether any local transport is also supported by `peer`
    pub async fn has_common_transport(&self, peer: &Jid) -> bool {
        self.inner
            .env
            .transports
            .best_for(peer, &self.inner.capabilities, &BTreeSet::new())
            .await
            .is_some()
    }

    fn announce_features(&self) {
        let caps = &self.inner.capabilities;
        caps.announce(NS_JINGLE);
        for namespace in self.inner.env.transports.namespaces() {
            caps.announce(&namespace);
        }
        caps.announce(NS_HASHES);
        for algorithm in self.inner.env.digests.supported_algorithms() {
            caps.announce(&algorithm.feature());
        }
        for namespace in self.inner.env.security.namespaces() {
            caps.announce(&namespace);
        }
    }

    fn session_handle(&self, key: &SessionKey) -> Option<SessionHandle> {
        self.inner
            .sessions
            .lock()
            .expect("session map lock poisoned")
            .get(key)
            .cloned()
    }

    /// Lock a live session for a local operation
    async fn locked(&self, key: &SessionKey) -> Result<OwnedMutexGuard<Session>, JingleError> {
        let handle = self
            .session_handle(key)
            .ok_or_else(|| JingleError::UnknownSession(key.sid.clone()))?;
        let session = handle.lock_owned().await;
        if session.state() == SessionState::Terminated {
            return Err(JingleError::SessionTerminated);
        }
        Ok(session)
    }

    fn enqueue(&self, message: JingleMessage, policy: FailurePolicy) {
        debug!(
            peer = %message.to,
            sid = %message.sid,
            action = %message.action,
            "queueing jingle request"
        );
        if self
            .inner
            .outbound
            .send(Outbound { message, policy })
            .is_err()
        {
            warn!("outbound queue closed, dropping jingle request");
        }
    }

    fn emit(&self, notices: Vec<Notice>) {
        let events = &self.inner.events;
        for notice in notices {
            match notice {
                Notice::Offer(offer) => events.offers.notify(&offer),
                Notice::Request(request) => events.requests.notify(&request),
                Notice::Transfer(event) => events.transfers.notify(&event),
                Notice::Session(event) => events.sessions.notify(&event),
            }
        }
    }

    // =========================================================================
    // Inbound dispatch
    // =========================================================================

    /// Handle one inbound Jingle request and compute its response
    ///
    /// Protocol errors never escape as `Err`; they become error responses.
    pub async fn dispatch(&self, message: JingleMessage) -> JingleResponse {
        debug!(
            peer = %message.from,
            sid = %message.sid,
            action = %message.action,
            "inbound jingle request"
        );
        if let Err(e) = message.validate() {
            debug!(sid = %message.sid, error = %e, "malformed jingle request");
            return JingleResponse::error(e);
        }
        if message.to != self.inner.env.local {
            debug!(to = %message.to, "jingle request addressed elsewhere");
            return JingleResponse::error(NegotiationError::BadRequest);
        }

        let key = SessionKey::new(message.from.clone(), message.sid.clone());
        if message.action == JingleAction::SessionInitiate {
            return self.dispatch_initiate(key, &message).await.into();
        }

        let Some(handle) = self.session_handle(&key) else {
            debug!(%key, action = %message.action, "unknown session");
            return JingleResponse::error(NegotiationError::UnknownSession);
        };
        let mut session = handle.lock().await;
        if session.state() == SessionState::Terminated {
            return JingleResponse::error(NegotiationError::UnknownSession);
        }

        let mut ctx = HandlerContext::new(&mut session, &self.inner.env);
        let result = handler_for(message.action)(&message, &mut ctx);
        let effects = ctx.effects;
        if let Err(e) = result {
            debug!(%key, action = %message.action, error = %e, "jingle request refused");
            return JingleResponse::error(e);
        }

        let mut notices = Vec::new();
        self.apply_effects(&mut session, effects, &mut notices);
        drop(session);
        self.emit(notices);
        JingleResponse::Result
    }

    async fn dispatch_initiate(
        &self,
        key: SessionKey,
        message: &JingleMessage,
    ) -> Result<(), NegotiationError> {
        if self.session_handle(&key).is_some() {
            return Err(NegotiationError::Conflict);
        }

        let mut session = Session::new(
            message.from.clone(),
            self.inner.env.local.clone(),
            message.sid.clone(),
            Role::Responder,
        );
        let mut ctx = HandlerContext::new(&mut session, &self.inner.env);
        let result = handler_for(JingleAction::SessionInitiate)(message, &mut ctx);
        let effects = ctx.effects;
        result?;

        let handle = Arc::new(AsyncMutex::new(session));
        let mut session = Arc::clone(&handle).lock_owned().await;
        match self
            .inner
            .sessions
            .lock()
            .expect("session map lock poisoned")
            .entry(key)
        {
            Entry::Occupied(_) => return Err(NegotiationError::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(handle);
            }
        }

        let mut notices = Vec::new();
        self.apply_effects(&mut session, effects, &mut notices);
        drop(session);
        self.emit(notices);
        Ok(())
    }

    fn apply_effects(&self, session: &mut Session, effects: Vec<Effect>, notices: &mut Vec<Notice>) {
        for effect in effects {
            match effect {
                Effect::Send(message) => self.enqueue(message, FailurePolicy::LogOnly),
                Effect::Establish { creator, name } => {
                    self.spawn_establish(session, creator, &name, notices);
                }
                Effect::Fallback { creator, name } => self.spawn_fallback(session, creator, name),
                Effect::Incoming {
                    creator,
                    name,
                    kind,
                } => self.announce_incoming(session, creator, &name, kind, notices),
                Effect::CancelContent { creator, name } => {
                    self.cancel_content(session, creator, &name, notices);
                }
                Effect::Terminate {
                    reason,
                    notify_peer,
                } => {
                    self.terminate_locked(session, reason, notify_peer, notices);
                }
            }
        }
    }

    fn announce_incoming(
        &self,
        session: &mut Session,
        creator: Creator,
        name: &str,
        kind: ContentKind,
        notices: &mut Vec<Notice>,
    ) {
        let Some(file) = session.content(creator, name).and_then(Content::file).cloned() else {
            return;
        };
        let key = session.key();
        let unheard = match kind {
            ContentKind::Offer => self.inner.events.offers.is_empty(),
            ContentKind::Request => self.inner.events.requests.is_empty(),
        };
        if unheard {
            info!(%key, content = name, ?kind, "nobody listens for incoming files, declining");
            self.terminate_locked(session, ReasonElement::new(Reason::Decline), true, notices);
            return;
        }

        let registry = self.downgrade();
        let name = name.to_string();
        notices.push(match kind {
            ContentKind::Offer => {
                Notice::Offer(IncomingFileOffer::new(registry, key, creator, name, file))
            }
            ContentKind::Request => {
                Notice::Request(IncomingFileRequest::new(registry, key, creator, name, file))
            }
        });
    }

    fn cancel_content(
        &self,
        session: &Session,
        creator: Creator,
        name: &str,
        notices: &mut Vec<Notice>,
    ) {
        let key = session.key();
        self.inner.transfers.cancel_content(&key, creator, name);
        let Some(content) = session.content(creator, name) else {
            return;
        };
        let outcome = TransferOutcome::Failure(TransferFailure::Cancelled);
        if record_outcome(&content.outcome_slot(), outcome.clone()) {
            notices.push(Notice::Transfer(transfer_event(
                &key,
                name,
                TransferEventKind::Finished(outcome),
            )));
        }
    }

    /// Terminate a session whose lock the caller holds
    ///
    /// Removes it from the map, cancels its transfers, settles every
    /// content's outcome and optionally tells the peer. Returns `false` if
    /// it was already terminated.
    fn terminate_locked(
        &self,
        session: &mut Session,
        reason: ReasonElement,
        notify_peer: bool,
        notices: &mut Vec<Notice>,
    ) -> bool {
        if !session.terminate() {
            return false;
        }
        let key = session.key();
        self.inner
            .sessions
            .lock()
            .expect("session map lock poisoned")
            .remove(&key);
        let cancelled = self.inner.transfers.cancel_session(&key);

        let role = session.role();
        for content in session.contents() {
            // Only a send the peer confirmed with session-info received
            // counts as delivered; anything else unsettled has failed
            let confirmed = reason.reason == Reason::Success
                && content.senders().includes(role)
                && content.peer_received();
            let outcome = if confirmed {
                let bytes = content
                    .file()
                    .and_then(|f| f.transfer_window())
                    .map_or(0, |(_, length)| length);
                TransferOutcome::Success { bytes }
            } else {
                TransferOutcome::Failure(TransferFailure::SessionTerminated(reason.reason))
            };
            if record_outcome(&content.outcome_slot(), outcome.clone()) {
                notices.push(Notice::Transfer(transfer_event(
                    &key,
                    content.name(),
                    TransferEventKind::Finished(outcome),
                )));
            }
        }

        if notify_peer {
            let message = session
                .message(JingleAction::SessionTerminate)
                .with_reason(reason.clone());
            self.enqueue(message, FailurePolicy::LogOnly);
        }
        info!(
            %key,
            reason = %reason.reason,
            notify_peer,
            cancelled_transfers = cancelled,
            "session terminated"
        );
        notices.push(Notice::Session(SessionEvent::Terminated {
            sid: key.sid.clone(),
            peer: key.remote.clone(),
            reason: reason.reason,
            failed_transports: session.failed_transport_methods().iter().cloned().collect(),
        }));
        true
    }

    /// Terminate a session by key; `false` if it is unknown or already gone
    async fn finish_session(&self, key: &SessionKey, reason: ReasonElement, notify_peer: bool) -> bool {
        let Some(handle) = self.session_handle(key) else {
            return false;
        };
        let mut session = handle.lock().await;
        let mut notices = Vec::new();
        let terminated = self.terminate_locked(&mut session, reason, notify_peer, &mut notices);
        drop(session);
        self.emit(notices);
        terminated
    }

    // =========================================================================
    // Transport establishment and fallback
    // =========================================================================

    fn spawn_establish(
        &self,
        session: &mut Session,
        creator: Creator,
        name: &str,
        notices: &mut Vec<Notice>,
    ) {
        if session.state() != SessionState::Active {
            return;
        }
        let Some(content) = session.content(creator, name) else {
            return;
        };
        let Some(descriptor) = content.transport().cloned() else {
            return;
        };
        let security = match content.security() {
            None => None,
            Some(element) => match self.inner.env.security.get(&element.namespace) {
                Some(layer) => Some(layer),
                None => {
                    warn!(namespace = %element.namespace, "no local security layer");
                    self.terminate_locked(
                        session,
                        ReasonElement::new(Reason::SecurityError),
                        true,
                        notices,
                    );
                    return;
                }
            },
        };
        let Some(plugin) = self.inner.env.transports.get(&descriptor.namespace) else {
            warn!(namespace = %descriptor.namespace, "no plugin for agreed transport");
            session.mark_transport_failed(&descriptor.namespace);
            if session.is_initiator() {
                self.spawn_fallback(session, creator, name.to_string());
            }
            return;
        };

        let key = session.key();
        let role = session.role();
        let params = EstablishParams {
            local: session.local().clone(),
            remote: session.remote().clone(),
            sid: session.sid().clone(),
            role,
            descriptor,
            timeout: self.inner.env.config.establish_timeout(),
        };
        let mut cancel = session.cancel_signal();
        let Some(content) = session.content_mut(creator, name) else {
            return;
        };
        let generation = content.begin_attempt();
        info!(
            %key,
            content = name,
            namespace = plugin.namespace(),
            generation,
            "establishing transport"
        );

        let registry = self.downgrade();
        let name = name.to_string();
        let handle = tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(TransportError::Cancelled),
                result = open_channel(plugin, params, security, role) => result,
            };
            if let Some(registry) = registry.upgrade() {
                registry
                    .on_established(key, creator, name, generation, result)
                    .await;
            }
        });
        content.set_establishing(handle.abort_handle());
    }

    async fn on_established(
        &self,
        key: SessionKey,
        creator: Creator,
        name: String,
        generation: u64,
        result: Result<ByteChannel, TransportError>,
    ) {
        let Some(handle) = self.session_handle(&key) else {
            debug!(%key, content = %name, "session gone, dropping establishment result");
            return;
        };
        let mut session = handle.lock().await;
        if session.state() == SessionState::Terminated {
            return;
        }
        let Some(content) = session.content_mut(creator, &name) else {
            return;
        };
        if !content.finish_attempt(generation) {
            debug!(%key, content = %name, generation, "stale establishment result dropped");
            return;
        }
        let namespace = content
            .transport()
            .map(|t| t.namespace.clone())
            .unwrap_or_default();
        let live = content.is_live();

        let mut notices = Vec::new();
        match result {
            Ok(channel) if live => {
                info!(%key, content = %name, %namespace, "transport established");
                self.start_transfer(&mut session, creator, &name, channel, &mut notices);
            }
            Ok(_) => debug!(%key, content = %name, "content no longer live, closing channel"),
            Err(e) => {
                warn!(%key, content = %name, %namespace, error = %e, "transport failed");
                session.mark_transport_failed(&namespace);
                if session.is_initiator() {
                    self.spawn_fallback(&session, creator, name);
                } else {
                    debug!(%key, "waiting for the initiator to replace the transport");
                }
            }
        }
        drop(session);
        self.emit(notices);
    }

    /// Look for the next transport outside the session lock
    fn spawn_fallback(&self, session: &Session, creator: Creator, name: String) {
        let excluded = session.failed_transport_methods().clone();
        let peer = session.remote().clone();
        let key = session.key();
        let registry = self.downgrade();
        tokio::spawn(async move {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let next = registry
                .inner
                .env
                .transports
                .best_for(&peer, &registry.inner.capabilities, &excluded)
                .await;
            registry.apply_fallback(key, creator, name, next).await;
        });
    }

    async fn apply_fallback(
        &self,
        key: SessionKey,
        creator: Creator,
        name: String,
        next: Option<Arc<dyn TransportPlugin>>,
    ) {
        let Some(handle) = self.session_handle(&key) else {
            return;
        };
        let mut session = handle.lock().await;
        if session.state() == SessionState::Terminated {
            return;
        }

        let mut notices = Vec::new();
        match next {
            // Another content failed on this method while we were looking
            Some(plugin) if session.is_transport_failed(plugin.namespace()) => {
                self.spawn_fallback(&session, creator, name);
            }
            Some(plugin) => {
                let proposal = plugin.propose_for_initiator(&name);
                let message = session.message(JingleAction::TransportReplace).with_content(
                    ContentElement::new(creator, name.clone()).with_transport(proposal.clone()),
                );
                let Some(content) = session.content_mut(creator, &name) else {
                    return;
                };
                if !content.is_live() {
                    return;
                }
                content.propose_replacement(proposal);
                info!(
                    %key,
                    content = %name,
                    namespace = plugin.namespace(),
                    "proposing replacement transport"
                );
                self.enqueue(message, FailurePolicy::LogOnly);
            }
            None => {
                warn!(
                    %key,
                    failed = ?session.failed_transport_methods(),
                    "no transport left to try"
                );
                self.terminate_locked(
                    &mut session,
                    ReasonElement::new(Reason::FailedTransport),
                    true,
                    &mut notices,
                );
            }
        }
        drop(session);
        self.emit(notices);
    }

    // =========================================================================
    // Transfers
    // =========================================================================

    fn start_transfer(
        &self,
        session: &mut Session,
        creator: Creator,
        name: &str,
        channel: ByteChannel,
        notices: &mut Vec<Notice>,
    ) {
        let key = session.key();
        let Some(content) = session.content(creator, name) else {
            return;
        };
        let direction = if session.sends(content.senders()) {
            TransferDirection::Send
        } else if session.receives(content.senders()) {
            TransferDirection::Receive
        } else {
            debug!(%key, content = name, senders = %content.senders(), "no one-way direction, closing channel");
            return;
        };
        let (Some(path), Some(file)) = (content.endpoint().map(Path::to_path_buf), content.file().cloned())
        else {
            warn!(%key, content = name, "content has no local endpoint");
            return;
        };
        let chunk_size = content
            .transport()
            .and_then(|descriptor| {
                self.inner
                    .env
                    .transports
                    .get(&descriptor.namespace)
                    .and_then(|plugin| plugin.chunk_size(descriptor))
            })
            .unwrap_or(self.inner.env.config.transfer_chunk_size);
        let total = file.transfer_window().map_or(0, |(_, length)| length);

        let transfers = Arc::clone(&self.inner.transfers);
        let (id, active, cancel_rx) = transfers.register(TransferSpec {
            session: key.clone(),
            creator,
            content: name.to_string(),
            direction,
            path: path.clone(),
            total_size: total,
        });
        info!(%key, content = name, %direction, transfer = %id, total, "transfer started");
        notices.push(Notice::Transfer(transfer_event(
            &key,
            name,
            TransferEventKind::Started { direction, total },
        )));

        let job = TransferJob {
            channel,
            direction,
            path,
            file,
            chunk_size,
            progress_interval: self.inner.env.config.progress_interval_bytes,
            digests: Arc::clone(&self.inner.env.digests),
            active,
        };
        let mut session_cancel = session.cancel_signal();
        let registry = self.downgrade();
        let name = name.to_string();
        tokio::spawn(async move {
            let guard = TransferGuard::new(transfers, id);
            let progress_registry = registry.clone();
            let progress_key = key.clone();
            let progress_name = name.clone();
            let on_progress = move |bytes: u64, total: u64| {
                if let Some(registry) = progress_registry.upgrade() {
                    registry.inner.events.transfers.notify(&transfer_event(
                        &progress_key,
                        &progress_name,
                        TransferEventKind::Progress { bytes, total },
                    ));
                }
            };

            let result = tokio::select! {
                biased;
                () = session_cancel.cancelled() => Err(TransferFailure::Cancelled),
                Ok(()) = cancel_rx => Err(TransferFailure::Cancelled),
                result = task::run(job, on_progress) => result,
            };
            drop(guard);

            if let Some(registry) = registry.upgrade() {
                registry
                    .on_transfer_finished(key, creator, name, direction, result)
                    .await;
            }
        });
    }

    async fn on_transfer_finished(
        &self,
        key: SessionKey,
        creator: Creator,
        name: String,
        direction: TransferDirection,
        result: Result<u64, TransferFailure>,
    ) {
        let outcome = match result {
            Ok(bytes) => TransferOutcome::Success { bytes },
            Err(failure) => TransferOutcome::Failure(failure),
        };
        let Some(handle) = self.session_handle(&key) else {
            debug!(%key, content = %name, "transfer finished after session ended");
            return;
        };
        let mut session = handle.lock().await;
        if session.state() == SessionState::Terminated {
            return;
        }
        let Some(content) = session.content(creator, &name) else {
            return;
        };
        if !record_outcome(&content.outcome_slot(), outcome.clone()) {
            return;
        }

        let mut notices = vec![Notice::Transfer(transfer_event(
            &key,
            &name,
            TransferEventKind::Finished(outcome.clone()),
        ))];
        match outcome {
            TransferOutcome::Success { bytes } => {
                info!(%key, content = %name, %direction, bytes, "transfer finished");
                if direction == TransferDirection::Receive {
                    let received = session.message(JingleAction::SessionInfo).with_info(
                        SessionInfo::Received {
                            creator,
                            name: name.clone(),
                        },
                    );
                    self.enqueue(received, FailurePolicy::LogOnly);

                    let complete = session
                        .contents()
                        .iter()
                        .filter(|c| c.is_live())
                        .all(|c| c.outcome().is_some_and(|o| o.is_success()));
                    if complete {
                        self.terminate_locked(
                            &mut session,
                            ReasonElement::new(Reason::Success),
                            true,
                            &mut notices,
                        );
                    }
                }
            }
            TransferOutcome::Failure(TransferFailure::Cancelled)
            | TransferOutcome::Failure(TransferFailure::SessionTerminated(_)) => {
                debug!(%key, content = %name, "transfer cancelled");
            }
            TransferOutcome::Failure(failure) => {
                warn!(%key, content = %name, %direction, error = %failure, "transfer failed");
                self.terminate_locked(
                    &mut session,
                    ReasonElement::new(failure.reason()).with_text(failure.to_string()),
                    true,
                    &mut notices,
                );
            }
        }
        drop(session);
        self.emit(notices);
    }

    // =========================================================================
    // Local operations
    // =========================================================================

    /// Start a session with one content and send session-initiate
    ///
    /// The session is registered before the request leaves, so the peer's
    /// answer always finds it.
    pub async fn create_outgoing(
        &self,
        peer: &Jid,
        content: OutgoingContent,
    ) -> Result<TransferHandle, JingleError> {
        self.check_outgoing(&content, Role::Initiator)?;
        let plugin = self
            .inner
            .env
            .transports
            .best_for(peer, &self.inner.capabilities, &BTreeSet::new())
            .await
            .ok_or_else(|| JingleError::NoCommonTransport(peer.clone()))?;

        let mut session = Session::new(
            self.local().clone(),
            peer.clone(),
            SessionId::generate(),
            Role::Initiator,
        );
        let name = content.name.clone();
        let content = build_content(Role::Initiator, content, plugin.as_ref());
        let outcome = content.subscribe_outcome();
        let message = session
            .message(JingleAction::SessionInitiate)
            .with_content(content.to_element(true));
        session
            .add_content(content)
            .map_err(|_| JingleError::InvalidDescription(format!("duplicate content {name}")))?;

        let key = session.key();
        match self
            .inner
            .sessions
            .lock()
            .expect("session map lock poisoned")
            .entry(key.clone())
        {
            Entry::Occupied(_) => {
                return Err(JingleError::InvalidDescription(format!(
                    "session id {} already in use",
                    key.sid
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(AsyncMutex::new(session)));
            }
        }

        info!(
            %key,
            content = %name,
            transport = plugin.namespace(),
            "session initiated"
        );
        self.enqueue(message, FailurePolicy::TerminateOnFailure(key.clone()));
        Ok(TransferHandle::new(
            self.downgrade(),
            key,
            Role::Initiator,
            name,
            outcome,
        ))
    }

    /// Propose another content in an active session (content-add)
    pub async fn add_content(
        &self,
        key: &SessionKey,
        content: OutgoingContent,
    ) -> Result<TransferHandle, JingleError> {
        let (peer, excluded) = {
            let session = self.locked(key).await?;
            self.check_outgoing(&content, session.role())?;
            (
                session.remote().clone(),
                session.failed_transport_methods().clone(),
            )
        };
        let plugin = self
            .inner
            .env
            .transports
            .best_for(&peer, &self.inner.capabilities, &excluded)
            .await
            .ok_or_else(|| JingleError::NoCommonTransport(peer.clone()))?;

        let mut session = self.locked(key).await?;
        if session.state() != SessionState::Active {
            return Err(JingleError::SessionNotActive);
        }
        let role = session.role();
        let name = content.name.clone();
        let content = build_content(role, content, plugin.as_ref());
        let outcome = content.subscribe_outcome();
        let message = session
            .message(JingleAction::ContentAdd)
            .with_content(content.to_element(true));
        session
            .add_content(content)
            .map_err(|_| JingleError::InvalidDescription(format!("content {name} already exists")))?;
        info!(%key, content = %name, "content added");
        self.enqueue(message, FailurePolicy::LogOnly);
        Ok(TransferHandle::new(self.downgrade(), key.clone(), role, name, outcome))
    }

    fn check_outgoing(&self, content: &OutgoingContent, role: Role) -> Result<(), JingleError> {
        validate_content_name(&content.name)
            .map_err(|e| JingleError::InvalidDescription(e.to_string()))?;
        // What we send must be bounded and verifiable by the receiver
        if content.senders.includes(role)
            && let Some(file) = content.description.file()
        {
            if file.hashes.is_empty() {
                return Err(JingleError::InvalidDescription(
                    "offered file carries no digest".into(),
                ));
            }
            if file.transfer_window().is_none() {
                return Err(JingleError::InvalidDescription(
                    "offered file has no size or an invalid range".into(),
                ));
            }
        }
        if let Some(security) = &content.security
            && !self.inner.env.security.contains(&security.namespace)
        {
            return Err(JingleError::UnsupportedSecurity(security.namespace.clone()));
        }
        Ok(())
    }

    /// Accept a content the peer proposed
    ///
    /// In a pending session this sends session-accept (contents still
    /// proposed at that point are left out and count as rejected); in an
    /// active session it sends content-accept. Establishment starts right
    /// after. `description` replaces the peer's, which is how a request is
    /// answered with the real file's metadata.
    pub async fn accept_content(
        &self,
        key: &SessionKey,
        creator: Creator,
        name: &str,
        endpoint: PathBuf,
        description: Option<DescriptionElement>,
    ) -> Result<TransferHandle, JingleError> {
        let mut session = self.locked(key).await?;
        let state = session.state();
        let role = session.role();
        let content = session
            .content_mut(creator, name)
            .ok_or_else(|| JingleError::UnknownContent(name.to_string()))?;
        if content.creator() == role {
            return Err(ContentError::InvalidTransition {
                state: content.state(),
                operation: "accept",
            }
            .into());
        }
        content.accept(state)?;
        content.set_endpoint(endpoint);
        if let Some(description) = description {
            content.set_description(description);
        }
        let outcome = content.subscribe_outcome();

        let mut notices = Vec::new();
        if state == SessionState::Pending {
            let left_out: Vec<(Creator, String)> = session
                .contents()
                .iter()
                .filter(|c| c.state() == ContentState::Proposed)
                .map(|c| (c.creator(), c.name().to_string()))
                .collect();
            for (creator, name) in &left_out {
                if let Some(content) = session.content_mut(*creator, name) {
                    content.reject(state)?;
                }
                self.cancel_content(&session, *creator, name, &mut notices);
            }

            let accepted: Vec<(Creator, String)> = session
                .contents()
                .iter()
                .filter(|c| c.state() == ContentState::Accepted)
                .map(|c| (c.creator(), c.name().to_string()))
                .collect();
            let message = session.contents().iter().filter(|c| c.state() == ContentState::Accepted).fold(
                session.message(JingleAction::SessionAccept),
                |message, c| message.with_content(c.to_element(true)),
            );
            session.activate();
            info!(%key, content = name, "session accepted");
            self.enqueue(message, FailurePolicy::TerminateOnFailure(key.clone()));
            for (creator, name) in accepted {
                self.spawn_establish(&mut session, creator, &name, &mut notices);
            }
        } else {
            let element = session
                .content(creator, name)
                .map(|c| c.to_element(true))
                .ok_or_else(|| JingleError::UnknownContent(name.to_string()))?;
            info!(%key, content = name, "content accepted");
            self.enqueue(
                session.message(JingleAction::ContentAccept).with_content(element),
                FailurePolicy::LogOnly,
            );
            self.spawn_establish(&mut session, creator, name, &mut notices);
        }
        drop(session);
        self.emit(notices);
        Ok(TransferHandle::new(self.downgrade(), key.clone(), creator, name.to_string(), outcome))
    }

    /// Refuse a content the peer proposed (content-reject)
    ///
    /// Refusing the last live content terminates the session instead.
    pub async fn reject_content(
        &self,
        key: &SessionKey,
        creator: Creator,
        name: &str,
        reason: Reason,
    ) -> Result<(), JingleError> {
        self.withdraw_content(key, creator, name, reason, JingleAction::ContentReject)
            .await
    }

    /// Withdraw a content (content-remove), cancelling its transfer
    ///
    /// Removing the last live content terminates the session instead.
    pub async fn remove_content(
        &self,
        key: &SessionKey,
        creator: Creator,
        name: &str,
        reason: Reason,
    ) -> Result<(), JingleError> {
        self.withdraw_content(key, creator, name, reason, JingleAction::ContentRemove)
            .await
    }

    async fn withdraw_content(
        &self,
        key: &SessionKey,
        creator: Creator,
        name: &str,
        reason: Reason,
        action: JingleAction,
    ) -> Result<(), JingleError> {
        let mut session = self.locked(key).await?;
        let state = session.state();
        let role = session.role();
        let others_live = session
            .contents()
            .iter()
            .any(|c| c.is_live() && !c.is_key(creator, name));
        let content = session
            .content_mut(creator, name)
            .ok_or_else(|| JingleError::UnknownContent(name.to_string()))?;
        if action == JingleAction::ContentReject {
            if content.creator() == role {
                return Err(ContentError::InvalidTransition {
                    state: content.state(),
                    operation: "reject",
                }
                .into());
            }
            content.reject(state)?;
        } else {
            content.remove(state)?;
        }

        let mut notices = Vec::new();
        self.cancel_content(&session, creator, name, &mut notices);
        if others_live {
            info!(%key, content = name, %action, %reason, "content withdrawn");
            let message = session
                .message(action)
                .with_content(ContentElement::new(creator, name))
                .with_reason(reason);
            self.enqueue(message, FailurePolicy::LogOnly);
        } else {
            self.terminate_locked(&mut session, ReasonElement::new(reason), true, &mut notices);
        }
        drop(session);
        self.emit(notices);
        Ok(())
    }

    /// Change who may send over an accepted content (content-modify)
    pub async fn modify_content(
        &self,
        key: &SessionKey,
        creator: Creator,
        name: &str,
        senders: Senders,
    ) -> Result<(), JingleError> {
        let mut session = self.locked(key).await?;
        let state = session.state();
        let content = session
            .content_mut(creator, name)
            .ok_or_else(|| JingleError::UnknownContent(name.to_string()))?;
        content.modify(senders, state)?;
        info!(%key, content = name, %senders, "content modified");
        let message = session
            .message(JingleAction::ContentModify)
            .with_content(ContentElement::new(creator, name).with_senders(senders));
        self.enqueue(message, FailurePolicy::LogOnly);
        Ok(())
    }

    /// Send a session-info ping
    pub async fn ping(&self, key: &SessionKey) -> Result<(), JingleError> {
        let session = self.locked(key).await?;
        if session.state() != SessionState::Active {
            return Err(JingleError::SessionNotActive);
        }
        self.enqueue(
            session
                .message(JingleAction::SessionInfo)
                .with_info(SessionInfo::Ping),
            FailurePolicy::LogOnly,
        );
        Ok(())
    }

    /// Terminate a session and tell the peer
    ///
    /// Returns `false` if the session is unknown or already terminated;
    /// calling it twice is harmless.
    pub async fn terminate(&self, key: &SessionKey, reason: impl Into<ReasonElement>) -> bool {
        self.finish_session(key, reason.into(), true).await
    }
}

/// Establish a channel with `plugin` and wrap it in `security` when set
async fn open_channel(
    plugin: Arc<dyn TransportPlugin>,
    params: EstablishParams,
    security: Option<Arc<dyn SecurityLayer>>,
    role: Role,
) -> Result<ByteChannel, TransportError> {
    let channel = tokio::time::timeout(params.timeout, plugin.establish(params.clone()))
        .await
        .map_err(|_| TransportError::Timeout)??;
    match security {
        Some(layer) => layer.wrap(channel, role).await,
        None => Ok(channel),
    }
}

fn build_content(role: Role, content: OutgoingContent, plugin: &dyn TransportPlugin) -> Content {
    let transport = plugin.propose_for_initiator(&content.name);
    Content::new(role, content.name, content.senders, content.description)
        .with_transport(transport)
        .with_security(content.security)
        .with_endpoint(content.endpoint)
}

fn transfer_event(key: &SessionKey, content: &str, kind: TransferEventKind) -> TransferEvent {
    TransferEvent {
        sid: key.sid.clone(),
        peer: key.remote.clone(),
        content: content.to_string(),
        kind,
    }
}

// =============================================================================
// Handles
// =============================================================================

/// Caller's handle on one content of a session
#[derive(Debug, Clone)]
pub struct TransferHandle {
    registry: WeakSessionRegistry,
    key: SessionKey,
    creator: Creator,
    content: String,
    outcome: OutcomeReceiver,
}

impl TransferHandle {
    pub(crate) fn new(
        registry: WeakSessionRegistry,
        key: SessionKey,
        creator: Creator,
        content: String,
        outcome: OutcomeReceiver,
    ) -> Self {
        Self {
            registry,
            key,
            creator,
            content,
            outcome,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn peer(&self) -> &Jid {
        &self.key.remote
    }

    pub fn sid(&self) -> &SessionId {
        &self.key.sid
    }

    pub fn creator(&self) -> Creator {
        self.creator
    }

    pub fn content_name(&self) -> &str {
        &self.content
    }

    /// The outcome, if the content already finished
    pub fn outcome(&self) -> Option<TransferOutcome> {
        self.outcome.current()
    }

    /// Wait for the content's terminal outcome
    pub async fn wait(&mut self) -> TransferOutcome {
        self.outcome.wait().await
    }

    /// Cancel this content; the session ends if it was the last one
    pub async fn cancel(&self) -> Result<(), JingleError> {
        let registry = self
            .registry
            .upgrade()
            .ok_or(JingleError::SessionTerminated)?;
        registry
            .remove_content(&self.key, self.creator, &self.content, Reason::Cancel)
            .await
    }
}
