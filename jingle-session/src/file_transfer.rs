//! File-transfer application
//!
//! The thin layer callers use to offer, request, accept and decline files.
//! Offers and requests differ only in who sends: an offer is sent by the
//! initiator, a request asks the responder to send.

use std::path::{Path, PathBuf};

use jingle_common::NS_FILE_TRANSFER;
use jingle_common::protocol::{
    Creator, DescriptionElement, FileElement, Jid, Reason, Senders, SessionId,
};
use tracing::{debug, info};

use crate::description::describe_file;
use crate::error::JingleError;
use crate::events::{ListenerId, SessionEvent, TransferEvent, TransferOutcome};
use crate::registry::{OutgoingContent, SessionRegistry, TransferHandle, WeakSessionRegistry};
use crate::session::SessionKey;

/// Content name used for the single file of an offer or request
const FILE_CONTENT_NAME: &str = "file";

/// Entry point for file transfers over one session registry
#[derive(Debug, Clone)]
pub struct FileTransferManager {
    registry: SessionRegistry,
}

impl FileTransferManager {
    /// Wrap `registry` and announce file-transfer support
    pub fn new(registry: SessionRegistry) -> Self {
        registry.capabilities().announce(NS_FILE_TRANSFER);
        Self { registry }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Offer the file at `path` to `peer`
    ///
    /// Fails before anything is sent if the file does not exist, the peer
    /// lacks file-transfer support or no transport is shared.
    pub async fn send_file(&self, path: &Path, peer: &Jid) -> Result<OutgoingFileOffer, JingleError> {
        self.offer(path, None, peer).await
    }

    /// Offer the file at `path` under a different advertised name
    pub async fn send_file_as(
        &self,
        path: &Path,
        name: &str,
        peer: &Jid,
    ) -> Result<OutgoingFileOffer, JingleError> {
        self.offer(path, Some(name), peer).await
    }

    async fn offer(
        &self,
        path: &Path,
        name: Option<&str>,
        peer: &Jid,
    ) -> Result<OutgoingFileOffer, JingleError> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => {}
            _ => return Err(JingleError::FileNotFound(path.to_path_buf())),
        }
        self.check_peer(peer).await?;

        let file = describe_file(
            path,
            name,
            self.registry.config().digest_algorithm,
            self.registry.digests(),
        )
        .await?;
        let handle = self
            .registry
            .create_outgoing(
                peer,
                OutgoingContent {
                    name: FILE_CONTENT_NAME.to_string(),
                    senders: Senders::Initiator,
                    description: DescriptionElement::file_transfer(file.clone()),
                    endpoint: path.to_path_buf(),
                    security: None,
                },
            )
            .await?;
        info!(
            %peer,
            sid = %handle.sid(),
            file = file.name.as_deref().unwrap_or(""),
            size = file.size.unwrap_or(0),
            "file offered"
        );
        Ok(OutgoingFileOffer { file, handle })
    }

    /// Ask `peer` to send a file matching `criteria`, stored at `target`
    pub async fn request_file(
        &self,
        criteria: FileElement,
        peer: &Jid,
        target: &Path,
    ) -> Result<OutgoingFileRequest, JingleError> {
        if let Some(name) = &criteria.name {
            jingle_common::validators::validate_file_name(name)
                .map_err(|e| JingleError::InvalidDescription(e.to_string()))?;
        }
        self.check_peer(peer).await?;

        let handle = self
            .registry
            .create_outgoing(
                peer,
                OutgoingContent {
                    name: FILE_CONTENT_NAME.to_string(),
                    senders: Senders::Responder,
                    description: DescriptionElement::file_transfer(criteria.clone()),
                    endpoint: target.to_path_buf(),
                    security: None,
                },
            )
            .await?;
        info!(%peer, sid = %handle.sid(), "file requested");
        Ok(OutgoingFileRequest {
            criteria,
            handle,
        })
    }

    async fn check_peer(&self, peer: &Jid) -> Result<(), JingleError> {
        if !self
            .registry
            .capabilities()
            .supports(peer, NS_FILE_TRANSFER)
            .await
        {
            return Err(JingleError::FeatureNotSupported {
                peer: peer.clone(),
                namespace: NS_FILE_TRANSFER.to_string(),
            });
        }
        if !self.registry.has_common_transport(peer).await {
            return Err(JingleError::NoCommonTransport(peer.clone()));
        }
        Ok(())
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    pub fn add_incoming_offer_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&IncomingFileOffer) + Send + Sync + 'static,
    {
        self.registry.events().offers.add(listener)
    }

    pub fn remove_incoming_offer_listener(&self, id: ListenerId) -> bool {
        self.registry.events().offers.remove(id)
    }

    pub fn add_incoming_request_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&IncomingFileRequest) + Send + Sync + 'static,
    {
        self.registry.events().requests.add(listener)
    }

    pub fn remove_incoming_request_listener(&self, id: ListenerId) -> bool {
        self.registry.events().requests.remove(id)
    }

    /// Transfer start, progress and terminal outcome
    pub fn add_progress_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&TransferEvent) + Send + Sync + 'static,
    {
        self.registry.events().transfers.add(listener)
    }

    pub fn remove_progress_listener(&self, id: ListenerId) -> bool {
        self.registry.events().transfers.remove(id)
    }

    pub fn add_session_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.registry.events().sessions.add(listener)
    }

    pub fn remove_session_listener(&self, id: ListenerId) -> bool {
        self.registry.events().sessions.remove(id)
    }
}

// =============================================================================
// Outgoing handles
// =============================================================================

/// A file we offered
#[derive(Debug)]
pub struct OutgoingFileOffer {
    file: FileElement,
    handle: TransferHandle,
}

impl OutgoingFileOffer {
    /// The description sent to the peer
    pub fn file(&self) -> &FileElement {
        &self.file
    }

    pub fn handle(&self) -> &TransferHandle {
        &self.handle
    }

    pub fn key(&self) -> &SessionKey {
        self.handle.key()
    }

    pub async fn wait(&mut self) -> TransferOutcome {
        self.handle.wait().await
    }

    pub async fn cancel(&self) -> Result<(), JingleError> {
        self.handle.cancel().await
    }
}

/// A file we asked the peer for
#[derive(Debug)]
pub struct OutgoingFileRequest {
    criteria: FileElement,
    handle: TransferHandle,
}

impl OutgoingFileRequest {
    /// What we asked for
    pub fn criteria(&self) -> &FileElement {
        &self.criteria
    }

    pub fn handle(&self) -> &TransferHandle {
        &self.handle
    }

    pub fn key(&self) -> &SessionKey {
        self.handle.key()
    }

    pub async fn wait(&mut self) -> TransferOutcome {
        self.handle.wait().await
    }

    pub async fn cancel(&self) -> Result<(), JingleError> {
        self.handle.cancel().await
    }
}

// =============================================================================
// Incoming handles
// =============================================================================

/// A file the peer offers us
#[derive(Debug, Clone)]
pub struct IncomingFileOffer {
    registry: WeakSessionRegistry,
    key: SessionKey,
    creator: Creator,
    name: String,
    file: FileElement,
}

impl IncomingFileOffer {
    pub(crate) fn new(
        registry: WeakSessionRegistry,
        key: SessionKey,
        creator: Creator,
        name: String,
        file: FileElement,
    ) -> Self {
        Self {
            registry,
            key,
            creator,
            name,
            file,
        }
    }

    pub fn peer(&self) -> &Jid {
        &self.key.remote
    }

    pub fn sid(&self) -> &SessionId {
        &self.key.sid
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn content_name(&self) -> &str {
        &self.name
    }

    /// The offered file's description
    pub fn file(&self) -> &FileElement {
        &self.file
    }

    /// Accept the offer and store the file at `target`
    pub async fn accept(&self, target: impl Into<PathBuf>) -> Result<TransferHandle, JingleError> {
        let registry = upgrade(&self.registry)?;
        let target = target.into();
        debug!(key = %self.key, target = %target.display(), "accepting file offer");
        registry
            .accept_content(&self.key, self.creator, &self.name, target, None)
            .await
    }

    /// Refuse the offer
    pub async fn decline(&self) -> Result<(), JingleError> {
        let registry = upgrade(&self.registry)?;
        registry
            .reject_content(&self.key, self.creator, &self.name, Reason::Decline)
            .await
    }
}

/// The peer asks us to send a file
#[derive(Debug, Clone)]
pub struct IncomingFileRequest {
    registry: WeakSessionRegistry,
    key: SessionKey,
    creator: Creator,
    name: String,
    criteria: FileElement,
}

impl IncomingFileRequest {
    pub(crate) fn new(
        registry: WeakSessionRegistry,
        key: SessionKey,
        creator: Creator,
        name: String,
        criteria: FileElement,
    ) -> Self {
        Self {
            registry,
            key,
            creator,
            name,
            criteria,
        }
    }

    pub fn peer(&self) -> &Jid {
        &self.key.remote
    }

    pub fn sid(&self) -> &SessionId {
        &self.key.sid
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn content_name(&self) -> &str {
        &self.name
    }

    /// What the peer asks for
    pub fn criteria(&self) -> &FileElement {
        &self.criteria
    }

    /// Serve the request from the file at `source`
    ///
    /// The file must match every property the request specifies. The
    /// session-accept carries its full description.
    pub async fn accept(&self, source: &Path) -> Result<TransferHandle, JingleError> {
        let registry = upgrade(&self.registry)?;
        let mut file = describe_file(
            source,
            self.criteria.name.as_deref(),
            registry.config().digest_algorithm,
            registry.digests(),
        )
        .await?;
        if !file.matches(&self.criteria) {
            return Err(JingleError::InvalidDescription(format!(
                "{} does not match the requested file",
                source.display()
            )));
        }
        file.range = self.criteria.range.clone();
        if file.size.is_some() && file.transfer_window().is_none() {
            return Err(JingleError::InvalidDescription(
                "requested range lies outside the file".into(),
            ));
        }

        debug!(key = %self.key, source = %source.display(), "serving file request");
        registry
            .accept_content(
                &self.key,
                self.creator,
                &self.name,
                source.to_path_buf(),
                Some(DescriptionElement::file_transfer(file)),
            )
            .await
    }

    /// Refuse the request
    pub async fn decline(&self) -> Result<(), JingleError> {
        let registry = upgrade(&self.registry)?;
        registry
            .reject_content(&self.key, self.creator, &self.name, Reason::Decline)
            .await
    }
}

fn upgrade(registry: &WeakSessionRegistry) -> Result<SessionRegistry, JingleError> {
    registry.upgrade().ok_or(JingleError::SessionTerminated)
}
