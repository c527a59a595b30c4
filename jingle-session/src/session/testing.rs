//! Shared test utilities for session and handler tests

use std::sync::Arc;

use async_trait::async_trait;
use jingle_common::hash::{HashAlgorithm, compute};
use jingle_common::protocol::{
    ContentElement, DescriptionElement, FileElement, HashElement, Jid, JingleAction,
    JingleMessage, Role, Senders, SessionId, TransportElement,
};
use jingle_common::{NS_IBB_TRANSPORT, NegotiationError};

use super::Session;
use super::handlers::{Effect, Handler, HandlerContext};
use crate::config::EngineConfig;
use crate::content::Content;
use crate::digest::Sha2Digests;
use crate::error::TransportError;
use crate::loopback::LoopbackBytestreams;
use crate::registry::Environment;
use crate::security::SecurityRegistry;
use crate::transports::{
    ByteChannel, EstablishParams, InBandTransport, TransportManager, TransportPlugin,
};

pub const ROMEO: &str = "romeo@montague.example/orchard";
pub const JULIET: &str = "juliet@capulet.example/balcony";

/// Second transport namespace known to the test environment
pub const NS_TEST_TRANSPORT: &str = "urn:test:transport";

pub fn romeo() -> Jid {
    Jid::parse(ROMEO).unwrap()
}

pub fn juliet() -> Jid {
    Jid::parse(JULIET).unwrap()
}

/// Transport whose establishment always fails
pub struct FailingTransport(pub &'static str);

#[async_trait]
impl TransportPlugin for FailingTransport {
    fn namespace(&self) -> &str {
        self.0
    }

    fn propose_for_initiator(&self, _content_name: &str) -> TransportElement {
        TransportElement::new(self.0).with_sid("failing")
    }

    fn propose_from_peer_offer(
        &self,
        remote: &TransportElement,
    ) -> Result<TransportElement, TransportError> {
        Ok(remote.clone())
    }

    async fn establish(&self, _params: EstablishParams) -> Result<ByteChannel, TransportError> {
        Err(TransportError::Rejected(format!("{} always fails", self.0)))
    }
}

/// Environment with the in-band transport and one failing test transport
pub fn environment(local: Jid) -> Environment {
    let config = EngineConfig::default();
    let ibb: Arc<dyn TransportPlugin> = Arc::new(InBandTransport::from_config(
        Arc::new(LoopbackBytestreams::new()),
        &config,
    ));
    let failing: Arc<dyn TransportPlugin> = Arc::new(FailingTransport(NS_TEST_TRANSPORT));
    Environment {
        local,
        transports: TransportManager::new(vec![ibb, failing], &config.transport_preference),
        security: SecurityRegistry::default(),
        digests: Arc::new(Sha2Digests),
        config,
    }
}

/// A 1000-byte PDF offer with a SHA-256 digest
pub fn report_pdf() -> FileElement {
    FileElement {
        name: Some("report.pdf".to_string()),
        media_type: Some("application/pdf".to_string()),
        size: Some(1000),
        hashes: vec![HashElement::new(
            HashAlgorithm::Sha256,
            compute(HashAlgorithm::Sha256, &[7u8; 1000]).unwrap(),
        )],
        ..Default::default()
    }
}

pub fn ibb_transport() -> TransportElement {
    TransportElement::new(NS_IBB_TRANSPORT)
        .with_block_size(4096)
        .with_sid("ibb-stream")
}

/// The initiator's offer of [`report_pdf`] as content "report"
pub fn offer_element() -> ContentElement {
    ContentElement::new(Role::Initiator, "report")
        .with_senders(Senders::Initiator)
        .with_description(DescriptionElement::file_transfer(report_pdf()))
        .with_transport(ibb_transport())
}

/// A session-initiate from Romeo to Juliet carrying `content`
pub fn initiate(sid: &SessionId, content: ContentElement) -> JingleMessage {
    JingleMessage::new(romeo(), juliet(), JingleAction::SessionInitiate, sid.clone())
        .with_initiator(romeo())
        .with_content(content)
}

/// A message from Juliet (responder) to Romeo
pub fn from_responder(sid: &SessionId, action: JingleAction) -> JingleMessage {
    JingleMessage::new(juliet(), romeo(), action, sid.clone())
}

/// A message from Romeo (initiator) to Juliet
pub fn from_initiator(sid: &SessionId, action: JingleAction) -> JingleMessage {
    JingleMessage::new(romeo(), juliet(), action, sid.clone())
}

/// Fresh responder session on Juliet's side
pub fn responder_session(sid: &SessionId) -> Session {
    Session::new(romeo(), juliet(), sid.clone(), Role::Responder)
}

/// Romeo's pending session offering [`report_pdf`] over in-band bytestreams
pub fn initiator_session(sid: &SessionId) -> Session {
    let mut session = Session::new(romeo(), juliet(), sid.clone(), Role::Initiator);
    let content = Content::new(
        Role::Initiator,
        "report",
        Senders::Initiator,
        DescriptionElement::file_transfer(report_pdf()),
    )
    .with_transport(ibb_transport());
    session.add_content(content).unwrap();
    session
}

/// Run a handler and return its result and effects
pub fn run(
    handler: Handler,
    session: &mut Session,
    env: &Environment,
    message: &JingleMessage,
) -> (Result<(), NegotiationError>, Vec<Effect>) {
    let mut ctx = HandlerContext::new(session, env);
    let result = handler(message, &mut ctx);
    (result, ctx.effects)
}

/// Drive Juliet's session through an inbound initiate of [`offer_element`]
pub fn accepted_responder_session(sid: &SessionId, env: &Environment) -> Session {
    let mut session = responder_session(sid);
    let (result, _) = run(
        super::handlers::handle_session_initiate,
        &mut session,
        env,
        &initiate(sid, offer_element()),
    );
    result.unwrap();
    let content = session
        .content_mut(Role::Initiator, "report")
        .unwrap();
    content.accept(super::SessionState::Pending).unwrap();
    session.activate();
    session
}

/// Romeo's session after Juliet accepted
pub fn active_initiator_session(sid: &SessionId) -> Session {
    let mut session = initiator_session(sid);
    session
        .content_mut(Role::Initiator, "report")
        .unwrap()
        .accept(super::SessionState::Pending)
        .unwrap();
    session.activate();
    session
}

/// Effects of a given shape
pub fn count(effects: &[Effect], matches: impl Fn(&Effect) -> bool) -> usize {
    effects.iter().filter(|e| matches(e)).count()
}

/// Messages queued by a handler
pub fn sent(effects: &[Effect]) -> Vec<&JingleMessage> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Send(message) => Some(message),
            _ => None,
        })
        .collect()
}
