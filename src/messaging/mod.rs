//! Cross-context message protocol.
//!
//! Contexts share no state; they exchange `Envelope`s over the `MessageBus`.

pub mod bus;
pub mod envelope;

pub use bus::{ContextRouter, Delivery, MessageBus, Origin, RouterError};
pub use envelope::{
    Envelope, EnvelopeError, Message, ParticipantsUpdate, RawEnvelope, Reply, StartRecording,
    Target,
};

use crate::tabs::TabId;

/// Why a page update was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderRejection {
    NoSession,
    NotFromTab,
    ForeignTab { sender: TabId, session: TabId },
}

/// Page-observer updates are only accepted from the tab that owns the
/// current session. Guards against several matching tabs and against
/// stale messages arriving after a tab switch or session end.
pub fn validate_page_sender(
    origin: &Origin,
    session_tab: Option<TabId>,
) -> Result<TabId, SenderRejection> {
    let session = session_tab.ok_or(SenderRejection::NoSession)?;
    let sender = origin.tab.ok_or(SenderRejection::NotFromTab)?;
    if sender != session {
        return Err(SenderRejection::ForeignTab { sender, session });
    }
    Ok(sender)
}
